//! Media persistence contract.
//!
//! Turning finished media into durable, servable URLs is an external
//! concern; the drivers only talk to this trait. [`PassthroughStore`] is
//! the in-crate default: it hands the remote locator straight back,
//! normalized against the asset base.

use async_trait::async_trait;

use crate::{credentials::Credential, error::ClientResult};

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist one finished image and return its servable URL.
    ///
    /// `payload_b64` is the inline payload as delivered by the stream;
    /// `is_final` tells the store whether this is the full-quality render.
    async fn store_image(
        &self,
        unit_id: &str,
        source_url: &str,
        payload_b64: &str,
        is_final: bool,
    ) -> ClientResult<String>;

    /// Persist a finished video, fetching it from `source_url` with the
    /// given credential when authentication is required.
    ///
    /// Best-effort: implementations fall back to returning the (normalized)
    /// remote locator rather than failing the generation.
    async fn store_video(&self, source_url: &str, credential: Option<&Credential>) -> String;
}

/// Store that serves media directly from the remote locators.
pub struct PassthroughStore {
    asset_base: String,
}

impl PassthroughStore {
    pub fn new(asset_base: impl Into<String>) -> Self {
        Self {
            asset_base: asset_base.into(),
        }
    }

    /// The stream sometimes delivers bare asset paths; anchor those on the
    /// asset host so the returned locator is always absolute.
    pub fn normalize(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.asset_base, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl MediaStore for PassthroughStore {
    async fn store_image(
        &self,
        _unit_id: &str,
        source_url: &str,
        _payload_b64: &str,
        _is_final: bool,
    ) -> ClientResult<String> {
        Ok(self.normalize(source_url))
    }

    async fn store_video(&self, source_url: &str, _credential: Option<&Credential>) -> String {
        self.normalize(source_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absolute_url_unchanged() {
        let store = PassthroughStore::new("https://assets.example.com");
        let url = store
            .store_image("id", "https://cdn.example.com/images/a.jpg", "", true)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/images/a.jpg");
    }

    #[tokio::test]
    async fn test_relative_url_normalized() {
        let store = PassthroughStore::new("https://assets.example.com");
        let url = store.store_video("users/1/generated/video.mp4", None).await;
        assert_eq!(
            url,
            "https://assets.example.com/users/1/generated/video.mp4"
        );
    }
}
