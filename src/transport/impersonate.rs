//! Browser-impersonation transport.
//!
//! Some endpoints sit behind bot filtering that rejects the plain client.
//! Requests to those endpoints go out through a synchronous client carrying
//! a fixed browser fingerprint profile; an ordered list of profiles is
//! tried until one gets through. The synchronous calls run on the blocking
//! pool and hand their result back exactly once through the join handle,
//! so they never touch the event loop.

use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// One browser fingerprint: the header surface a given Chrome build sends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImpersonationProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub sec_ch_ua: &'static str,
}

/// Newest build first; the filter tends to trust current versions longest.
pub(crate) const PROFILES: &[ImpersonationProfile] = &[
    ImpersonationProfile {
        name: "chrome136",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Chromium\";v=\"136\", \"Google Chrome\";v=\"136\", \"Not.A/Brand\";v=\"99\"",
    },
    ImpersonationProfile {
        name: "chrome133",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Google Chrome\";v=\"133\", \"Chromium\";v=\"133\", \"Not(A:Brand\";v=\"24\"",
    },
    ImpersonationProfile {
        name: "chrome131",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
    },
];

/// Build the synchronous client for one profile.
///
/// Must be called from a blocking context; the returned client is used and
/// dropped there as well.
pub(crate) fn blocking_client(
    profile: &ImpersonationProfile,
    proxy: Option<&str>,
    timeout: Duration,
) -> ClientResult<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(profile.user_agent)
        .danger_accept_invalid_certs(true)
        .timeout(timeout);
    if let Some(proxy) = proxy {
        builder =
            builder.proxy(reqwest::Proxy::all(proxy).map_err(|e| ClientError::Proxy(e.to_string()))?);
    }
    Ok(builder.build()?)
}

/// Run a synchronous task on the blocking pool.
///
/// The join handle is the one-shot handoff; a panicked or cancelled task
/// surfaces as [`ClientError::Worker`] rather than unwinding into the
/// event loop.
pub(crate) async fn run<T, F>(task: F) -> ClientResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ClientResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ClientError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_order_is_newest_first() {
        let names: Vec<&str> = PROFILES.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["chrome136", "chrome133", "chrome131"]);
    }

    #[tokio::test]
    async fn test_run_returns_task_value() {
        let value = run(|| Ok(41 + 1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_surfaces_panic_as_worker_error() {
        let result: ClientResult<()> = run(|| panic!("boom")).await;
        assert!(matches!(result, Err(ClientError::Worker(_))));
    }
}
