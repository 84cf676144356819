//! Error types and the caller-facing result contract.
//!
//! Two layers, kept deliberately separate:
//!
//! - [`ClientError`]: transport/runtime errors (connection failures, worker
//!   thread failures, bad configuration). These never reach the caller
//!   directly; the orchestrator folds them into the retry loop.
//! - [`Outcome`]: the closed result type returned to callers. Serializes to
//!   `{"success": true, "urls": [...], "count": N, ...}` or
//!   `{"success": false, "error_code"?: ..., "error": ..., ...}`.

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Machine-readable failure codes surfaced to callers.
///
/// Anything outside this set is reported as a generic failure (no code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Blocked,
    RateLimitExceeded,
    Unauthorized,
    VideoPostFailed,
    VideoNotSupported,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Blocked => "blocked",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::VideoPostFailed => "video_post_failed",
            ErrorCode::VideoNotSupported => "video_not_supported",
        }
    }

    /// Map a protocol-level error code string onto the closed set.
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "blocked" => Some(ErrorCode::Blocked),
            "rate_limit_exceeded" => Some(ErrorCode::RateLimitExceeded),
            "unauthorized" => Some(ErrorCode::Unauthorized),
            "video_post_failed" => Some(ErrorCode::VideoPostFailed),
            "video_not_supported" => Some(ErrorCode::VideoNotSupported),
            _ => None,
        }
    }
}

/// Successful generation: servable URLs plus diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSuccess {
    pub urls: Vec<String>,
    /// Base64 payloads for image units that were delivered inline.
    pub payloads_b64: Vec<String>,
    /// Final-frame thumbnail for video jobs, when the stream provided one.
    pub thumbnail_url: Option<String>,
    /// Record kinds observed on the chunked stream, sorted.
    pub seen_record_kinds: Vec<String>,
}

impl GenerationSuccess {
    pub fn from_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Self::default()
        }
    }
}

/// Structured generation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationFailure {
    pub code: Option<ErrorCode>,
    pub message: String,
    /// Preview thumbnails collected before the stream ended, capped to 3.
    pub preview_urls: Vec<String>,
    pub seen_record_kinds: Vec<String>,
}

impl GenerationFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            preview_urls: Vec::new(),
            seen_record_kinds: Vec::new(),
        }
    }

    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            ..Self::message(message)
        }
    }

    pub fn blocked() -> Self {
        Self::coded(
            ErrorCode::Blocked,
            "generation blocked, no final image produced",
        )
    }
}

/// Closed result type returned by every orchestrated call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(GenerationSuccess),
    Failure(GenerationFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(f) => f.code,
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success(s) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("urls", &s.urls)?;
                map.serialize_entry("count", &s.urls.len())?;
                if !s.payloads_b64.is_empty() {
                    map.serialize_entry("b64_list", &s.payloads_b64)?;
                }
                if let Some(thumbnail) = &s.thumbnail_url {
                    map.serialize_entry("thumbnail_url", thumbnail)?;
                }
                if !s.seen_record_kinds.is_empty() {
                    map.serialize_entry("seen_types", &s.seen_record_kinds)?;
                }
                map.end()
            }
            Outcome::Failure(f) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("success", &false)?;
                if let Some(code) = &f.code {
                    map.serialize_entry("error_code", code)?;
                }
                map.serialize_entry("error", &f.message)?;
                if !f.preview_urls.is_empty() {
                    map.serialize_entry("image_preview_urls", &f.preview_urls)?;
                }
                if !f.seen_record_kinds.is_empty() {
                    map.serialize_entry("seen_types", &f.seen_record_kinds)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_wire_shape() {
        let outcome = Outcome::Success(GenerationSuccess::from_urls(vec![
            "https://example.com/a.jpg".to_string(),
            "https://example.com/b.jpg".to_string(),
        ]));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["count"], 2);
        assert_eq!(value["urls"].as_array().unwrap().len(), 2);
        assert!(value.get("error_code").is_none());
    }

    #[test]
    fn test_failure_wire_shape() {
        let outcome = Outcome::Failure(GenerationFailure::coded(
            ErrorCode::RateLimitExceeded,
            "too many requests",
        ));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error_code"], "rate_limit_exceeded");
        assert_eq!(value["error"], "too many requests");
    }

    #[test]
    fn test_generic_failure_has_no_code() {
        let outcome = Outcome::Failure(GenerationFailure::message("no image data received"));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("error_code").is_none());
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::Blocked,
            ErrorCode::RateLimitExceeded,
            ErrorCode::Unauthorized,
            ErrorCode::VideoPostFailed,
            ErrorCode::VideoNotSupported,
        ] {
            assert_eq!(ErrorCode::from_wire(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::from_wire("something_else"), None);
    }
}
