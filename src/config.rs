//! Client configuration: endpoints, classification thresholds, stall
//! windows, timeouts, proxy and clearance settings.
//!
//! The numeric thresholds and windows are heuristics tuned against the
//! observed behavior of the remote service; they are carried as
//! configuration so deployments can adjust them without a code change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Payload-size thresholds for stage classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageThresholds {
    /// Above this payload size a unit is at least `Medium`.
    pub medium_bytes: usize,
    /// Above this payload size a `.jpg` unit is `Final`.
    pub final_bytes: usize,
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            medium_bytes: 30_000,
            final_bytes: 100_000,
        }
    }
}

/// Grace windows for the silent-stall heuristic.
///
/// The service sometimes stops a job at the medium tier without ever
/// reporting an error; these windows bound how long we wait for a final
/// after the first medium-stage unit.
#[derive(Debug, Clone, Copy)]
pub struct StallWindows {
    /// Checked after each received event.
    pub after_receive: Duration,
    /// Checked when a per-read timeout fires.
    pub after_read_timeout: Duration,
}

impl Default for StallWindows {
    fn default() -> Self {
        Self {
            after_receive: Duration::from_secs(15),
            after_read_timeout: Duration::from_secs(10),
        }
    }
}

/// Retry caps for one orchestrated call.
#[derive(Debug, Clone, Copy)]
pub struct RetryLimits {
    pub max_attempts: usize,
    pub max_blocked_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Duplex (WebSocket) endpoint for image jobs.
    pub duplex_url: String,
    /// Media post creation endpoint (video step 1).
    pub media_post_url: String,
    /// Chat-style chunked stream endpoint (video step 2).
    pub chat_url: String,
    /// Video upscale endpoint (720p tier only).
    pub upscale_url: String,
    /// Age-verification endpoint.
    pub birth_date_url: String,
    /// Origin sent on both channels.
    pub origin: String,
    /// Base URL used to normalize relative asset locators.
    pub asset_base: String,

    /// Proxy URL (`http://`, `https://`, `socks4://` or `socks5://`).
    pub proxy: Option<String>,
    /// Anti-bot clearance cookie value, when available.
    pub cf_clearance: Option<String>,

    /// Images requested when the caller does not specify a count.
    pub default_image_count: usize,
    /// Overall deadline for one transport attempt.
    pub attempt_deadline: Duration,
    /// Per-read timeout on the duplex channel.
    pub read_timeout: Duration,
    /// With at least one final unit, this much silence completes the job.
    pub idle_complete_after: Duration,

    pub thresholds: StageThresholds,
    pub stall: StallWindows,

    /// Prefer the browser-impersonation transport for video jobs.
    pub impersonation: bool,

    pub image_retries: RetryLimits,
    pub video_retries: RetryLimits,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            duplex_url: "wss://grok.com/ws/imagine".to_string(),
            media_post_url: "https://grok.com/rest/media/post/create".to_string(),
            chat_url: "https://grok.com/rest/app-chat/conversations/new".to_string(),
            upscale_url: "https://grok.com/rest/media/video/upscale".to_string(),
            birth_date_url: "https://grok.com/rest/auth/set-birth-date".to_string(),
            origin: "https://grok.com".to_string(),
            asset_base: "https://assets.grok.com".to_string(),
            proxy: None,
            cf_clearance: None,
            default_image_count: 4,
            attempt_deadline: Duration::from_secs(120),
            read_timeout: Duration::from_secs(5),
            idle_complete_after: Duration::from_secs(10),
            thresholds: StageThresholds::default(),
            stall: StallWindows::default(),
            impersonation: true,
            image_retries: RetryLimits {
                max_attempts: 5,
                max_blocked_attempts: 3,
            },
            video_retries: RetryLimits {
                max_attempts: 3,
                max_blocked_attempts: 3,
            },
        }
    }
}

impl GenerationConfig {
    /// Defaults overlaid with environment settings.
    ///
    /// Proxy resolution order matches the conventional variables:
    /// `IMAGINE_PROXY_URL`, then `HTTP_PROXY`, then `HTTPS_PROXY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_non_empty("IMAGINE_DUPLEX_URL") {
            config.duplex_url = url;
        }
        config.proxy = env_non_empty("IMAGINE_PROXY_URL")
            .or_else(|| env_non_empty("HTTP_PROXY"))
            .or_else(|| env_non_empty("HTTPS_PROXY"));
        config.cf_clearance = env_non_empty("IMAGINE_CF_CLEARANCE");
        if let Some(count) = env_non_empty("IMAGINE_DEFAULT_IMAGE_COUNT") {
            if let Ok(count) = count.parse() {
                config.default_image_count = count;
            }
        }
        if let Some(secs) = env_non_empty("IMAGINE_GENERATION_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.attempt_deadline = Duration::from_secs(secs);
            }
        }
        if let Some(flag) = env_non_empty("IMAGINE_IMPERSONATION") {
            config.impersonation = flag != "0" && !flag.eq_ignore_ascii_case("false");
        }

        config
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = GenerationConfig::default();
        assert_eq!(config.thresholds.medium_bytes, 30_000);
        assert_eq!(config.thresholds.final_bytes, 100_000);
        assert_eq!(config.stall.after_receive, Duration::from_secs(15));
        assert_eq!(config.stall.after_read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_default_retry_limits() {
        let config = GenerationConfig::default();
        assert_eq!(config.image_retries.max_attempts, 5);
        assert_eq!(config.image_retries.max_blocked_attempts, 3);
        assert_eq!(config.video_retries.max_attempts, 3);
    }
}
