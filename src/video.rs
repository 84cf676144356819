//! Video stream driver.
//!
//! Two-step remote workflow: create a media post, then consume a
//! chat-style chunked stream that references it. The driver exists in two
//! interchangeable implementations — the browser-impersonation transport
//! (ordered profile list, advancing only on a transport-blocked signature)
//! and the plain chunked-HTTP transport. The orchestrator prefers
//! impersonation and falls back to plain only when it is disabled or
//! raises a transport error.

use std::{
    collections::BTreeSet,
    io::{BufRead, BufReader},
    time::Duration,
};

use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};

use crate::{
    config::GenerationConfig,
    credentials::Credential,
    error::{ClientResult, ErrorCode, GenerationFailure, GenerationSuccess, Outcome},
    protocol::{
        parse_stream_line, MediaPostCreate, MediaPostResponse, StreamLine, UpscaleRequest,
        UpscaleResponse, VideoChatPayload, VideoPreset,
    },
    storage::MediaStore,
    transport::{
        impersonate::{self, ImpersonationProfile, PROFILES},
        SessionBuilder,
    },
};

/// Preview thumbnails carried on a `video_not_supported` failure.
const MAX_PREVIEW_URLS: usize = 3;

/// Resolution tier that triggers the upscale exchange.
const UPSCALE_RESOLUTION: &str = "720p";

static VIDEO_ID_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"/generated/([0-9a-fA-F-]{32,36})/").unwrap(),
        Regex::new(r"/([0-9a-fA-F-]{32,36})/generated_video").unwrap(),
    ]
});

/// Parameters for one video generation call.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub duration_seconds: u32,
    pub resolution: String,
    pub preset: VideoPreset,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: "16:9".to_string(),
            duration_seconds: 6,
            resolution: "480p".to_string(),
            preset: VideoPreset::Normal,
        }
    }
}

/// Run one transport attempt, preferring the impersonation path.
pub(crate) async fn run_attempt(
    session: &SessionBuilder,
    config: &GenerationConfig,
    store: &dyn MediaStore,
    credential: &Credential,
    request: &VideoRequest,
) -> ClientResult<Outcome> {
    let outcome = if config.impersonation {
        match impersonated_flow(session, config, credential, request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(error = %error, "impersonation path failed, falling back to plain transport");
                plain_flow(session, config, credential, request).await?
            }
        }
    } else {
        plain_flow(session, config, credential, request).await?
    };

    match outcome {
        Outcome::Success(mut success) => {
            if let Some(raw_url) = success.urls.first().cloned() {
                let upscaled =
                    maybe_upscale(session, config, credential, &raw_url, &request.resolution).await;
                let stored = store.store_video(&upscaled, Some(credential)).await;
                info!(url = %stored, "video generation complete");
                success.urls = vec![stored];
            }
            Ok(Outcome::Success(success))
        }
        failure => Ok(failure),
    }
}

// ============================================================================
// Plain chunked-HTTP implementation
// ============================================================================

async fn plain_flow(
    session: &SessionBuilder,
    config: &GenerationConfig,
    credential: &Credential,
    request: &VideoRequest,
) -> ClientResult<Outcome> {
    let client = session.http();

    let headers = session.chunked_headers(credential, &config.origin, None)?;
    let response = client
        .post(&config.media_post_url)
        .headers(headers)
        .json(&MediaPostCreate::video(&request.prompt))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body_head(&body), "media post creation failed");
        return Ok(Outcome::Failure(GenerationFailure::coded(
            ErrorCode::VideoPostFailed,
            format!("media post failed ({})", status.as_u16()),
        )));
    }
    let post_id = response
        .json::<MediaPostResponse>()
        .await
        .ok()
        .and_then(|body| body.post)
        .map(|post| post.id)
        .filter(|id| !id.is_empty());
    let post_id = match post_id {
        Some(id) => id,
        None => {
            return Ok(Outcome::Failure(GenerationFailure::coded(
                ErrorCode::VideoPostFailed,
                "media post response carried no post id",
            )))
        }
    };

    let headers = session.chunked_headers(credential, &format!("{}/", config.origin), None)?;
    let payload = VideoChatPayload::new(
        &request.prompt,
        &post_id,
        &request.aspect_ratio,
        request.duration_seconds,
        &request.resolution,
        request.preset,
    );
    let response = client
        .post(&config.chat_url)
        .headers(headers)
        .json(&payload)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Ok(Outcome::Failure(classify_chat_status(
            status.as_u16(),
            &body,
        )));
    }

    let mut scan = StreamScan::default();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    'consume: while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            if scan.ingest(line.trim_end_matches(['\n', '\r'])) {
                break 'consume;
            }
        }
    }

    Ok(scan.into_outcome())
}

// ============================================================================
// Impersonation-profile implementation
// ============================================================================

/// Result of one profile attempt: either the flow's answer, or a
/// transport-blocked signature that warrants the next profile.
enum ProfileStep {
    Final(Outcome),
    NextProfile(GenerationFailure),
}

async fn impersonated_flow(
    session: &SessionBuilder,
    config: &GenerationConfig,
    credential: &Credential,
    request: &VideoRequest,
) -> ClientResult<Outcome> {
    let referer = format!("{}/imagine", config.origin);
    let mut last_failure = GenerationFailure::message("impersonated video flow failed");

    for profile in PROFILES {
        let media_headers = session.chunked_headers(credential, &referer, Some(profile))?;
        let chat_headers = session.chunked_headers(credential, &referer, Some(profile))?;
        let task = ProfileTask {
            profile: *profile,
            proxy: config.proxy.clone(),
            timeout: config.attempt_deadline.max(Duration::from_secs(120)),
            media_post_url: config.media_post_url.clone(),
            chat_url: config.chat_url.clone(),
            media_headers,
            chat_headers,
            request: request.clone(),
        };

        match impersonate::run(move || task.execute()).await? {
            ProfileStep::Final(outcome) => return Ok(outcome),
            ProfileStep::NextProfile(failure) => {
                debug!(
                    profile = profile.name,
                    reason = %failure.message,
                    "transport blocked, trying next profile"
                );
                last_failure = failure;
            }
        }
    }

    Ok(Outcome::Failure(last_failure))
}

/// Everything one synchronous profile attempt needs, moved onto the
/// blocking pool in one piece.
struct ProfileTask {
    profile: ImpersonationProfile,
    proxy: Option<String>,
    timeout: Duration,
    media_post_url: String,
    chat_url: String,
    media_headers: HeaderMap,
    chat_headers: HeaderMap,
    request: VideoRequest,
}

impl ProfileTask {
    fn execute(self) -> ClientResult<ProfileStep> {
        let client =
            impersonate::blocking_client(&self.profile, self.proxy.as_deref(), self.timeout)?;

        let response = client
            .post(&self.media_post_url)
            .headers(self.media_headers)
            .json(&MediaPostCreate::video(&self.request.prompt))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Ok(ProfileStep::NextProfile(GenerationFailure::coded(
                ErrorCode::VideoPostFailed,
                format!("media post failed ({}) {}", status.as_u16(), body_head(&body)),
            )));
        }
        let post_id = response
            .json::<MediaPostResponse>()
            .ok()
            .and_then(|body| body.post)
            .map(|post| post.id)
            .filter(|id| !id.is_empty());
        let post_id = match post_id {
            Some(id) => id,
            None => {
                return Ok(ProfileStep::NextProfile(GenerationFailure::coded(
                    ErrorCode::VideoPostFailed,
                    "media post response carried no post id",
                )))
            }
        };

        let payload = VideoChatPayload::new(
            &self.request.prompt,
            &post_id,
            &self.request.aspect_ratio,
            self.request.duration_seconds,
            &self.request.resolution,
            self.request.preset,
        );
        let response = client
            .post(&self.chat_url)
            .headers(self.chat_headers)
            .json(&payload)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let failure = classify_chat_status(status.as_u16(), &body);
            return Ok(if status.as_u16() == 403 {
                ProfileStep::NextProfile(failure)
            } else {
                ProfileStep::Final(Outcome::Failure(failure))
            });
        }

        let mut scan = StreamScan::default();
        for line in BufReader::new(response).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if scan.ingest(&line) {
                break;
            }
        }
        Ok(ProfileStep::Final(scan.into_outcome()))
    }
}

// ============================================================================
// Shared stream consumption and classification
// ============================================================================

/// Accumulator over the chunked stream: the one signal that matters is a
/// progress record reaching 100 with a populated video URL.
#[derive(Debug, Default)]
struct StreamScan {
    seen_kinds: BTreeSet<&'static str>,
    preview_urls: Vec<String>,
    completed: Option<(String, String)>,
}

impl StreamScan {
    /// Feed one raw line; returns true when consumption should stop.
    fn ingest(&mut self, line: &str) -> bool {
        match parse_stream_line(line) {
            StreamLine::Done => true,
            StreamLine::Skip => false,
            StreamLine::Token => {
                self.seen_kinds.insert("token");
                false
            }
            StreamLine::Video(event) => {
                self.seen_kinds.insert("streamingVideoGenerationResponse");
                if !event.thumbnail_image_url.is_empty()
                    && !self.preview_urls.contains(&event.thumbnail_image_url)
                {
                    self.preview_urls.push(event.thumbnail_image_url.clone());
                }
                if event.progress >= 100 && !event.video_url.is_empty() {
                    self.completed = Some((event.video_url, event.thumbnail_image_url));
                    return true;
                }
                false
            }
        }
    }

    fn into_outcome(self) -> Outcome {
        let seen_record_kinds: Vec<String> =
            self.seen_kinds.iter().map(|k| k.to_string()).collect();
        match self.completed {
            Some((video_url, thumbnail_url)) => Outcome::Success(GenerationSuccess {
                urls: vec![video_url],
                payloads_b64: Vec::new(),
                thumbnail_url: (!thumbnail_url.is_empty()).then_some(thumbnail_url),
                seen_record_kinds,
            }),
            None => {
                let mut preview_urls = self.preview_urls;
                preview_urls.truncate(MAX_PREVIEW_URLS);
                Outcome::Failure(GenerationFailure {
                    code: Some(ErrorCode::VideoNotSupported),
                    message: "no qualifying video progress event on stream".to_string(),
                    preview_urls,
                    seen_record_kinds,
                })
            }
        }
    }
}

fn classify_chat_status(status: u16, body: &str) -> GenerationFailure {
    match status {
        429 => GenerationFailure::coded(ErrorCode::RateLimitExceeded, "rate limit exceeded"),
        401 => GenerationFailure::coded(ErrorCode::Unauthorized, "unauthorized"),
        _ => GenerationFailure::message(format!(
            "video chat failed ({status}): {}",
            body_head(body)
        )),
    }
}

/// Upscale exchange for the high resolution tier; any failure falls back
/// silently to the original URL.
async fn maybe_upscale(
    session: &SessionBuilder,
    config: &GenerationConfig,
    credential: &Credential,
    video_url: &str,
    resolution: &str,
) -> String {
    if resolution != UPSCALE_RESOLUTION {
        return video_url.to_string();
    }
    let video_id = match extract_video_id(video_url) {
        Some(id) => id,
        None => return video_url.to_string(),
    };
    let headers = match session.chunked_headers(credential, &config.origin, None) {
        Ok(headers) => headers,
        Err(_) => return video_url.to_string(),
    };

    let exchange = async {
        let response = session
            .http()
            .post(&config.upscale_url)
            .headers(headers)
            .json(&UpscaleRequest::new(video_id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok::<Option<String>, reqwest::Error>(None);
        }
        Ok(response.json::<UpscaleResponse>().await?.hd_media_url)
    };

    match exchange.await {
        Ok(Some(hd_url)) if !hd_url.is_empty() => hd_url,
        Ok(_) => video_url.to_string(),
        Err(error) => {
            debug!(error = %error, "upscale exchange failed, keeping original url");
            video_url.to_string()
        }
    }
}

fn extract_video_id(video_url: &str) -> Option<String> {
    if video_url.is_empty() {
        return None;
    }
    VIDEO_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(video_url)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn body_head(body: &str) -> String {
    body.chars().take(300).collect()
}
