//! Image stream driver.
//!
//! Drives one attempt over the duplex channel: submits the job-creation
//! envelope, classifies inbound partial results, and terminates on target
//! count, silent stall, idle completion, the attempt deadline, or channel
//! close. Protocol error events other than `rate_limit_exceeded` are
//! recorded without stopping the read loop.

use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc,
    time::{timeout, Instant},
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::GenerationConfig,
    credentials::Credential,
    error::{ClientResult, ErrorCode, GenerationFailure, GenerationSuccess, Outcome},
    job::{GenerationJob, MediaUnit, ProgressUpdate},
    protocol::{ChannelEvent, JobCreateEnvelope},
    storage::MediaStore,
    transport::SessionBuilder,
};

/// Parameters for one image generation call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    /// Final images wanted; `None` uses the configured default.
    pub count: Option<usize>,
    pub allow_adult: bool,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: "2:3".to_string(),
            count: None,
            allow_adult: true,
        }
    }
}

/// Run one transport attempt. Structured failures come back as
/// `Ok(Outcome::Failure)`; transport errors bubble up for the
/// orchestrator to rotate on.
pub(crate) async fn run_attempt(
    session: &SessionBuilder,
    config: &GenerationConfig,
    store: &dyn MediaStore,
    credential: &Credential,
    request: &ImageRequest,
    target_count: usize,
    progress: Option<&mpsc::Sender<ProgressUpdate>>,
) -> ClientResult<Outcome> {
    let request_id = Uuid::new_v4().to_string();
    let mut channel = session.connect_duplex(credential).await?;

    let envelope = JobCreateEnvelope::image(
        &request.prompt,
        &request_id,
        &request.aspect_ratio,
        request.allow_adult,
    );
    channel
        .send(Message::Text(serde_json::to_string(&envelope)?))
        .await?;
    info!(request_id = %request_id, target = target_count, "image job submitted");

    let mut job = GenerationJob::new(target_count);
    let mut recorded_error: Option<(String, String)> = None;
    let started = Instant::now();
    let mut last_activity = Instant::now();

    while started.elapsed() < config.attempt_deadline {
        match timeout(config.read_timeout, channel.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                last_activity = Instant::now();

                let event = match serde_json::from_str::<ChannelEvent>(&text) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                match event {
                    ChannelEvent::Image { blob, url } => {
                        if !blob.is_empty() && !url.is_empty() {
                            if let Some(unit) = MediaUnit::from_event(&url, blob, &config.thresholds)
                            {
                                if let Some(update) = job.observe(unit, Instant::now()) {
                                    info!(
                                        unit = %update.unit_id,
                                        stage = ?update.stage,
                                        size = update.size,
                                        completed = update.completed,
                                        target = update.target,
                                        "image unit updated"
                                    );
                                    if let Some(tx) = progress {
                                        let _ = tx.send(update).await;
                                    }
                                }
                            }
                        }
                    }
                    ChannelEvent::Error { err_code, err_msg } => {
                        warn!(code = %err_code, message = %err_msg, "protocol error event");
                        if err_code == "rate_limit_exceeded" {
                            return Ok(Outcome::Failure(GenerationFailure::coded(
                                ErrorCode::RateLimitExceeded,
                                err_msg,
                            )));
                        }
                        recorded_error = Some((err_code, err_msg));
                    }
                    ChannelEvent::Other => {}
                }

                if job.is_satisfied() {
                    info!(completed = job.completed_count(), "target count reached");
                    break;
                }
                if job.stalled(Instant::now(), config.stall.after_receive) {
                    warn!("stall detected on receive path, no final after medium");
                    return Ok(Outcome::Failure(GenerationFailure::blocked()));
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                warn!("duplex channel closed");
                break;
            }
            Ok(Some(Err(error))) => {
                warn!(error = %error, "duplex channel error");
                break;
            }
            Ok(Some(Ok(_))) => {} // ping/pong/binary
            Err(_) => {
                let now = Instant::now();
                if job.stalled(now, config.stall.after_read_timeout) {
                    warn!("stall detected on read timeout, no final after medium");
                    return Ok(Outcome::Failure(GenerationFailure::blocked()));
                }
                if job.completed_count() > 0
                    && now.duration_since(last_activity) > config.idle_complete_after
                {
                    info!(completed = job.completed_count(), "idle, treating as complete");
                    break;
                }
            }
        }
    }

    finish_attempt(store, &job, recorded_error).await
}

/// Exit classification: persist keepers on success, otherwise surface the
/// recorded error, the historical stall condition, or a generic no-data
/// failure, in that order.
async fn finish_attempt(
    store: &dyn MediaStore,
    job: &GenerationJob,
    recorded_error: Option<(String, String)>,
) -> ClientResult<Outcome> {
    if job.completed_count() > 0 {
        let mut urls = Vec::new();
        let mut payloads = Vec::new();
        for unit in job.select_keepers() {
            match store
                .store_image(&unit.unit_id, &unit.source_url, &unit.payload, unit.is_final)
                .await
            {
                Ok(url) => {
                    urls.push(url);
                    payloads.push(unit.payload.clone());
                }
                Err(error) => {
                    warn!(unit = %unit.unit_id, error = %error, "failed to persist image")
                }
            }
        }
        if !urls.is_empty() {
            return Ok(Outcome::Success(GenerationSuccess {
                urls,
                payloads_b64: payloads,
                ..GenerationSuccess::default()
            }));
        }
    }

    if let Some((code, message)) = recorded_error {
        let failure = match ErrorCode::from_wire(&code) {
            Some(code) => GenerationFailure::coded(code, message),
            None => GenerationFailure::message(format!("{code}: {message}")),
        };
        return Ok(Outcome::Failure(failure));
    }
    if job.has_medium_without_final() {
        return Ok(Outcome::Failure(GenerationFailure::blocked()));
    }
    Ok(Outcome::Failure(GenerationFailure::message(
        "no image data received",
    )))
}
