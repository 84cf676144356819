//! Retry/failover orchestrator and the public client surface.
//!
//! One state machine per call: acquire a credential, run a transport
//! attempt, then classify the result. `blocked` outcomes are retried a
//! bounded number of times before becoming terminal; rate-limit and
//! authorization failures rotate to a fresh credential; other structured
//! failures return immediately. A pinned credential disables failover
//! entirely. No error crosses this boundary uncaught — transport errors
//! are recorded against the active credential and folded into the loop.

use std::{future::Future, sync::Arc};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    config::{GenerationConfig, RetryLimits},
    credentials::{Credential, CredentialPool},
    error::{ClientResult, ErrorCode, GenerationFailure, Outcome},
    image::{self, ImageRequest},
    job::ProgressUpdate,
    protocol::BIRTH_DATE,
    storage::{MediaStore, PassthroughStore},
    streaming::GenerationStream,
    transport::{
        impersonate::{self, PROFILES},
        SessionBuilder,
    },
    video::{self, VideoRequest},
};

pub struct ImagineClient {
    config: Arc<GenerationConfig>,
    session: SessionBuilder,
    pool: Arc<dyn CredentialPool>,
    store: Arc<dyn MediaStore>,
}

impl ImagineClient {
    /// Client with the default passthrough media store.
    pub fn new(config: GenerationConfig, pool: Arc<dyn CredentialPool>) -> ClientResult<Self> {
        let store = Arc::new(PassthroughStore::new(&config.asset_base));
        Self::with_store(config, pool, store)
    }

    pub fn with_store(
        config: GenerationConfig,
        pool: Arc<dyn CredentialPool>,
        store: Arc<dyn MediaStore>,
    ) -> ClientResult<Self> {
        let config = Arc::new(config);
        let session = SessionBuilder::new(Arc::clone(&config))?;
        Ok(Self {
            config,
            session,
            pool,
            store,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate images, blocking until the final result.
    pub async fn generate_images(
        &self,
        request: ImageRequest,
        pinned: Option<Credential>,
    ) -> Outcome {
        self.generate_images_inner(request, pinned, None).await
    }

    /// Generate images as a cancellable sequence of progress events.
    pub fn stream_images(
        self: &Arc<Self>,
        request: ImageRequest,
        pinned: Option<Credential>,
    ) -> GenerationStream {
        let client = Arc::clone(self);
        GenerationStream::spawn(move |progress| async move {
            client
                .generate_images_inner(request, pinned, Some(progress))
                .await
        })
    }

    pub(crate) async fn generate_images_inner(
        &self,
        request: ImageRequest,
        pinned: Option<Credential>,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> Outcome {
        let target_count = request.count.unwrap_or(self.config.default_image_count);
        info!(target = target_count, "image generation requested");

        self.run_attempts(self.config.image_retries, pinned, |credential| {
            let request = request.clone();
            let progress = progress.clone();
            async move {
                image::run_attempt(
                    &self.session,
                    &self.config,
                    self.store.as_ref(),
                    &credential,
                    &request,
                    target_count,
                    progress.as_ref(),
                )
                .await
            }
        })
        .await
    }

    /// Generate one video, blocking until the final result.
    pub async fn generate_video(
        &self,
        request: VideoRequest,
        pinned: Option<Credential>,
    ) -> Outcome {
        info!(resolution = %request.resolution, duration = request.duration_seconds, "video generation requested");

        self.run_attempts(self.config.video_retries, pinned, |credential| {
            let request = request.clone();
            async move {
                video::run_attempt(
                    &self.session,
                    &self.config,
                    self.store.as_ref(),
                    &credential,
                    &request,
                )
                .await
            }
        })
        .await
    }

    /// The retry/failover state machine.
    pub(crate) async fn run_attempts<F, Fut>(
        &self,
        limits: RetryLimits,
        pinned: Option<Credential>,
        mut attempt: F,
    ) -> Outcome
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = ClientResult<Outcome>>,
    {
        let mut last_failure: Option<GenerationFailure> = None;
        let mut blocked_attempts = 0usize;

        for attempt_index in 0..limits.max_attempts {
            let credential = match &pinned {
                Some(credential) => credential.clone(),
                None => match self.pool.acquire().await {
                    Some(credential) => credential,
                    None => {
                        return Outcome::Failure(GenerationFailure::message(
                            "no credentials available",
                        ))
                    }
                },
            };

            self.ensure_age_verified(&credential).await;

            match attempt(credential.clone()).await {
                Ok(Outcome::Success(success)) => {
                    self.pool.mark_success(&credential).await;
                    self.pool.record_usage(&credential).await;
                    info!(
                        attempt = attempt_index + 1,
                        count = success.urls.len(),
                        "generation succeeded"
                    );
                    return Outcome::Success(success);
                }
                Ok(Outcome::Failure(failure)) => match failure.code {
                    Some(ErrorCode::Blocked) => {
                        blocked_attempts += 1;
                        warn!(
                            attempt = attempt_index + 1,
                            blocked = blocked_attempts,
                            cap = limits.max_blocked_attempts,
                            "blocked outcome detected"
                        );
                        self.pool
                            .mark_failed(&credential, "blocked, no final result produced")
                            .await;
                        if blocked_attempts >= limits.max_blocked_attempts {
                            return Outcome::Failure(GenerationFailure::coded(
                                ErrorCode::Blocked,
                                format!(
                                    "blocked on {} consecutive attempts",
                                    limits.max_blocked_attempts
                                ),
                            ));
                        }
                        if pinned.is_some() {
                            return Outcome::Failure(failure);
                        }
                    }
                    Some(ErrorCode::RateLimitExceeded) | Some(ErrorCode::Unauthorized) => {
                        self.pool.mark_failed(&credential, &failure.message).await;
                        if pinned.is_some() {
                            return Outcome::Failure(failure);
                        }
                        warn!(
                            attempt = attempt_index + 1,
                            max = limits.max_attempts,
                            code = ?failure.code,
                            "rotating credential"
                        );
                        last_failure = Some(failure);
                    }
                    // Not a rotation-worthy condition.
                    _ => return Outcome::Failure(failure),
                },
                Err(transport_error) => {
                    error!(
                        attempt = attempt_index + 1,
                        error = %transport_error,
                        "attempt failed with transport error"
                    );
                    self.pool
                        .mark_failed(&credential, &transport_error.to_string())
                        .await;
                    let failure = GenerationFailure::message(transport_error.to_string());
                    if pinned.is_some() {
                        return Outcome::Failure(failure);
                    }
                    last_failure = Some(failure);
                }
            }
        }

        Outcome::Failure(
            last_failure.unwrap_or_else(|| GenerationFailure::message("all retries failed")),
        )
    }

    /// Best-effort one-shot age verification; never blocks the attempt.
    async fn ensure_age_verified(&self, credential: &Credential) {
        if self.pool.age_verified(credential).await {
            return;
        }
        info!(credential = %credential.redacted(), "age verification pending");
        match self.verify_age(credential).await {
            Ok(true) => {
                self.pool.set_age_verified(credential, true).await;
                info!("age verification succeeded");
            }
            Ok(false) => warn!("age verification skipped or rejected, continuing"),
            Err(error) => warn!(error = %error, "age verification failed, continuing"),
        }
    }

    async fn verify_age(&self, credential: &Credential) -> ClientResult<bool> {
        if self.config.cf_clearance.is_none() {
            warn!("no clearance token configured, skipping age verification");
            return Ok(false);
        }

        let profile = PROFILES[1];
        let headers = self.session.chunked_headers(
            credential,
            &format!("{}/", self.config.origin),
            Some(&profile),
        )?;
        let url = self.config.birth_date_url.clone();
        let proxy = self.config.proxy.clone();
        let timeout = self.config.attempt_deadline;

        impersonate::run(move || {
            let client = impersonate::blocking_client(&profile, proxy.as_deref(), timeout)?;
            let response = client
                .post(&url)
                .headers(headers)
                .json(&serde_json::json!({ "birthDate": BIRTH_DATE }))
                .send()?;
            Ok(response.status().is_success())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::GenerationSuccess;

    /// Pool that records every interaction for assertions.
    #[derive(Default)]
    struct RecordingPool {
        tokens: Vec<String>,
        cursor: AtomicUsize,
        age_verified: bool,
        events: Mutex<Vec<String>>,
    }

    impl RecordingPool {
        fn new(tokens: &[&str], age_verified: bool) -> Self {
            Self {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                cursor: AtomicUsize::new(0),
                age_verified,
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl CredentialPool for RecordingPool {
        async fn acquire(&self) -> Option<Credential> {
            if self.tokens.is_empty() {
                return None;
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
            let token = &self.tokens[index];
            self.events.lock().push(format!("acquire:{token}"));
            Some(Credential::new(token))
        }

        async fn age_verified(&self, _credential: &Credential) -> bool {
            self.age_verified
        }

        async fn set_age_verified(&self, credential: &Credential, _verified: bool) {
            self.events
                .lock()
                .push(format!("set_age_verified:{}", credential.token()));
        }

        async fn mark_success(&self, credential: &Credential) {
            self.events
                .lock()
                .push(format!("success:{}", credential.token()));
        }

        async fn mark_failed(&self, credential: &Credential, reason: &str) {
            self.events
                .lock()
                .push(format!("failed:{}:{reason}", credential.token()));
        }

        async fn record_usage(&self, credential: &Credential) {
            self.events
                .lock()
                .push(format!("usage:{}", credential.token()));
        }
    }

    fn client_with(pool: Arc<RecordingPool>) -> ImagineClient {
        // Default config has no clearance token, so age verification is
        // skipped without any network traffic.
        ImagineClient::new(GenerationConfig::default(), pool).unwrap()
    }

    fn limits(max_attempts: usize, max_blocked: usize) -> RetryLimits {
        RetryLimits {
            max_attempts,
            max_blocked_attempts: max_blocked,
        }
    }

    fn success() -> ClientResult<Outcome> {
        Ok(Outcome::Success(GenerationSuccess::from_urls(vec![
            "https://x/a.jpg".to_string(),
        ])))
    }

    fn failure(code: ErrorCode) -> ClientResult<Outcome> {
        Ok(Outcome::Failure(GenerationFailure::coded(code, "nope")))
    }

    #[tokio::test]
    async fn test_success_marks_pool() {
        let pool = Arc::new(RecordingPool::new(&["a"], true));
        let client = client_with(Arc::clone(&pool));

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(limits(5, 3), None, |_credential| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { success() }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(pool.events(), vec!["acquire:a", "success:a", "usage:a"]);
    }

    #[tokio::test]
    async fn test_pinned_rate_limit_single_attempt_no_rotation() {
        let pool = Arc::new(RecordingPool::new(&["a", "b"], true));
        let client = client_with(Arc::clone(&pool));

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(
                limits(5, 3),
                Some(Credential::new("pinned")),
                |_credential| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    async { failure(ErrorCode::RateLimitExceeded) }
                },
            )
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(outcome.code(), Some(ErrorCode::RateLimitExceeded));
        match outcome {
            Outcome::Failure(f) => assert_eq!(f.message, "nope"),
            _ => unreachable!(),
        }
        // Never touched the pool for acquisition; only the failure mark.
        assert_eq!(pool.events(), vec!["failed:pinned:nope"]);
    }

    #[tokio::test]
    async fn test_rotation_on_rate_limit_then_success() {
        let pool = Arc::new(RecordingPool::new(&["a", "b"], true));
        let client = client_with(Arc::clone(&pool));

        let seen = Mutex::new(Vec::new());
        let outcome = client
            .run_attempts(limits(5, 3), None, |credential| {
                let first = {
                    let mut seen = seen.lock();
                    seen.push(credential.token().to_string());
                    seen.len() == 1
                };
                async move {
                    if first {
                        failure(ErrorCode::RateLimitExceeded)
                    } else {
                        success()
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            pool.events(),
            vec![
                "acquire:a",
                "failed:a:nope",
                "acquire:b",
                "success:b",
                "usage:b"
            ]
        );
    }

    #[tokio::test]
    async fn test_three_blocked_outcomes_terminal_before_exhaustion() {
        let pool = Arc::new(RecordingPool::new(&["a", "b"], true));
        let client = client_with(Arc::clone(&pool));

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(limits(5, 3), None, |_credential| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Ok(Outcome::Failure(GenerationFailure::blocked())) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.code, Some(ErrorCode::Blocked));
                assert!(failure.message.contains("3 consecutive attempts"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_pinned_blocked_returns_first_failure() {
        let pool = Arc::new(RecordingPool::new(&[], true));
        let client = client_with(pool);

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(
                limits(5, 3),
                Some(Credential::new("pinned")),
                |_credential| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    async { Ok(Outcome::Failure(GenerationFailure::blocked())) }
                },
            )
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(outcome.code(), Some(ErrorCode::Blocked));
    }

    #[tokio::test]
    async fn test_other_structured_failure_returns_immediately() {
        let pool = Arc::new(RecordingPool::new(&["a", "b"], true));
        let client = client_with(Arc::clone(&pool));

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(limits(5, 3), None, |_credential| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { failure(ErrorCode::VideoNotSupported) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(outcome.code(), Some(ErrorCode::VideoNotSupported));
        // Not rotation-worthy: the credential is not marked failed.
        assert_eq!(pool.events(), vec!["acquire:a"]);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_attempts() {
        let pool = Arc::new(RecordingPool::new(&["a"], true));
        let client = client_with(Arc::clone(&pool));

        let attempts = AtomicUsize::new(0);
        let outcome = client
            .run_attempts(limits(2, 3), None, |_credential| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async {
                    Err(crate::error::ClientError::Connection(
                        "refused".to_string(),
                    ))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.code, None);
                assert!(failure.message.contains("refused"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_no_credentials_available() {
        let pool = Arc::new(RecordingPool::new(&[], true));
        let client = client_with(pool);

        let outcome = client
            .run_attempts(limits(5, 3), None, |_credential| async { success() })
            .await;

        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.message, "no credentials available")
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_unverified_credential_does_not_block_attempt() {
        // No clearance token configured: verification is skipped and the
        // attempt proceeds anyway.
        let pool = Arc::new(RecordingPool::new(&["a"], false));
        let client = client_with(Arc::clone(&pool));

        let outcome = client
            .run_attempts(limits(1, 3), None, |_credential| async { success() })
            .await;

        assert!(outcome.is_success());
        assert!(pool
            .events()
            .iter()
            .all(|event| !event.starts_with("set_age_verified")));
    }
}
