//! Credential pool contract and the in-memory implementation.
//!
//! The orchestrator never assumes exclusive access to a credential: every
//! pool operation is atomic from the caller's perspective and tolerates
//! concurrent use of the same credential by other in-flight calls. A
//! durable (shared) pool implements the same trait out of crate.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

/// One interchangeable session token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs; the full token never appears in output.
    pub fn redacted(&self) -> String {
        let head: String = self.0.chars().take(12).collect();
        format!("{head}...")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

/// Narrow contract against the external credential pool.
#[async_trait]
pub trait CredentialPool: Send + Sync {
    /// Next credential to try, or `None` when the pool is exhausted.
    async fn acquire(&self) -> Option<Credential>;

    /// Whether the persisted age-verification flag is set.
    async fn age_verified(&self, credential: &Credential) -> bool;

    async fn set_age_verified(&self, credential: &Credential, verified: bool);

    async fn mark_success(&self, credential: &Credential);

    async fn mark_failed(&self, credential: &Credential, reason: &str);

    /// Usage accounting hook; pools without accounting ignore it.
    async fn record_usage(&self, _credential: &Credential) {}
}

#[derive(Debug, Default, Clone)]
struct EntryState {
    age_verified: bool,
    consecutive_failures: usize,
    successes: usize,
    usages: usize,
    last_failure: Option<String>,
}

/// Round-robin in-memory pool.
///
/// A credential is skipped after [`Self::FAILURE_QUARANTINE`] consecutive
/// failures until every credential is in that state, at which point the
/// pool hands them out again rather than starving callers.
pub struct MemoryCredentialPool {
    entries: Mutex<Vec<(Credential, EntryState)>>,
    cursor: AtomicUsize,
}

impl MemoryCredentialPool {
    const FAILURE_QUARANTINE: usize = 3;

    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            entries: Mutex::new(
                credentials
                    .into_iter()
                    .map(|c| (c, EntryState::default()))
                    .collect(),
            ),
            cursor: AtomicUsize::new(0),
        }
    }

    /// (successes, usages, last failure reason) for a credential.
    pub fn stats(&self, credential: &Credential) -> Option<(usize, usize, Option<String>)> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(c, _)| c == credential)
            .map(|(_, state)| (state.successes, state.usages, state.last_failure.clone()))
    }
}

#[async_trait]
impl CredentialPool for MemoryCredentialPool {
    async fn acquire(&self) -> Option<Credential> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }

        let len = entries.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            let (credential, state) = &entries[(start + offset) % len];
            if state.consecutive_failures < Self::FAILURE_QUARANTINE {
                return Some(credential.clone());
            }
        }

        // All quarantined; hand out round-robin anyway.
        Some(entries[start % len].0.clone())
    }

    async fn age_verified(&self, credential: &Credential) -> bool {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(c, _)| c == credential)
            .map(|(_, state)| state.age_verified)
            .unwrap_or(false)
    }

    async fn set_age_verified(&self, credential: &Credential, verified: bool) {
        let mut entries = self.entries.lock();
        if let Some((_, state)) = entries.iter_mut().find(|(c, _)| c == credential) {
            state.age_verified = verified;
        }
    }

    async fn mark_success(&self, credential: &Credential) {
        let mut entries = self.entries.lock();
        if let Some((_, state)) = entries.iter_mut().find(|(c, _)| c == credential) {
            state.successes += 1;
            state.consecutive_failures = 0;
        }
    }

    async fn mark_failed(&self, credential: &Credential, reason: &str) {
        let mut entries = self.entries.lock();
        if let Some((_, state)) = entries.iter_mut().find(|(c, _)| c == credential) {
            state.consecutive_failures += 1;
            state.last_failure = Some(reason.to_string());
        }
    }

    async fn record_usage(&self, credential: &Credential) {
        let mut entries = self.entries.lock();
        if let Some((_, state)) = entries.iter_mut().find(|(c, _)| c == credential) {
            state.usages += 1;
        }
    }
}
