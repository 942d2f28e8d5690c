//! In-memory doubles for the registries and the base authenticator.
//!
//! The real stores are network-attached; these doubles reproduce their
//! observable contract (active-block uniqueness, expiry pruning, window
//! arithmetic, per-store `count_since` semantics) so the orchestrator and
//! the guard can be exercised without infrastructure.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::block::IpBlock;
use crate::error::{AuthError, BlockError};
use crate::guard::{Authenticator, RequestContext};
use crate::registry::{validate_for_create, AttemptCounter, BlockRegistry};

/// How `count_since` behaves: the durable store counts history rows, the
/// ephemeral store only reports current block presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountMode {
    History,
    Presence,
}

struct Inner {
    active: Mutex<Vec<IpBlock>>,
    history: Mutex<Vec<IpBlock>>,
    attempts: Mutex<HashMap<IpAddr, Vec<DateTime<Utc>>>>,
    fail_creates: AtomicBool,
    mode: CountMode,
    window_seconds: u64,
}

#[derive(Clone)]
pub(crate) struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub(crate) fn durable() -> Self {
        Self::new(CountMode::History, 0)
    }

    pub(crate) fn ephemeral(window_seconds: u64) -> Self {
        Self::new(CountMode::Presence, window_seconds)
    }

    fn new(mode: CountMode, window_seconds: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                active: Mutex::new(Vec::new()),
                history: Mutex::new(Vec::new()),
                attempts: Mutex::new(HashMap::new()),
                fail_creates: AtomicBool::new(false),
                mode,
                window_seconds,
            }),
        }
    }

    /// Make every subsequent `create` fail like an unreachable store.
    pub(crate) fn fail_creates(&self, fail: bool) {
        self.inner.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Drop an active block as if its TTL had elapsed.
    pub(crate) async fn expire_block(&self, id: Uuid) {
        self.inner
            .active
            .lock()
            .await
            .retain(|block| block.id != id);
    }

    /// Seed a past block episode without making it active.
    pub(crate) async fn push_history(&self, block: IpBlock) {
        self.inner.history.lock().await.push(block);
    }

    /// Shift every recorded attempt for `ip` into the past.
    pub(crate) async fn backdate_attempts(&self, ip: IpAddr, seconds: i64) {
        if let Some(entries) = self.inner.attempts.lock().await.get_mut(&ip) {
            for entry in entries.iter_mut() {
                *entry = *entry - Duration::seconds(seconds);
            }
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::seconds(i64::try_from(self.inner.window_seconds).unwrap_or(i64::MAX))
    }
}

impl BlockRegistry for MemoryRegistry {
    async fn create(&self, block: &IpBlock) -> Result<(), BlockError> {
        if self.inner.fail_creates.load(Ordering::SeqCst) {
            return Err(BlockError::store(
                "failed to create ip block",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store down"),
            ));
        }

        validate_for_create(block)?;

        let mut active = self.inner.active.lock().await;
        active.retain(IpBlock::is_active);
        if active
            .iter()
            .any(|existing| existing.ip == block.ip && existing.is_active())
        {
            return Err(BlockError::AlreadyBlocked(block.ip));
        }

        active.push(block.clone());
        self.inner.history.lock().await.push(block.clone());
        Ok(())
    }

    async fn is_blocked(&self, ip: IpAddr) -> Result<Option<IpBlock>, BlockError> {
        let mut active = self.inner.active.lock().await;
        active.retain(IpBlock::is_active);
        Ok(active.iter().find(|block| block.ip == ip).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<(), BlockError> {
        let mut active = self.inner.active.lock().await;
        let before = active.len();
        active.retain(|block| block.id != id);
        if active.len() == before {
            return Err(BlockError::NotFound(id));
        }
        Ok(())
    }

    async fn list_active(&self, offset: i64, limit: i64) -> Result<Vec<IpBlock>, BlockError> {
        let mut active = self.inner.active.lock().await;
        active.retain(IpBlock::is_active);
        Ok(active
            .iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn count_since(&self, ip: IpAddr, since: DateTime<Utc>) -> Result<u64, BlockError> {
        match self.inner.mode {
            CountMode::History => {
                let history = self.inner.history.lock().await;
                let count = history
                    .iter()
                    .filter(|block| block.ip == ip && block.created_at >= since)
                    .count();
                Ok(count as u64)
            }
            CountMode::Presence => Ok(u64::from(self.is_blocked(ip).await?.is_some())),
        }
    }
}

impl AttemptCounter for MemoryRegistry {
    async fn record_attempt(&self, ip: IpAddr) -> Result<u64, BlockError> {
        let cutoff = self.cutoff();
        let mut attempts = self.inner.attempts.lock().await;
        let entries = attempts.entry(ip).or_default();
        entries.push(Utc::now());
        entries.retain(|entry| *entry > cutoff);
        Ok(entries.len() as u64)
    }

    async fn attempt_count(&self, ip: IpAddr) -> Result<u64, BlockError> {
        let cutoff = self.cutoff();
        let attempts = self.inner.attempts.lock().await;
        let count = attempts
            .get(&ip)
            .map(|entries| entries.iter().filter(|entry| **entry > cutoff).count())
            .unwrap_or(0);
        Ok(count as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    RejectCredentials,
    RejectToken,
}

/// Base authenticator with a fixed outcome and a call counter, so tests can
/// assert whether the guard short-circuited before reaching it.
#[derive(Clone)]
pub(crate) struct ScriptedAuthenticator {
    outcome: Outcome,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAuthenticator {
    pub(crate) fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    pub(crate) fn failing() -> Self {
        Self::with_outcome(Outcome::RejectCredentials)
    }

    pub(crate) fn rejecting_tokens() -> Self {
        Self::with_outcome(Outcome::RejectToken)
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authenticator for ScriptedAuthenticator {
    type Identity = u64;
    type Claims = ();

    async fn authenticate(
        &self,
        _ctx: &RequestContext,
        _email: &str,
        _password: &str,
    ) -> Result<(Self::Identity, String), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Outcome::Succeed => Ok((1, "token".to_string())),
            Outcome::RejectCredentials => Err(AuthError::InvalidCredentials),
            Outcome::RejectToken => Err(AuthError::InvalidToken),
        }
    }

    fn generate_token(
        &self,
        _identity: &Self::Identity,
        _ttl: StdDuration,
    ) -> Result<String, AuthError> {
        Ok("token".to_string())
    }

    fn validate_token(&self, token: &str) -> Result<Self::Claims, AuthError> {
        if token == "token" {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    fn hash_password(&self, password: &str) -> Result<Vec<u8>, AuthError> {
        Ok(format!("hash:{password}").into_bytes())
    }

    fn verify_password(&self, password: &str, password_hash: &[u8]) -> bool {
        password_hash == format!("hash:{password}").as_bytes()
    }
}
