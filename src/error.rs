//! Error taxonomy for the blocking subsystem and the auth guard.

use std::net::IpAddr;
use uuid::Uuid;

/// Failures from the block registries and their orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// The block violates a domain invariant (malformed data, non-future
    /// expiry on a temporary block).
    #[error("invalid ip block: {0}")]
    Validation(String),

    /// An active block already exists for this IP in the target store.
    #[error("ip {0} is already blocked")]
    AlreadyBlocked(IpAddr),

    /// No block with this id exists.
    #[error("ip block {0} not found")]
    NotFound(Uuid),

    /// A backing store failed; the cause carries the operation context.
    #[error("store unavailable: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl BlockError {
    pub(crate) fn store(context: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::Store(err.into().context(context))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failures surfaced by authenticators.
///
/// Callers only see the coarse variant: no attempt counts or block reasons
/// leak, and a bad password is indistinguishable from an unknown account.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("ip address is blocked")]
    IpBlocked,

    #[error("too many login attempts")]
    TooManyAttempts,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    InvalidToken,

    #[error(transparent)]
    Block(#[from] BlockError),
}
