//! Block registries: one capability set, two backing stores.
//!
//! The durable registry is the authoritative, audit-grade record (primarily
//! permanent blocks). The ephemeral registry holds temporary blocks with a
//! native TTL plus the per-IP attempt counter. Modeling both behind one trait
//! keeps the orchestrator free of per-store branch logic.

use crate::block::{BlockKind, IpBlock};
use crate::error::BlockError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::IpAddr;
use uuid::Uuid;

pub mod postgres;
pub mod redis;

pub use self::postgres::PostgresBlockRegistry;
pub use self::redis::RedisBlockRegistry;

/// Capability set shared by both stores.
pub trait BlockRegistry: Send + Sync {
    /// Record a block. Fails with [`BlockError::AlreadyBlocked`] when an
    /// active block for the same IP already exists in this store.
    fn create(&self, block: &IpBlock) -> impl Future<Output = Result<(), BlockError>> + Send;

    /// Active (non-expired) block for this IP, if any.
    fn is_blocked(
        &self,
        ip: IpAddr,
    ) -> impl Future<Output = Result<Option<IpBlock>, BlockError>> + Send;

    /// Delete by block id. Fails with [`BlockError::NotFound`] when absent.
    fn remove(&self, id: Uuid) -> impl Future<Output = Result<(), BlockError>> + Send;

    /// Page of active blocks.
    fn list_active(
        &self,
        offset: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<IpBlock>, BlockError>> + Send;

    /// Blocks recorded for this IP since a timestamp. Used for escalation;
    /// see the implementations for what "recorded" means per store.
    fn count_since(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, BlockError>> + Send;
}

/// Sliding-window counter of failed login attempts per source IP.
///
/// Counting is soft: concurrent callers may both read a count below the
/// threshold before either writes, so a small overshoot past the configured
/// maximum is possible. No locking is traded for that precision.
pub trait AttemptCounter: Send + Sync {
    /// Append a timestamped attempt, prune entries older than the window,
    /// and return the count remaining inside it.
    fn record_attempt(&self, ip: IpAddr) -> impl Future<Output = Result<u64, BlockError>> + Send;

    /// Window count without recording a new attempt.
    fn attempt_count(&self, ip: IpAddr) -> impl Future<Output = Result<u64, BlockError>> + Send;
}

/// Kind/expiry invariants enforced before a block reaches a store.
pub(crate) fn validate_for_create(block: &IpBlock) -> Result<(), BlockError> {
    match block.kind {
        BlockKind::Temporary => match block.expires_at {
            None => Err(BlockError::Validation(
                "temporary blocks must carry an expiry".to_string(),
            )),
            Some(expires_at) if expires_at <= Utc::now() => Err(BlockError::Validation(
                "block expiry must be in the future".to_string(),
            )),
            Some(_) => Ok(()),
        },
        BlockKind::Permanent => {
            if block.expires_at.is_some() {
                Err(BlockError::Validation(
                    "permanent blocks must not carry an expiry".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validate_for_create;
    use crate::block::{BlockReason, IpBlock};
    use crate::error::BlockError;
    use chrono::{Duration, Utc};
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))
    }

    #[test]
    fn temporary_block_requires_future_expiry() {
        let valid = IpBlock::temporary(
            ip(),
            BlockReason::BruteforceAttempt,
            Utc::now() + Duration::seconds(30),
            None,
            "",
        );
        assert!(validate_for_create(&valid).is_ok());

        let stale = IpBlock::temporary(
            ip(),
            BlockReason::BruteforceAttempt,
            Utc::now() - Duration::seconds(30),
            None,
            "",
        );
        assert!(matches!(
            validate_for_create(&stale),
            Err(BlockError::Validation(_))
        ));

        let mut missing = valid;
        missing.expires_at = None;
        assert!(matches!(
            validate_for_create(&missing),
            Err(BlockError::Validation(_))
        ));
    }

    #[test]
    fn permanent_block_rejects_expiry() {
        let valid = IpBlock::permanent(ip(), BlockReason::Manual, None, "");
        assert!(validate_for_create(&valid).is_ok());

        let mut tainted = valid;
        tainted.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(matches!(
            validate_for_create(&tainted),
            Err(BlockError::Validation(_))
        ));
    }
}
