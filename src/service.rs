//! Orchestrates the durable and ephemeral block registries.

use chrono::{Duration, Utc};
use std::net::IpAddr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::block::{BlockReason, IpBlock};
use crate::config::BruteforceConfig;
use crate::error::BlockError;
use crate::registry::{AttemptCounter, BlockRegistry};

/// Qualifying block episodes within the lookback that escalate an IP to a
/// permanent block.
const PERMANENT_BLOCK_THRESHOLD: u64 = 3;
const ESCALATION_LOOKBACK_HOURS: i64 = 24;

/// Outcome of recording one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Attempts inside the window. Zero when the IP was already blocked:
    /// blocked IPs do not keep accumulating attempts.
    pub attempts: u64,
    pub should_block: bool,
}

/// Coordinates the durable registry (authoritative, permanent blocks), the
/// ephemeral registry (self-expiring temporary blocks), and the attempt
/// counter. No transaction spans the two stores; cross-store operations are
/// independent best-effort calls (see `remove_block`).
pub struct IpBlockService<D, E> {
    durable: D,
    ephemeral: E,
    config: BruteforceConfig,
}

impl<D, E> IpBlockService<D, E>
where
    D: BlockRegistry,
    E: BlockRegistry + AttemptCounter,
{
    #[must_use]
    pub fn new(durable: D, ephemeral: E, config: BruteforceConfig) -> Self {
        Self {
            durable,
            ephemeral,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BruteforceConfig {
        &self.config
    }

    /// Active block for this IP, durable registry first.
    ///
    /// A durable permanent block overrides whatever the ephemeral store
    /// holds, so the ephemeral registry is only consulted when the durable
    /// one reports nothing.
    ///
    /// # Errors
    /// Propagates either store's failure unmodified.
    pub async fn is_blocked(&self, ip: IpAddr) -> Result<Option<IpBlock>, BlockError> {
        if let Some(block) = self.durable.is_blocked(ip).await? {
            return Ok(Some(block));
        }
        self.ephemeral.is_blocked(ip).await
    }

    /// Record a block that stays until explicitly removed.
    ///
    /// # Errors
    /// Returns [`BlockError::AlreadyBlocked`] when the durable registry
    /// already holds an active block for this IP.
    pub async fn create_permanent_block(
        &self,
        ip: IpAddr,
        reason: BlockReason,
        created_by: Option<Uuid>,
        comment: &str,
    ) -> Result<IpBlock, BlockError> {
        let block = IpBlock::permanent(ip, reason, created_by, comment);
        self.durable.create(&block).await?;
        info!(%ip, reason = reason.as_str(), "Created permanent ip block");
        Ok(block)
    }

    /// Record a self-expiring block in the ephemeral registry.
    ///
    /// # Errors
    /// Returns [`BlockError::Validation`] when the duration is zero and
    /// [`BlockError::AlreadyBlocked`] when an active block exists.
    pub async fn create_temporary_block(
        &self,
        ip: IpAddr,
        reason: BlockReason,
        duration_seconds: u64,
        created_by: Option<Uuid>,
        comment: &str,
    ) -> Result<IpBlock, BlockError> {
        let duration = i64::try_from(duration_seconds)
            .map_err(|_| BlockError::Validation("block duration out of range".to_string()))?;
        let expires_at = Utc::now() + Duration::seconds(duration);
        let block = IpBlock::temporary(ip, reason, expires_at, created_by, comment);
        self.ephemeral.create(&block).await?;
        Ok(block)
    }

    /// Delete a block by id from whichever store holds it.
    ///
    /// Both deletes are attempted; a store that never held the id is not an
    /// error. The call fails with [`BlockError::NotFound`] only when both
    /// stores report absence.
    ///
    /// # Errors
    /// Any non-`NotFound` store failure propagates.
    pub async fn remove_block(&self, id: Uuid) -> Result<(), BlockError> {
        let durable = self.durable.remove(id).await;
        let ephemeral = self.ephemeral.remove(id).await;

        let removed_durable = confirm_removal(durable)?;
        let removed_ephemeral = confirm_removal(ephemeral)?;

        if removed_durable || removed_ephemeral {
            Ok(())
        } else {
            Err(BlockError::NotFound(id))
        }
    }

    /// Active blocks from both stores: durable results first, then
    /// ephemeral, truncated to `limit`. No time ordering is guaranteed
    /// across the two sources.
    ///
    /// # Errors
    /// Propagates either store's failure unmodified.
    pub async fn list_active_blocks(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<IpBlock>, BlockError> {
        let mut blocks = self.durable.list_active(offset, limit).await?;
        blocks.extend(self.ephemeral.list_active(offset, limit).await?);
        blocks.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(blocks)
    }

    /// Record one failed login attempt and decide whether to block.
    ///
    /// An already-blocked IP returns `{attempts: 0, should_block: true}`
    /// without touching the counter. Otherwise the attempt is recorded, and
    /// reaching `max_attempts` creates the temporary block as a side effect.
    ///
    /// # Errors
    /// Propagates store failures, including a failed auto-block create.
    pub async fn record_login_attempt(&self, ip: IpAddr) -> Result<LoginAttempt, BlockError> {
        if self.is_blocked(ip).await?.is_some() {
            return Ok(LoginAttempt {
                attempts: 0,
                should_block: true,
            });
        }

        let attempts = self.ephemeral.record_attempt(ip).await?;
        let should_block = attempts >= u64::from(self.config.max_attempts());

        if should_block {
            let comment = format!(
                "Automated block after {attempts} failed login attempts within {} seconds",
                self.config.window_seconds()
            );
            match self
                .create_temporary_block(
                    ip,
                    BlockReason::BruteforceAttempt,
                    self.config.block_duration_seconds(),
                    None,
                    &comment,
                )
                .await
            {
                Ok(_) => {
                    warn!(%ip, attempts, "Temporary ip block created after repeated login failures");
                }
                // A concurrent attempt already placed the block.
                Err(BlockError::AlreadyBlocked(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(LoginAttempt {
            attempts,
            should_block,
        })
    }

    /// Read-only attempt count within the configured window.
    ///
    /// # Errors
    /// Propagates ephemeral store failures unmodified.
    pub async fn get_login_attempts(&self, ip: IpAddr) -> Result<u64, BlockError> {
        self.ephemeral.attempt_count(ip).await
    }

    /// Whether repeated block episodes warrant escalating to a permanent
    /// block: the combined `count_since` over the trailing 24 hours reaches
    /// the threshold. The ephemeral side contributes at most 1 (current
    /// block presence), so the bulk of the count comes from durable history.
    ///
    /// # Errors
    /// Propagates either store's failure unmodified.
    pub async fn should_block_permanently(&self, ip: IpAddr) -> Result<bool, BlockError> {
        let since = Utc::now() - Duration::hours(ESCALATION_LOOKBACK_HOURS);

        let ephemeral_count = self.ephemeral.count_since(ip, since).await?;
        let durable_count = self.durable.count_since(ip, since).await?;

        Ok(ephemeral_count + durable_count >= PERMANENT_BLOCK_THRESHOLD)
    }
}

fn confirm_removal(result: Result<(), BlockError>) -> Result<bool, BlockError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}
