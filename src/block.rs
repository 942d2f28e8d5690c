//! IP block domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Whether a block expires on its own or stays until removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Permanent,
    Temporary,
}

impl BlockKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "permanent" => Some(Self::Permanent),
            "temporary" => Some(Self::Temporary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    SuspiciousActivity,
    BruteforceAttempt,
    Manual,
}

impl BlockReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuspiciousActivity => "suspicious_activity",
            Self::BruteforceAttempt => "bruteforce_attempt",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "suspicious_activity" => Some(Self::SuspiciousActivity),
            "bruteforce_attempt" => Some(Self::BruteforceAttempt),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A single block record for one source IP.
///
/// A `Temporary` block carries a future `expires_at`; a `Permanent` block
/// never does. The registries enforce that invariant at create time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlock {
    pub id: Uuid,
    pub ip: IpAddr,
    pub kind: BlockKind,
    pub reason: BlockReason,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub comment: String,
}

impl IpBlock {
    /// Build a block that stays until explicitly removed.
    #[must_use]
    pub fn permanent(
        ip: IpAddr,
        reason: BlockReason,
        created_by: Option<Uuid>,
        comment: impl Into<String>,
    ) -> Self {
        Self::new(ip, BlockKind::Permanent, reason, None, created_by, comment)
    }

    /// Build a block that expires at `expires_at`.
    #[must_use]
    pub fn temporary(
        ip: IpAddr,
        reason: BlockReason,
        expires_at: DateTime<Utc>,
        created_by: Option<Uuid>,
        comment: impl Into<String>,
    ) -> Self {
        Self::new(
            ip,
            BlockKind::Temporary,
            reason,
            Some(expires_at),
            created_by,
            comment,
        )
    }

    fn new(
        ip: IpAddr,
        kind: BlockKind,
        reason: BlockReason,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<Uuid>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip,
            kind,
            reason,
            created_at: Utc::now(),
            expires_at,
            created_by,
            comment: comment.into(),
        }
    }

    /// A block without an expiry never expires.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_expired()
    }
}
