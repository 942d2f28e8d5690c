//! Durable block registry backed by `PostgreSQL`.
//!
//! Authoritative record for permanent blocks, with full history kept for
//! escalation counting. Expected schema (migrations live with the embedding
//! service):
//!
//! ```sql
//! CREATE TABLE ip_blocks (
//!     id         UUID PRIMARY KEY,
//!     ip         INET NOT NULL,
//!     kind       TEXT NOT NULL,
//!     reason     TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ,
//!     created_by UUID,
//!     comment    TEXT NOT NULL DEFAULT ''
//! );
//! -- One active permanent block per IP; expired rows stay for audit.
//! CREATE UNIQUE INDEX ip_blocks_active_ip
//!     ON ip_blocks (ip) WHERE expires_at IS NULL;
//! ```

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::net::IpAddr;
use tracing::Instrument;
use uuid::Uuid;

use crate::block::{BlockKind, BlockReason, IpBlock};
use crate::error::BlockError;
use crate::registry::{validate_for_create, BlockRegistry};

#[derive(Debug, Clone)]
pub struct PostgresBlockRegistry {
    pool: PgPool,
}

impl PostgresBlockRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BlockRegistry for PostgresBlockRegistry {
    async fn create(&self, block: &IpBlock) -> Result<(), BlockError> {
        validate_for_create(block)?;

        let query = r"
            INSERT INTO ip_blocks
                (id, ip, kind, reason, created_at, expires_at, created_by, comment)
            VALUES ($1, $2::inet, $3, $4, $5, $6, $7, $8)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(block.id)
            .bind(block.ip.to_string())
            .bind(block.kind.as_str())
            .bind(block.reason.as_str())
            .bind(block.created_at)
            .bind(block.expires_at)
            .bind(block.created_by)
            .bind(&block.comment)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    BlockError::AlreadyBlocked(block.ip)
                } else {
                    BlockError::store("failed to create ip block", err)
                }
            })?;

        Ok(())
    }

    async fn is_blocked(&self, ip: IpAddr) -> Result<Option<IpBlock>, BlockError> {
        let query = r"
            SELECT id, host(ip) AS ip, kind, reason, created_at, expires_at, created_by, comment
            FROM ip_blocks
            WHERE ip = $1::inet AND (expires_at IS NULL OR expires_at > NOW())
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(ip.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| BlockError::store("failed to check ip block status", err))?;

        row.map(|row| {
            block_from_row(&row)
                .map_err(|err| BlockError::store("failed to decode ip block row", err))
        })
        .transpose()
    }

    async fn remove(&self, id: Uuid) -> Result<(), BlockError> {
        let query = "DELETE FROM ip_blocks WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| BlockError::store("failed to delete ip block", err))?;

        if result.rows_affected() == 0 {
            return Err(BlockError::NotFound(id));
        }

        Ok(())
    }

    async fn list_active(&self, offset: i64, limit: i64) -> Result<Vec<IpBlock>, BlockError> {
        let query = r"
            SELECT id, host(ip) AS ip, kind, reason, created_at, expires_at, created_by, comment
            FROM ip_blocks
            WHERE expires_at IS NULL OR expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| BlockError::store("failed to list ip blocks", err))?;

        rows.iter()
            .map(|row| {
                block_from_row(row)
                    .map_err(|err| BlockError::store("failed to decode ip block row", err))
            })
            .collect()
    }

    async fn count_since(&self, ip: IpAddr, since: DateTime<Utc>) -> Result<u64, BlockError> {
        let query = "SELECT COUNT(*) FROM ip_blocks WHERE ip = $1::inet AND created_at >= $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(ip.to_string())
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| BlockError::store("failed to count ip blocks", err))?;

        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn block_from_row(row: &PgRow) -> anyhow::Result<IpBlock> {
    let ip_raw: String = row.try_get("ip")?;
    let ip: IpAddr = ip_raw
        .parse()
        .with_context(|| format!("invalid ip {ip_raw} in ip_blocks row"))?;

    let kind_raw: String = row.try_get("kind")?;
    let kind =
        BlockKind::parse(&kind_raw).ok_or_else(|| anyhow!("unknown block kind {kind_raw}"))?;

    let reason_raw: String = row.try_get("reason")?;
    let reason = BlockReason::parse(&reason_raw)
        .ok_or_else(|| anyhow!("unknown block reason {reason_raw}"))?;

    Ok(IpBlock {
        id: row.try_get("id")?,
        ip,
        kind,
        reason,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        created_by: row.try_get("created_by")?,
        comment: row.try_get("comment")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
