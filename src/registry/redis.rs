//! Ephemeral block registry backed by Redis.
//!
//! Temporary blocks live under `block:<ip>` with a native TTL equal to the
//! remaining block duration, so expired blocks vanish without a cleanup pass.
//! Login attempts live under `attempts:<ip>` as a sorted set scored by unix
//! time; the set's TTL is refreshed to the window on every write.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::net::IpAddr;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::block::IpBlock;
use crate::error::BlockError;
use crate::registry::{validate_for_create, AttemptCounter, BlockRegistry};

const BLOCK_KEY_PREFIX: &str = "block:";
const ATTEMPTS_KEY_PREFIX: &str = "attempts:";

#[derive(Clone)]
pub struct RedisBlockRegistry {
    conn: ConnectionManager,
    window_seconds: u64,
}

impl RedisBlockRegistry {
    #[must_use]
    pub fn new(conn: ConnectionManager, window_seconds: u64) -> Self {
        Self {
            conn,
            window_seconds,
        }
    }

    /// Connect to `url` and build a registry with the given attempt window.
    ///
    /// # Errors
    /// Returns [`BlockError::Store`] when the connection cannot be established.
    pub async fn connect(url: &str, window_seconds: u64) -> Result<Self, BlockError> {
        let client = redis::Client::open(url)
            .map_err(|err| BlockError::store("invalid redis url", err))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| BlockError::store("failed to connect to redis", err))?;
        Ok(Self::new(conn, window_seconds))
    }
}

impl BlockRegistry for RedisBlockRegistry {
    async fn create(&self, block: &IpBlock) -> Result<(), BlockError> {
        validate_for_create(block)?;
        let Some(expires_at) = block.expires_at else {
            return Err(BlockError::Validation(
                "the ephemeral registry only holds expiring blocks".to_string(),
            ));
        };

        let payload = serde_json::to_string(block)
            .map_err(|err| BlockError::store("failed to encode ip block", err))?;
        let ttl_seconds = (expires_at - Utc::now()).num_seconds().max(1);

        // SET NX keeps the first writer's block when two creates race.
        let key = block_key(block.ip);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .instrument(command_span("SET"))
            .await
            .map_err(|err| BlockError::store("failed to store ip block in redis", err))?;

        if reply.is_none() {
            return Err(BlockError::AlreadyBlocked(block.ip));
        }

        Ok(())
    }

    async fn is_blocked(&self, ip: IpAddr) -> Result<Option<IpBlock>, BlockError> {
        let key = block_key(ip);
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(&key)
            .instrument(command_span("GET"))
            .await
            .map_err(|err| BlockError::store("failed to check ip block in redis", err))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let block: IpBlock = serde_json::from_str(&payload)
            .map_err(|err| BlockError::store("failed to decode ip block payload", err))?;

        Ok(Some(block))
    }

    /// Blocks are keyed by IP, so removal by id scans every live entry.
    /// The block population is bounded by the block duration, which keeps
    /// this O(n) acceptable for the admin path that calls it.
    async fn remove(&self, id: Uuid) -> Result<(), BlockError> {
        let mut conn = self.conn.clone();
        let keys = scan_block_keys(&mut conn).await?;

        for key in keys {
            let payload: Option<String> = conn
                .get(&key)
                .instrument(command_span("GET"))
                .await
                .map_err(|err| BlockError::store("failed to read ip block in redis", err))?;

            // The entry may have expired between the scan and the read.
            let Some(payload) = payload else {
                continue;
            };

            let block: IpBlock = match serde_json::from_str(&payload) {
                Ok(block) => block,
                Err(err) => {
                    warn!("Skipping undecodable ip block at {key}: {err}");
                    continue;
                }
            };

            if block.id == id {
                let _: u64 = conn
                    .del(&key)
                    .instrument(command_span("DEL"))
                    .await
                    .map_err(|err| {
                        BlockError::store("failed to delete ip block from redis", err)
                    })?;
                return Ok(());
            }
        }

        Err(BlockError::NotFound(id))
    }

    async fn list_active(&self, offset: i64, limit: i64) -> Result<Vec<IpBlock>, BlockError> {
        let mut conn = self.conn.clone();
        let keys = scan_block_keys(&mut conn).await?;

        let offset = usize::try_from(offset).unwrap_or(0);
        let limit = usize::try_from(limit).unwrap_or(0);

        let mut blocks = Vec::new();
        for key in keys.iter().skip(offset).take(limit) {
            let payload: Option<String> = conn
                .get(key)
                .instrument(command_span("GET"))
                .await
                .map_err(|err| BlockError::store("failed to read ip block in redis", err))?;

            let Some(payload) = payload else {
                continue;
            };

            match serde_json::from_str::<IpBlock>(&payload) {
                Ok(block) => blocks.push(block),
                Err(err) => warn!("Skipping undecodable ip block at {key}: {err}"),
            }
        }

        Ok(blocks)
    }

    /// The ephemeral store keeps no block history: a present block counts as
    /// one, an absent block as zero, regardless of `since`.
    async fn count_since(&self, ip: IpAddr, _since: DateTime<Utc>) -> Result<u64, BlockError> {
        Ok(u64::from(self.is_blocked(ip).await?.is_some()))
    }
}

impl AttemptCounter for RedisBlockRegistry {
    async fn record_attempt(&self, ip: IpAddr) -> Result<u64, BlockError> {
        let key = attempts_key(ip);
        let now = Utc::now();
        let score = now.timestamp();
        // Microsecond members keep sub-second bursts from collapsing into a
        // single set entry.
        let member = now.timestamp_micros();

        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zadd(&key, member, score)
            .instrument(command_span("ZADD"))
            .await
            .map_err(|err| BlockError::store("failed to record login attempt", err))?;

        let window = i64::try_from(self.window_seconds).unwrap_or(i64::MAX);
        let _: bool = conn
            .expire(&key, window)
            .instrument(command_span("EXPIRE"))
            .await
            .map_err(|err| BlockError::store("failed to refresh attempt window", err))?;

        let cutoff = score - window;
        let _: i64 = conn
            .zrembyscore(&key, 0, cutoff)
            .instrument(command_span("ZREMRANGEBYSCORE"))
            .await
            .map_err(|err| BlockError::store("failed to prune login attempts", err))?;

        let count: u64 = conn
            .zcard(&key)
            .instrument(command_span("ZCARD"))
            .await
            .map_err(|err| BlockError::store("failed to count login attempts", err))?;

        Ok(count)
    }

    async fn attempt_count(&self, ip: IpAddr) -> Result<u64, BlockError> {
        let key = attempts_key(ip);
        let window = i64::try_from(self.window_seconds).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp() - window;

        let mut conn = self.conn.clone();
        let count: u64 = conn
            .zcount(&key, cutoff, "+inf")
            .instrument(command_span("ZCOUNT"))
            .await
            .map_err(|err| BlockError::store("failed to count login attempts", err))?;

        Ok(count)
    }
}

async fn scan_block_keys(conn: &mut ConnectionManager) -> Result<Vec<String>, BlockError> {
    let mut keys = Vec::new();
    let mut iter: redis::AsyncIter<'_, String> = conn
        .scan_match(format!("{BLOCK_KEY_PREFIX}*"))
        .await
        .map_err(|err| BlockError::store("failed to scan ip block keys", err))?;
    while let Some(key) = iter.next_item().await {
        keys.push(key);
    }
    Ok(keys)
}

fn block_key(ip: IpAddr) -> String {
    format!("{BLOCK_KEY_PREFIX}{ip}")
}

fn attempts_key(ip: IpAddr) -> String {
    format!("{ATTEMPTS_KEY_PREFIX}{ip}")
}

fn command_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("db.query", db.system = "redis", db.operation = operation)
}

#[cfg(test)]
mod tests {
    use super::{attempts_key, block_key};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn keys_are_namespaced_per_ip() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(block_key(v4), "block:10.0.0.1");
        assert_eq!(attempts_key(v4), "attempts:10.0.0.1");

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(block_key(v6), "block:::1");
    }
}
