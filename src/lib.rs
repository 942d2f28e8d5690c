//! # Bruteguard (Login-Path Brute-Force Defense)
//!
//! `bruteguard` guards an authentication service's login path: it counts
//! failed attempts per source IP over a sliding window, blocks offenders
//! temporarily, and escalates repeat offenders to a permanent block.
//!
//! ## Dual Stores
//!
//! Blocks live in two independent stores with different consistency and
//! expiry semantics:
//!
//! - **Durable** ([`PostgresBlockRegistry`]): authoritative, audit-grade
//!   record, primarily for permanent blocks. Uniqueness is enforced by the
//!   database; removed and expired rows stay as history for escalation
//!   counting.
//! - **Ephemeral** ([`RedisBlockRegistry`]): temporary blocks stored with a
//!   native TTL so they vanish on expiry, plus the per-IP attempt counter.
//!
//! No transaction spans the two stores. Cross-store operations are
//! independent best-effort calls, and the attempt counter is a soft rate
//! limiter: concurrent bursts may overshoot the threshold slightly rather
//! than pay for cross-store locking.
//!
//! ## Enforcement
//!
//! [`SecuredAuthenticator`] decorates any [`Authenticator`] and is a drop-in
//! replacement for it. Every authentication attempt is checked against both
//! registries, recorded in the window, and — after a credential rejection —
//! evaluated for escalation to a permanent block. Blocked callers receive
//! coarse errors that reveal neither attempt counts nor block reasons.
//!
//! ## Trust Boundary
//!
//! The client IP comes from [`RequestContext`], populated by edge
//! middleware. Missing or unparsable values fall back to loopback (fail
//! open); resolving forwarded-for headers against a trusted proxy set is
//! the embedding service's responsibility.

pub mod block;
pub mod config;
pub mod error;
pub mod guard;
pub mod registry;
pub mod service;

#[cfg(test)]
pub(crate) mod testutil;

pub use block::{BlockKind, BlockReason, IpBlock};
pub use config::BruteforceConfig;
pub use error::{AuthError, BlockError};
pub use guard::{Authenticator, RequestContext, SecuredAuthenticator};
pub use registry::{AttemptCounter, BlockRegistry, PostgresBlockRegistry, RedisBlockRegistry};
pub use service::{IpBlockService, LoginAttempt};
