//! Secured authentication: a decorator that interposes IP-block checks and
//! attempt recording around a base authenticator.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::error;

use crate::block::{BlockKind, BlockReason};
use crate::error::AuthError;
use crate::registry::{AttemptCounter, BlockRegistry};
use crate::service::IpBlockService;

const PERMANENT_BLOCK_COMMENT: &str = "Automatic permanent block after multiple temporary blocks";

/// Request-scoped values resolved by edge middleware.
///
/// The client IP is trusted as given: whoever populates it must resolve
/// forwarded-for/real-IP headers against a trusted proxy set, because a
/// spoofable value here moves the blocking decision to the attacker.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    client_ip: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client_ip(ip: impl Into<String>) -> Self {
        Self {
            client_ip: Some(ip.into()),
        }
    }

    /// The resolved client IP. Missing or unparsable values fall back to
    /// loopback: the login path stays available when IP resolution breaks,
    /// at the cost of not rate-limiting those requests individually.
    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

/// The authentication capability set this crate decorates.
///
/// Identity and token-claims types stay opaque: the crate defines neither
/// the user schema nor the token format.
pub trait Authenticator: Send + Sync {
    type Identity: Send + Sync;
    type Claims: Send + Sync;

    /// Verify credentials and issue a token for the authenticated identity.
    fn authenticate(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<(Self::Identity, String), AuthError>> + Send;

    /// Issue a token for an already-authenticated identity.
    ///
    /// # Errors
    /// Implementation-defined token issuance failures.
    fn generate_token(&self, identity: &Self::Identity, ttl: Duration)
        -> Result<String, AuthError>;

    /// Decode and verify a token.
    ///
    /// # Errors
    /// [`AuthError::TokenExpired`] or [`AuthError::InvalidToken`].
    fn validate_token(&self, token: &str) -> Result<Self::Claims, AuthError>;

    /// Hash a password for storage.
    ///
    /// # Errors
    /// Implementation-defined hashing failures.
    fn hash_password(&self, password: &str) -> Result<Vec<u8>, AuthError>;

    fn verify_password(&self, password: &str, password_hash: &[u8]) -> bool;
}

/// Drop-in [`Authenticator`] that enforces IP blocks around every
/// authentication attempt and escalates repeat offenders.
pub struct SecuredAuthenticator<A, D, E> {
    base: A,
    blocks: IpBlockService<D, E>,
}

impl<A, D, E> SecuredAuthenticator<A, D, E>
where
    A: Authenticator,
    D: BlockRegistry,
    E: BlockRegistry + AttemptCounter,
{
    #[must_use]
    pub fn new(base: A, blocks: IpBlockService<D, E>) -> Self {
        Self { base, blocks }
    }

    /// The block service, for admin surfaces that manage blocks directly.
    #[must_use]
    pub fn block_service(&self) -> &IpBlockService<D, E> {
        &self.blocks
    }

    /// Best-effort escalation after failed credentials. Failures here are
    /// logged and never surfaced: a secondary error must not mask the
    /// original credential rejection.
    async fn escalate(&self, ip: IpAddr) {
        match self.blocks.should_block_permanently(ip).await {
            Ok(true) => {
                if let Err(err) = self
                    .blocks
                    .create_permanent_block(
                        ip,
                        BlockReason::BruteforceAttempt,
                        None,
                        PERMANENT_BLOCK_COMMENT,
                    )
                    .await
                {
                    error!("Failed to create permanent ip block for {ip}: {err}");
                }
            }
            Ok(false) => {}
            Err(err) => {
                error!("Failed to evaluate permanent block for {ip}: {err}");
            }
        }
    }
}

impl<A, D, E> Authenticator for SecuredAuthenticator<A, D, E>
where
    A: Authenticator,
    D: BlockRegistry,
    E: BlockRegistry + AttemptCounter,
{
    type Identity = A::Identity;
    type Claims = A::Claims;

    async fn authenticate(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<(Self::Identity, String), AuthError> {
        let ip = ctx.client_ip();

        if let Some(block) = self.blocks.is_blocked(ip).await? {
            if block.kind == BlockKind::Permanent || !block.is_expired() {
                return Err(AuthError::IpBlocked);
            }
        }

        let attempt = self.blocks.record_login_attempt(ip).await?;
        if attempt.should_block {
            return Err(AuthError::TooManyAttempts);
        }

        match self.base.authenticate(ctx, email, password).await {
            Err(AuthError::InvalidCredentials) => {
                self.escalate(ip).await;
                Err(AuthError::InvalidCredentials)
            }
            other => other,
        }
    }

    fn generate_token(
        &self,
        identity: &Self::Identity,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        self.base.generate_token(identity, ttl)
    }

    fn validate_token(&self, token: &str) -> Result<Self::Claims, AuthError> {
        self.base.validate_token(token)
    }

    fn hash_password(&self, password: &str) -> Result<Vec<u8>, AuthError> {
        self.base.hash_password(password)
    }

    fn verify_password(&self, password: &str, password_hash: &[u8]) -> bool {
        self.base.verify_password(password, password_hash)
    }
}
