//! Session service (C7, §4.7). Orchestrates login/refresh/revoke and owns
//! session lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use cp_core::clock::{or_real, Clock};
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::{AuthKind, Identity, Session};
use cp_core::storage::Storage;
use rand::RngCore;
use tracing::{info, warn};

use crate::password::{AuthRequest, CredentialProvider};
use crate::rate_limit::RateLimiter;
use crate::rbac::RbacResolver;
use crate::refresh;
use crate::token::TokenCodec;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub rotate_refresh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            rotate_refresh: true,
        }
    }
}

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct SessionService {
    storage: Arc<dyn Storage>,
    issuer: Arc<TokenCodec>,
    rbac: Arc<RbacResolver>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    providers: HashMap<AuthKind, Arc<dyn CredentialProvider>>,
    config: SessionConfig,
}

fn random_hex_id(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl SessionService {
    /// `clock: None` substitutes a real, OS-backed clock (§4.1) — only
    /// tests that need to control time should pass `Some`.
    pub fn new(
        storage: Arc<dyn Storage>,
        issuer: Arc<TokenCodec>,
        rbac: Arc<RbacResolver>,
        clock: Option<Arc<dyn Clock>>,
        limiter: Arc<RateLimiter>,
        providers: Vec<Arc<dyn CredentialProvider>>,
        config: SessionConfig,
    ) -> CoreResult<Self> {
        let mut registry = HashMap::new();
        for provider in providers {
            // "verified at insertion time that provider.Kind() == key" (§9).
            registry.insert(provider.kind(), provider);
        }
        Ok(Self {
            storage,
            issuer,
            rbac,
            clock: or_real(clock),
            limiter,
            providers: registry,
            config,
        })
    }

    pub async fn login(
        &self,
        auth_kind: AuthKind,
        subject: &str,
        secret: &str,
    ) -> CoreResult<(TokenPair, Identity)> {
        let provider = self
            .providers
            .get(&auth_kind)
            .ok_or_else(|| CoreError::InvalidRequest(format!("unsupported auth kind {auth_kind}")))?;
        if provider.kind() != auth_kind {
            return Err(CoreError::InvalidRequest("provider kind mismatch".into()));
        }
        if subject.is_empty() || secret.is_empty() {
            return Err(CoreError::InvalidCredentials);
        }

        let now = self.clock.now();
        let rate_key = format!("{auth_kind}:{subject}");
        self.limiter.check(&rate_key, now)?;

        let outcome = match provider
            .authenticate(AuthRequest {
                subject: subject.to_string(),
                secret: secret.to_string(),
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.limiter.record_failure(&rate_key, now);
                return Err(e);
            }
        };
        self.limiter.reset(&rate_key);

        let permissions = self.rbac.resolve(Some(&outcome.user)).await.map_err(|e| {
            warn!(user_id = %outcome.user.id, "rbac resolution failed at login: {e}");
            CoreError::Unauthorized
        })?;

        let (refresh_raw, refresh_hash) = refresh::mint();
        let session_id = random_hex_id(16);
        let token_id = random_hex_id(16);

        let session = Session {
            id: session_id.clone(),
            user_id: outcome.user.id.clone(),
            credential_id: outcome.credential.id.clone(),
            auth_kind,
            refresh_hash,
            expires_at: now + self.config.refresh_ttl,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_session(session).await?;

        let identity = Identity {
            issued_at: now,
            not_before: now,
            expires_at: now + self.config.access_ttl,
            subject: outcome.user.subject.clone(),
            user_id: outcome.user.id.clone(),
            name: outcome.user.name.clone(),
            email: outcome.user.email.clone(),
            issuer: String::new(),
            audience: Vec::new(),
            token_id,
            session_id: session_id.clone(),
            permissions,
        };
        let identity = self.fill_issuer_audience(identity);
        let access_token = self.issuer.issue(&identity)?;

        info!(user_id = %outcome.user.id, session_id = %session_id, "login succeeded");
        Ok((
            TokenPair {
                access_token,
                refresh_token: refresh_raw,
            },
            identity,
        ))
    }

    pub async fn refresh(
        &self,
        session_id: &str,
        refresh_raw: &str,
    ) -> CoreResult<(TokenPair, Identity)> {
        if session_id.is_empty() || refresh_raw.is_empty() {
            return Err(CoreError::InvalidRefresh);
        }

        let session = match self.storage.get_session(session_id).await {
            Ok(session) => session,
            Err(e) if e.is_not_found() => return Err(CoreError::InvalidRefresh),
            Err(e) => return Err(e),
        };
        if session.is_revoked() {
            return Err(CoreError::Revoked);
        }
        let now = self.clock.now();
        if session.is_expired(now) {
            return Err(CoreError::InvalidRefresh);
        }

        let computed_hash = refresh::hash_raw(refresh_raw)?;
        if !refresh::hashes_match(&computed_hash, &session.refresh_hash) {
            return Err(CoreError::InvalidRefresh);
        }

        let user = match self.storage.get_user(&session.user_id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(CoreError::InvalidRefresh),
            Err(e) => return Err(e),
        };
        if user.disabled {
            return Err(CoreError::InvalidRefresh);
        }

        let permissions = self
            .rbac
            .resolve(Some(&user))
            .await
            .map_err(|_| CoreError::Unauthorized)?;

        let refresh_token = if self.config.rotate_refresh {
            let (new_raw, new_hash) = refresh::mint();
            self.storage
                .rotate_refresh(session_id, new_hash, now + self.config.refresh_ttl, now)
                .await?;
            new_raw
        } else {
            refresh_raw.to_string()
        };

        let token_id = random_hex_id(16);
        let identity = Identity {
            issued_at: now,
            not_before: now,
            expires_at: now + self.config.access_ttl,
            subject: user.subject.clone(),
            user_id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            issuer: String::new(),
            audience: Vec::new(),
            token_id,
            session_id: session_id.to_string(),
            permissions,
        };
        let identity = self.fill_issuer_audience(identity);
        let access_token = self.issuer.issue(&identity)?;

        Ok((
            TokenPair {
                access_token,
                refresh_token,
            },
            identity,
        ))
    }

    pub async fn revoke(&self, session_id: &str) -> CoreResult<()> {
        if session_id.is_empty() {
            return Err(CoreError::InvalidRequest("empty session id".into()));
        }
        let now = self.clock.now();
        match self.storage.revoke_session(session_id, now).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(CoreError::InvalidRequest(format!(
                "session {session_id} not found"
            ))),
            Err(e) => Err(e),
        }
    }

    fn fill_issuer_audience(&self, mut identity: Identity) -> Identity {
        // Populated from the verifier's own configuration, not invented
        // per-login, so `Identity.issuer`/`audience` always match what
        // `TokenCodec::verify` will enforce.
        identity.issuer = self.issuer.issuer().to_string();
        identity.audience = self.issuer.audience().to_vec();
        identity
    }
}
