//! Password credential provider (C6, §4.6) and bcrypt verifier construction.

use async_trait::async_trait;
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::{AuthKind, Credential, User, Verifier, VerifierId};
use cp_core::storage::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;

/// bcrypt's accepted cost range. The `bcrypt` crate validates this
/// internally too; these are mirrored here so `new_password_verifier` can
/// clamp/reject before ever calling into bcrypt.
pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

pub struct AuthRequest {
    pub subject: String,
    pub secret: String,
}

pub struct AuthOutcome {
    pub user: User,
    pub credential: Credential,
}

/// Capability set every credential provider variant implements (§9 Design
/// Notes: "interface polymorphism" over `{Kind(), Authenticate(req)}`).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn kind(&self) -> AuthKind;
    async fn authenticate(&self, request: AuthRequest) -> CoreResult<AuthOutcome>;
}

pub struct PasswordProvider {
    storage: Arc<dyn Storage>,
}

impl PasswordProvider {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CredentialProvider for PasswordProvider {
    fn kind(&self) -> AuthKind {
        AuthKind::Password
    }

    async fn authenticate(&self, request: AuthRequest) -> CoreResult<AuthOutcome> {
        if request.subject.is_empty() || request.secret.is_empty() {
            return Err(CoreError::InvalidCredentials);
        }

        let user = match self.storage.get_user_by_subject(&request.subject).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(CoreError::InvalidCredentials),
            Err(e) => return Err(e),
        };
        if user.disabled {
            // No field leak: same error as "user not found".
            return Err(CoreError::InvalidCredentials);
        }

        let credential = match self
            .storage
            .get_credential_by_user_and_auth(&user.id, AuthKind::Password)
            .await
        {
            Ok(credential) => credential,
            Err(e) if e.is_not_found() => return Err(CoreError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        // `missing-password-hash`, `password-mismatch`, and `wrong-auth-kind`
        // are internal-to-credentials sentinels (§7); this boundary
        // promotes all of them to the generic `invalid-credentials` so no
        // caller can distinguish "no hash stored" from "wrong password."
        let verifier = match self
            .storage
            .get_verifier_by_credential(&credential.id)
            .await
        {
            Ok(verifier) => verifier,
            Err(e) if e.is_not_found() => return Err(CoreError::InvalidCredentials),
            Err(e) => return Err(e),
        };
        if verifier.credential_id != credential.id || verifier.auth_kind != AuthKind::Password {
            return Err(CoreError::InvalidCredentials);
        }
        let hash = match verifier.data.get("hash") {
            Some(hash) => hash,
            None => return Err(CoreError::InvalidCredentials),
        };

        match bcrypt::verify(&request.secret, hash) {
            Ok(true) => Ok(AuthOutcome { user, credential }),
            // Mismatch, or any other bcrypt error (malformed hash) — both
            // collapse to the generic credential failure at this boundary.
            Ok(false) | Err(_) => Err(CoreError::InvalidCredentials),
        }
    }
}

/// Builds the password [`Verifier`] for a newly created or reset credential.
pub fn new_password_verifier(
    verifier_id: VerifierId,
    credential_id: String,
    plaintext: &str,
    cost: i32,
) -> CoreResult<Verifier> {
    if plaintext.is_empty() {
        return Err(CoreError::InvalidRequest("empty password".into()));
    }
    let cost = if cost <= 0 {
        DEFAULT_COST
    } else {
        let cost = cost as u32;
        if cost > MAX_COST {
            return Err(CoreError::InvalidRequest("cost too high".into()));
        }
        cost.max(MIN_COST)
    };

    let hash = bcrypt::hash(plaintext, cost)
        .map_err(|e| CoreError::Internal(format!("bcrypt hash failed: {e}")))?;
    let mut data = BTreeMap::new();
    data.insert("hash".to_string(), hash);
    Ok(Verifier {
        id: verifier_id,
        credential_id,
        auth_kind: AuthKind::Password,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cp_storage_mem::InMemoryStorage;

    async fn seed_password_user(storage: &InMemoryStorage, subject: &str, password: &str, disabled: bool) {
        let now = Utc::now();
        let mut user = User::new(format!("uid-{subject}"), subject.to_string(), now);
        user.disabled = disabled;
        storage.upsert_user(user.clone()).await.unwrap();

        let credential = Credential {
            id: format!("cred-{subject}"),
            user_id: user.id.clone(),
            auth_kind: AuthKind::Password,
            created_at: now,
            updated_at: now,
        };
        storage.upsert_credential(credential.clone()).await.unwrap();

        let verifier =
            new_password_verifier(format!("ver-{subject}"), credential.id.clone(), password, 4)
                .unwrap();
        storage.upsert_verifier(verifier).await.unwrap();
    }

    #[tokio::test]
    async fn correct_password_succeeds() {
        let storage = Arc::new(InMemoryStorage::new());
        seed_password_user(&storage, "alice", "s3cret", false).await;
        let provider = PasswordProvider::new(storage);
        let outcome = provider
            .authenticate(AuthRequest {
                subject: "alice".into(),
                secret: "s3cret".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.user.subject, "alice");
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let storage = Arc::new(InMemoryStorage::new());
        seed_password_user(&storage, "alice", "s3cret", false).await;
        let provider = PasswordProvider::new(storage);
        let err = provider
            .authenticate(AuthRequest {
                subject: "alice".into(),
                secret: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
    }

    #[tokio::test]
    async fn disabled_user_is_invalid_credentials() {
        let storage = Arc::new(InMemoryStorage::new());
        seed_password_user(&storage, "alice", "s3cret", true).await;
        let provider = PasswordProvider::new(storage);
        let err = provider
            .authenticate(AuthRequest {
                subject: "alice".into(),
                secret: "s3cret".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
    }

    #[tokio::test]
    async fn unknown_subject_is_invalid_credentials() {
        let storage = Arc::new(InMemoryStorage::new());
        let provider = PasswordProvider::new(storage);
        let err = provider
            .authenticate(AuthRequest {
                subject: "nobody".into(),
                secret: "s3cret".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
    }
}
