//! End-to-end session scenarios (§8 Scenarios 1-4).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use cp_auth::password::new_password_verifier;
use cp_auth::{
    Algorithm, CredentialProvider, PasswordProvider, RateLimiter, RateLimiterConfig, RbacResolver,
    SessionConfig, SessionService, TokenCodec,
};
use cp_core::clock::{Clock, TestClock};
use cp_core::error::CoreError;
use cp_core::model::{AuthKind, Credential, Role, User};
use cp_storage_mem::InMemoryStorage;

struct Harness {
    storage: Arc<InMemoryStorage>,
    clock: TestClock,
    session: SessionService,
}

async fn seed_user(storage: &InMemoryStorage, subject: &str, password: &str, permission: &str) -> User {
    let now = Utc::now();
    let role = Role {
        id: "role-viewer".into(),
        name: "viewer".into(),
        permissions: BTreeSet::from([permission.to_string()]),
    };
    storage.seed_role(role).await;

    let mut user = User::new(format!("uid-{subject}"), subject.to_string(), now);
    user.role_ids.insert("role-viewer".into());
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
    user
}

fn build_harness(rotate_refresh: bool) -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    let clock = TestClock::new(Utc::now());
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());

    let issuer = Arc::new(TokenCodec::new(
        b"test-signing-key",
        "control-plane",
        vec!["control-plane-clients".to_string()],
        vec![Algorithm::Hs256],
        clock_dyn.clone(),
    ));
    let rbac = Arc::new(RbacResolver::new(storage.clone()));
    let providers: Vec<Arc<dyn CredentialProvider>> =
        vec![Arc::new(PasswordProvider::new(storage.clone()))];
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(3, Duration::minutes(1))));

    let session = SessionService::new(
        storage.clone(),
        issuer,
        rbac,
        Some(clock_dyn),
        limiter,
        providers,
        SessionConfig {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            rotate_refresh,
        },
    )
    .unwrap();

    Harness {
        storage,
        clock,
        session,
    }
}

#[tokio::test]
async fn scenario_1_login_success() {
    let harness = build_harness(true);
    seed_user(&harness.storage, "alice", "s3cret", "users:get").await;

    let (tokens, identity) = harness
        .session
        .login(AuthKind::Password, "alice", "s3cret")
        .await
        .unwrap();

    assert_eq!(identity.permissions, vec!["users:get".to_string()]);
    assert!(!identity.session_id.is_empty());
    assert!(!tokens.access_token.is_empty());
    assert!(!tokens.refresh_token.is_empty());
}

#[tokio::test]
async fn scenario_2_login_rate_limit() {
    let harness = build_harness(true);
    seed_user(&harness.storage, "alice", "s3cret", "users:get").await;

    // Three failed logins trip the limiter; all enforcement happens
    // inside `login` itself, not via direct limiter calls.
    for _ in 0..3 {
        let err = harness
            .session
            .login(AuthKind::Password, "alice", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
    }

    let blocked = harness
        .session
        .login(AuthKind::Password, "alice", "s3cret")
        .await
        .unwrap_err();
    assert_eq!(blocked, CoreError::RateLimited);

    harness.clock.advance(Duration::minutes(1) + Duration::seconds(1));
    let (_, identity) = harness
        .session
        .login(AuthKind::Password, "alice", "s3cret")
        .await
        .unwrap();
    assert_eq!(identity.subject, "alice");
}

#[tokio::test]
async fn scenario_3_refresh_rotation() {
    let harness = build_harness(true);
    seed_user(&harness.storage, "alice", "s3cret", "users:get").await;

    let (first, identity) = harness
        .session
        .login(AuthKind::Password, "alice", "s3cret")
        .await
        .unwrap();
    let session_id = identity.session_id.clone();

    harness.clock.advance(Duration::minutes(1));
    let (second, _) = harness
        .session
        .refresh(&session_id, &first.refresh_token)
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);

    let replay = harness
        .session
        .refresh(&session_id, &first.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(replay, CoreError::InvalidRefresh);

    let ok = harness
        .session
        .refresh(&session_id, &second.refresh_token)
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn scenario_4_revoke_then_refresh() {
    let harness = build_harness(true);
    seed_user(&harness.storage, "alice", "s3cret", "users:get").await;

    let (tokens, identity) = harness
        .session
        .login(AuthKind::Password, "alice", "s3cret")
        .await
        .unwrap();

    harness.session.revoke(&identity.session_id).await.unwrap();

    let err = harness
        .session
        .refresh(&identity.session_id, &tokens.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::Revoked);
}
