//! The storage contract consumed by C4, C6, C7, C8, C10 (§6). Implementations
//! (in-memory, SQL, ...) live outside this core; `cp-storage-mem` ships an
//! in-memory one for this workspace's own tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::model::*;

/// Default page size when a caller passes `limit = 0`.
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Hard cap on page size regardless of what a caller requests.
pub const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// 0 means "use the service default"; always capped at `MAX_LIST_LIMIT`.
    pub limit: u32,
    pub cursor: Option<String>,
}

impl ListOptions {
    pub fn effective_limit(&self) -> u32 {
        let limit = if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit
        };
        limit.min(MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub ids: Option<Vec<RoleId>>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct SpecFilter {}

#[derive(Debug, Clone, Default)]
pub struct RolloutFilter {
    pub spec_id: Option<SpecId>,
    pub agent_id: Option<AgentId>,
    pub status: Option<RolloutStatus>,
}

/// Storage contract. Every method accepts only the arguments named in §6;
/// cancellation/context propagation is left to the async runtime (tokio
/// cancels a future on drop) rather than a hand-rolled context parameter.
#[async_trait]
pub trait Storage: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: &str) -> CoreResult<User>;
    async fn get_user_by_subject(&self, subject: &str) -> CoreResult<User>;
    async fn upsert_user(&self, user: User) -> CoreResult<User>;

    // --- Roles ---
    async fn get_roles(&self, ids: &[RoleId]) -> CoreResult<Vec<Role>>;
    async fn list_roles(&self, filter: RoleFilter, opts: ListOptions) -> CoreResult<Page<Role>>;

    // --- Credentials ---
    async fn get_credential(&self, id: &str) -> CoreResult<Credential>;
    async fn get_credential_by_user_and_auth(
        &self,
        user_id: &str,
        auth_kind: AuthKind,
    ) -> CoreResult<Credential>;
    async fn list_credentials_by_user(&self, user_id: &str) -> CoreResult<Vec<Credential>>;
    async fn upsert_credential(&self, credential: Credential) -> CoreResult<Credential>;
    async fn delete_credential(&self, id: &str) -> CoreResult<()>;

    // --- Verifiers ---
    async fn get_verifier_by_credential(&self, credential_id: &str) -> CoreResult<Verifier>;
    async fn upsert_verifier(&self, verifier: Verifier) -> CoreResult<Verifier>;
    async fn delete_verifier_by_credential(&self, credential_id: &str) -> CoreResult<()>;

    // --- Sessions ---
    async fn get_session(&self, id: &str) -> CoreResult<Session>;
    async fn create_session(&self, session: Session) -> CoreResult<Session>;
    async fn list_sessions_by_user(&self, user_id: &str) -> CoreResult<Vec<Session>>;
    async fn revoke_session(&self, id: &str, at: DateTime<Utc>) -> CoreResult<()>;
    /// Atomic replace of `(refresh_hash, expires_at)`, conditional on the
    /// session still existing and not being revoked (§9 Design Notes).
    /// `now` stamps `updated_at`; it is independent of `new_expires_at`.
    async fn rotate_refresh(
        &self,
        id: &str,
        new_hash: String,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;
    async fn delete_session(&self, id: &str) -> CoreResult<()>;
    async fn delete_sessions_by_user(&self, user_id: &str) -> CoreResult<()>;

    // --- Agents ---
    async fn get_agent(&self, id: &str) -> CoreResult<Agent>;
    async fn list_agents(&self, filter: AgentFilter, opts: ListOptions) -> CoreResult<Page<Agent>>;
    async fn upsert_agent(&self, agent: Agent) -> CoreResult<Agent>;
    async fn delete_agent(&self, id: &str) -> CoreResult<()>;

    // --- Specs ---
    async fn get_spec(&self, id: &str) -> CoreResult<Spec>;
    async fn list_specs(&self, filter: SpecFilter, opts: ListOptions) -> CoreResult<Page<Spec>>;
    async fn upsert_spec(&self, spec: Spec) -> CoreResult<Spec>;
    async fn delete_spec(&self, id: &str) -> CoreResult<()>;

    // --- Rollouts ---
    async fn get_rollout(&self, id: &str) -> CoreResult<Rollout>;
    async fn list_rollouts(
        &self,
        filter: RolloutFilter,
        opts: ListOptions,
    ) -> CoreResult<Page<Rollout>>;
    async fn upsert_rollout(&self, rollout: Rollout) -> CoreResult<Rollout>;
    async fn delete_rollouts_by_spec(&self, spec_id: &str) -> CoreResult<()>;
}
