//! An in-memory [`Storage`] implementation. Not part of the spec's scope —
//! storage backends are abstract collaborators there — but every
//! reconciler and service test in this workspace needs a concrete
//! backend to run against, so this crate plays that role the way a
//! reference fake would in the corpus's own test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::*;
use cp_core::model::Rollout as RolloutModel;
use cp_core::storage::{AgentFilter, ListOptions, Page, RoleFilter, RolloutFilter, SpecFilter, Storage};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users_by_id: HashMap<UserId, User>,
    users_by_subject: HashMap<String, UserId>,
    roles: HashMap<RoleId, Role>,
    credentials: HashMap<CredentialId, Credential>,
    credentials_by_user_auth: HashMap<(UserId, AuthKind), CredentialId>,
    verifiers_by_credential: HashMap<CredentialId, Verifier>,
    sessions: HashMap<SessionId, Session>,
    agents: HashMap<AgentId, Agent>,
    specs: HashMap<SpecId, Spec>,
    rollouts: HashMap<String, RolloutModel>,
}

/// An in-memory, `RwLock`-guarded [`Storage`]. Thread-safe, not persistent.
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Test/dev-only seeding hook. The `Storage` contract in §6 has no
    /// role-mutation method (role management is assumed to live behind a
    /// separate admin surface out of scope for this core), so role fixtures
    /// go in directly rather than through the trait.
    pub async fn seed_role(&self, role: Role) {
        let mut state = self.state.write().await;
        state.roles.insert(role.id.clone(), role);
    }
}

fn paginate<T: Clone>(items: Vec<T>, opts: &ListOptions) -> Page<T> {
    let limit = opts.effective_limit() as usize;
    let page_items = items.into_iter().take(limit).collect();
    Page {
        items: page_items,
        next_cursor: None,
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_user(&self, id: &str) -> CoreResult<User> {
        let state = self.state.read().await;
        state
            .users_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("user {id}")))
    }

    async fn get_user_by_subject(&self, subject: &str) -> CoreResult<User> {
        let state = self.state.read().await;
        let id = state
            .users_by_subject
            .get(subject)
            .ok_or_else(|| CoreError::not_found(format!("user subject {subject}")))?;
        state
            .users_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("user {id}")))
    }

    async fn upsert_user(&self, user: User) -> CoreResult<User> {
        let mut state = self.state.write().await;
        state
            .users_by_subject
            .insert(user.subject.clone(), user.id.clone());
        state.users_by_id.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_roles(&self, ids: &[RoleId]) -> CoreResult<Vec<Role>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.roles.get(id).cloned())
            .collect())
    }

    async fn list_roles(&self, filter: RoleFilter, opts: ListOptions) -> CoreResult<Page<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        if let Some(ids) = &filter.ids {
            roles.retain(|r| ids.contains(&r.id));
        }
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(paginate(roles, &opts))
    }

    async fn get_credential(&self, id: &str) -> CoreResult<Credential> {
        let state = self.state.read().await;
        state
            .credentials
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("credential {id}")))
    }

    async fn get_credential_by_user_and_auth(
        &self,
        user_id: &str,
        auth_kind: AuthKind,
    ) -> CoreResult<Credential> {
        let state = self.state.read().await;
        let id = state
            .credentials_by_user_auth
            .get(&(user_id.to_string(), auth_kind))
            .ok_or_else(|| CoreError::not_found(format!("credential for {user_id}/{auth_kind}")))?;
        state
            .credentials
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("credential {id}")))
    }

    async fn list_credentials_by_user(&self, user_id: &str) -> CoreResult<Vec<Credential>> {
        let state = self.state.read().await;
        Ok(state
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert_credential(&self, credential: Credential) -> CoreResult<Credential> {
        let mut state = self.state.write().await;
        state.credentials_by_user_auth.insert(
            (credential.user_id.clone(), credential.auth_kind),
            credential.id.clone(),
        );
        state
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(credential)
    }

    async fn delete_credential(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(cred) = state.credentials.remove(id) {
            state
                .credentials_by_user_auth
                .remove(&(cred.user_id, cred.auth_kind));
        }
        Ok(())
    }

    async fn get_verifier_by_credential(&self, credential_id: &str) -> CoreResult<Verifier> {
        let state = self.state.read().await;
        state
            .verifiers_by_credential
            .get(credential_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("verifier for {credential_id}")))
    }

    async fn upsert_verifier(&self, verifier: Verifier) -> CoreResult<Verifier> {
        let mut state = self.state.write().await;
        state
            .verifiers_by_credential
            .insert(verifier.credential_id.clone(), verifier.clone());
        Ok(verifier)
    }

    async fn delete_verifier_by_credential(&self, credential_id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.verifiers_by_credential.remove(credential_id);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> CoreResult<Session> {
        let state = self.state.read().await;
        state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("session {id}")))
    }

    async fn create_session(&self, session: Session) -> CoreResult<Session> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn list_sessions_by_user(&self, user_id: &str) -> CoreResult<Vec<Session>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke_session(&self, id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("session {id}")))?;
        if session.revoked_at.is_none() {
            session.revoked_at = Some(at);
            session.updated_at = at;
        }
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        id: &str,
        new_hash: String,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("session {id}")))?;
        if session.revoked_at.is_some() {
            return Err(CoreError::Revoked);
        }
        session.refresh_hash = new_hash;
        session.expires_at = new_expires_at;
        session.updated_at = now;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.sessions.remove(id);
        Ok(())
    }

    async fn delete_sessions_by_user(&self, user_id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> CoreResult<Agent> {
        let state = self.state.read().await;
        state
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("agent {id}")))
    }

    async fn list_agents(&self, filter: AgentFilter, opts: ListOptions) -> CoreResult<Page<Agent>> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state.agents.values().cloned().collect();
        if let Some(status) = filter.status {
            agents.retain(|a| a.status == status);
        }
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(paginate(agents, &opts))
    }

    async fn upsert_agent(&self, agent: Agent) -> CoreResult<Agent> {
        let mut state = self.state.write().await;
        let existing = state.agents.get(&agent.id).cloned();
        let merged = Agent::merge_upsert(agent, existing.as_ref());
        state.agents.insert(merged.id.clone(), merged.clone());
        Ok(merged)
    }

    async fn delete_agent(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.agents.remove(id);
        Ok(())
    }

    async fn get_spec(&self, id: &str) -> CoreResult<Spec> {
        let state = self.state.read().await;
        state
            .specs
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("spec {id}")))
    }

    async fn list_specs(&self, _filter: SpecFilter, opts: ListOptions) -> CoreResult<Page<Spec>> {
        let state = self.state.read().await;
        let mut specs: Vec<Spec> = state.specs.values().cloned().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(paginate(specs, &opts))
    }

    async fn upsert_spec(&self, spec: Spec) -> CoreResult<Spec> {
        let mut state = self.state.write().await;
        state.specs.insert(spec.id.clone(), spec.clone());
        Ok(spec)
    }

    async fn delete_spec(&self, id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.specs.remove(id);
        Ok(())
    }

    async fn get_rollout(&self, id: &str) -> CoreResult<RolloutModel> {
        let state = self.state.read().await;
        state
            .rollouts
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("rollout {id}")))
    }

    async fn list_rollouts(
        &self,
        filter: RolloutFilter,
        opts: ListOptions,
    ) -> CoreResult<Page<RolloutModel>> {
        let state = self.state.read().await;
        let mut rollouts: Vec<RolloutModel> = state.rollouts.values().cloned().collect();
        if let Some(spec_id) = &filter.spec_id {
            rollouts.retain(|r| &r.spec_id == spec_id);
        }
        if let Some(agent_id) = &filter.agent_id {
            rollouts.retain(|r| &r.agent_id == agent_id);
        }
        if let Some(status) = filter.status {
            rollouts.retain(|r| r.status == status);
        }
        rollouts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(paginate(rollouts, &opts))
    }

    async fn upsert_rollout(&self, rollout: RolloutModel) -> CoreResult<RolloutModel> {
        let mut state = self.state.write().await;
        state.rollouts.insert(rollout.id.clone(), rollout.clone());
        Ok(rollout)
    }

    async fn delete_rollouts_by_spec(&self, spec_id: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.rollouts.retain(|_, r| r.spec_id != spec_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn user_upsert_and_lookup_by_subject() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let user = User::new("u1".into(), "alice".into(), now);
        storage.upsert_user(user.clone()).await.unwrap();

        let fetched = storage.get_user_by_subject("alice").await.unwrap();
        assert_eq!(fetched.id, "u1");
    }

    #[tokio::test]
    async fn agent_upsert_preserves_created_at_and_labels() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let mut first = Agent {
            id: "a1".into(),
            name: "agent-1".into(),
            endpoint: "http://localhost:9000".into(),
            endpoint_type: EndpointType::Http,
            api_version: ApiVersion::V1,
            os: "linux".into(),
            arch: "x86_64".into(),
            platform: "bare-metal".into(),
            uptime_seconds: 0,
            metadata: Default::default(),
            labels: Default::default(),
            last_seen_at: now,
            heartbeat_interval_seconds: None,
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        };
        first.labels.insert("env".into(), "prod".into());
        storage.upsert_agent(first.clone()).await.unwrap();

        let mut second = first.clone();
        second.created_at = now + chrono::Duration::days(1);
        second.labels.clear();
        second.uptime_seconds = 100;
        let merged = storage.upsert_agent(second).await.unwrap();

        assert_eq!(merged.created_at, first.created_at);
        assert_eq!(merged.labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(merged.uptime_seconds, 100);
    }

    #[tokio::test]
    async fn rotate_refresh_fails_on_revoked_session() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            user_id: "u1".into(),
            credential_id: "c1".into(),
            auth_kind: AuthKind::Password,
            refresh_hash: "h1".into(),
            expires_at: now + chrono::Duration::hours(1),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.create_session(session).await.unwrap();
        storage.revoke_session("s1", now).await.unwrap();

        let err = storage
            .rotate_refresh("s1", "h2".into(), now + chrono::Duration::hours(1), now)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Revoked);
    }

    #[tokio::test]
    async fn rotate_refresh_stamps_updated_at_with_now_not_new_expiry() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            user_id: "u1".into(),
            credential_id: "c1".into(),
            auth_kind: AuthKind::Password,
            refresh_hash: "h1".into(),
            expires_at: now + chrono::Duration::hours(1),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.create_session(session).await.unwrap();

        let later = now + chrono::Duration::minutes(5);
        let new_expiry = later + chrono::Duration::days(30);
        storage
            .rotate_refresh("s1", "h2".into(), new_expiry, later)
            .await
            .unwrap();

        let reloaded = storage.get_session("s1").await.unwrap();
        assert_eq!(reloaded.expires_at, new_expiry);
        assert_eq!(reloaded.updated_at, later);
    }
}
