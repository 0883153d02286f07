//! Persisted and ephemeral data types (§3).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoleId = String;
pub type CredentialId = String;
pub type VerifierId = String;
pub type SessionId = String;
pub type AgentId = String;
pub type SpecId = String;
pub type Permission = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub subject: String,
    pub email: String,
    pub name: String,
    pub disabled: bool,
    pub role_ids: BTreeSet<RoleId>,
    pub permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, subject: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            subject,
            email: String::new(),
            name: String::new(),
            disabled: false,
            role_ids: BTreeSet::new(),
            permissions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Password,
    ApiKey,
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::ApiKey => write!(f, "api_key"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub auth_kind: AuthKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Secret-bearing sibling of a [`Credential`]. The `data` map holds the
/// keyed payload described in §3 (e.g. `"hash"` for password verifiers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verifier {
    pub id: VerifierId,
    pub credential_id: CredentialId,
    pub auth_kind: AuthKind,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub credential_id: CredentialId,
    pub auth_kind: AuthKind,
    pub refresh_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Http,
    Grpc,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
        }
    }

    /// Parses a wire-level label. Unlike the closed enum itself, this
    /// accepts arbitrary strings so an unrecognized transport (a future
    /// agent kind, a typo in config) is representable instead of a
    /// compile-time-unreachable match arm.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label {
            "http" => Some(Self::Http),
            "grpc" => Some(Self::Grpc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersion {
    V1,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
        }
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        match label {
            "v1" => Some(Self::V1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub endpoint: String,
    pub endpoint_type: EndpointType,
    pub api_version: ApiVersion,
    pub os: String,
    pub arch: String,
    pub platform: String,
    pub uptime_seconds: u64,
    /// Reported by the agent; read-only from the control plane.
    pub metadata: BTreeMap<String, String>,
    /// Control-plane-owned; write-only from the agent's perspective.
    pub labels: BTreeMap<String, String>,
    pub last_seen_at: DateTime<Utc>,
    /// Reported by the agent. `None` means "use the reconciler default."
    pub heartbeat_interval_seconds: Option<i64>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Applies the upsert-preservation invariant: `created_at` and
    /// `labels` always come from the prior record, never the incoming one.
    pub fn merge_upsert(mut incoming: Self, existing: Option<&Self>) -> Self {
        if let Some(prev) = existing {
            incoming.created_at = prev.created_at;
            incoming.labels = prev.labels.clone();
        }
        incoming
    }
}

/// Opaque versioned workload definition. The wire format of `payload` is
/// not interpreted by this core (§1); only `targets` and `version` drive
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub id: SpecId,
    pub version: i64,
    pub targets: Vec<AgentId>,
    pub payload: serde_json::Value,
}

impl Spec {
    pub fn targets(&self) -> &[AgentId] {
        &self.targets
    }

    /// The payload suitable for submission to an agent's `SubmitTask`.
    pub fn to_create_spec(&self) -> serde_json::Value {
        self.payload.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Pending,
    Synced,
    Drift,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub id: String,
    pub spec_id: SpecId,
    pub agent_id: AgentId,
    pub desired_version: i64,
    pub actual_version: i64,
    pub status: RolloutStatus,
    pub attempts: u32,
    pub last_pushed_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub err_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rollout {
    /// Deterministic `(spec_id, agent_id)` pairing (P7).
    pub fn id_for(spec_id: &str, agent_id: &str) -> String {
        format!("rid-{spec_id}-{agent_id}")
    }

    pub fn new_pending(
        spec_id: SpecId,
        agent_id: AgentId,
        desired_version: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Self::id_for(&spec_id, &agent_id);
        Self {
            id,
            spec_id,
            agent_id,
            desired_version,
            actual_version: 0,
            status: RolloutStatus::Pending,
            attempts: 0,
            last_pushed_at: None,
            last_synced_at: None,
            err_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resets attempts and clears the error, per the "transitioning into
    /// pending" invariant.
    pub fn mark_pending(&mut self, desired_version: i64, now: DateTime<Utc>) {
        self.desired_version = desired_version;
        self.status = RolloutStatus::Pending;
        self.attempts = 0;
        self.err_msg = None;
        self.updated_at = now;
    }

    pub fn mark_synced(&mut self, actual_version: i64, now: DateTime<Utc>) {
        self.actual_version = actual_version;
        self.status = RolloutStatus::Synced;
        self.err_msg = None;
        self.last_synced_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, err_msg: impl Into<String>, now: DateTime<Utc>) {
        self.status = RolloutStatus::Failed;
        self.attempts += 1;
        self.err_msg = Some(err_msg.into());
        self.last_pushed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_drift(&mut self, now: DateTime<Utc>) {
        self.status = RolloutStatus::Drift;
        self.updated_at = now;
    }

    pub fn is_actionable(&self, max_retries: u32) -> bool {
        match self.status {
            RolloutStatus::Pending | RolloutStatus::Drift => true,
            RolloutStatus::Failed => self.attempts < max_retries,
            RolloutStatus::Synced | RolloutStatus::Unknown => false,
        }
    }
}

/// In-memory projection of an authenticated principal, attached to access
/// tokens. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub subject: String,
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub token_id: String,
    pub session_id: String,
    /// Sorted, de-duplicated (P1).
    pub permissions: Vec<Permission>,
}

impl Identity {
    /// Returns the sorted, de-duplicated permission set, constructing it
    /// from whatever order the caller assembled the permissions in.
    pub fn with_sorted_permissions(mut self) -> Self {
        self.permissions.sort();
        self.permissions.dedup();
        self
    }
}
