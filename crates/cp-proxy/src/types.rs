//! Wire DTOs for the v1 `AgentProxy` contract (§4.9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn lowercase(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// HTTP query-parameter form: the plain lowercase name.
    pub fn as_query_value(self) -> &'static str {
        self.lowercase()
    }

    pub fn from_query_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Protobuf enum form: `TASK_STATUS_<UPPER>`.
    pub fn to_proto_name(self) -> String {
        format!("TASK_STATUS_{}", self.lowercase().to_uppercase())
    }

    pub fn from_proto_name(name: &str) -> Option<Self> {
        let lower = name.strip_prefix("TASK_STATUS_")?.to_lowercase();
        Self::from_query_value(&lower)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub slot: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub slot: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskSummary>,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub spec: serde_json::Value,
}

/// Hand-defined RPC-wire stand-ins (§4.9) — carry `status` as the raw
/// `TASK_STATUS_<UPPER>` string rather than the domain [`TaskStatus`] so
/// the enum-mapping rule has somewhere to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RpcListTasksRequest {
    pub slot: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RpcTaskSummary {
    pub id: String,
    pub slot: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct RpcListTasksResponse {
    pub tasks: Vec<RpcTaskSummary>,
    pub total: u32,
}
