//! `AgentProxy` transports (§4.9): one HTTP implementation over a shared
//! `reqwest::Client`, one RPC implementation over a cached
//! `tonic::transport::Channel`.

use async_trait::async_trait;
use tonic::transport::Channel;

use crate::codec::JsonCodec;
use crate::error::ProxyError;
use crate::types::{
    RpcListTasksRequest, RpcListTasksResponse, TaskFilter, TaskListResponse, TaskStatus,
    TaskSubmission, TaskSummary,
};

/// Capability set every transport variant implements (§4.9).
#[async_trait]
pub trait AgentProxy: Send + Sync {
    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskListResponse, ProxyError>;
    async fn submit_task(&self, submission: TaskSubmission) -> Result<(), ProxyError>;
}

/// v1 HTTP transport: `GET /api/v1/tasks`, `POST /api/v1/tasks`.
pub struct HttpAgentProxy {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgentProxy {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentProxy for HttpAgentProxy {
    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskListResponse, ProxyError> {
        let url = format!("{}/api/v1/tasks", self.endpoint);
        let mut request = self.client.get(&url);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(slot) = &filter.slot {
            query.push(("slot", slot.clone()));
        }
        if let Some(status) = filter.status {
            query.push(("status", status.as_query_value().to_string()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = filter.offset {
            query.push(("offset", offset.to_string()));
        }
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(ProxyError::Http(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        response
            .json::<TaskListResponse>()
            .await
            .map_err(|e| ProxyError::Decode(e.to_string()))
    }

    async fn submit_task(&self, submission: TaskSubmission) -> Result<(), ProxyError> {
        let url = format!("{}/api/v1/tasks", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "spec": submission.spec }))
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        match response.status() {
            reqwest::StatusCode::OK | reqwest::StatusCode::CREATED | reqwest::StatusCode::NO_CONTENT => {
                Ok(())
            }
            other => Err(ProxyError::Http(format!("unexpected status {other}"))),
        }
    }
}

/// v1 RPC transport over a cached channel. `SubmitTask` is not yet
/// defined over RPC (§4.9) and always fails distinctly.
pub struct RpcAgentProxy {
    channel: Channel,
}

impl RpcAgentProxy {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl AgentProxy for RpcAgentProxy {
    async fn list_tasks(&self, filter: TaskFilter) -> Result<TaskListResponse, ProxyError> {
        let mut client = tonic::client::Grpc::new(self.channel.clone());
        client
            .ready()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        let request = RpcListTasksRequest {
            slot: filter.slot,
            status: filter.status.map(TaskStatus::to_proto_name),
            limit: filter.limit,
            offset: filter.offset,
        };
        let path = http::uri::PathAndQuery::from_static("/cp.agent.v1.AgentService/ListTasks");
        let response = client
            .unary(
                tonic::Request::new(request),
                path,
                JsonCodec::<RpcListTasksRequest, RpcListTasksResponse>::default(),
            )
            .await
            .map_err(|status| ProxyError::Transport(status.to_string()))?;

        let body = response.into_inner();
        let tasks = body
            .tasks
            .into_iter()
            .map(|task| {
                let status = TaskStatus::from_proto_name(&task.status).ok_or_else(|| {
                    ProxyError::Decode(format!("unknown task status {}", task.status))
                })?;
                Ok(TaskSummary {
                    id: task.id,
                    slot: task.slot,
                    status,
                })
            })
            .collect::<Result<Vec<_>, ProxyError>>()?;

        Ok(TaskListResponse {
            tasks,
            total: body.total,
        })
    }

    async fn submit_task(&self, _submission: TaskSubmission) -> Result<(), ProxyError> {
        Err(ProxyError::RpcSubmitNotImplemented)
    }
}
