//! Outbound proxy pool and `AgentProxy` transports (C9, §4.9).

mod codec;
pub mod error;
pub mod pool;
pub mod proxy;
pub mod types;

pub use error::ProxyError;
pub use pool::{ProxyPool, ProxyPoolConfig};
pub use proxy::{AgentProxy, HttpAgentProxy, RpcAgentProxy};
pub use types::{TaskFilter, TaskListResponse, TaskStatus, TaskSubmission, TaskSummary};
