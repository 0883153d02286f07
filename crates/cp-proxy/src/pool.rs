//! Outbound client pool keyed by endpoint (§4.9). HTTP transport is a
//! single shared `reqwest::Client`; RPC transport caches one
//! `tonic::transport::Channel` per endpoint behind a read-write lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cp_core::model::{ApiVersion, EndpointType};
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use crate::error::ProxyError;
use crate::proxy::{AgentProxy, HttpAgentProxy, RpcAgentProxy};

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

pub struct ProxyPool {
    http_client: reqwest::Client,
    rpc_channels: Arc<RwLock<HashMap<String, Channel>>>,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Result<Self, ProxyError> {
        let http_client = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(false)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self {
            http_client,
            rpc_channels: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Dispatches on `api_version` and `endpoint_type` to hand back the
    /// matching transport (§4.9's `Get`). Both are taken as wire labels
    /// rather than the closed `EndpointType`/`ApiVersion` enums, since an
    /// unrecognized label (a future agent kind, a stale config entry)
    /// must be representable and rejected rather than unreachable.
    pub async fn get(
        &self,
        endpoint: &str,
        endpoint_type: &str,
        api_version: &str,
    ) -> Result<Arc<dyn AgentProxy>, ProxyError> {
        if ApiVersion::parse_label(api_version) != Some(ApiVersion::V1) {
            return Err(ProxyError::UnsupportedApiVersion);
        }
        let endpoint_type =
            EndpointType::parse_label(endpoint_type).ok_or(ProxyError::UnsupportedEndpointType)?;

        match endpoint_type {
            EndpointType::Http => Ok(Arc::new(HttpAgentProxy::new(self.http_client.clone(), endpoint))),
            EndpointType::Grpc => {
                // Double-checked lookup: try the read lock first, only
                // take the write lock (and re-check) on a miss.
                if let Some(channel) = self.rpc_channels.read().await.get(endpoint) {
                    return Ok(Arc::new(RpcAgentProxy::new(channel.clone())));
                }

                let mut channels = self.rpc_channels.write().await;
                if let Some(channel) = channels.get(endpoint) {
                    return Ok(Arc::new(RpcAgentProxy::new(channel.clone())));
                }

                let parsed: Endpoint = endpoint
                    .parse()
                    .map_err(|e| ProxyError::Transport(format!("invalid endpoint: {e}")))?;
                let channel = parsed
                    .connect()
                    .await
                    .map_err(|e| ProxyError::Transport(e.to_string()))?;
                channels.insert(endpoint.to_string(), channel.clone());
                Ok(Arc::new(RpcAgentProxy::new(channel)))
            }
        }
    }

    /// Discards every cached RPC channel. The shared HTTP client drains
    /// its own idle connections when its last clone is dropped.
    pub async fn close(&self) {
        let mut channels = self.rpc_channels.write().await;
        let closed = channels.len();
        channels.clear();
        info!(closed, "proxy pool closed cached rpc channels");
    }
}
