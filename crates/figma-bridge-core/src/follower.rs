//! Passive role: forwards calls to whichever process holds the shared
//! address, and probes it for liveness.

use crate::cancel::CancellationToken;
use crate::config::{ForwardingConfig, NetworkConfig, NodeConfig};
use crate::protocol::{ForwardRequest, ForwardResponse, Params};
use crate::{BridgeError, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client pointed at the leader's forwarding and health endpoints.
#[derive(Debug, Clone)]
pub struct Follower {
    client: Client,
    leader_url: String,
    probe_timeout: Duration,
}

impl Follower {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        Self::with_url(config.leader_url(), config.forward_timeout, config.probe_timeout)
    }

    /// Build a client against an explicit base URL.
    pub fn with_url(
        leader_url: impl Into<String>,
        forward_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(forward_timeout)
            .user_agent(ForwardingConfig::USER_AGENT)
            .build()
            .map_err(|e| BridgeError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            leader_url: leader_url.into(),
            probe_timeout,
        })
    }

    pub fn leader_url(&self) -> &str {
        &self.leader_url
    }

    pub async fn send(
        &self,
        tool: &str,
        node_ids: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.send_with_params(tool, node_ids, None, cancel).await
    }

    /// Forward one call to the leader's `/rpc` endpoint.
    pub async fn send_with_params(
        &self,
        tool: &str,
        node_ids: Option<Vec<String>>,
        params: Option<Params>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let request = ForwardRequest::new(tool, node_ids, params);
        let url = format!("{}{}", self.leader_url, NetworkConfig::RPC_PATH);
        debug!("Forwarding {} to {}", tool, url);

        let call = async {
            let response = self.client.post(&url).json(&request).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(BridgeError::UpstreamStatus {
                    status: status.as_u16(),
                });
            }

            let body = response.bytes().await?;
            let reply: ForwardResponse = serde_json::from_slice(&body).map_err(|e| BridgeError::Json {
                message: format!("Failed to decode leader response: {}", e),
                source: Some(e),
            })?;
            Ok::<_, BridgeError>(reply)
        };

        let reply = tokio::select! {
            reply = call => reply?,
            reason = cancel.cancelled() => return Err(reason.into()),
        };

        if let Some(message) = reply.error.filter(|e| !e.is_empty()) {
            return Err(BridgeError::Peer(message));
        }
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// True if the leader answers its health check with 200 in time.
    pub async fn probe(&self, cancel: &CancellationToken) -> bool {
        let url = format!("{}{}", self.leader_url, NetworkConfig::PING_PATH);
        let ping = self.client.get(&url).timeout(self.probe_timeout).send();

        tokio::select! {
            result = ping => match result {
                Ok(response) => response.status() == StatusCode::OK,
                Err(e) => {
                    debug!("Probe of {} failed: {}", url, e);
                    false
                }
            },
            _ = cancel.cancelled() => false,
        }
    }
}
