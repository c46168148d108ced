//! Figma Bridge Core - one plugin connection shared by many local processes.
//!
//! Several independently started processes may want to talk to the same Figma
//! plugin, which only accepts a single WebSocket. Each process runs a
//! [`FigmaBridge`]; exactly one of them binds the shared address and owns the
//! plugin connection, the rest forward their calls to it over HTTP. If the
//! owner goes away, a forwarder takes over on its next election tick.
//!
//! # Example
//!
//! ```rust,ignore
//! use figma_bridge::{FigmaBridge, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> figma_bridge::Result<()> {
//!     let mut bridge = FigmaBridge::start(NodeConfig::default()).await?;
//!
//!     let node = bridge.send("get_node", vec!["123:456".into()]).await?;
//!     println!("{node}");
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod election;
pub mod error;
pub mod follower;
pub mod leader;
pub mod node;
pub mod protocol;

pub use bridge::Bridge;
pub use cancel::{CancelReason, CancellationToken};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use election::{Election, ElectionHandle};
pub use error::{BridgeError, Result};
pub use follower::Follower;
pub use leader::Leader;
pub use node::{Node, Role};
pub use protocol::{BridgeRequest, BridgeResponse, ForwardRequest, ForwardResponse, Params};

use config::BridgeConfig;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// The calls a tool front end makes, regardless of which process owns the
/// plugin connection.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn send(&self, tool: &str, node_ids: Vec<String>) -> Result<Value>;

    async fn send_with_params(
        &self,
        tool: &str,
        node_ids: Vec<String>,
        params: Params,
    ) -> Result<Value>;
}

/// A started node with its election monitor.
pub struct FigmaBridge {
    node: Arc<Node>,
    election: ElectionHandle,
}

impl FigmaBridge {
    /// Build the node, settle an initial role and start monitoring.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let node = Arc::new(Node::new(config)?);
        let election = Election::start(node.clone()).await;
        Ok(Self { node, election })
    }

    pub async fn role(&self) -> Role {
        self.node.role().await
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Route a call with an explicit cancellation token.
    pub async fn send_with_cancel(
        &self,
        tool: &str,
        node_ids: Vec<String>,
        params: Option<Params>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.node
            .send_with_params(tool, Some(node_ids), params, cancel)
            .await
    }

    /// Stop monitoring, then release whatever this node holds.
    pub async fn stop(&mut self) {
        self.election.stop().await;
        self.node.stop().await;
        info!("Figma bridge stopped");
    }
}

#[async_trait::async_trait]
impl ToolHandler for FigmaBridge {
    async fn send(&self, tool: &str, node_ids: Vec<String>) -> Result<Value> {
        let cancel = CancellationToken::new().with_timeout(BridgeConfig::CALLER_TIMEOUT);
        self.send_with_cancel(tool, node_ids, None, &cancel).await
    }

    async fn send_with_params(
        &self,
        tool: &str,
        node_ids: Vec<String>,
        params: Params,
    ) -> Result<Value> {
        let cancel = CancellationToken::new().with_timeout(BridgeConfig::CALLER_TIMEOUT);
        self.send_with_cancel(tool, node_ids, Some(params), &cancel)
            .await
    }
}
