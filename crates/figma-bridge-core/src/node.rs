//! Role manager.
//!
//! A `Node` is either leading (it owns a [`Leader`] and calls its bridge
//! directly) or not (it forwards through its [`Follower`]). The leader handle
//! lives inside the role variant itself, so "has a leader" and
//! "role is Leader" cannot disagree.

use crate::cancel::CancellationToken;
use crate::config::NodeConfig;
use crate::follower::Follower;
use crate::leader::Leader;
use crate::protocol::Params;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Current role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Unknown,
    Leader,
    Follower,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "UNKNOWN",
            Role::Leader => "LEADER",
            Role::Follower => "FOLLOWER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role together with the resources that role owns.
enum Membership {
    Unknown,
    Leader(Arc<Leader>),
    Follower,
}

impl Membership {
    fn role(&self) -> Role {
        match self {
            Membership::Unknown => Role::Unknown,
            Membership::Leader(_) => Role::Leader,
            Membership::Follower => Role::Follower,
        }
    }
}

/// Routes calls by role and performs role transitions.
pub struct Node {
    config: NodeConfig,
    membership: RwLock<Membership>,
    follower: Follower,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let follower = Follower::new(&config)?;
        Ok(Self {
            config,
            membership: RwLock::new(Membership::Unknown),
            follower,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub async fn role(&self) -> Role {
        self.membership.read().await.role()
    }

    /// The client this node uses to reach the leader.
    pub fn follower(&self) -> &Follower {
        &self.follower
    }

    /// The running leader, if this node is leading.
    pub async fn leader(&self) -> Option<Arc<Leader>> {
        match &*self.membership.read().await {
            Membership::Leader(leader) => Some(leader.clone()),
            _ => None,
        }
    }

    pub async fn send(
        &self,
        tool: &str,
        node_ids: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.send_with_params(tool, node_ids, None, cancel).await
    }

    /// Route a call to the local bridge when leading, otherwise forward it.
    pub async fn send_with_params(
        &self,
        tool: &str,
        node_ids: Option<Vec<String>>,
        params: Option<Params>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        // The guard is released before the network call.
        let leader = self.leader().await;

        match leader {
            Some(leader) => {
                leader
                    .bridge()
                    .send_with_params(tool, node_ids, params, cancel)
                    .await
            }
            None => {
                self.follower
                    .send_with_params(tool, node_ids, params, cancel)
                    .await
            }
        }
    }

    /// Try to take the shared address. No-op when already leading.
    pub async fn promote(&self) -> Result<()> {
        let mut membership = self.membership.write().await;
        if matches!(*membership, Membership::Leader(_)) {
            return Ok(());
        }

        let leader = Leader::acquire(&self.config).await?;
        *membership = Membership::Leader(Arc::new(leader));
        info!("Became LEADER on {}", self.config.addr);
        Ok(())
    }

    /// Settle as a follower, releasing the address if this node held it.
    pub async fn demote(&self) {
        let mut membership = self.membership.write().await;
        if matches!(*membership, Membership::Follower) {
            return;
        }

        if let Membership::Leader(leader) = &*membership {
            leader.release().await;
        }
        *membership = Membership::Follower;
        info!("Became FOLLOWER of {}", self.follower.leader_url());
    }

    /// Release everything and return to `Unknown`. Used at shutdown.
    pub async fn stop(&self) {
        let mut membership = self.membership.write().await;
        if let Membership::Leader(leader) = &*membership {
            leader.release().await;
        }
        *membership = Membership::Unknown;
        info!("Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ephemeral_config, unused_addr};
    use crate::BridgeError;

    fn node_on_unused_addr() -> Node {
        let config = NodeConfig::builder().addr(unused_addr()).build().unwrap();
        Node::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_new_node_is_unknown() {
        let node = node_on_unused_addr();
        assert_eq!(node.role().await, Role::Unknown);
        assert!(node.leader().await.is_none());
    }

    #[tokio::test]
    async fn test_promote_and_stop() {
        let node = node_on_unused_addr();
        node.promote().await.unwrap();
        assert_eq!(node.role().await, Role::Leader);
        assert!(node.leader().await.is_some());

        // Promoting again keeps the same leader.
        let before = node.leader().await.unwrap();
        node.promote().await.unwrap();
        assert!(Arc::ptr_eq(&before, &node.leader().await.unwrap()));

        node.stop().await;
        assert_eq!(node.role().await, Role::Unknown);
        assert!(node.leader().await.is_none());
    }

    #[tokio::test]
    async fn test_promote_fails_when_address_taken() {
        let holder = Leader::acquire(&ephemeral_config()).await.unwrap();
        let config = NodeConfig::builder()
            .addr(holder.local_addr())
            .build()
            .unwrap();
        let node = Node::new(config).unwrap();

        let err = node.promote().await.unwrap_err();
        assert!(err.is_address_in_use());
        assert_eq!(node.role().await, Role::Unknown);
        holder.release().await;
    }

    #[tokio::test]
    async fn test_demote_releases_address() {
        let node = node_on_unused_addr();
        node.promote().await.unwrap();
        let addr = node.config().addr;

        node.demote().await;
        assert_eq!(node.role().await, Role::Follower);
        assert!(node.leader().await.is_none());

        let config = NodeConfig::builder().addr(addr).build().unwrap();
        let other = Leader::acquire(&config).await.unwrap();
        other.release().await;
    }

    #[tokio::test]
    async fn test_leader_without_plugin_reports_not_connected() {
        let node = node_on_unused_addr();
        node.promote().await.unwrap();

        let err = node
            .send("get_document", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        node.stop().await;
    }

    #[tokio::test]
    async fn test_follower_forwards_to_leader() {
        let leader_node = node_on_unused_addr();
        leader_node.promote().await.unwrap();

        let follower_node = Node::new(leader_node.config().clone()).unwrap();
        follower_node.demote().await;
        assert_eq!(follower_node.role().await, Role::Follower);

        // No plugin on the leader: the application error travels back intact.
        let err = follower_node
            .send("get_document", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(&err, BridgeError::Peer(m) if m == "plugin not connected"));
        leader_node.stop().await;
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Leader.to_string(), "LEADER");
        assert_eq!(Role::Follower.to_string(), "FOLLOWER");
        assert_eq!(Role::Unknown.to_string(), "UNKNOWN");
    }
}
