//! Election monitor.
//!
//! Leadership goes to whichever process manages to bind the shared address.
//! Everyone else probes it and follows. The monitor decides once at
//! startup, then re-checks on a timer whose period is drawn once per process
//! from a jitter band, so processes started together do not retry in lockstep.
//!
//! ```text
//! Unknown  --promote ok------------------> Leader
//! Unknown  --promote err, probe alive----> Follower
//! Unknown  --promote err, probe dead-----> Unknown (retry next tick)
//! Follower --probe dead, promote ok------> Leader
//! Leader   --------------------------------> Leader
//! ```
//!
//! Single-host only: exclusive binding of one address is the whole mutual
//! exclusion mechanism.

use crate::cancel::CancellationToken;
use crate::node::{Node, Role};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to a running monitor. Dropping it stops the monitor.
pub struct ElectionHandle {
    period: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl ElectionHandle {
    /// The tick period chosen for this process.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the timer and wait for the monitor task to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ElectionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Drives a [`Node`]'s role transitions.
pub struct Election;

impl Election {
    /// Decide the initial role, then keep monitoring in the background.
    pub async fn start(node: Arc<Node>) -> ElectionHandle {
        let period = Self::pick_period(
            node.config().election_period_min,
            node.config().election_period_max,
        );

        Self::determine_role(&node).await;
        info!(
            "Election settled initial role {} (monitor period {:?})",
            node.role().await,
            period
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::monitor_loop(node, period, shutdown_rx));

        ElectionHandle {
            period,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        }
    }

    fn pick_period(min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let millis = rand::rng().random_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    async fn monitor_loop(node: Arc<Node>, period: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Election monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    Self::check_and_update_role(&node).await;
                }
            }
        }
    }

    /// One monitor tick.
    pub async fn check_and_update_role(node: &Node) {
        match node.role().await {
            Role::Follower => {
                if !Self::probe(node).await {
                    warn!("Leader not responding, attempting takeover...");
                    if let Err(e) = node.promote().await {
                        warn!("Failed to become leader: {}", e);
                    }
                }
            }
            // Nothing to do while leading.
            Role::Leader => {}
            Role::Unknown => Self::determine_role(node).await,
        }
    }

    /// Try to lead; otherwise follow a live leader, or stay undecided.
    pub async fn determine_role(node: &Node) {
        match node.promote().await {
            Ok(()) => return,
            Err(e) if e.is_address_in_use() => {
                debug!("Shared address taken, probing current leader");
            }
            Err(e) => warn!("Leadership attempt failed: {}", e),
        }

        if Self::probe(node).await {
            node.demote().await;
        } else {
            debug!("No live leader found, retrying next tick");
        }
    }

    async fn probe(node: &Node) -> bool {
        let cancel = CancellationToken::new().with_timeout(node.config().probe_timeout);
        node.follower().probe(&cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::leader::Leader;
    use crate::testing::{ephemeral_config, unused_addr};
    use axum::{http::StatusCode, routing::get, Router};

    fn fast_config(addr: std::net::SocketAddr) -> NodeConfig {
        NodeConfig::builder()
            .addr(addr)
            .probe_timeout(Duration::from_millis(300))
            .election_period(Duration::from_millis(100), Duration::from_millis(150))
            .build()
            .unwrap()
    }

    #[test]
    fn test_period_within_band() {
        for _ in 0..100 {
            let p = Election::pick_period(Duration::from_secs(3), Duration::from_secs(5));
            assert!(p >= Duration::from_secs(3) && p <= Duration::from_secs(5));
        }
        assert_eq!(
            Election::pick_period(Duration::from_secs(2), Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn test_free_address_becomes_leader() {
        let node = Node::new(fast_config(unused_addr())).unwrap();
        Election::determine_role(&node).await;
        assert_eq!(node.role().await, Role::Leader);
        node.stop().await;
    }

    #[tokio::test]
    async fn test_taken_address_with_live_leader_becomes_follower() {
        let holder = Leader::acquire(&ephemeral_config()).await.unwrap();
        let node = Node::new(fast_config(holder.local_addr())).unwrap();

        Election::determine_role(&node).await;
        assert_eq!(node.role().await, Role::Follower);
        holder.release().await;
    }

    #[tokio::test]
    async fn test_taken_address_without_health_stays_unknown() {
        // Something holds the port but does not answer /ping with 200.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/ping", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let node = Node::new(fast_config(addr)).unwrap();
        Election::determine_role(&node).await;
        assert_eq!(node.role().await, Role::Unknown);
        server.abort();
    }

    #[tokio::test]
    async fn test_follower_takes_over_after_leader_release() {
        let addr = unused_addr();
        let first = Node::new(fast_config(addr)).unwrap();
        first.promote().await.unwrap();

        let second = Node::new(fast_config(addr)).unwrap();
        Election::determine_role(&second).await;
        assert_eq!(second.role().await, Role::Follower);

        first.stop().await;
        Election::check_and_update_role(&second).await;
        assert_eq!(second.role().await, Role::Leader);
        second.stop().await;
    }

    #[tokio::test]
    async fn test_leader_tick_is_noop() {
        let node = Node::new(fast_config(unused_addr())).unwrap();
        node.promote().await.unwrap();
        let before = node.leader().await.unwrap();

        Election::check_and_update_role(&node).await;
        assert!(Arc::ptr_eq(&before, &node.leader().await.unwrap()));
        node.stop().await;
    }

    #[tokio::test]
    async fn test_monitor_stops_cleanly() {
        let node = Arc::new(Node::new(fast_config(unused_addr())).unwrap());
        let mut handle = Election::start(node.clone()).await;
        assert_eq!(node.role().await, Role::Leader);
        assert!(handle.period() >= Duration::from_millis(100));

        handle.stop().await;
        handle.stop().await;
        node.stop().await;
    }
}
