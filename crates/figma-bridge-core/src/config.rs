//! Centralized configuration for the plugin bridge.
//!
//! Constant tables hold the protocol-level values. `NodeConfig` carries the
//! handful of values a process may override (tests run on ephemeral ports with
//! short election periods).

use crate::{BridgeError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Addresses, paths and the health payload.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 1994;
    pub const PING_PATH: &'static str = "/ping";
    pub const RPC_PATH: &'static str = "/rpc";
    pub const WS_PATH: &'static str = "/ws";
    pub const HEALTH_VERSION: &'static str = env!("CARGO_PKG_VERSION");
}

/// Connection bridge and leader-side timing.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const REQUEST_ID_PREFIX: &'static str = "req";
    /// Bound applied by the leader to each forwarded request.
    pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default bound for calls made through the caller-facing surface.
    pub const CALLER_TIMEOUT: Duration = Duration::from_secs(30);
    pub const RELEASE_GRACE: Duration = Duration::from_secs(5);
    /// Bound on flushing the close frame to a plugin that may have stopped reading.
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
}

/// Follower-side HTTP client.
pub struct ForwardingConfig;

impl ForwardingConfig {
    /// Must stay above `BridgeConfig::RPC_TIMEOUT`.
    pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(35);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
    pub const USER_AGENT: &'static str = concat!("figma-bridge/", env!("CARGO_PKG_VERSION"));
}

/// Election monitor timing.
pub struct ElectionConfig;

impl ElectionConfig {
    pub const PERIOD_MIN: Duration = Duration::from_secs(3);
    pub const PERIOD_MAX: Duration = Duration::from_secs(5);
}

/// Per-process settings for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The shared address every process competes for.
    pub addr: SocketAddr,
    pub rpc_timeout: Duration,
    pub forward_timeout: Duration,
    pub probe_timeout: Duration,
    pub election_period_min: Duration,
    pub election_period_max: Duration,
    pub release_grace: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], NetworkConfig::DEFAULT_PORT)),
            rpc_timeout: BridgeConfig::RPC_TIMEOUT,
            forward_timeout: ForwardingConfig::FORWARD_TIMEOUT,
            probe_timeout: ForwardingConfig::PROBE_TIMEOUT,
            election_period_min: ElectionConfig::PERIOD_MIN,
            election_period_max: ElectionConfig::PERIOD_MAX,
            release_grace: BridgeConfig::RELEASE_GRACE,
        }
    }
}

impl NodeConfig {
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Base URL followers use to reach the leader.
    pub fn leader_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forward_timeout <= self.rpc_timeout {
            return Err(BridgeError::Config {
                message: format!(
                    "forward timeout {:?} must exceed rpc timeout {:?}",
                    self.forward_timeout, self.rpc_timeout
                ),
            });
        }
        if self.election_period_min.is_zero() {
            return Err(BridgeError::Config {
                message: "election period must be non-zero".to_string(),
            });
        }
        if self.election_period_min > self.election_period_max {
            return Err(BridgeError::Config {
                message: format!(
                    "election period min {:?} exceeds max {:?}",
                    self.election_period_min, self.election_period_max
                ),
            });
        }
        Ok(())
    }
}

/// Builder for [`NodeConfig`].
///
/// ```rust
/// use figma_bridge::NodeConfig;
/// use std::time::Duration;
///
/// let config = NodeConfig::builder()
///     .addr("127.0.0.1:4100".parse().unwrap())
///     .election_period(Duration::from_millis(200), Duration::from_millis(300))
///     .build()
///     .unwrap();
/// assert_eq!(config.leader_url(), "http://127.0.0.1:4100");
/// ```
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout = timeout;
        self
    }

    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.config.forward_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Jitter band the monitor draws its period from.
    pub fn election_period(mut self, min: Duration, max: Duration) -> Self {
        self.config.election_period_min = min;
        self.config.election_period_max = max;
        self
    }

    pub fn release_grace(mut self, grace: Duration) -> Self {
        self.config.release_grace = grace;
        self
    }

    pub fn build(self) -> Result<NodeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
