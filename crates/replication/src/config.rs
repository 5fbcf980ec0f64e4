//! Node configuration for the replicated log.

use crate::NodeId;
use commitlog::LogConfig;
use serde::{Deserialize, Serialize};

/// Configuration for one node in the cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique identifier for this node.
    pub node_id: NodeId,

    /// Address this node serves on; peers dial it and clients connect to
    /// it. One port carries both (see the stream layer).
    pub rpc_addr: String,

    /// Bootstrap a single-voter cluster on first start. Ignored when prior
    /// raft state exists on disk.
    pub bootstrap: bool,

    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Election timeout range in milliseconds. A random value within this
    /// range is used for each election.
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,

    /// Segment sizing for the data and raft logs.
    pub segment: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            rpc_addr: "127.0.0.1:8400".to_string(),
            bootstrap: false,
            heartbeat_interval_ms: 50,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            segment: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration for a node serving on `rpc_addr`.
    pub fn new(node_id: NodeId, rpc_addr: impl Into<String>) -> Self {
        Self {
            node_id,
            rpc_addr: rpc_addr.into(),
            ..Default::default()
        }
    }

    /// Bootstrap this node as a single-voter cluster on fresh start.
    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Set the election timeout range.
    pub fn with_election_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    /// Set the segment sizing for both logs.
    pub fn with_segment(mut self, segment: LogConfig) -> Self {
        self.segment = segment;
        self
    }

    /// Build the openraft config from this node config.
    pub fn to_openraft_config(&self) -> openraft::Config {
        openraft::Config {
            cluster_name: "proglog".to_string(),
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            heartbeat_interval: self.heartbeat_interval_ms,
            ..Default::default()
        }
    }
}
