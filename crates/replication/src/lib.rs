//! Consensus integration for the replicated commit log.
//!
//! Ties the local [`commitlog::Log`] into an openraft cluster: one log
//! instance backs the raft log store, a second holds the replicated data,
//! and snapshots stream the data log's raw bytes. Peer traffic rides a
//! discriminated TCP stream layer so replication and client RPC share a
//! single listener port.
//!
//! # Modules
//!
//! - [`command`]: replicated command and response types
//! - [`config`]: node configuration
//! - [`store`]: raft log, state machine, stable state, and snapshot storage
//! - [`network`]: stream layer and peer transport
//! - [`distributed`]: the `DistributedLog` façade

pub mod command;
pub mod config;
pub mod distributed;
pub mod network;
pub mod store;
pub mod type_config;

pub use command::{CommandResponse, LogCommand};
pub use config::NodeConfig;
pub use distributed::DistributedLog;
pub use network::{serve_peer, RaftRequest, RaftResponse, StreamLayer, TcpNetworkFactory, RAFT_RPC};
pub use store::RaftStore;
pub use type_config::TypeConfig;

use openraft::Raft;

/// The consensus node type for the replicated log.
pub type RaftNode = Raft<TypeConfig>;

/// Node identifier type.
pub type NodeId = u64;
