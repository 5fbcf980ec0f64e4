//! The replicated log façade.
//!
//! Binds the raft store, the peer network, and the raft instance into one
//! object exposing append/read/join/leave/wait-for-leader/get-servers.
//! Writes go through consensus; reads are served from the local data log
//! and may lag on followers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commitlog::Log;
use common::{Error, Result};
use openraft::error::{ClientWriteError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, ChangeMembers, Raft};
use protocol::{Record, ServerInfo};
use tracing::{debug, info};

use crate::command::{CommandResponse, LogCommand};
use crate::config::NodeConfig;
use crate::network::{RaftRequest, RaftResponse, StreamLayer, TcpNetworkFactory};
use crate::store::RaftStore;
use crate::type_config::TypeConfig;
use crate::{NodeId, RaftNode};

/// Deadline for a replicated append to commit.
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A commit log replicated across the cluster.
pub struct DistributedLog {
    node_id: NodeId,
    rpc_addr: String,
    raft: RaftNode,
    store: Arc<RaftStore>,
    data_log: Arc<Log>,
}

impl DistributedLog {
    /// Open the node's logs under `data_dir`, wire up raft over the stream
    /// layer, and bootstrap a single-voter cluster when `config.bootstrap`
    /// is set and no prior state exists.
    pub async fn new(
        data_dir: impl AsRef<Path>,
        config: NodeConfig,
        stream_layer: Arc<StreamLayer>,
    ) -> Result<Self> {
        let store = Arc::new(RaftStore::open(data_dir, config.segment.clone())?);
        let recovered = store.has_existing_state();
        let data_log = store.data_log();

        let (log_store, state_machine) = Adaptor::<TypeConfig, Arc<RaftStore>>::new(store.clone());
        let network = TcpNetworkFactory::new(stream_layer);

        let raft = Raft::<TypeConfig>::new(
            config.node_id,
            Arc::new(config.to_openraft_config()),
            network,
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| Error::Raft(e.to_string()))?;

        if config.bootstrap && !recovered {
            info!(node_id = config.node_id, "bootstrapping single-voter cluster");
            let mut members = BTreeMap::new();
            members.insert(config.node_id, BasicNode::new(&config.rpc_addr));
            raft.initialize(members)
                .await
                .map_err(|e| Error::Raft(e.to_string()))?;
        }

        Ok(Self {
            node_id: config.node_id,
            rpc_addr: config.rpc_addr,
            raft,
            store,
            data_log,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn rpc_addr(&self) -> &str {
        &self.rpc_addr
    }

    /// Replicate a record through consensus. Returns the assigned offset.
    ///
    /// Only the leader may apply; on a follower this fails with a
    /// not-leader error carrying the leader's address when known.
    pub async fn append(&self, record: Record) -> Result<u64> {
        let response = tokio::time::timeout(
            APPLY_TIMEOUT,
            self.raft.client_write(LogCommand::Append { record }),
        )
        .await
        .map_err(|_| Error::ApplyTimeout)?
        .map_err(write_error)?;

        match response.data {
            CommandResponse::Append { offset } => Ok(offset),
            CommandResponse::Error { message } => Err(Error::Storage(message)),
            CommandResponse::Noop => Err(Error::Raft("unexpected append response".to_string())),
        }
    }

    /// Read the record at `offset` from the local log. No consensus
    /// round-trip; followers may lag behind the leader.
    pub fn read(&self, offset: u64) -> Result<Record> {
        self.data_log.read(offset)
    }

    /// Add a server as a voter.
    ///
    /// Idempotent: a server already present under the same id and address
    /// succeeds immediately. A server matching on only one of the two is a
    /// node that moved; its stale registration is removed first.
    pub async fn join(&self, id: NodeId, addr: &str) -> Result<()> {
        let membership = self.raft.metrics().borrow().membership_config.clone();

        let mut stale: Option<NodeId> = None;
        for (node_id, node) in membership.membership().nodes() {
            if *node_id == id && node.addr == addr {
                debug!(id, addr, "server already joined");
                return Ok(());
            }
            if *node_id == id || node.addr == addr {
                stale = Some(*node_id);
            }
        }
        if let Some(stale_id) = stale {
            self.remove_server(stale_id).await?;
        }

        self.raft
            .add_learner(id, BasicNode::new(addr), true)
            .await
            .map_err(write_error)?;
        self.raft
            .change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([id])), false)
            .await
            .map_err(write_error)?;

        info!(id, addr, "added voter");
        Ok(())
    }

    /// Remove a server from the cluster. On a follower this returns a
    /// not-leader error, which membership bridges tolerate.
    pub async fn leave(&self, id: NodeId) -> Result<()> {
        self.remove_server(id).await?;
        info!(id, "removed server");
        Ok(())
    }

    async fn remove_server(&self, id: NodeId) -> Result<()> {
        self.raft
            .change_membership(ChangeMembers::RemoveVoters(BTreeSet::from([id])), false)
            .await
            .map_err(write_error)?;
        self.raft
            .change_membership(ChangeMembers::RemoveNodes(BTreeSet::from([id])), false)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    /// Block until some node is known to be the leader, or the timeout
    /// passes.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<()> {
        self.raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), "leader elected")
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;
        Ok(())
    }

    /// The cluster's servers, with the current leader flagged.
    pub fn get_servers(&self) -> Vec<ServerInfo> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader;

        let mut servers: Vec<ServerInfo> = metrics
            .membership_config
            .membership()
            .nodes()
            .map(|(id, node)| ServerInfo {
                id: id.to_string(),
                rpc_addr: node.addr.clone(),
                is_leader: leader == Some(*id),
            })
            .collect();
        servers.sort_by_key(|s| s.id.parse::<u64>().unwrap_or(u64::MAX));
        servers
    }

    /// True when this node is the current leader.
    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    /// Address of the current leader, when one is known.
    pub fn leader_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader?;
        let addr = metrics
            .membership_config
            .membership()
            .nodes()
            .find(|(id, _)| **id == leader)
            .map(|(_, node)| node.addr.clone());
        addr
    }

    /// Answer a raft RPC received over the stream layer.
    pub async fn handle_rpc(&self, request: RaftRequest) -> RaftResponse {
        match request {
            RaftRequest::AppendEntries(req) => match self.raft.append_entries(req).await {
                Ok(response) => RaftResponse::AppendEntries(response),
                Err(e) => RaftResponse::Error(e.to_string()),
            },
            RaftRequest::Vote(req) => match self.raft.vote(req).await {
                Ok(response) => RaftResponse::Vote(response),
                Err(e) => RaftResponse::Error(e.to_string()),
            },
            RaftRequest::InstallSnapshot(req) => match self.raft.install_snapshot(req).await {
                Ok(response) => RaftResponse::InstallSnapshot(response),
                Err(e) => RaftResponse::Error(e.to_string()),
            },
        }
    }

    /// Shut down raft, then close the logs.
    pub async fn shutdown(&self) -> Result<()> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;
        self.store.close()
    }
}

/// Node names on the discovery layer are the decimal node ids.
#[async_trait]
impl discovery::Handler for DistributedLog {
    async fn join(&self, name: &str, rpc_addr: &str) -> Result<()> {
        let id = parse_node_name(name)?;
        DistributedLog::join(self, id, rpc_addr).await
    }

    async fn leave(&self, name: &str) -> Result<()> {
        let id = parse_node_name(name)?;
        DistributedLog::leave(self, id).await
    }
}

fn parse_node_name(name: &str) -> Result<NodeId> {
    name.parse()
        .map_err(|_| Error::Raft(format!("invalid node name: {name}")))
}

fn write_error(e: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>) -> Error {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => Error::NotLeader {
            leader_addr: forward.leader_node.map(|node| node.addr),
        },
        e => Error::Raft(e.to_string()),
    }
}
