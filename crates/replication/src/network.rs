//! Stream layer and peer transport.
//!
//! Peer replication and client RPC share one TCP port. Every connection a
//! raft node initiates opens with a single discriminator byte; the server's
//! mux routes those connections to the stream layer's acceptor and
//! everything else to the client RPC handler. Both directions optionally
//! upgrade to TLS after the discriminator.
//!
//! Peer RPCs are request/response enums over the same length-prefixed frame
//! codec the client protocol uses.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::{Error, Result};
use openraft::error::{InstallSnapshotError, RPCError, RaftError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use protocol::frame;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::distributed::DistributedLog;
use crate::type_config::TypeConfig;
use crate::NodeId;

/// Discriminator byte opening every raft-initiated connection.
pub const RAFT_RPC: u8 = 1;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// A bidirectional byte stream, plain TCP or TLS.
pub trait Connection: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Connection for T {}

/// Boxed peer connection handed out by the stream layer.
pub type PeerConn = Box<dyn Connection>;

/// Connects and accepts peer connections on the shared port.
///
/// `dial` writes the discriminator byte right after the TCP connect;
/// `accept` consumes and validates it. With TLS configured, the stream is
/// wrapped after the discriminator is exchanged.
pub struct StreamLayer {
    server_tls: Option<TlsAcceptor>,
    peer_tls: Option<TlsConnector>,
}

impl StreamLayer {
    /// A stream layer without TLS on either side.
    pub fn plaintext() -> Self {
        Self {
            server_tls: None,
            peer_tls: None,
        }
    }

    /// A stream layer with optional TLS configs: `server` wraps accepted
    /// connections, `peer` wraps outbound ones.
    pub fn new(
        server: Option<Arc<rustls::ServerConfig>>,
        peer: Option<Arc<rustls::ClientConfig>>,
    ) -> Self {
        Self {
            server_tls: server.map(TlsAcceptor::from),
            peer_tls: peer.map(TlsConnector::from),
        }
    }

    /// Connect to a raft peer: TCP connect, discriminator byte, optional
    /// TLS client upgrade.
    pub async fn dial(&self, addr: &str, timeout: Duration) -> Result<PeerConn> {
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Transport(format!("dial {addr}: connect timed out")))?
            .map_err(|e| Error::Transport(format!("dial {addr}: {e}")))?;

        stream.write_all(&[RAFT_RPC]).await?;

        match &self.peer_tls {
            Some(connector) => {
                let name = server_name(addr)?;
                Ok(Box::new(connector.connect(name, stream).await?))
            }
            None => Ok(Box::new(stream)),
        }
    }

    /// Accept an inbound peer connection: validate the discriminator byte,
    /// then optionally upgrade to TLS server.
    pub async fn accept(&self, mut conn: TcpStream) -> Result<PeerConn> {
        let mut first = [0u8; 1];
        conn.read_exact(&mut first).await?;
        if first[0] != RAFT_RPC {
            return Err(Error::NotRaftRpc);
        }

        match &self.server_tls {
            Some(acceptor) => Ok(Box::new(acceptor.accept(conn).await?)),
            None => Ok(Box::new(conn)),
        }
    }
}

fn server_name(addr: &str) -> Result<rustls::ServerName> {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    rustls::ServerName::try_from(host)
        .map_err(|e| Error::Transport(format!("invalid peer name {host}: {e}")))
}

/// A raft RPC carried over the stream layer.
#[derive(Debug, Serialize, Deserialize)]
pub enum RaftRequest {
    AppendEntries(AppendEntriesRequest<TypeConfig>),
    Vote(VoteRequest<NodeId>),
    InstallSnapshot(InstallSnapshotRequest<TypeConfig>),
}

/// Reply to a [`RaftRequest`].
#[derive(Debug, Serialize, Deserialize)]
pub enum RaftResponse {
    AppendEntries(AppendEntriesResponse<NodeId>),
    Vote(VoteResponse<NodeId>),
    InstallSnapshot(InstallSnapshotResponse<NodeId>),
    Error(String),
}

/// Answer raft RPCs on an accepted peer connection until it closes.
pub async fn serve_peer(mut conn: PeerConn, log: Arc<DistributedLog>) {
    loop {
        let request: RaftRequest = match frame::read_message_async(&mut conn).await {
            Ok(request) => request,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!(error = %e, "peer connection failed");
                break;
            }
        };

        let response = log.handle_rpc(request).await;
        if let Err(e) = frame::write_message_async(&mut conn, &response).await {
            debug!(error = %e, "failed to answer peer rpc");
            break;
        }
    }
}

/// Network factory creating one [`TcpNetwork`] per raft peer.
#[derive(Clone)]
pub struct TcpNetworkFactory {
    stream_layer: Arc<StreamLayer>,
}

impl TcpNetworkFactory {
    pub fn new(stream_layer: Arc<StreamLayer>) -> Self {
        Self { stream_layer }
    }
}

impl RaftNetworkFactory<TypeConfig> for TcpNetworkFactory {
    type Network = TcpNetwork;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        TcpNetwork {
            target,
            addr: node.addr.clone(),
            stream_layer: Arc::clone(&self.stream_layer),
            conn: None,
        }
    }
}

/// Client for one raft peer: a lazily-dialed connection carrying framed
/// request/response pairs. Failures drop the connection so the next RPC
/// re-dials; raft retries per its own policy.
pub struct TcpNetwork {
    target: NodeId,
    addr: String,
    stream_layer: Arc<StreamLayer>,
    conn: Option<PeerConn>,
}

impl TcpNetwork {
    async fn rpc(&mut self, request: &RaftRequest) -> Result<RaftResponse> {
        let result = match tokio::time::timeout(RPC_TIMEOUT, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "rpc to node {} ({}) timed out",
                self.target, self.addr
            ))),
        };
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn exchange(&mut self, request: &RaftRequest) -> Result<RaftResponse> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => {
                let conn = self.stream_layer.dial(&self.addr, CONNECT_TIMEOUT).await?;
                self.conn.insert(conn)
            }
        };

        frame::write_message_async(conn, request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        frame::read_message_async(conn)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

fn peer_unreachable<E: std::error::Error>(message: &str) -> RPCError<NodeId, BasicNode, E> {
    RPCError::Unreachable(Unreachable::new(&io::Error::new(
        io::ErrorKind::ConnectionRefused,
        message.to_string(),
    )))
}

impl RaftNetwork<TypeConfig> for TcpNetwork {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> std::result::Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>>
    {
        match self.rpc(&RaftRequest::AppendEntries(req)).await {
            Ok(RaftResponse::AppendEntries(response)) => Ok(response),
            Ok(RaftResponse::Error(message)) => Err(peer_unreachable(&message)),
            Ok(_) => Err(peer_unreachable("mismatched append entries response")),
            Err(e) => Err(peer_unreachable(&e.to_string())),
        }
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> std::result::Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        match self.rpc(&RaftRequest::InstallSnapshot(req)).await {
            Ok(RaftResponse::InstallSnapshot(response)) => Ok(response),
            Ok(RaftResponse::Error(message)) => Err(peer_unreachable(&message)),
            Ok(_) => Err(peer_unreachable("mismatched install snapshot response")),
            Err(e) => Err(peer_unreachable(&e.to_string())),
        }
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> std::result::Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        match self.rpc(&RaftRequest::Vote(req)).await {
            Ok(RaftResponse::Vote(response)) => Ok(response),
            Ok(RaftResponse::Error(message)) => Err(peer_unreachable(&message)),
            Ok(_) => Err(peer_unreachable("mismatched vote response")),
            Err(e) => Err(peer_unreachable(&e.to_string())),
        }
    }
}
