//! TCP server for a replicated log node.
//!
//! One listener serves two kinds of traffic: connections opening with the
//! raft discriminator byte go to the stream layer's acceptor, everything
//! else is handled as client RPC. Client frames always open with a zero
//! byte (big-endian length under the frame cap), so the two cannot
//! collide.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use common::Error;
use protocol::{frame, ApiRequest, ApiResponse, ErrorCode};
use replication::{serve_peer, DistributedLog, StreamLayer, RAFT_RPC};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle for a running node server.
pub struct NodeServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NodeServer {
    /// Serve `log` on `listener` until shut down or dropped.
    pub async fn start(
        listener: TcpListener,
        log: Arc<DistributedLog>,
        stream_layer: Arc<StreamLayer>,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run(listener, log, stream_layer, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for NodeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    listener: TcpListener,
    log: Arc<DistributedLog>,
    stream_layer: Arc<StreamLayer>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    debug!(%peer, "accepted connection");
                    let log = Arc::clone(&log);
                    let stream_layer = Arc::clone(&stream_layer);
                    tokio::spawn(route(conn, log, stream_layer));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

/// Dispatch one connection by its first byte: the raft discriminator goes
/// to the stream layer, everything else to the client RPC loop.
async fn route(conn: TcpStream, log: Arc<DistributedLog>, stream_layer: Arc<StreamLayer>) {
    let mut first = [0u8; 1];
    match conn.peek(&mut first).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    if first[0] == RAFT_RPC {
        match stream_layer.accept(conn).await {
            Ok(peer) => serve_peer(peer, log).await,
            Err(e) => debug!(error = %e, "rejected peer connection"),
        }
    } else if let Err(e) = serve_client(conn, log).await {
        debug!(error = %e, "client connection ended with error");
    }
}

async fn serve_client(mut conn: TcpStream, log: Arc<DistributedLog>) -> io::Result<()> {
    loop {
        let request: ApiRequest = match frame::read_message_async(&mut conn).await {
            Ok(request) => request,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };

        let response = match request {
            ApiRequest::Produce { record } => match log.append(record).await {
                Ok(offset) => ApiResponse::Produce { offset },
                Err(e) => error_response(&log, e),
            },
            ApiRequest::Consume { offset } => match log.read(offset) {
                Ok(record) => ApiResponse::Consume { record },
                Err(e) => error_response(&log, e),
            },
            ApiRequest::GetServers => ApiResponse::Servers {
                servers: log.get_servers(),
            },
            ApiRequest::Join { id, rpc_addr } => match log.join(id, &rpc_addr).await {
                Ok(()) => ApiResponse::Ok,
                Err(e) => error_response(&log, e),
            },
            ApiRequest::Leave { id } => match log.leave(id).await {
                Ok(()) => ApiResponse::Ok,
                Err(e) => error_response(&log, e),
            },
            ApiRequest::Close => break,
        };

        frame::write_message_async(&mut conn, &response).await?;
    }
    Ok(())
}

fn error_response(log: &DistributedLog, error: Error) -> ApiResponse {
    let code = match &error {
        Error::OffsetOutOfRange(_) => ErrorCode::OffsetOutOfRange,
        Error::NotLeader { .. } => ErrorCode::NotLeader,
        Error::ApplyTimeout => ErrorCode::ApplyTimeout,
        Error::Storage(_) => ErrorCode::Storage,
        Error::Io(_) => ErrorCode::Io,
        _ => ErrorCode::Unknown,
    };

    let leader_addr = match &error {
        // Attach the leader's address so the client can re-resolve
        // without a spare round-trip.
        Error::NotLeader { leader_addr } => leader_addr.clone().or_else(|| log.leader_addr()),
        _ => None,
    };

    ApiResponse::Error {
        code,
        message: error.to_string(),
        leader_addr,
    }
}
