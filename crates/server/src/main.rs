//! Node binary for the replicated commit log.
//!
//! Starts a node serving peer replication and client RPC on one port. The
//! first node of a cluster runs with `--bootstrap`; later nodes announce
//! themselves to any running node with `--join`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use discovery::{Membership, MembershipConfig};
use protocol::{frame, ApiRequest, ApiResponse};
use replication::{DistributedLog, NodeConfig, StreamLayer};
use server::NodeServer;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proglog-server", about = "Replicated commit log node")]
struct Args {
    /// Unique node id within the cluster
    #[arg(long)]
    node_id: u64,

    /// Address to serve peers and clients on
    #[arg(long, default_value = "127.0.0.1:8400")]
    bind_addr: String,

    /// Directory for the data log and raft state
    #[arg(long, default_value = "./proglog_data")]
    data_dir: PathBuf,

    /// Bootstrap a single-voter cluster on first start
    #[arg(long)]
    bootstrap: bool,

    /// Address of a running cluster node to announce this node to
    #[arg(long)]
    join: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;
    let local_addr = listener.local_addr()?.to_string();

    let config = NodeConfig::new(args.node_id, local_addr.clone()).with_bootstrap(args.bootstrap);
    let stream_layer = Arc::new(StreamLayer::plaintext());

    let log = Arc::new(
        DistributedLog::new(&args.data_dir, config, Arc::clone(&stream_layer))
            .await
            .context("failed to open the replicated log")?,
    );

    let server = NodeServer::start(listener, Arc::clone(&log), stream_layer).await?;
    info!(node_id = args.node_id, addr = %local_addr, "node started");

    // Bridge discovery events into raft membership changes. The gossip
    // layer publishes on the sender this hands out.
    let _membership = Membership::new(
        log.clone(),
        MembershipConfig {
            node_name: args.node_id.to_string(),
        },
    );

    if let Some(join_addr) = &args.join {
        announce_join(join_addr, args.node_id, &local_addr).await?;
    } else if args.bootstrap {
        log.wait_for_leader(Duration::from_secs(10)).await?;
        info!("cluster bootstrapped");
    }

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    let mut server = server;
    server.shutdown();
    log.shutdown().await?;
    Ok(())
}

/// Ask a running node to add us as a voter. A follower answers with the
/// leader's address; retry there.
async fn announce_join(addr: &str, node_id: u64, rpc_addr: &str) -> Result<()> {
    let mut target = addr.to_string();
    for _ in 0..3 {
        let mut conn = TcpStream::connect(&target)
            .await
            .with_context(|| format!("failed to reach {target}"))?;

        let request = ApiRequest::Join {
            id: node_id,
            rpc_addr: rpc_addr.to_string(),
        };
        frame::write_message_async(&mut conn, &request).await?;

        match frame::read_message_async(&mut conn).await? {
            ApiResponse::Ok => {
                info!(via = %target, "joined cluster");
                return Ok(());
            }
            ApiResponse::Error {
                leader_addr: Some(leader),
                ..
            } => {
                warn!(follower = %target, %leader, "join hit a follower, retrying at leader");
                target = leader;
            }
            ApiResponse::Error { message, .. } => {
                anyhow::bail!("join rejected: {message}");
            }
            _ => anyhow::bail!("unexpected response to join"),
        }
    }
    anyhow::bail!("could not reach the leader to join")
}
