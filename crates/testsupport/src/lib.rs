//! Helpers for spinning up in-process clusters.
//!
//! [`TestCluster`] runs N full nodes (replicated log + mux server) on
//! loopback ports with tight raft timeouts. Node 1 bootstraps; the others
//! join through it. Each node owns an isolated temporary directory and
//! shuts down when dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use commitlog::LogConfig;
use replication::{DistributedLog, NodeConfig, StreamLayer};
use server::NodeServer;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

/// One running node: its replicated log, its server, and its data
/// directory.
pub struct TestNode {
    pub id: u64,
    pub addr: String,
    pub log: Arc<DistributedLog>,
    server: NodeServer,
    _dir: TempDir,
}

impl TestNode {
    /// Stop serving connections; the raft instance keeps running.
    pub fn stop_serving(&mut self) {
        self.server.shutdown();
    }
}

/// An in-process cluster of [`TestNode`]s.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `n` nodes with ids 1..=n. Node 1 bootstraps and the rest are
    /// joined as voters before this returns.
    pub async fn start(n: usize) -> Result<Self> {
        Self::start_with_segment(n, LogConfig::default()).await
    }

    /// Like [`TestCluster::start`], with custom segment sizing.
    pub async fn start_with_segment(n: usize, segment: LogConfig) -> Result<Self> {
        let mut nodes: Vec<TestNode> = Vec::with_capacity(n);

        for i in 0..n {
            let id = (i + 1) as u64;
            let dir = TempDir::new()?;
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?.to_string();

            let config = NodeConfig::new(id, addr.clone())
                .with_bootstrap(i == 0)
                .with_heartbeat_interval(50)
                .with_election_timeout(150, 300)
                .with_segment(segment.clone());

            let stream_layer = Arc::new(StreamLayer::plaintext());
            let log = Arc::new(
                DistributedLog::new(dir.path(), config, Arc::clone(&stream_layer)).await?,
            );
            let server = NodeServer::start(listener, Arc::clone(&log), stream_layer).await?;

            if i == 0 {
                log.wait_for_leader(Duration::from_secs(10)).await?;
            } else {
                nodes[0].log.join(id, &addr).await?;
            }

            nodes.push(TestNode {
                id,
                addr,
                log,
                server,
                _dir: dir,
            });
        }

        Ok(Self { nodes })
    }

    /// The bootstrap node, which starts out as leader.
    pub fn leader(&self) -> &TestNode {
        &self.nodes[0]
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(25)).await;
    }
}
