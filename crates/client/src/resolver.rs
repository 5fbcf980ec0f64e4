//! Server discovery for the client.

use common::{Error, Result};
use protocol::{frame, ApiRequest, ApiResponse, ServerInfo};
use tokio::net::TcpStream;
use tracing::debug;

/// Load-balancing scheme name.
pub const SCHEME: &str = "proglog";

/// Fetches the cluster's server list from any reachable seed node. Every
/// returned server carries its leader flag for the picker.
pub struct Resolver {
    seeds: Vec<String>,
}

impl Resolver {
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
        }
    }

    /// Ask the seeds in order; the first non-empty answer wins.
    pub async fn resolve(&self) -> Result<Vec<ServerInfo>> {
        for addr in &self.seeds {
            match fetch_servers(addr).await {
                Ok(servers) if !servers.is_empty() => return Ok(servers),
                Ok(_) => debug!(%addr, "seed returned an empty server list"),
                Err(e) => debug!(%addr, error = %e, "seed unreachable"),
            }
        }
        Err(Error::Transport("no reachable server".to_string()))
    }
}

/// One GetServers round-trip against `addr`.
pub(crate) async fn fetch_servers(addr: &str) -> Result<Vec<ServerInfo>> {
    let mut conn = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::Transport(format!("connect {addr}: {e}")))?;

    frame::write_message_async(&mut conn, &ApiRequest::GetServers).await?;
    match frame::read_message_async(&mut conn).await? {
        ApiResponse::Servers { servers } => Ok(servers),
        ApiResponse::Error { message, .. } => Err(Error::Transport(message)),
        _ => Err(Error::Transport("unexpected response".to_string())),
    }
}
