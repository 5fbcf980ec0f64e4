//! Leader-aware client for the replicated commit log.
//!
//! The resolver fetches the cluster's server list (with leader flags) from
//! any reachable node; the picker routes writes to the leader and spreads
//! reads over the followers. A write that lands on a stale leader comes
//! back as a not-leader error, and the client re-resolves and retries once.
//!
//! # Example
//!
//! ```no_run
//! use client::Client;
//!
//! #[tokio::main]
//! async fn main() -> common::Result<()> {
//!     let mut client = Client::connect(["127.0.0.1:8400"]).await?;
//!
//!     let offset = client.produce(b"hello".to_vec()).await?;
//!     let record = client.consume(offset).await?;
//!     assert_eq!(record.value, b"hello");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod picker;
mod resolver;

pub use picker::Picker;
pub use resolver::{Resolver, SCHEME};

use std::collections::HashMap;

use common::{Error, Result};
use protocol::{frame, ApiRequest, ApiResponse, ErrorCode, Record, ServerInfo};
use tokio::net::TcpStream;
use tracing::debug;

/// Client routing requests across the cluster.
pub struct Client {
    resolver: Resolver,
    picker: Picker,
    servers: Vec<ServerInfo>,
    conns: HashMap<String, TcpStream>,
}

impl Client {
    /// Resolve the cluster through the given seed addresses and connect.
    pub async fn connect<I, S>(seeds: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut client = Self {
            resolver: Resolver::new(seeds),
            picker: Picker::new(),
            servers: Vec::new(),
            conns: HashMap::new(),
        };
        client.resolve_now().await?;
        Ok(client)
    }

    /// Refresh the server list and re-partition the picker.
    pub async fn resolve_now(&mut self) -> Result<()> {
        let servers = self.resolver.resolve().await?;
        self.apply_servers(servers);
        Ok(())
    }

    /// The most recently resolved server list.
    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    /// Append a record; returns its offset. Routed to the leader, with one
    /// re-resolve-and-retry when the cluster's leadership moved.
    pub async fn produce(&mut self, value: Vec<u8>) -> Result<u64> {
        match self.try_produce(value.clone()).await {
            Err(Error::NotLeader { leader_addr }) => {
                debug!("write hit a non-leader, re-resolving");
                self.re_resolve(leader_addr).await?;
                self.try_produce(value).await
            }
            other => other,
        }
    }

    /// Read the record at `offset` from a follower (or the leader when the
    /// cluster has no followers). Followers may lag recent writes.
    pub async fn consume(&mut self, offset: u64) -> Result<Record> {
        let addr = self.picker.pick("Consume")?;
        match self.request(&addr, &ApiRequest::Consume { offset }).await? {
            ApiResponse::Consume { record } => Ok(record),
            ApiResponse::Error { code, message, .. } => {
                Err(response_error(code, message, None, Some(offset)))
            }
            _ => Err(Error::Transport("unexpected response".to_string())),
        }
    }

    /// Fetch the current server list from the cluster.
    pub async fn get_servers(&mut self) -> Result<Vec<ServerInfo>> {
        self.resolve_now().await?;
        Ok(self.servers.clone())
    }

    /// Close every pooled connection gracefully.
    pub async fn close(&mut self) {
        for (_, mut conn) in self.conns.drain() {
            let _ = frame::write_message_async(&mut conn, &ApiRequest::Close).await;
        }
    }

    async fn try_produce(&mut self, value: Vec<u8>) -> Result<u64> {
        let addr = self.picker.pick("Produce")?;
        let request = ApiRequest::Produce {
            record: Record::new(value),
        };
        match self.request(&addr, &request).await? {
            ApiResponse::Produce { offset } => Ok(offset),
            ApiResponse::Error {
                code,
                message,
                leader_addr,
            } => Err(response_error(code, message, leader_addr, None)),
            _ => Err(Error::Transport("unexpected response".to_string())),
        }
    }

    /// Refresh the view, preferring the leader address a rejection handed
    /// back.
    async fn re_resolve(&mut self, leader_hint: Option<String>) -> Result<()> {
        if let Some(addr) = leader_hint {
            if let Ok(servers) = resolver::fetch_servers(&addr).await {
                if !servers.is_empty() {
                    self.apply_servers(servers);
                    return Ok(());
                }
            }
        }
        self.resolve_now().await
    }

    fn apply_servers(&mut self, servers: Vec<ServerInfo>) {
        self.picker.update(&servers);
        self.servers = servers;
    }

    /// One request/response round-trip on the pooled connection for
    /// `addr`. A transport failure evicts the connection so the next call
    /// re-dials.
    async fn request(&mut self, addr: &str, request: &ApiRequest) -> Result<ApiResponse> {
        if !self.conns.contains_key(addr) {
            let conn = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::Transport(format!("connect {addr}: {e}")))?;
            self.conns.insert(addr.to_string(), conn);
        }
        let Some(conn) = self.conns.get_mut(addr) else {
            return Err(Error::Transport(format!("no connection to {addr}")));
        };

        let exchange = async {
            frame::write_message_async(conn, request).await?;
            frame::read_message_async::<_, ApiResponse>(conn).await
        }
        .await;

        match exchange {
            Ok(response) => Ok(response),
            Err(e) => {
                self.conns.remove(addr);
                Err(Error::Transport(e.to_string()))
            }
        }
    }
}

fn response_error(
    code: ErrorCode,
    message: String,
    leader_addr: Option<String>,
    offset: Option<u64>,
) -> Error {
    match code {
        ErrorCode::OffsetOutOfRange => Error::OffsetOutOfRange(offset.unwrap_or_default()),
        ErrorCode::NotLeader => Error::NotLeader { leader_addr },
        ErrorCode::ApplyTimeout => Error::ApplyTimeout,
        ErrorCode::Storage => Error::Storage(message),
        ErrorCode::Io | ErrorCode::Unknown => Error::Transport(message),
    }
}
