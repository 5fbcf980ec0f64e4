//! Wire protocol for client-server communication.
//!
//! Defines the record type shared with the storage layer, the client RPC
//! message enums, and the frame-based serialization used on every TCP
//! connection. Messages are length-prefixed using bincode encoding.

use serde::{Deserialize, Serialize};

/// A single entry in the commit log.
///
/// `offset` is the record's position in the global log, assigned at append
/// time. `term` and `record_type` carry the consensus log-entry metadata
/// when the record backs a replicated log entry; they are zero for plain
/// data records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: Vec<u8>,
    pub offset: u64,
    pub term: u64,
    pub record_type: u32,
}

impl Record {
    /// A data record carrying `value`, with the offset assigned on append.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// One server in the cluster, as reported by `GetServers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub rpc_addr: String,
    pub is_leader: bool,
}

/// Request message sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Append a record to the replicated log.
    Produce { record: Record },
    /// Read the record at the given offset from the local log.
    Consume { offset: u64 },
    /// List the cluster's servers with their leader flag.
    GetServers,
    /// Add a voter to the cluster.
    Join { id: u64, rpc_addr: String },
    /// Remove a server from the cluster.
    Leave { id: u64 },
    /// Close the connection gracefully.
    Close,
}

/// Response message sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    /// The offset assigned to the produced record.
    Produce { offset: u64 },
    /// The record read at the requested offset.
    Consume { record: Record },
    /// The current server list.
    Servers { servers: Vec<ServerInfo> },
    /// Join/Leave acknowledged.
    Ok,
    /// An error occurred. `leader_addr` is set on `NotLeader` when the
    /// rejecting node knows who the leader is.
    Error {
        code: ErrorCode,
        message: String,
        leader_addr: Option<String>,
    },
}

/// Error codes for protocol-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Requested offset is outside the log's range.
    OffsetOutOfRange,
    /// Write reached a non-leader node.
    NotLeader,
    /// Consensus did not commit within the deadline.
    ApplyTimeout,
    /// Storage failure on the serving node.
    Storage,
    /// General I/O error.
    Io,
    /// Unknown error.
    Unknown,
}

/// Frame format: `[u32 length (big-endian)][bincode payload]`.
///
/// The frame cap keeps the length prefix's first byte zero, so a client
/// frame can never open with the Raft connection discriminator.
pub mod frame {
    use super::*;
    use bincode::config;
    use std::io::{self, Read, Write};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024 - 1;

    fn encode<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
        let encoded = bincode::serde::encode_to_vec(message, config::standard())
            .map_err(|e| io::Error::other(format!("bincode encoding failed: {}", e)))?;
        if encoded.len() as u32 > MAX_FRAME_SIZE {
            return Err(io::Error::other(format!(
                "message too large: {} bytes (max {})",
                encoded.len(),
                MAX_FRAME_SIZE
            )));
        }
        Ok(encoded)
    }

    fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> io::Result<T> {
        let (message, _) = bincode::serde::decode_from_slice(payload, config::standard())
            .map_err(|e| io::Error::other(format!("bincode decoding failed: {}", e)))?;
        Ok(message)
    }

    fn check_len(len: u32) -> io::Result<()> {
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::other(format!(
                "message too large: {} bytes (max {})",
                len, MAX_FRAME_SIZE
            )));
        }
        Ok(())
    }

    /// Write a framed message to a blocking writer.
    pub fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
    where
        W: Write,
        T: Serialize,
    {
        let encoded = encode(message)?;
        writer.write_all(&(encoded.len() as u32).to_be_bytes())?;
        writer.write_all(&encoded)?;
        Ok(())
    }

    /// Read a framed message from a blocking reader.
    pub fn read_message<R, T>(reader: &mut R) -> io::Result<T>
    where
        R: Read,
        T: for<'de> Deserialize<'de>,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf);
        check_len(len)?;

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        decode(&payload)
    }

    /// Write a framed message to an async writer.
    pub async fn write_message_async<W, T>(writer: &mut W, message: &T) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let encoded = encode(message)?;
        writer.write_all(&(encoded.len() as u32).to_be_bytes()).await?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a framed message from an async reader.
    pub async fn read_message_async<R, T>(reader: &mut R) -> io::Result<T>
    where
        R: AsyncRead + Unpin,
        T: for<'de> Deserialize<'de>,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        check_len(len)?;

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        decode(&payload)
    }
}
