//! Shared error type for the commit log workspace.

use std::io;
use thiserror::Error;

/// Canonical error type shared across the log, replication, and client
/// subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// A read asked for an offset below the lowest or above the highest
    /// offset held by the log.
    #[error("offset out of range: {0}")]
    OffsetOutOfRange(u64),

    /// An index slot past the live prefix, or a full index map. Drives
    /// segment rollover internally and is not surfaced at the log boundary.
    #[error("end of index")]
    Eof,

    /// A write reached a node that is not the current leader. Carries the
    /// leader's address when it is known so clients can re-resolve.
    #[error("not the leader")]
    NotLeader { leader_addr: Option<String> },

    /// Consensus returned no commit within the apply deadline. Retriable.
    #[error("apply timed out")]
    ApplyTimeout,

    /// A peer connection did not open with the Raft discriminator byte.
    #[error("not a raft rpc")]
    NotRaftRpc,

    /// Connection-level failure at the stream layer or client transport.
    #[error("transport: {0}")]
    Transport(String),

    /// Record or frame (de)serialization failure.
    #[error("codec: {0}")]
    Codec(String),

    /// Failure reported by the consensus engine.
    #[error("raft: {0}")]
    Raft(String),

    /// Local storage failure surfaced through the state machine.
    #[error("storage: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for errors a caller is expected to retry after re-resolving
    /// the leader.
    pub fn is_not_leader(&self) -> bool {
        matches!(self, Error::NotLeader { .. })
    }
}

/// Result alias that carries the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_leader_is_retriable() {
        let err = Error::NotLeader { leader_addr: None };
        assert!(err.is_not_leader());
        assert!(!Error::ApplyTimeout.is_not_leader());
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
