//! OpenRaft type configuration for the replicated log.

use crate::{CommandResponse, LogCommand, NodeId};
use openraft::BasicNode;
use std::io::Cursor;

openraft::declare_raft_types!(
    /// Raft type configuration for the replicated commit log.
    pub TypeConfig:
        D = LogCommand,
        R = CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
);

/// Type alias for log entries.
pub type Entry = openraft::Entry<TypeConfig>;

/// Type alias for log ID.
pub type LogId = openraft::LogId<NodeId>;

/// Type alias for vote.
pub type Vote = openraft::Vote<NodeId>;

/// Type alias for snapshot metadata.
pub type SnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;

/// Type alias for membership config.
pub type Membership = openraft::Membership<NodeId, BasicNode>;
