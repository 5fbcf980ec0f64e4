//! Replicated command types.
//!
//! Commands are serialized into raft log entries and applied to the data
//! log on every replica in the same order. The append command is variant 0,
//! matching the original request-type discriminator.

use protocol::Record;
use serde::{Deserialize, Serialize};

/// A log operation replicated through consensus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogCommand {
    /// Append a record to the data log.
    Append { record: Record },
}

/// Response from applying a command to the state machine, surfaced to the
/// proposer through the client-write future.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// The offset assigned to an appended record.
    Append { offset: u64 },
    /// The append failed on the state machine; carries the storage error.
    Error { message: String },
    /// Blank and membership entries produce no application response.
    Noop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serialization_round_trip() {
        let cmd = LogCommand::Append {
            record: Record::new(b"payload".to_vec()),
        };

        let encoded =
            bincode::serde::encode_to_vec(&cmd, bincode::config::legacy()).unwrap();
        let (decoded, _): (LogCommand, _) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::legacy()).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn append_is_the_first_variant() {
        // The variant tag is the wire-level request type discriminator.
        let cmd = LogCommand::Append {
            record: Record::default(),
        };
        let encoded =
            bincode::serde::encode_to_vec(&cmd, bincode::config::legacy()).unwrap();
        assert_eq!(encoded[0], 0);
    }

    #[test]
    fn response_variants_round_trip() {
        let responses = vec![
            CommandResponse::Append { offset: 7 },
            CommandResponse::Error {
                message: "storage failure".into(),
            },
            CommandResponse::Noop,
        ];

        for response in responses {
            let encoded =
                bincode::serde::encode_to_vec(&response, bincode::config::legacy()).unwrap();
            let (decoded, _): (CommandResponse, _) =
                bincode::serde::decode_from_slice(&encoded, bincode::config::legacy()).unwrap();
            assert_eq!(response, decoded);
        }
    }
}
