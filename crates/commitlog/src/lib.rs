//! Segmented append-only commit log.
//!
//! A [`Log`] is an ordered list of segments over a directory. Each segment
//! pairs a store file (length-prefixed record frames) with a memory-mapped
//! index (fixed-width offset-to-position entries). Appends go to the active
//! segment and roll over when it fills; reads are routed to the segment
//! containing the offset.
//!
//! # Example
//!
//! ```no_run
//! use commitlog::{Log, LogConfig};
//! use protocol::Record;
//!
//! let log = Log::open("data/log", LogConfig::default()).unwrap();
//!
//! let mut record = Record::new(b"hello".to_vec());
//! let offset = log.append(&mut record).unwrap();
//!
//! let read = log.read(offset).unwrap();
//! assert_eq!(read.value, b"hello");
//! ```

#[cfg(test)]
mod tests;

mod config;
mod index;
mod log;
mod segment;
mod store;

pub use config::LogConfig;
pub use log::{Log, LogReader};
pub use segment::{decode_record, encode_record};
pub use store::LEN_WIDTH;
