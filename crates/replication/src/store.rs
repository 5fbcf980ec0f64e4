//! Raft storage backed by the segmented commit log.
//!
//! Two log instances live under the node's data directory:
//!
//! ```text
//! {data_dir}/
//! ├── log/             # replicated data records
//! └── raft/
//!     ├── log/         # raft log entries (index space starts at 1)
//!     ├── stable       # vote / committed / membership state (atomic JSON)
//!     └── snapshots/   # {id}.snap, retaining 1
//! ```
//!
//! The raft log maps the entry index space directly onto the log's offset
//! space: an entry is stored as a record with `offset = index`, the entry
//! term and payload kind in the record header fields, and the serialized
//! entry as the value. Snapshots carry the data log's stitched byte stream;
//! restoring resets the data log to the stream's first offset and replays
//! every framed record.

use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use commitlog::{decode_record, Log, LogConfig, LEN_WIDTH};
use common::Error;
use openraft::storage::{LogState, RaftLogReader, RaftSnapshotBuilder, Snapshot};
use openraft::{
    BasicNode, EntryPayload, OptionalSend, RaftStorage, RaftTypeConfig, StorageError,
    StorageIOError, StoredMembership,
};
use protocol::Record;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::command::{CommandResponse, LogCommand};
use crate::type_config::{Entry, LogId, SnapshotMeta, TypeConfig, Vote};
use crate::NodeId;

/// Stable state persisted at `raft/stable`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StableState {
    /// Current vote (term and candidate voted for)
    vote: Option<Vote>,
    /// Committed log ID
    committed: Option<LogId>,
    /// Last purged log ID (entries at or below are compacted away)
    last_purged_log_id: Option<LogId>,
    /// Snapshot counter for unique IDs
    snapshot_idx: u64,
    /// State machine progress
    last_applied_log: Option<LogId>,
    /// Cluster membership as of the last applied membership entry
    last_membership: StoredMembership<NodeId, BasicNode>,
}

/// State machine progress kept in memory, persisted via [`StableState`].
#[derive(Clone, Debug, Default)]
struct StateMachineState {
    last_applied_log: Option<LogId>,
    last_membership: StoredMembership<NodeId, BasicNode>,
}

/// A snapshot held in memory alongside its on-disk file.
#[derive(Clone, Debug)]
struct StoredSnapshot {
    meta: SnapshotMeta,
    data: Vec<u8>,
}

/// Raft log, state machine, stable state, and snapshot storage for one
/// node.
pub struct RaftStore {
    /// The replicated data log; reads are served from it directly.
    data_log: Arc<Log>,

    /// Raft log entries, stored in a second commit log.
    raft_log: Log,

    stable_path: PathBuf,
    snapshots_dir: PathBuf,

    /// Whether stable state existed on disk when this store was opened.
    recovered: bool,

    sm: RwLock<StateMachineState>,
    vote: RwLock<Option<Vote>>,
    committed: RwLock<Option<LogId>>,
    last_purged: RwLock<Option<LogId>>,
    snapshot_idx: RwLock<u64>,
    current_snapshot: RwLock<Option<StoredSnapshot>>,
}

impl RaftStore {
    /// Open (or create) the store under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, segment: LogConfig) -> common::Result<Self> {
        let data_dir = data_dir.as_ref();
        let snapshots_dir = data_dir.join("raft").join("snapshots");
        fs::create_dir_all(&snapshots_dir)?;

        let data_log = Arc::new(Log::open(data_dir.join("log"), segment.clone())?);

        let raft_segment = LogConfig {
            initial_offset: 1,
            ..segment
        };
        let raft_log = Log::open(data_dir.join("raft").join("log"), raft_segment)?;

        let stable_path = data_dir.join("raft").join("stable");
        let recovered = stable_path.exists();
        let state: StableState = if recovered {
            serde_json::from_str(&fs::read_to_string(&stable_path)?).unwrap_or_default()
        } else {
            StableState::default()
        };

        let current_snapshot = Self::load_latest_snapshot(&snapshots_dir)?;

        info!(
            data_dir = %data_dir.display(),
            recovered,
            last_applied = ?state.last_applied_log,
            "opened raft store"
        );

        Ok(Self {
            data_log,
            raft_log,
            stable_path,
            snapshots_dir,
            recovered,
            sm: RwLock::new(StateMachineState {
                last_applied_log: state.last_applied_log,
                last_membership: state.last_membership,
            }),
            vote: RwLock::new(state.vote),
            committed: RwLock::new(state.committed),
            last_purged: RwLock::new(state.last_purged_log_id),
            snapshot_idx: RwLock::new(state.snapshot_idx),
            current_snapshot: RwLock::new(current_snapshot),
        })
    }

    /// True when prior raft state existed on disk at open time. Bootstrap
    /// is skipped for recovered nodes.
    pub fn has_existing_state(&self) -> bool {
        self.recovered
    }

    /// The replicated data log, shared with the façade for local reads.
    pub fn data_log(&self) -> Arc<Log> {
        Arc::clone(&self.data_log)
    }

    /// Close both logs, truncating their indexes to the live prefix.
    pub fn close(&self) -> common::Result<()> {
        self.raft_log.close()?;
        self.data_log.close()
    }

    fn load_latest_snapshot(dir: &Path) -> common::Result<Option<StoredSnapshot>> {
        let mut latest: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "snap") {
                continue;
            }
            // Snapshot IDs are `{term}_{index}_{counter}`.
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(index) = stem.split('_').nth(1).and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };
            if latest.as_ref().is_none_or(|(i, _)| index > *i) {
                latest = Some((index, path));
            }
        }

        let Some((_, path)) = latest else {
            return Ok(None);
        };

        let mut reader = BufReader::new(File::open(&path)?);

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let meta_len = u32::from_le_bytes(len_buf) as usize;

        let mut meta_buf = vec![0u8; meta_len];
        reader.read_exact(&mut meta_buf)?;
        let meta: SnapshotMeta = serde_json::from_slice(&meta_buf)
            .map_err(|e| Error::Codec(format!("snapshot metadata: {e}")))?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        Ok(Some(StoredSnapshot { meta, data }))
    }

    /// Write a snapshot file atomically and drop every older snapshot.
    fn write_snapshot(&self, meta: &SnapshotMeta, data: &[u8]) -> io::Result<()> {
        let snapshot_path = self
            .snapshots_dir
            .join(format!("{}.snap", meta.snapshot_id));
        let temp_path = self
            .snapshots_dir
            .join(format!("{}.snap.tmp", meta.snapshot_id));

        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);

        let meta_bytes =
            serde_json::to_vec(meta).map_err(|e| io::Error::other(e.to_string()))?;
        writer.write_all(&(meta_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&meta_bytes)?;
        writer.write_all(data)?;
        writer.flush()?;

        let file = writer.into_inner()?;
        file.sync_all()?;
        fs::rename(&temp_path, &snapshot_path)?;

        let dir = File::open(&self.snapshots_dir)?;
        dir.sync_all()?;

        // Retain exactly one snapshot.
        for entry in fs::read_dir(&self.snapshots_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "snap") && path != snapshot_path {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Persist the stable state atomically: write a temp file, fsync it,
    /// rename over the old state, fsync the directory.
    async fn persist_stable(&self) -> io::Result<()> {
        let state = {
            let sm = self.sm.read().await;
            StableState {
                vote: *self.vote.read().await,
                committed: *self.committed.read().await,
                last_purged_log_id: *self.last_purged.read().await,
                snapshot_idx: *self.snapshot_idx.read().await,
                last_applied_log: sm.last_applied_log,
                last_membership: sm.last_membership.clone(),
            }
        };

        let temp_path = self.stable_path.with_extension("tmp");
        let contents =
            serde_json::to_string_pretty(&state).map_err(|e| io::Error::other(e.to_string()))?;
        fs::write(&temp_path, &contents)?;

        let file = File::open(&temp_path)?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.stable_path)?;

        let parent = self
            .stable_path
            .parent()
            .ok_or_else(|| io::Error::other("stable path has no parent"))?;
        let dir = File::open(parent)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Rebuild the data log from a snapshot's framed byte stream.
    fn restore_data_log(&self, data: &[u8]) -> common::Result<()> {
        let len_width = LEN_WIDTH as usize;
        let mut at = 0usize;
        let mut first = true;

        while at + len_width <= data.len() {
            let mut len_buf = [0u8; 8];
            len_buf.copy_from_slice(&data[at..at + len_width]);
            let frame = u64::from_be_bytes(len_buf) as usize;
            at += len_width;

            if at + frame > data.len() {
                return Err(Error::Codec("truncated snapshot stream".to_string()));
            }
            let mut record = decode_record(&data[at..at + frame])?;
            at += frame;

            if first {
                // Reproduce the source log's offset space exactly.
                self.data_log.reset_to(record.offset)?;
                first = false;
            }
            self.data_log.append(&mut record)?;
        }
        Ok(())
    }
}

fn entry_kind(entry: &Entry) -> u32 {
    match entry.payload {
        EntryPayload::Blank => 0,
        EntryPayload::Normal(_) => 1,
        EntryPayload::Membership(_) => 2,
    }
}

fn entry_to_record(entry: &Entry) -> common::Result<Record> {
    let value = bincode::serde::encode_to_vec(entry, bincode::config::legacy())
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(Record {
        value,
        offset: entry.log_id.index,
        term: entry.log_id.leader_id.term,
        record_type: entry_kind(entry),
    })
}

fn record_to_entry(record: &Record) -> common::Result<Entry> {
    let (entry, _) = bincode::serde::decode_from_slice(&record.value, bincode::config::legacy())
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(entry)
}

impl RaftLogReader<TypeConfig> for Arc<RaftStore> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry>, StorageError<NodeId>> {
        let lowest = self.raft_log.lowest_offset();
        let highest = self.raft_log.highest_offset();

        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => lowest,
        }
        .max(lowest);
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => highest + 1,
        }
        .min(highest + 1);

        let mut entries = Vec::new();
        for index in start..end {
            let record = self
                .raft_log
                .read(index)
                .map_err(|e| StorageIOError::read_logs(&e))?;
            entries.push(record_to_entry(&record).map_err(|e| StorageIOError::read_logs(&e))?);
        }
        Ok(entries)
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<RaftStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        // The snapshot is the data log's stitched byte stream.
        let mut data = Vec::new();
        self.data_log
            .reader()
            .read_to_end(&mut data)
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let (last_applied_log, last_membership) = {
            let sm = self.sm.read().await;
            (sm.last_applied_log, sm.last_membership.clone())
        };

        let snapshot_idx = {
            let mut idx = self.snapshot_idx.write().await;
            *idx += 1;
            *idx
        };

        let snapshot_id = match last_applied_log {
            Some(last) => format!("{}_{}_{}", last.leader_id.term, last.index, snapshot_idx),
            None => format!("0_0_{}", snapshot_idx),
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };

        self.write_snapshot(&meta, &data)
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;
        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_state_machine(&e))?;

        debug!(snapshot_id = %meta.snapshot_id, bytes = data.len(), "built snapshot");

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        });

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for Arc<RaftStore> {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let lowest = self.raft_log.lowest_offset();
        let highest = self.raft_log.highest_offset();
        let last_purged = *self.last_purged.read().await;

        let last_log_id = if highest >= lowest {
            let record = self
                .raft_log
                .read(highest)
                .map_err(|e| StorageIOError::read_logs(&e))?;
            Some(
                record_to_entry(&record)
                    .map_err(|e| StorageIOError::read_logs(&e))?
                    .log_id,
            )
        } else {
            last_purged
        };

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError<NodeId>> {
        *self.vote.write().await = Some(*vote);
        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_vote(&e))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote>, StorageError<NodeId>> {
        Ok(*self.vote.read().await)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId>,
    ) -> Result<(), StorageError<NodeId>> {
        *self.committed.write().await = committed;
        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_state_machine(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId>, StorageError<NodeId>> {
        Ok(*self.committed.read().await)
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>> {
        let sm = self.sm.read().await;
        Ok((sm.last_applied_log, sm.last_membership.clone()))
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId,
    ) -> Result<(), StorageError<NodeId>> {
        let lowest = self.raft_log.lowest_offset();
        let highest = self.raft_log.highest_offset();
        if log_id.index > highest {
            return Ok(());
        }

        debug!(since = log_id.index, "deleting conflicting log suffix");

        // The segmented log only evicts whole prefixes, so a suffix
        // deletion rebuilds the surviving prefix in place, the same way
        // snapshot restore replays a stream.
        if log_id.index <= lowest {
            self.raft_log
                .reset_to(log_id.index)
                .map_err(|e| StorageIOError::write_logs(&e))?;
            return Ok(());
        }

        let mut survivors = Vec::with_capacity((log_id.index - lowest) as usize);
        for index in lowest..log_id.index {
            survivors.push(
                self.raft_log
                    .read(index)
                    .map_err(|e| StorageIOError::read_logs(&e))?,
            );
        }
        self.raft_log
            .reset_to(lowest)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        for mut record in survivors {
            self.raft_log
                .append(&mut record)
                .map_err(|e| StorageIOError::write_logs(&e))?;
        }
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId) -> Result<(), StorageError<NodeId>> {
        *self.last_purged.write().await = Some(log_id);

        self.raft_log
            .truncate(log_id.index)
            .map_err(|e| StorageIOError::write_logs(&e))?;

        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_state_machine(&e))?;
        Ok(())
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + OptionalSend,
    {
        for entry in entries {
            // The raft log's offset space tracks the entry index space.
            // After a snapshot-driven purge on a fresh follower the next
            // entry can arrive past the log's tail; restart the offset
            // space there.
            let expected = self.raft_log.highest_offset() + 1;
            if entry.log_id.index != expected {
                self.raft_log
                    .reset_to(entry.log_id.index)
                    .map_err(|e| StorageIOError::write_logs(&e))?;
            }

            let mut record = entry_to_record(&entry)
                .map_err(|e| StorageIOError::write_log_entry(entry.log_id, &e))?;
            self.raft_log
                .append(&mut record)
                .map_err(|e| StorageIOError::write_log_entry(entry.log_id, &e))?;
        }
        Ok(())
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry],
    ) -> Result<Vec<CommandResponse>, StorageError<NodeId>> {
        let mut responses = Vec::with_capacity(entries.len());
        let mut sm = self.sm.write().await;

        for entry in entries {
            sm.last_applied_log = Some(entry.log_id);

            match &entry.payload {
                EntryPayload::Blank => responses.push(CommandResponse::Noop),
                EntryPayload::Normal(LogCommand::Append { record }) => {
                    let mut record = record.clone();
                    match self.data_log.append(&mut record) {
                        Ok(offset) => {
                            debug!(offset, "applied append");
                            responses.push(CommandResponse::Append { offset });
                        }
                        // Surface the failure to the proposer instead of
                        // failing the state machine.
                        Err(e) => responses.push(CommandResponse::Error {
                            message: e.to_string(),
                        }),
                    }
                }
                EntryPayload::Membership(membership) => {
                    sm.last_membership =
                        StoredMembership::new(Some(entry.log_id), membership.clone());
                    responses.push(CommandResponse::Noop);
                }
            }
        }

        drop(sm);
        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_state_machine(&e))?;
        Ok(responses)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();

        info!(
            snapshot_id = %meta.snapshot_id,
            bytes = data.len(),
            "installing snapshot"
        );

        self.write_snapshot(meta, &data)
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;

        self.restore_data_log(&data)
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;

        {
            let mut sm = self.sm.write().await;
            sm.last_applied_log = meta.last_log_id;
            sm.last_membership = meta.last_membership.clone();
        }

        *self.current_snapshot.write().await = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });

        self.persist_stable()
            .await
            .map_err(|e| StorageIOError::write_state_machine(&e))?;
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let current = self.current_snapshot.read().await;
        Ok(current.as_ref().map(|snapshot| Snapshot {
            meta: snapshot.meta.clone(),
            snapshot: Box::new(Cursor::new(snapshot.data.clone())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;
    use tempfile::TempDir;

    fn make_entry(index: u64, term: u64, value: &[u8]) -> Entry {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(term, 1), index),
            payload: EntryPayload::Normal(LogCommand::Append {
                record: Record::new(value.to_vec()),
            }),
        }
    }

    fn open(dir: &Path) -> Arc<RaftStore> {
        Arc::new(RaftStore::open(dir, LogConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn append_and_read_back_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = open(dir.path());

        store
            .append_to_log(vec![make_entry(1, 1, b"first"), make_entry(2, 1, b"second")])
            .await
            .unwrap();

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 2);

        let entries = store.try_get_log_entries(1..=2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].log_id.index, 1);
        assert_eq!(entries[1].log_id.index, 2);
    }

    #[tokio::test]
    async fn vote_survives_restart() {
        let dir = TempDir::new().unwrap();
        let vote = Vote::new(5, 1);

        {
            let mut store = open(dir.path());
            store.save_vote(&vote).await.unwrap();
        }

        {
            let mut store = open(dir.path());
            assert!(store.has_existing_state());
            assert_eq!(store.read_vote().await.unwrap(), Some(vote));
        }
    }

    #[tokio::test]
    async fn log_survives_restart() {
        let dir = TempDir::new().unwrap();

        {
            let mut store = open(dir.path());
            store
                .append_to_log(vec![make_entry(1, 1, b"a"), make_entry(2, 1, b"b")])
                .await
                .unwrap();
            store.close().unwrap();
        }

        {
            let mut store = open(dir.path());
            let state = store.get_log_state().await.unwrap();
            assert_eq!(state.last_log_id.unwrap().index, 2);
            let entries = store.try_get_log_entries(1..=2).await.unwrap();
            assert_eq!(entries.len(), 2);
        }
    }

    #[tokio::test]
    async fn apply_appends_to_the_data_log() {
        let dir = TempDir::new().unwrap();
        let mut store = open(dir.path());

        let responses = store
            .apply_to_state_machine(&[make_entry(1, 1, b"hello")])
            .await
            .unwrap();

        assert_eq!(responses, vec![CommandResponse::Append { offset: 0 }]);
        let record = store.data_log().read(0).unwrap();
        assert_eq!(record.value, b"hello");
    }

    #[tokio::test]
    async fn conflicting_suffix_is_deleted() {
        let dir = TempDir::new().unwrap();
        let mut store = open(dir.path());

        store
            .append_to_log((1..=5).map(|i| make_entry(i, 1, b"x")).collect::<Vec<_>>())
            .await
            .unwrap();

        store
            .delete_conflict_logs_since(LogId::new(CommittedLeaderId::new(1, 1), 4))
            .await
            .unwrap();

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 3);

        // The replacement entries append cleanly at the truncation point.
        store
            .append_to_log(vec![make_entry(4, 2, b"y")])
            .await
            .unwrap();
        let entries = store.try_get_log_entries(4..=4).await.unwrap();
        assert_eq!(entries[0].log_id.leader_id.term, 2);
    }

    #[tokio::test]
    async fn snapshot_round_trip_restores_offsets() {
        let source_dir = TempDir::new().unwrap();
        let mut source = open(source_dir.path());

        for i in 1..=3u64 {
            source
                .apply_to_state_machine(&[make_entry(i, 1, format!("rec-{i}").as_bytes())])
                .await
                .unwrap();
        }

        let snapshot = source.build_snapshot().await.unwrap();
        assert_eq!(snapshot.meta.last_log_id.unwrap().index, 3);

        // A fresh node installs the snapshot and serves identical reads.
        let target_dir = TempDir::new().unwrap();
        let mut target = open(target_dir.path());
        target
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        for offset in 0..3u64 {
            let record = target.data_log().read(offset).unwrap();
            assert_eq!(record.value, format!("rec-{}", offset + 1).into_bytes());
            assert_eq!(record.offset, offset);
        }

        let reloaded = target.get_current_snapshot().await.unwrap();
        assert!(reloaded.is_some());
    }

    #[tokio::test]
    async fn purge_drops_whole_prefix_segments() {
        let dir = TempDir::new().unwrap();
        let segment = LogConfig::builder()
            .max_store_bytes(256)
            .max_index_bytes(256)
            .build();
        let mut store =
            Arc::new(RaftStore::open(dir.path(), segment).unwrap());

        store
            .append_to_log((1..=40).map(|i| make_entry(i, 1, b"data")).collect::<Vec<_>>())
            .await
            .unwrap();

        store
            .purge_logs_upto(LogId::new(CommittedLeaderId::new(1, 1), 20))
            .await
            .unwrap();

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id.unwrap().index, 20);
        assert_eq!(state.last_log_id.unwrap().index, 40);

        // Whole segments below the purge point are gone; the tail remains.
        let entries = store.try_get_log_entries(1..=40).await.unwrap();
        let first = entries.first().unwrap().log_id.index;
        assert!(first > 1 && first <= 21, "unexpected first index {first}");
        assert_eq!(entries.last().unwrap().log_id.index, 40);
    }
}
