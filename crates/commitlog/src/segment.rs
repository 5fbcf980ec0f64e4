use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{Error, Result};
use protocol::Record;
use tracing::debug;

use crate::config::LogConfig;
use crate::index::{Index, ENT_WIDTH};
use crate::store::Store;

/// Serialize a record for storage (fixed-width integer encoding).
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::legacy())
        .map_err(|e| Error::Codec(e.to_string()))
}

/// Deserialize a record from its stored bytes.
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(record)
}

/// One store + index pair covering a contiguous offset range starting at
/// `base_offset`. The next record written gets `next_offset`.
pub(crate) struct Segment {
    store: Arc<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    store_path: PathBuf,
    index_path: PathBuf,
    config: LogConfig,
}

impl Segment {
    pub(crate) fn open(dir: &Path, base_offset: u64, config: &LogConfig) -> Result<Self> {
        let store_path = dir.join(format!("{}.store", base_offset));
        let index_path = dir.join(format!("{}.index", base_offset));

        let store = Arc::new(Store::open(&store_path)?);
        let mut index = Index::open(&index_path, config.max_index_bytes)?;
        index.clamp(store.size());

        let next_offset = match index.read(-1) {
            Ok((relative_offset, _)) => base_offset + u64::from(relative_offset) + 1,
            Err(Error::Eof) => base_offset,
            Err(e) => return Err(e),
        };

        debug!(base_offset, next_offset, "opened segment");

        Ok(Self {
            store,
            index,
            base_offset,
            next_offset,
            store_path,
            index_path,
            config: config.clone(),
        })
    }

    /// Append a record, stamping it with this segment's next offset.
    pub(crate) fn append(&mut self, record: &mut Record) -> Result<u64> {
        let offset = self.next_offset;
        record.offset = offset;

        let bytes = encode_record(record)?;
        let (_, position) = self.store.append(&bytes)?;
        self.index
            .write((offset - self.base_offset) as u32, position)?;

        self.next_offset += 1;
        Ok(offset)
    }

    pub(crate) fn read(&self, offset: u64) -> Result<Record> {
        let (_, position) = self.index.read((offset - self.base_offset) as i64)?;
        let bytes = self.store.read(position)?;
        decode_record(&bytes)
    }

    pub(crate) fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() + ENT_WIDTH >= self.config.max_index_bytes
    }

    pub(crate) fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    pub(crate) fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub(crate) fn store_size(&self) -> u64 {
        self.store.size()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.index.close()?;
        self.store.close()
    }

    /// Close and unlink both files.
    pub(crate) fn remove(mut self) -> Result<()> {
        self.close()?;
        fs::remove_file(&self.index_path)?;
        fs::remove_file(&self.store_path)?;
        Ok(())
    }
}
