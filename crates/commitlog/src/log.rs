use std::cmp::min;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use common::{Error, Result};
use protocol::Record;
use tracing::{debug, info};

use crate::config::LogConfig;
use crate::segment::Segment;
use crate::store::Store;

/// Ordered list of segments over a directory.
///
/// Appends go to the active (last) segment and roll over when it reports
/// maxed; reads are routed to the segment containing the offset. A single
/// reader-writer lock serializes rollover against readers, so a reader
/// never observes a half-created segment.
pub struct Log {
    dir: PathBuf,
    inner: RwLock<Inner>,
}

struct Inner {
    config: LogConfig,
    segments: Vec<Segment>,
}

impl Inner {
    fn active(&self) -> &Segment {
        self.segments.last().expect("log has at least one segment")
    }

    fn active_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("log has at least one segment")
    }
}

impl Log {
    /// Open the log over `dir`, discovering existing segments by filename.
    pub fn open(dir: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = config.normalized();

        fs::create_dir_all(&dir)?;
        let segments = Self::load_segments(&dir, &config)?;
        info!(dir = %dir.display(), segments = segments.len(), "opened log");

        Ok(Self {
            dir,
            inner: RwLock::new(Inner { config, segments }),
        })
    }

    fn load_segments(dir: &Path, config: &LogConfig) -> Result<Vec<Segment>> {
        let mut base_offsets = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "store") {
                if let Some(base) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u64>().ok())
                {
                    base_offsets.push(base);
                }
            }
        }
        base_offsets.sort_unstable();

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base in base_offsets {
            segments.push(Segment::open(dir, base, config)?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(dir, config.initial_offset, config)?);
        }
        Ok(segments)
    }

    /// Append a record, rolling to a fresh segment when the active one is
    /// maxed. Returns the assigned offset.
    pub fn append(&self, record: &mut Record) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();

        if inner.active().is_maxed() {
            let base = inner.active().next_offset();
            debug!(base_offset = base, "active segment maxed, rolling over");
            let segment = Segment::open(&self.dir, base, &inner.config)?;
            inner.segments.push(segment);
        }

        inner.active_mut().append(record)
    }

    /// Read the record at `offset`.
    pub fn read(&self, offset: u64) -> Result<Record> {
        let inner = self.inner.read().unwrap();
        match inner.segments.iter().find(|s| s.contains(offset)) {
            Some(segment) => segment.read(offset),
            None => Err(Error::OffsetOutOfRange(offset)),
        }
    }

    /// Offset of the oldest record still held.
    pub fn lowest_offset(&self) -> u64 {
        let inner = self.inner.read().unwrap();
        inner.segments[0].base_offset()
    }

    /// Offset of the newest record, or 0 when the log is empty.
    pub fn highest_offset(&self) -> u64 {
        let inner = self.inner.read().unwrap();
        match inner.active().next_offset() {
            0 => 0,
            next => next - 1,
        }
    }

    /// Remove every segment whose records all have offsets at or below
    /// `lowest`. This is the only eviction mechanism.
    pub fn truncate(&self, lowest: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let mut kept = Vec::with_capacity(inner.segments.len());
        for segment in std::mem::take(&mut inner.segments) {
            if segment.next_offset() <= lowest + 1 {
                segment.remove()?;
            } else {
                kept.push(segment);
            }
        }

        // The log always has an active segment; continue after the
        // truncated prefix.
        if kept.is_empty() {
            kept.push(Segment::open(&self.dir, lowest + 1, &inner.config)?);
        }
        inner.segments = kept;
        Ok(())
    }

    /// Remove the entire directory and start over at the configured
    /// initial offset.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let initial = inner.config.initial_offset;
        self.reset_locked(&mut inner, initial)
    }

    /// Like [`Log::reset`], but restart the offset space at
    /// `initial_offset`. Used by snapshot restore to reproduce the source
    /// log's offsets.
    pub fn reset_to(&self, initial_offset: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        self.reset_locked(&mut inner, initial_offset)
    }

    fn reset_locked(&self, inner: &mut Inner, initial_offset: u64) -> Result<()> {
        for segment in inner.segments.iter_mut() {
            segment.close()?;
        }
        inner.segments.clear();

        fs::remove_dir_all(&self.dir)?;
        fs::create_dir_all(&self.dir)?;

        inner.config.initial_offset = initial_offset;
        inner.segments = Self::load_segments(&self.dir, &inner.config)?;
        Ok(())
    }

    /// A byte stream over every segment's store in base-offset order: the
    /// raw `<len><bytes>` frames back to back. This is what snapshots
    /// persist.
    pub fn reader(&self) -> LogReader {
        let inner = self.inner.read().unwrap();
        LogReader {
            stores: inner
                .segments
                .iter()
                .map(|s| (s.store(), s.store_size()))
                .collect(),
            current: 0,
            position: 0,
        }
    }

    /// Close every segment, truncating each index to its live prefix.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for segment in inner.segments.iter_mut() {
            segment.close()?;
        }
        Ok(())
    }

    /// Close, then delete the log directory.
    pub fn remove(&self) -> Result<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Stitched reader over the stores captured when it was created.
pub struct LogReader {
    stores: Vec<(Arc<Store>, u64)>,
    current: usize,
    position: u64,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current < self.stores.len() {
            let (store, size) = &self.stores[self.current];
            if self.position >= *size {
                self.current += 1;
                self.position = 0;
                continue;
            }

            let want = min(buf.len() as u64, size - self.position) as usize;
            let n = store
                .read_at(&mut buf[..want], self.position)
                .map_err(io::Error::other)?;
            if n == 0 {
                self.current += 1;
                self.position = 0;
                continue;
            }
            self.position += n as u64;
            return Ok(n);
        }
        Ok(0)
    }
}
