use std::fs::{File, OpenOptions};
use std::path::Path;

use common::{Error, Result};
use memmap2::MmapMut;

use crate::store::LEN_WIDTH;

const OFF_WIDTH: u64 = 4;
pub(crate) const ENT_WIDTH: u64 = OFF_WIDTH + 8;

/// Memory-mapped offset index for one segment.
///
/// Entries are `<relative_offset: u32 BE><position: u64 BE>`, 12 bytes. On
/// open the file is extended to `max_index_bytes` and mapped read-write; on
/// close it is synced, unmapped, and truncated back to the live prefix so
/// the last entry is findable after a restart.
///
/// Not internally synchronized: writes are serialized by the log's write
/// lock, reads by its shared lock.
pub(crate) struct Index {
    file: File,
    mmap: Option<MmapMut>,
    size: u64,
}

impl Index {
    pub(crate) fn open(path: &Path, max_index_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        // The live prefix is the file size before the map extends it.
        let size = file.metadata()?.len();
        file.set_len(max_index_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            file,
            mmap: Some(mmap),
            size,
        })
    }

    /// Read entry `n`, or the last entry when `n == -1`.
    pub(crate) fn read(&self, n: i64) -> Result<(u32, u64)> {
        if self.size == 0 {
            return Err(Error::Eof);
        }

        let entry = if n == -1 {
            self.size / ENT_WIDTH - 1
        } else {
            n as u64
        };

        let pos = entry * ENT_WIDTH;
        if self.size < pos + ENT_WIDTH || self.mmap.is_none() {
            return Err(Error::Eof);
        }
        Ok(self.entry_at(pos))
    }

    /// Append an entry. Fails with [`Error::Eof`] when the map is full.
    pub(crate) fn write(&mut self, relative_offset: u32, position: u64) -> Result<()> {
        let size = self.size;
        let mmap = self.mmap.as_mut().ok_or(Error::Eof)?;
        if (mmap.len() as u64) < size + ENT_WIDTH {
            return Err(Error::Eof);
        }

        let at = size as usize;
        mmap[at..at + OFF_WIDTH as usize].copy_from_slice(&relative_offset.to_be_bytes());
        mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize]
            .copy_from_slice(&position.to_be_bytes());
        self.size += ENT_WIDTH;
        Ok(())
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Drop trailing entries that point past the recovered store size, so a
    /// torn store tail does not leave dangling index entries.
    pub(crate) fn clamp(&mut self, store_size: u64) {
        self.size -= self.size % ENT_WIDTH;
        while self.size > 0 {
            let (_, position) = self.entry_at(self.size - ENT_WIDTH);
            if position + LEN_WIDTH <= store_size {
                break;
            }
            self.size -= ENT_WIDTH;
        }
    }

    /// Sync the map, unmap it, fsync, and truncate the file to the live
    /// prefix. Unmapping must precede the truncate or the OS refuses the
    /// size change.
    pub(crate) fn close(&mut self) -> Result<()> {
        let Some(mmap) = self.mmap.take() else {
            return Ok(());
        };
        mmap.flush()?;
        drop(mmap);

        self.file.sync_all()?;
        self.file.set_len(self.size)?;
        Ok(())
    }

    fn entry_at(&self, pos: u64) -> (u32, u64) {
        // Callers validate bounds against `size`; the map is at least that
        // large.
        let mmap = self.mmap.as_ref().expect("index is open");
        let at = pos as usize;

        let mut off = [0u8; OFF_WIDTH as usize];
        off.copy_from_slice(&mmap[at..at + OFF_WIDTH as usize]);
        let mut position = [0u8; 8];
        position.copy_from_slice(&mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize]);

        (u32::from_be_bytes(off), u64::from_be_bytes(position))
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        // Dropping without an explicit close still leaves a reopenable file.
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAX_INDEX_BYTES: u64 = 1024;

    #[test]
    fn empty_index_read_fails_with_eof() {
        let dir = TempDir::new().unwrap();
        let index = Index::open(&dir.path().join("0.index"), MAX_INDEX_BYTES).unwrap();

        assert!(matches!(index.read(-1), Err(Error::Eof)));
        assert!(matches!(index.read(0), Err(Error::Eof)));
    }

    #[test]
    fn write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut index = Index::open(&dir.path().join("0.index"), MAX_INDEX_BYTES).unwrap();

        for (off, pos) in [(0u32, 0u64), (1, 10)] {
            index.write(off, pos).unwrap();
            let (read_off, read_pos) = index.read(off as i64).unwrap();
            assert_eq!(read_off, off);
            assert_eq!(read_pos, pos);
        }

        // Reading past the live prefix fails.
        assert!(matches!(index.read(2), Err(Error::Eof)));
    }

    #[test]
    fn last_entry_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.index");

        let mut index = Index::open(&path, MAX_INDEX_BYTES).unwrap();
        index.write(0, 0).unwrap();
        index.write(1, 10).unwrap();
        index.close().unwrap();
        drop(index);

        let index = Index::open(&path, MAX_INDEX_BYTES).unwrap();
        assert_eq!(index.read(-1).unwrap(), (1, 10));
    }

    #[test]
    fn full_map_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let mut index = Index::open(&dir.path().join("0.index"), 3 * ENT_WIDTH).unwrap();

        for i in 0..3u32 {
            index.write(i, u64::from(i) * 10).unwrap();
        }
        assert!(matches!(index.write(3, 30), Err(Error::Eof)));
    }

    #[test]
    fn clamp_drops_dangling_entries() {
        let dir = TempDir::new().unwrap();
        let mut index = Index::open(&dir.path().join("0.index"), MAX_INDEX_BYTES).unwrap();

        index.write(0, 0).unwrap();
        index.write(1, 19).unwrap();

        // Store recovered to 19 bytes: the second entry points at the torn
        // tail and must go.
        index.clamp(19);
        assert_eq!(index.size(), ENT_WIDTH);
        assert_eq!(index.read(-1).unwrap(), (0, 0));
    }
}
