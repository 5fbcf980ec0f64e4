use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use common::Result;
use tracing::warn;

/// Width of the length prefix on every store frame.
pub const LEN_WIDTH: u64 = 8;

/// Append-only record file.
///
/// Frames are `<len: u64 BE><bytes[len]>`, back to back. Positions are byte
/// offsets into the file. Appends go through a buffered writer; reads flush
/// it first so a read after a concurrent append observes the written bytes.
pub struct Store {
    inner: Mutex<Inner>,
}

struct Inner {
    writer: BufWriter<File>,
    size: u64,
}

impl Store {
    /// Open (or create) the store file at `path`.
    ///
    /// The tail is validated frame by frame: a crash mid-append can leave a
    /// truncated length or payload, and later reads would mis-parse it. The
    /// file is cut back to the last intact frame boundary.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let size = recover_tail(&file)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                size,
            }),
        })
    }

    /// Append `bytes` as one frame. Returns `(bytes_written, position)`,
    /// where `position` is the file size before the write.
    pub fn append(&self, bytes: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock().unwrap();

        let position = inner.size;
        inner.writer.write_all(&(bytes.len() as u64).to_be_bytes())?;
        inner.writer.write_all(bytes)?;

        let written = LEN_WIDTH + bytes.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Read the frame payload at `position`.
    pub fn read(&self, position: u64) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;

        let file = inner.writer.get_ref();
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        file.read_exact_at(&mut len_buf, position)?;

        let mut payload = vec![0u8; u64::from_be_bytes(len_buf) as usize];
        file.read_exact_at(&mut payload, position + LEN_WIDTH)?;
        Ok(payload)
    }

    /// Positional read of raw bytes, flushing buffered writes first.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        Ok(inner.writer.get_ref().read_at(buf, offset)?)
    }

    /// Current size in bytes, including buffered appends.
    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    /// Flush buffered appends and sync the file.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Walk the store frame by frame and truncate to the last intact boundary.
fn recover_tail(file: &File) -> Result<u64> {
    let len = file.metadata()?.len();
    let mut pos = 0u64;
    let mut len_buf = [0u8; LEN_WIDTH as usize];

    while pos + LEN_WIDTH <= len {
        file.read_exact_at(&mut len_buf, pos)?;
        let frame = u64::from_be_bytes(len_buf);
        if pos + LEN_WIDTH + frame > len {
            break;
        }
        pos += LEN_WIDTH + frame;
    }

    if pos < len {
        warn!(
            intact = pos,
            actual = len,
            "store has a torn tail frame, truncating"
        );
        file.set_len(pos)?;
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn append_and_read() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("0.store")).unwrap();

        let (written, pos) = store.append(b"hello world").unwrap();
        assert_eq!(written, LEN_WIDTH + 11);
        assert_eq!(pos, 0);

        let (_, pos2) = store.append(b"second").unwrap();
        assert_eq!(pos2, written);

        assert_eq!(store.read(pos).unwrap(), b"hello world");
        assert_eq!(store.read(pos2).unwrap(), b"second");
    }

    #[test]
    fn read_at_returns_raw_frame() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("0.store")).unwrap();
        store.append(b"abc").unwrap();

        let mut buf = [0u8; LEN_WIDTH as usize];
        let n = store.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, LEN_WIDTH as usize);
        assert_eq!(u64::from_be_bytes(buf), 3);
    }

    #[test]
    fn size_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.store");

        let store = Store::open(&path).unwrap();
        let (_, pos) = store.append(b"persisted").unwrap();
        store.close().unwrap();
        let size = store.size();
        drop(store);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.size(), size);
        assert_eq!(store.read(pos).unwrap(), b"persisted");
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.store");

        let store = Store::open(&path).unwrap();
        store.append(b"intact").unwrap();
        store.close().unwrap();
        let intact_size = store.size();
        drop(store);

        // Simulate a crash mid-append: a full length prefix but a short
        // payload.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u64.to_be_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.size(), intact_size);
        assert_eq!(store.read(0).unwrap(), b"intact");
    }
}
