//! The flat file backing one branch: a contiguous run of 80-byte header
//! records starting at the branch checkpoint.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

/// Bytes per stored header record.
pub(crate) const RECORD_SIZE: u64 = 80;

/// A branch's backing file plus its cached record count.
///
/// Not internally synchronized: the owning branch wraps it in a mutex, and
/// every read or write path goes through that lock.
pub(crate) struct HeaderFile {
    path: PathBuf,
    size: u32,
}

impl HeaderFile {
    /// Attaches to `path`, measuring the record count of whatever is there.
    /// A missing file reads as empty; it is created on first write.
    pub fn open(path: PathBuf) -> HeaderFile {
        let mut file = HeaderFile { path, size: 0 };
        file.update_size();
        file
    }

    /// Creates or truncates the file on disk.
    pub fn create(&mut self) -> io::Result<()> {
        File::create(&self.path)?;
        self.size = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Number of complete records on disk, as of the last write or open.
    pub fn size(&self) -> u32 {
        self.size
    }

    fn update_size(&mut self) {
        self.size = match fs::metadata(&self.path) {
            Ok(meta) => (meta.len() / RECORD_SIZE) as u32,
            Err(_) => 0,
        };
    }

    /// Writes `data` at `offset`, then flushes and fsyncs so a verified
    /// write is durable before the caller reports success.
    ///
    /// When `truncate` is set and the write does not start exactly at the
    /// current end, the file is first cut at `offset`, discarding a stale
    /// tail.
    pub fn write(&mut self, data: &[u8], offset: u64, truncate: bool) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        if truncate && offset != u64::from(self.size) * RECORD_SIZE {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        self.update_size();
        trace!(path = %self.path.display(), offset, len = data.len(), "wrote records");
        Ok(())
    }

    /// Reads the record `delta` records in.
    ///
    /// Returns `None` for an all-zero record: a sparsely written file reads
    /// back as absent there. A short read is an error, not absence.
    pub fn read_record(&self, delta: u32) -> io::Result<Option<[u8; RECORD_SIZE as usize]>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(u64::from(delta) * RECORD_SIZE))?;
        let mut record = [0u8; RECORD_SIZE as usize];
        file.read_exact(&mut record)?;
        if record.iter().all(|&byte| byte == 0) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Reads the whole payload.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}
