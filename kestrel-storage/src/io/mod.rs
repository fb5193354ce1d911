mod mem;
mod space;

pub use mem::*;
pub use space::*;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Positional file IO used by tablespaces and redo log groups.
///
/// Reads beyond end of file are filled with zeros, so freshly
/// extended regions read as empty pages or empty log blocks.
pub trait FileIo: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Flush data and metadata to stable storage.
    fn sync_all(&self) -> io::Result<()>;

    /// Flush data to stable storage.
    fn sync_data(&self) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;

    fn set_len(&self, len: u64) -> io::Result<()>;
}

/// File on local disk, accessed with pread/pwrite.
pub struct DiskFile {
    file: File,
}

impl DiskFile {
    /// Create a new file, truncating existing one.
    #[inline]
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(DiskFile { file })
    }

    /// Open an existing file.
    #[inline]
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(DiskFile { file })
    }
}

impl FileIo for DiskFile {
    #[inline]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => {
                    // end of file
                    buf[done..].fill(0);
                    return Ok(());
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[inline]
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    #[inline]
    fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    #[inline]
    fn sync_data(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    #[inline]
    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[inline]
    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disk_file_read_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let file = DiskFile::create(&path).unwrap();
        file.write_at(100, b"hello").unwrap();
        file.sync_all().unwrap();
        assert_eq!(file.len().unwrap(), 105);
        let mut buf = [0xffu8; 10];
        file.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"hello");
        // beyond end of file is zero-filled.
        assert!(buf[5..].iter().all(|b| *b == 0));
        drop(file);

        let file = DiskFile::open(&path).unwrap();
        file.set_len(4096).unwrap();
        assert_eq!(file.len().unwrap(), 4096);
        let mut buf = [0u8; 5];
        file.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
