use crate::io::FileIo;
use parking_lot::Mutex;
use std::io;

/// In-memory file which tracks what has been synced.
///
/// Bytes written but not synced are lost by `crash_image()`, which
/// makes it suitable to simulate a crash at any point.
#[derive(Default)]
pub struct MemFile {
    inner: Mutex<MemFileInner>,
}

#[derive(Default)]
struct MemFileInner {
    data: Vec<u8>,
    synced: Vec<u8>,
    fail_writes: bool,
    fail_syncs: bool,
    writes: Vec<(u64, usize)>,
}

impl MemFile {
    #[inline]
    pub fn new() -> Self {
        MemFile::default()
    }

    /// Create a file from an image, treated as already synced.
    #[inline]
    pub fn from_image(image: Vec<u8>) -> Self {
        MemFile {
            inner: Mutex::new(MemFileInner {
                data: image.clone(),
                synced: image,
                ..Default::default()
            }),
        }
    }

    /// Returns content which survives a crash, i.e. last synced state.
    #[inline]
    pub fn crash_image(&self) -> Vec<u8> {
        self.inner.lock().synced.clone()
    }

    /// Returns current content including unsynced writes.
    #[inline]
    pub fn image(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Make subsequent writes fail.
    #[inline]
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Make subsequent syncs fail.
    #[inline]
    pub fn set_fail_syncs(&self, fail: bool) {
        self.inner.lock().fail_syncs = fail;
    }

    /// Returns all writes as (offset, length) in issue order.
    #[inline]
    pub fn write_history(&self) -> Vec<(u64, usize)> {
        self.inner.lock().writes.clone()
    }
}

impl FileIo for MemFile {
    #[inline]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let g = self.inner.lock();
        let offset = offset as usize;
        buf.fill(0);
        if offset < g.data.len() {
            let end = (offset + buf.len()).min(g.data.len());
            buf[..end - offset].copy_from_slice(&g.data[offset..end]);
        }
        Ok(())
    }

    #[inline]
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut g = self.inner.lock();
        if g.fail_writes {
            return Err(io::Error::other("injected write failure"));
        }
        let offset = offset as usize;
        let end = offset + buf.len();
        if g.data.len() < end {
            g.data.resize(end, 0);
        }
        g.data[offset..end].copy_from_slice(buf);
        g.writes.push((offset as u64, buf.len()));
        Ok(())
    }

    #[inline]
    fn sync_all(&self) -> io::Result<()> {
        self.sync_data()
    }

    #[inline]
    fn sync_data(&self) -> io::Result<()> {
        let mut g = self.inner.lock();
        if g.fail_syncs {
            return Err(io::Error::other("injected sync failure"));
        }
        g.synced = g.data.clone();
        Ok(())
    }

    #[inline]
    fn len(&self) -> io::Result<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }

    #[inline]
    fn set_len(&self, len: u64) -> io::Result<()> {
        self.inner.lock().data.resize(len as usize, 0);
        Ok(())
    }
}
