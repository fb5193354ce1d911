use crate::buffer::page::Lsn;
use crate::log::block::LOG_BLOCK_SIZE;
use std::ptr::NonNull;

/// Ring buffer of log blocks, addressed by LSN.
///
/// Concurrent writers copy into disjoint ranges reserved by them, so the
/// buffer hands out raw slices instead of going through a lock. Callers
/// are responsible for staying inside their own reservation.
pub struct LogBuffer {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    #[inline]
    pub fn new(size: usize) -> Self {
        assert!(size >= LOG_BLOCK_SIZE * 4 && size % LOG_BLOCK_SIZE == 0);
        let data = vec![0u8; size].into_boxed_slice();
        let ptr = Box::into_raw(data) as *mut u8;
        LogBuffer {
            // boxed slice of positive length is never null.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            size,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn pos(&self, lsn: Lsn) -> usize {
        (lsn % self.size as Lsn) as usize
    }

    /// Returns mutable bytes at `lsn`. The range must not wrap around.
    ///
    /// # Safety
    ///
    /// Caller must have exclusive access to the range.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn bytes_mut(&self, lsn: Lsn, len: usize) -> &mut [u8] {
        let pos = self.pos(lsn);
        assert!(pos + len <= self.size, "log buffer range wraps around");
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(pos), len)
    }

    /// Returns bytes at `lsn`. The range must not wrap around.
    ///
    /// # Safety
    ///
    /// No one should write the range concurrently.
    #[inline]
    pub unsafe fn bytes(&self, lsn: Lsn, len: usize) -> &[u8] {
        let pos = self.pos(lsn);
        assert!(pos + len <= self.size, "log buffer range wraps around");
        std::slice::from_raw_parts(self.ptr.as_ptr().add(pos), len)
    }

    /// Copy out bytes starting at `lsn`, handling wrap around.
    ///
    /// # Safety
    ///
    /// No one should write the range concurrently.
    #[inline]
    pub unsafe fn copy_out(&self, lsn: Lsn, dst: &mut [u8]) {
        let pos = self.pos(lsn);
        let first = dst.len().min(self.size - pos);
        dst[..first].copy_from_slice(self.bytes(lsn, first));
        if first < dst.len() {
            let rest = dst.len() - first;
            dst[first..].copy_from_slice(self.bytes(lsn + first as Lsn, rest));
        }
    }
}

impl Drop for LogBuffer {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.size);
            drop(Box::from_raw(slice));
        }
    }
}
