use crate::buffer::frame::{BufferFrame, FrameId};
use crate::buffer::page::{page_lsn, Lsn, Page, PageId};
use crate::buffer::BufferPool;
use parking_lot::lock_api::RawRwLock;
use std::ops::{Deref, DerefMut};

/// PageFix is a pinned page in buffer pool.
/// The frame can not be evicted until the fix is dropped.
/// Page content is accessed through latch guards.
pub struct PageFix<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
    page_id: PageId,
}

impl<'a> PageFix<'a> {
    /// Caller must have incremented fix count of the frame.
    #[inline]
    pub(crate) fn new(pool: &'a BufferPool, frame_id: FrameId, page_id: PageId) -> Self {
        PageFix {
            pool,
            frame_id,
            page_id,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    #[inline]
    pub fn pool(&self) -> &'a BufferPool {
        self.pool
    }

    #[inline]
    pub fn frame(&self) -> &'a BufferFrame {
        self.pool.frame(self.frame_id)
    }

    /// Acquire shared latch on page content.
    #[inline]
    pub fn read(&self) -> PageReadGuard<'_> {
        let frame = self.frame();
        frame.latch.lock_shared();
        PageReadGuard { frame }
    }

    /// Acquire exclusive latch on page content.
    #[inline]
    pub fn write(&self) -> PageWriteGuard<'_> {
        let frame = self.frame();
        frame.latch.lock_exclusive();
        PageWriteGuard { frame }
    }

    #[inline]
    pub fn try_write(&self) -> Option<PageWriteGuard<'_>> {
        let frame = self.frame();
        if frame.latch.try_lock_exclusive() {
            Some(PageWriteGuard { frame })
        } else {
            None
        }
    }

    /// Returns newest modification LSN in descriptor.
    #[inline]
    pub fn newest_modification(&self) -> Lsn {
        self.frame().meta.lock().newest_modification
    }

    /// Returns oldest modification LSN in descriptor, zero if clean.
    #[inline]
    pub fn oldest_modification(&self) -> Lsn {
        self.frame().meta.lock().oldest_modification
    }
}

impl Drop for PageFix<'_> {
    #[inline]
    fn drop(&mut self) {
        self.frame().unfix();
    }
}

pub struct PageReadGuard<'a> {
    frame: &'a BufferFrame,
}

impl PageReadGuard<'_> {
    #[inline]
    pub fn page_lsn(&self) -> Lsn {
        page_lsn(&self[..])
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;
    #[inline]
    fn deref(&self) -> &Page {
        unsafe { self.frame.page() }
    }
}

impl Drop for PageReadGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.frame.latch.unlock_shared() }
    }
}

pub struct PageWriteGuard<'a> {
    frame: &'a BufferFrame,
}

impl PageWriteGuard<'_> {
    #[inline]
    pub fn page_lsn(&self) -> Lsn {
        page_lsn(&self[..])
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;
    #[inline]
    fn deref(&self) -> &Page {
        unsafe { self.frame.page() }
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        unsafe { self.frame.page_mut() }
    }
}

impl Drop for PageWriteGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.frame.latch.unlock_exclusive() }
    }
}
