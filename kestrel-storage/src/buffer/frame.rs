use crate::buffer::page::{Lsn, Page, PageId, PAGE_SIZE};
use crate::latch::RawRwLatch;
use crate::notify::Signal;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

const _: () = assert!(
    { std::mem::align_of::<BufferFrame>() % 64 == 0 },
    "Align of BufferFrame must be multiply of 64"
);

pub type FrameId = usize;

/// Lifecycle state of a buffer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// In free list, not holding any page.
    NotUsed,
    /// Taken from free list, about to be bound to a page.
    ReadyForUse,
    /// Holding a tablespace page, present in page hash and LRU list.
    FilePage,
    /// Used as scratch memory, not backed by any tablespace.
    Memory,
    /// Being removed from page hash during eviction.
    RemoveHash,
}

/// Pending IO or pin state which blocks eviction of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFix {
    None,
    /// Page is being read from disk. Content is not ready.
    Read,
    /// Page is being written to disk. Content can be read.
    Write,
    /// Page is pinned and can not be relocated.
    Pin,
}

/// Descriptor fields of a frame, protected by the frame mutex.
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub state: FrameState,
    pub page_id: PageId,
    pub io_fix: IoFix,
    pub in_page_hash: bool,
    /// First access time since the page was loaded.
    pub access_time: Option<Instant>,
    /// Start LSN of the first modification since last flush.
    /// Zero means the page is clean.
    pub oldest_modification: Lsn,
    /// End LSN of the latest modification.
    pub newest_modification: Lsn,
}

impl FrameMeta {
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.oldest_modification != 0
    }

    #[inline]
    fn reset(&mut self) {
        self.page_id = PageId::new(0, 0);
        self.io_fix = IoFix::None;
        self.in_page_hash = false;
        self.access_time = None;
        self.oldest_modification = 0;
        self.newest_modification = 0;
    }
}

impl Default for FrameMeta {
    #[inline]
    fn default() -> Self {
        FrameMeta {
            state: FrameState::NotUsed,
            page_id: PageId::new(0, 0),
            io_fix: IoFix::None,
            in_page_hash: false,
            access_time: None,
            oldest_modification: 0,
            newest_modification: 0,
        }
    }
}

/// BufferFrame holds one page and the metadata to manage it.
///
/// Content of the page is protected by `latch`. The descriptor fields
/// are protected by `meta`. The fix count is atomic so a pin can be
/// taken while holding only the page hash partition in shared mode.
#[repr(C, align(64))]
pub struct BufferFrame {
    pub latch: RawRwLatch,
    pub meta: Mutex<FrameMeta>,
    fix_count: AtomicU32,
    /// Notified when pending read completes.
    pub(crate) io_done: Signal,
    page: UnsafeCell<Box<Page>>,
}

unsafe impl Sync for BufferFrame {}
unsafe impl Send for BufferFrame {}

impl BufferFrame {
    #[inline]
    pub fn new() -> Self {
        BufferFrame {
            latch: RawRwLatch::new(),
            meta: Mutex::new(FrameMeta::default()),
            fix_count: AtomicU32::new(0),
            io_done: Signal::default(),
            page: UnsafeCell::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    #[inline]
    pub fn fix_count(&self) -> u32 {
        self.fix_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn fix(&self) {
        self.fix_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn unfix(&self) {
        let prev = self.fix_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unfix a frame which is not fixed");
    }

    /// Returns page content.
    ///
    /// # Safety
    ///
    /// Caller must hold page latch in any mode, or have exclusive access
    /// to the frame, e.g. during read IO.
    #[inline]
    pub unsafe fn page(&self) -> &Page {
        &*self.page.get()
    }

    /// Returns mutable page content.
    ///
    /// # Safety
    ///
    /// Caller must hold page latch in exclusive mode, or have exclusive
    /// access to the frame.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn page_mut(&self) -> &mut Page {
        &mut *self.page.get()
    }

    /// Reset descriptor to unused state.
    #[inline]
    pub(crate) fn reset_meta(meta: &mut FrameMeta, state: FrameState) {
        meta.reset();
        meta.state = state;
    }
}

impl Default for BufferFrame {
    #[inline]
    fn default() -> Self {
        BufferFrame::new()
    }
}
