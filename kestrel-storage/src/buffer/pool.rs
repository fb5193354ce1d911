use crate::buffer::flush_list::FlushList;
use crate::buffer::frame::{BufferFrame, FrameId, FrameMeta, FrameState, IoFix};
use crate::buffer::guard::PageFix;
use crate::buffer::hash::PageHash;
use crate::buffer::list::IndexList;
use crate::buffer::lru::LruList;
use crate::buffer::page::{init_page, set_page_lsn, verify_page, Lsn, Page, PageId, PAGE_SIZE};
use crate::buffer::RedoDurability;
use crate::error::{Error, Result};
use crate::io::Tablespaces;
use byte_unit::Byte;
use crossbeam_utils::CachePadded;
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval to re-check a pending read issued by another thread.
const IO_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Whether a fetch counts as access for LRU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Regular access, may promote page to young sublist.
    Normal,
    /// Access without touching LRU state, e.g. by flushing or validation.
    Peek,
}

pub(crate) enum Lookup<'a> {
    Hit(PageFix<'a>),
    ReadPending(FrameId),
    Miss,
}

/// BufferPool caches tablespace pages in a fixed number of frames.
///
/// Latch order, outer to inner:
/// page hash partition, page latch, frame mutex, LRU list, flush list.
/// Free list and flush-order mutex are leaves and never wait for others
/// while held, except that flush-order is held across redo reservation.
pub struct BufferPool {
    frames: Box<[BufferFrame]>,
    pub(crate) page_hash: PageHash,
    pub(crate) free: CachePadded<Mutex<IndexList>>,
    pub(crate) lru: CachePadded<Mutex<LruList>>,
    pub(crate) flush_list: CachePadded<Mutex<FlushList>>,
    flush_order: CachePadded<Mutex<()>>,
    pub(crate) spaces: Arc<dyn Tablespaces>,
    pub(crate) redo: Arc<dyn RedoDurability>,
    old_threshold: Duration,
    pub(crate) scan_depth: usize,
    pub(crate) retry_limit: Option<usize>,
    pub(crate) warn_threshold: usize,
    pub(crate) stats: PoolCounters,
}

impl BufferPool {
    /// Create a buffer pool with all frames in free list.
    pub fn new(
        config: &BufferPoolConfig,
        spaces: Arc<dyn Tablespaces>,
        redo: Arc<dyn RedoDurability>,
    ) -> Result<Self> {
        config.validate()?;
        let n_frames = config.n_frames();
        let frames = (0..n_frames)
            .map(|_| BufferFrame::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let mut free = IndexList::new(n_frames);
        for fid in 0..n_frames {
            free.push_back(fid);
        }
        log::info!(
            "buffer pool initialized with {} frames, {} hash partitions",
            n_frames,
            config.hash_partitions
        );
        Ok(BufferPool {
            frames,
            page_hash: PageHash::new(config.hash_partitions),
            free: CachePadded::new(Mutex::new(free)),
            lru: CachePadded::new(Mutex::new(LruList::new(n_frames, config.lru_old_pct))),
            flush_list: CachePadded::new(Mutex::new(FlushList::new(n_frames))),
            flush_order: CachePadded::new(Mutex::new(())),
            spaces,
            redo,
            old_threshold: Duration::from_millis(config.lru_old_threshold_ms),
            scan_depth: config.lru_scan_depth,
            retry_limit: config.free_frame_retry_limit,
            warn_threshold: config.free_frame_warn_threshold,
            stats: PoolCounters::default(),
        })
    }

    /// Number of frames.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn spaces(&self) -> &Arc<dyn Tablespaces> {
        &self.spaces
    }

    #[inline]
    pub(crate) fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.frames[frame_id]
    }

    /// Lock serializing dirty-page stamping so flush list stays
    /// sorted by oldest modification.
    #[inline]
    pub fn flush_order(&self) -> MutexGuard<'_, ()> {
        self.flush_order.lock()
    }

    /// Returns a pinned page, reading it from tablespace on miss.
    pub fn fetch(&self, page_id: PageId, mode: FetchMode) -> Result<PageFix<'_>> {
        loop {
            match self.lookup(page_id, mode) {
                Lookup::Hit(fix) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(fix);
                }
                Lookup::ReadPending(fid) => self.wait_for_read(fid, page_id),
                Lookup::Miss => {
                    if let Some(fix) = self.read_page(page_id)? {
                        return Ok(fix);
                    }
                    // another thread loaded the page concurrently, retry.
                }
            }
        }
    }

    /// Returns a pinned page only if it is cached and readable.
    pub fn get_if_in_pool(&self, page_id: PageId, mode: FetchMode) -> Option<PageFix<'_>> {
        loop {
            match self.lookup(page_id, mode) {
                Lookup::Hit(fix) => return Some(fix),
                Lookup::ReadPending(fid) => self.wait_for_read(fid, page_id),
                Lookup::Miss => return None,
            }
        }
    }

    /// Create a new page without reading it from tablespace.
    ///
    /// The tablespace is extended if page number is beyond its size.
    /// If the page is already cached, the cached frame is returned
    /// and the caller is responsible to re-initialize its content
    /// under exclusive latch.
    pub fn create(&self, page_id: PageId) -> Result<PageFix<'_>> {
        if !self.spaces.exists(page_id.space) {
            return Err(Error::SpaceDeleted(page_id.space));
        }
        loop {
            match self.lookup(page_id, FetchMode::Normal) {
                Lookup::Hit(fix) => return Ok(fix),
                Lookup::ReadPending(fid) => {
                    self.wait_for_read(fid, page_id);
                    continue;
                }
                Lookup::Miss => (),
            }
            let n_pages = self.spaces.size_in_pages(page_id.space)?;
            if page_id.page_no >= n_pages {
                self.spaces.extend(page_id.space, page_id.page_no + 1)?;
            }
            let fid = self.get_free_frame()?;
            let frame = &self.frames[fid];
            let mut part = self.page_hash.write(page_id);
            if part.contains_key(&page_id) {
                drop(part);
                self.return_free_frame(fid);
                continue;
            }
            let mut meta = frame.meta.lock();
            debug_assert_eq!(meta.state, FrameState::ReadyForUse);
            meta.state = FrameState::FilePage;
            meta.page_id = page_id;
            meta.in_page_hash = true;
            meta.access_time = Some(Instant::now());
            frame.fix();
            // frame is not reachable by others until it is in page hash.
            unsafe {
                init_page(frame.page_mut(), page_id);
            }
            part.insert(page_id, fid);
            drop(meta);
            self.lru.lock().add(fid, false);
            drop(part);
            self.stats.created.fetch_add(1, Ordering::Relaxed);
            return Ok(PageFix::new(self, fid, page_id));
        }
    }

    /// Mark the page as sticky, so it is never chosen as eviction victim.
    #[inline]
    pub fn set_sticky(&self, fix: &PageFix<'_>, sticky: bool) {
        let mut meta = fix.frame().meta.lock();
        match (meta.io_fix, sticky) {
            (IoFix::None, true) => meta.io_fix = IoFix::Pin,
            (IoFix::Pin, false) => meta.io_fix = IoFix::None,
            (IoFix::Pin, true) | (IoFix::None, false) => (),
            (io_fix, _) => panic!("change sticky flag of page with pending IO {:?}", io_fix),
        }
    }

    /// Record a modification of an exclusively latched page.
    /// Caller must hold flush-order lock, so newly dirtied pages enter
    /// flush list in order of `start_lsn`.
    pub(crate) fn note_modification(&self, fix: &PageFix<'_>, start_lsn: Lsn, end_lsn: Lsn) {
        debug_assert!(start_lsn <= end_lsn);
        let frame = fix.frame();
        debug_assert!(frame.latch.is_locked_exclusive());
        unsafe {
            set_page_lsn(frame.page_mut(), end_lsn);
        }
        let mut meta = frame.meta.lock();
        meta.newest_modification = end_lsn;
        if meta.oldest_modification == 0 {
            meta.oldest_modification = start_lsn;
            self.flush_list.lock().insert_front(fix.frame_id(), start_lsn);
        }
    }

    /// Record a modification applied by recovery.
    /// Pages may be stamped out of LSN order, so insertion is sorted.
    pub fn recv_note_modification(&self, fix: &PageFix<'_>, start_lsn: Lsn, end_lsn: Lsn) {
        debug_assert!(start_lsn <= end_lsn);
        let frame = fix.frame();
        debug_assert!(frame.latch.is_locked_exclusive());
        unsafe {
            set_page_lsn(frame.page_mut(), end_lsn);
        }
        let mut meta = frame.meta.lock();
        if meta.newest_modification < end_lsn {
            meta.newest_modification = end_lsn;
        }
        if meta.oldest_modification == 0 {
            meta.oldest_modification = start_lsn;
            self.flush_list.lock().insert_sorted(fix.frame_id(), start_lsn);
        }
    }

    /// Minimum oldest modification of all dirty pages.
    #[inline]
    pub fn min_oldest_modification(&self) -> Option<Lsn> {
        self.flush_list.lock().min_lsn()
    }

    /// Allocate a frame as scratch memory, not backed by tablespace.
    pub fn alloc_memory_block(&self) -> Result<MemoryBlock<'_>> {
        let fid = self.get_free_frame()?;
        self.frames[fid].meta.lock().state = FrameState::Memory;
        Ok(MemoryBlock {
            pool: self,
            frame_id: fid,
        })
    }

    #[inline]
    pub fn stats(&self) -> BufferPoolStats {
        let free = self.free.lock().len();
        let (lru_len, old_len) = {
            let lru = self.lru.lock();
            (lru.len(), lru.old_len())
        };
        let dirty = self.flush_list.lock().len();
        BufferPoolStats {
            capacity: self.frames.len(),
            free,
            lru_len,
            old_len,
            dirty,
            hits: self.stats.hits.load(Ordering::Relaxed),
            reads: self.stats.reads.load(Ordering::Relaxed),
            created: self.stats.created.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            young_moves: self.stats.young_moves.load(Ordering::Relaxed),
            free_waits: self.stats.free_waits.load(Ordering::Relaxed),
        }
    }

    /// Check consistency of frames, page hash and lists.
    /// Panics on violation. Only meaningful when pool is quiescent.
    pub fn validate(&self) {
        let metas: Vec<FrameMeta> = self.frames.iter().map(|f| f.meta.lock().clone()).collect();
        let hash: HashMap<PageId, FrameId> = self.page_hash.entries().into_iter().collect();
        let free = self.free.lock();
        let lru = self.lru.lock();
        let flush_list = self.flush_list.lock();
        assert!(lru.validate(), "LRU old sublist inconsistent");
        assert!(flush_list.validate(), "flush list not sorted");
        let mut n_file_pages = 0;
        for (fid, meta) in metas.iter().enumerate() {
            match meta.state {
                FrameState::NotUsed => {
                    assert!(free.contains(fid), "unused frame {} not in free list", fid);
                    assert!(!lru.contains(fid), "unused frame {} in LRU", fid);
                }
                FrameState::FilePage => {
                    n_file_pages += 1;
                    assert!(!free.contains(fid), "frame {} in use and free", fid);
                    assert!(lru.contains(fid), "frame {} not in LRU", fid);
                    assert!(meta.in_page_hash);
                    assert_eq!(hash.get(&meta.page_id), Some(&fid));
                }
                _ => {
                    assert!(!free.contains(fid));
                    assert!(!lru.contains(fid));
                }
            }
            if meta.is_dirty() {
                assert_eq!(meta.state, FrameState::FilePage);
                assert!(flush_list.contains(fid), "dirty frame {} not in flush list", fid);
                assert_eq!(flush_list.oldest_of(fid), meta.oldest_modification);
                assert!(meta.oldest_modification <= meta.newest_modification);
            } else {
                assert!(!flush_list.contains(fid), "clean frame {} in flush list", fid);
            }
        }
        assert_eq!(hash.len(), n_file_pages);
        assert_eq!(lru.len(), n_file_pages);
    }

    pub(crate) fn lookup(&self, page_id: PageId, mode: FetchMode) -> Lookup<'_> {
        let part = self.page_hash.read(page_id);
        let Some(&fid) = part.get(&page_id) else {
            return Lookup::Miss;
        };
        let frame = &self.frames[fid];
        let mut meta = frame.meta.lock();
        debug_assert_eq!(meta.page_id, page_id);
        if meta.io_fix == IoFix::Read {
            return Lookup::ReadPending(fid);
        }
        // page hash partition in shared mode blocks eviction.
        frame.fix();
        drop(part);
        if mode == FetchMode::Normal {
            self.touch(fid, &mut meta);
        }
        Lookup::Hit(PageFix::new(self, fid, page_id))
    }

    #[inline]
    fn touch(&self, fid: FrameId, meta: &mut FrameMeta) {
        match meta.access_time {
            None => meta.access_time = Some(Instant::now()),
            Some(first) => {
                if first.elapsed() >= self.old_threshold {
                    let mut lru = self.lru.lock();
                    if lru.is_old(fid) {
                        lru.make_young(fid);
                        self.stats.young_moves.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    #[inline]
    fn wait_for_read(&self, fid: FrameId, page_id: PageId) {
        let frame = &self.frames[fid];
        frame.io_done.wait_until(IO_WAIT_INTERVAL, || {
            let meta = frame.meta.lock();
            meta.io_fix != IoFix::Read || meta.page_id != page_id
        });
    }

    /// Read a page into a free frame.
    /// Returns None if the page was loaded by another thread meanwhile.
    fn read_page(&self, page_id: PageId) -> Result<Option<PageFix<'_>>> {
        if !self.spaces.exists(page_id.space) {
            return Err(Error::SpaceDeleted(page_id.space));
        }
        let fid = self.get_free_frame()?;
        let frame = &self.frames[fid];
        {
            let mut part = self.page_hash.write(page_id);
            if part.contains_key(&page_id) {
                drop(part);
                self.return_free_frame(fid);
                return Ok(None);
            }
            let mut meta = frame.meta.lock();
            debug_assert_eq!(meta.state, FrameState::ReadyForUse);
            meta.state = FrameState::FilePage;
            meta.page_id = page_id;
            meta.io_fix = IoFix::Read;
            meta.in_page_hash = true;
            frame.fix();
            part.insert(page_id, fid);
            drop(meta);
            self.lru.lock().add(fid, true);
        }
        // Pending read blocks all other access to the frame.
        let res = self.load_page(page_id, unsafe { frame.page_mut() });
        match res {
            Ok(()) => {
                frame.meta.lock().io_fix = IoFix::None;
                frame.io_done.notify_all();
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
                Ok(Some(PageFix::new(self, fid, page_id)))
            }
            Err(e) => {
                log::warn!("read page {:?} failed: {}", page_id, e);
                self.unwind_read(fid, page_id);
                Err(e)
            }
        }
    }

    fn load_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        let n_pages = self.spaces.size_in_pages(page_id.space)?;
        if page_id.page_no >= n_pages {
            self.spaces.extend(page_id.space, page_id.page_no + 1)?;
            page.fill(0);
            return Ok(());
        }
        self.spaces.read_page(page_id, page)?;
        verify_page(page, page_id)
    }

    /// Undo binding of a frame whose read failed.
    fn unwind_read(&self, fid: FrameId, page_id: PageId) {
        let frame = &self.frames[fid];
        {
            let mut part = self.page_hash.write(page_id);
            part.remove(&page_id);
            let mut meta = frame.meta.lock();
            frame.unfix();
            debug_assert_eq!(frame.fix_count(), 0);
            BufferFrame::reset_meta(&mut meta, FrameState::NotUsed);
            self.lru.lock().remove(fid);
        }
        self.free.lock().push_back(fid);
        frame.io_done.notify_all();
    }

    /// Return a frame claimed from free list but not bound to any page.
    #[inline]
    pub(crate) fn return_free_frame(&self, fid: FrameId) {
        let frame = &self.frames[fid];
        BufferFrame::reset_meta(&mut frame.meta.lock(), FrameState::NotUsed);
        self.free.lock().push_back(fid);
    }
}

/// A frame used as scratch memory, returned to free list on drop.
pub struct MemoryBlock<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
}

impl Deref for MemoryBlock<'_> {
    type Target = Page;
    #[inline]
    fn deref(&self) -> &Page {
        // block is owned exclusively.
        unsafe { self.pool.frame(self.frame_id).page() }
    }
}

impl DerefMut for MemoryBlock<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        unsafe { self.pool.frame(self.frame_id).page_mut() }
    }
}

impl Drop for MemoryBlock<'_> {
    #[inline]
    fn drop(&mut self) {
        self.pool.return_free_frame(self.frame_id);
    }
}

#[derive(Default)]
pub(crate) struct PoolCounters {
    pub(crate) hits: AtomicUsize,
    pub(crate) reads: AtomicUsize,
    pub(crate) created: AtomicUsize,
    pub(crate) writes: AtomicUsize,
    pub(crate) evictions: AtomicUsize,
    pub(crate) young_moves: AtomicUsize,
    pub(crate) free_waits: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    pub capacity: usize,
    pub free: usize,
    pub lru_len: usize,
    pub old_len: usize,
    pub dirty: usize,
    pub hits: usize,
    pub reads: usize,
    pub created: usize,
    pub writes: usize,
    pub evictions: usize,
    pub young_moves: usize,
    pub free_waits: usize,
}

impl BufferPoolStats {
    /// Ratio of fetches served without IO.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.reads;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

pub const MIN_POOL_FRAMES: usize = 4;
const DEFAULT_POOL_SIZE: Byte = Byte::from_u64(128 * 1024 * 1024); // 8192 frames
const DEFAULT_HASH_PARTITIONS: usize = 16;
const DEFAULT_LRU_OLD_PCT: usize = 37;
const DEFAULT_LRU_OLD_THRESHOLD_MS: u64 = 1000;
const DEFAULT_LRU_SCAN_DEPTH: usize = 1024;
const DEFAULT_FREE_FRAME_WARN_THRESHOLD: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    // Total memory of page frames.
    pub pool_size: Byte,
    // Number of page hash partitions, rounded up to power of two.
    pub hash_partitions: usize,
    // Percentage of LRU list kept as old sublist.
    pub lru_old_pct: usize,
    // A page in old sublist is made young only if accessed again
    // after this period since its first access.
    pub lru_old_threshold_ms: u64,
    // How many frames at LRU tail are scanned in first attempt
    // of finding a victim.
    pub lru_scan_depth: usize,
    // Give up finding a free frame after this many attempts.
    // None means retry forever.
    pub free_frame_retry_limit: Option<usize>,
    // Warn after this many failed attempts of finding a free frame.
    pub free_frame_warn_threshold: usize,
}

impl Default for BufferPoolConfig {
    #[inline]
    fn default() -> Self {
        BufferPoolConfig {
            pool_size: DEFAULT_POOL_SIZE,
            hash_partitions: DEFAULT_HASH_PARTITIONS,
            lru_old_pct: DEFAULT_LRU_OLD_PCT,
            lru_old_threshold_ms: DEFAULT_LRU_OLD_THRESHOLD_MS,
            lru_scan_depth: DEFAULT_LRU_SCAN_DEPTH,
            free_frame_retry_limit: None,
            free_frame_warn_threshold: DEFAULT_FREE_FRAME_WARN_THRESHOLD,
        }
    }
}

impl BufferPoolConfig {
    #[inline]
    pub fn pool_size<T>(mut self, pool_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.pool_size = Byte::from(pool_size);
        self
    }

    /// Set pool size in number of frames.
    #[inline]
    pub fn frames(mut self, n_frames: usize) -> Self {
        self.pool_size = Byte::from_u64((n_frames * PAGE_SIZE) as u64);
        self
    }

    #[inline]
    pub fn hash_partitions(mut self, hash_partitions: usize) -> Self {
        self.hash_partitions = hash_partitions;
        self
    }

    #[inline]
    pub fn lru_old_pct(mut self, lru_old_pct: usize) -> Self {
        self.lru_old_pct = lru_old_pct;
        self
    }

    #[inline]
    pub fn lru_old_threshold_ms(mut self, lru_old_threshold_ms: u64) -> Self {
        self.lru_old_threshold_ms = lru_old_threshold_ms;
        self
    }

    #[inline]
    pub fn lru_scan_depth(mut self, lru_scan_depth: usize) -> Self {
        self.lru_scan_depth = lru_scan_depth;
        self
    }

    #[inline]
    pub fn free_frame_retry_limit(mut self, limit: Option<usize>) -> Self {
        self.free_frame_retry_limit = limit;
        self
    }

    #[inline]
    pub fn free_frame_warn_threshold(mut self, threshold: usize) -> Self {
        self.free_frame_warn_threshold = threshold;
        self
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.pool_size.as_u64() as usize / PAGE_SIZE
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_frames() < MIN_POOL_FRAMES {
            return Err(Error::BufferPoolSizeTooSmall);
        }
        if self.hash_partitions == 0 {
            return Err(Error::InvalidConfig("hash_partitions must be positive"));
        }
        if !(5..=95).contains(&self.lru_old_pct) {
            return Err(Error::InvalidConfig("lru_old_pct must be within [5, 95]"));
        }
        if self.lru_scan_depth == 0 {
            return Err(Error::InvalidConfig("lru_scan_depth must be positive"));
        }
        if self.free_frame_retry_limit == Some(0) {
            return Err(Error::InvalidConfig("free_frame_retry_limit must be positive"));
        }
        if self.free_frame_warn_threshold == 0 {
            return Err(Error::InvalidConfig(
                "free_frame_warn_threshold must be positive",
            ));
        }
        Ok(())
    }
}
