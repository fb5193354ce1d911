use crate::buffer::frame::{BufferFrame, FrameId, FrameState, IoFix};
use crate::buffer::page::{PageId, SpaceId};
use crate::buffer::{BufferPool, FetchMode};
use crate::error::{Error, Result};
use std::sync::atomic::Ordering;
use std::time::Duration;

const MIN_BACKOFF: Duration = Duration::from_micros(100);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) enum FreeResult {
    Freed,
    Dirty(PageId),
    Busy,
}

impl BufferPool {
    /// Get a frame for a new page.
    ///
    /// Free list is tried first. Otherwise LRU tail is scanned for a
    /// clean unpinned victim, and dirty victims are flushed on the way.
    /// If nothing can be freed, sleep with exponential backoff and retry.
    pub(crate) fn get_free_frame(&self) -> Result<FrameId> {
        let mut n_attempts = 0usize;
        let mut backoff = MIN_BACKOFF;
        loop {
            if let Some(fid) = self.free.lock().pop_front() {
                self.claim_frame(fid);
                return Ok(fid);
            }
            // Scan limited depth in first attempt, then whole list.
            let depth = if n_attempts == 0 {
                self.scan_depth
            } else {
                usize::MAX
            };
            if let Some(fid) = self.scan_lru_for_victim(depth) {
                self.claim_frame(fid);
                return Ok(fid);
            }
            n_attempts += 1;
            self.stats.free_waits.fetch_add(1, Ordering::Relaxed);
            if let Some(limit) = self.retry_limit {
                if n_attempts >= limit {
                    log::error!(
                        "no free frame after {} attempts, all {} frames are in use",
                        n_attempts,
                        self.capacity()
                    );
                    return Err(Error::BufferPoolExhausted(n_attempts));
                }
            }
            if n_attempts % self.warn_threshold == 0 {
                log::warn!(
                    "difficult to find free frame after {} attempts, consider increasing pool size",
                    n_attempts
                );
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    #[inline]
    fn claim_frame(&self, fid: FrameId) {
        let frame = self.frame(fid);
        debug_assert_eq!(frame.fix_count(), 0);
        frame.meta.lock().state = FrameState::ReadyForUse;
    }

    /// Scan LRU from tail and free the first possible victim.
    /// The freed frame is not put back to free list.
    fn scan_lru_for_victim(&self, depth: usize) -> Option<FrameId> {
        let candidates: Vec<FrameId> = {
            let lru = self.lru.lock();
            lru.iter_rev()
                .take(depth)
                .filter(|fid| self.frame(*fid).fix_count() == 0)
                .collect()
        };
        for fid in candidates {
            match self.try_free(fid) {
                FreeResult::Freed => return Some(fid),
                FreeResult::Dirty(page_id) => {
                    if let Err(e) = self.flush_page(page_id) {
                        log::warn!("flush victim page {:?} failed: {}", page_id, e);
                        continue;
                    }
                    if let FreeResult::Freed = self.try_free(fid) {
                        return Some(fid);
                    }
                }
                FreeResult::Busy => (),
            }
        }
        None
    }

    /// Try to detach a clean, unfixed frame from its page.
    pub(crate) fn try_free(&self, fid: FrameId) -> FreeResult {
        let frame = self.frame(fid);
        let page_id = {
            let meta = frame.meta.lock();
            if meta.state != FrameState::FilePage {
                return FreeResult::Busy;
            }
            meta.page_id
        };
        // Exclusive partition latch prevents new fixes.
        let mut part = self.page_hash.write(page_id);
        if part.get(&page_id) != Some(&fid) || frame.fix_count() != 0 {
            return FreeResult::Busy;
        }
        let mut meta = frame.meta.lock();
        if meta.page_id != page_id || meta.state != FrameState::FilePage {
            return FreeResult::Busy;
        }
        if meta.io_fix != IoFix::None {
            return FreeResult::Busy;
        }
        if meta.is_dirty() {
            return FreeResult::Dirty(page_id);
        }
        meta.state = FrameState::RemoveHash;
        part.remove(&page_id);
        meta.in_page_hash = false;
        self.lru.lock().remove(fid);
        BufferFrame::reset_meta(&mut meta, FrameState::ReadyForUse);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        log::trace!("page {:?} evicted from frame {}", page_id, fid);
        FreeResult::Freed
    }

    /// Evict a page from the pool, flushing it first if dirty.
    /// Returns false if the page is not cached or is in use.
    pub fn evict_page(&self, page_id: PageId) -> Result<bool> {
        let fid = match self.get_if_in_pool(page_id, FetchMode::Peek) {
            Some(fix) => fix.frame_id(),
            None => return Ok(false),
        };
        let freed = match self.try_free(fid) {
            FreeResult::Freed => true,
            FreeResult::Dirty(page_id) => {
                self.flush_page(page_id)?;
                matches!(self.try_free(fid), FreeResult::Freed)
            }
            FreeResult::Busy => false,
        };
        if freed {
            self.return_free_frame(fid);
        }
        Ok(freed)
    }

    /// Remove cached pages of a dropped tablespace without writing them.
    ///
    /// Unfixed pages go back to free list. Pages still fixed by others
    /// are only made clean and leave the pool through normal eviction.
    /// Returns number of frames freed.
    pub fn discard_space(&self, space: SpaceId) -> usize {
        let mut n_freed = 0;
        for fid in 0..self.capacity() {
            let frame = self.frame(fid);
            let page_id = {
                let meta = frame.meta.lock();
                if meta.state != FrameState::FilePage || meta.page_id.space != space {
                    continue;
                }
                meta.page_id
            };
            let mut part = self.page_hash.write(page_id);
            if part.get(&page_id) != Some(&fid) {
                continue;
            }
            let mut meta = frame.meta.lock();
            if meta.page_id != page_id || meta.state != FrameState::FilePage {
                continue;
            }
            match meta.io_fix {
                // pending read fails on missing space, pending write
                // discards the page itself.
                IoFix::Read | IoFix::Write => continue,
                IoFix::None | IoFix::Pin => (),
            }
            if meta.is_dirty() {
                meta.oldest_modification = 0;
                self.flush_list.lock().remove(fid);
            }
            if frame.fix_count() != 0 {
                continue;
            }
            meta.state = FrameState::RemoveHash;
            part.remove(&page_id);
            meta.in_page_hash = false;
            self.lru.lock().remove(fid);
            BufferFrame::reset_meta(&mut meta, FrameState::ReadyForUse);
            drop(meta);
            drop(part);
            self.return_free_frame(fid);
            n_freed += 1;
        }
        log::debug!("discarded {} cached pages of space {}", n_freed, space);
        n_freed
    }
}
