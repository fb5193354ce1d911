use crate::buffer::frame::{FrameState, IoFix};
use crate::buffer::guard::PageFix;
use crate::buffer::page::{stamp_page_checksum, Lsn, PageId, PAGE_SIZE};
use crate::buffer::{BufferPool, FetchMode};
use crate::error::{Error, Result};
use std::sync::atomic::Ordering;

/// Number of flush list entries collected per round of batch flush.
const FLUSH_BATCH_CHUNK: usize = 64;

impl BufferPool {
    /// Write a cached dirty page back to its tablespace.
    /// Returns false if the page is not cached, clean, or already
    /// being written by another thread.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        match self.get_if_in_pool(page_id, FetchMode::Peek) {
            Some(fix) => self.flush_fixed(&fix),
            None => Ok(false),
        }
    }

    /// Write back a pinned page.
    ///
    /// Shared page latch is held during the whole write, so no one can
    /// modify the page between copying its content and marking it clean.
    pub(crate) fn flush_fixed(&self, fix: &PageFix<'_>) -> Result<bool> {
        let frame = fix.frame();
        let page = fix.read();
        let (newest, prev_io_fix) = {
            let mut meta = frame.meta.lock();
            if !meta.is_dirty() {
                return Ok(false);
            }
            let prev_io_fix = meta.io_fix;
            match prev_io_fix {
                IoFix::None | IoFix::Pin => meta.io_fix = IoFix::Write,
                IoFix::Read | IoFix::Write => return Ok(false),
            }
            (meta.newest_modification, prev_io_fix)
        };
        // Redo must be durable before the page reaches disk.
        let res = self.redo.write_up_to(newest).and_then(|_| {
            debug_assert!(self.redo.flushed_lsn() >= newest);
            let mut buf = vec![0u8; PAGE_SIZE];
            buf.copy_from_slice(&page[..]);
            stamp_page_checksum(&mut buf);
            self.spaces.write_page(fix.page_id(), &buf)
        });
        let mut meta = frame.meta.lock();
        meta.io_fix = prev_io_fix;
        match res {
            Ok(()) => {
                meta.oldest_modification = 0;
                self.flush_list.lock().remove(fix.frame_id());
                drop(meta);
                drop(page);
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                log::trace!("page {:?} flushed at lsn {}", fix.page_id(), newest);
                Ok(true)
            }
            Err(Error::SpaceDeleted(space)) => {
                // page of a dropped space is discarded instead of written.
                if meta.is_dirty() {
                    meta.oldest_modification = 0;
                    self.flush_list.lock().remove(fix.frame_id());
                }
                log::debug!("discard dirty page {:?} of dropped space {}", fix.page_id(), space);
                Ok(false)
            }
            Err(e) => {
                log::warn!("write page {:?} failed: {}", fix.page_id(), e);
                Err(e)
            }
        }
    }

    /// Flush dirty pages from flush list tail whose oldest modification
    /// is below `lsn_limit`, at most `max_pages` pages.
    /// Returns number of pages written.
    pub fn flush_list_batch(&self, lsn_limit: Lsn, max_pages: usize) -> Result<usize> {
        let mut n_flushed = 0;
        while n_flushed < max_pages {
            let candidates: Vec<_> = {
                let flush_list = self.flush_list.lock();
                flush_list
                    .iter_oldest()
                    .take_while(|(_, lsn)| *lsn < lsn_limit)
                    .take(FLUSH_BATCH_CHUNK.min(max_pages - n_flushed))
                    .map(|(fid, _)| fid)
                    .collect()
            };
            if candidates.is_empty() {
                break;
            }
            let mut progress = false;
            for fid in candidates {
                let page_id = {
                    let meta = self.frame(fid).meta.lock();
                    if meta.state != FrameState::FilePage || !meta.is_dirty() {
                        continue;
                    }
                    meta.page_id
                };
                let Some(fix) = self.get_if_in_pool(page_id, FetchMode::Peek) else {
                    continue;
                };
                if fix.frame_id() != fid {
                    continue;
                }
                if self.flush_fixed(&fix)? {
                    n_flushed += 1;
                    progress = true;
                } else if !fix.frame().meta.lock().is_dirty() {
                    // discarded or flushed by others.
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        if n_flushed > 0 {
            log::debug!(
                "flushed {} pages with oldest modification below {}",
                n_flushed,
                lsn_limit
            );
        }
        Ok(n_flushed)
    }

    /// Flush all dirty pages.
    #[inline]
    pub fn flush_all(&self) -> Result<usize> {
        self.flush_list_batch(Lsn::MAX, usize::MAX)
    }
}
