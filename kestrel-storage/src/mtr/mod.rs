//! Mini-transaction.
//!
//! A mini-transaction bundles page latches and the redo records of the
//! modifications made under them. On commit, the records are copied
//! into log buffer and modified pages are stamped with the reserved LSN
//! range before any latch is released.
pub mod buf;
pub mod redo;

use crate::buffer::page::{init_page, Lsn, PageId, PAGE_DATA_END, PAGE_DATA_START};
use crate::buffer::{BufferPool, FetchMode, PageFix};
use crate::error::{Error, Result};
use crate::latch::{LatchMode, RwLatch};
use crate::log::LogSys;
use crate::mtr::redo::{
    encode_init_page, encode_multi_rec_end, encode_write, encode_write_string, SINGLE_REC_FLAG,
};
use parking_lot::lock_api::RawRwLock;
use smallvec::SmallVec;
use std::thread;

/// How modifications of a mini-transaction are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Log all modifications.
    #[default]
    All,
    /// Neither log nor dirty pages, e.g. for temporary pages.
    None,
    /// Dirty pages without logging. Pages are stamped with current LSN.
    NoRedo,
}

/// Handle of a page latched or fixed by a mini-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef(usize);

enum MemoSlot<'a> {
    /// Page fixed without latch.
    BufFix(PageFix<'a>),
    PageS(PageFix<'a>),
    PageX { fix: PageFix<'a>, modified: bool },
    SLock(&'a RwLatch<()>),
    XLock(&'a RwLatch<()>),
    Released,
}

impl MemoSlot<'_> {
    #[inline]
    fn page_id(&self) -> Option<PageId> {
        match self {
            MemoSlot::BufFix(fix) | MemoSlot::PageS(fix) | MemoSlot::PageX { fix, .. } => {
                Some(fix.page_id())
            }
            _ => None,
        }
    }

    /// Release latch and fix held by the slot.
    #[inline]
    fn release(&mut self) {
        match std::mem::replace(self, MemoSlot::Released) {
            MemoSlot::BufFix(fix) => drop(fix),
            MemoSlot::PageS(fix) => unsafe { fix.frame().latch.unlock_shared() },
            MemoSlot::PageX { fix, .. } => unsafe { fix.frame().latch.unlock_exclusive() },
            MemoSlot::SLock(latch) => unsafe { latch.force_unlock_read() },
            MemoSlot::XLock(latch) => unsafe { latch.force_unlock_write() },
            MemoSlot::Released => (),
        }
    }
}

pub struct Mtr<'a> {
    pool: &'a BufferPool,
    log: &'a LogSys,
    memo: SmallVec<[MemoSlot<'a>; 8]>,
    redo: Vec<u8>,
    n_recs: usize,
    log_mode: LogMode,
    // An exclusively latched page was clean when latched.
    made_dirty: bool,
    finished: bool,
}

impl<'a> Mtr<'a> {
    #[inline]
    pub fn start(pool: &'a BufferPool, log: &'a LogSys) -> Self {
        Mtr {
            pool,
            log,
            memo: SmallVec::new(),
            redo: log.mtr_bufs().get(),
            n_recs: 0,
            log_mode: LogMode::All,
            made_dirty: false,
            finished: false,
        }
    }

    /// Change log mode, returns previous one.
    #[inline]
    pub fn set_log_mode(&mut self, mode: LogMode) -> LogMode {
        std::mem::replace(&mut self.log_mode, mode)
    }

    #[inline]
    pub fn log_mode(&self) -> LogMode {
        self.log_mode
    }

    /// Number of redo records generated so far.
    #[inline]
    pub fn n_records(&self) -> usize {
        self.n_recs
    }

    /// Fetch a page and latch it in given mode.
    ///
    /// A page already latched by this mini-transaction is returned as
    /// is, if its latch covers the requested mode.
    pub fn get_page(&mut self, page_id: PageId, mode: LatchMode) -> Result<BlockRef> {
        if let Some(block) = self.find_latched(page_id, mode) {
            return Ok(block);
        }
        let fix = self.pool.fetch(page_id, FetchMode::Normal)?;
        Ok(self.latch_fixed(fix, mode))
    }

    /// Fix a page without latching its content.
    pub fn fix_page(&mut self, page_id: PageId) -> Result<BlockRef> {
        let fix = self.pool.fetch(page_id, FetchMode::Normal)?;
        self.memo.push(MemoSlot::BufFix(fix));
        Ok(BlockRef(self.memo.len() - 1))
    }

    /// Create a page, latch it exclusively and initialize its content.
    pub fn create_page(&mut self, page_id: PageId) -> Result<BlockRef> {
        let block = match self.find_latched(page_id, LatchMode::Exclusive) {
            Some(block) => block,
            None => {
                let fix = self.pool.create(page_id)?;
                self.latch_fixed(fix, LatchMode::Exclusive)
            }
        };
        if self.log_mode == LogMode::All {
            self.append_record(|buf| encode_init_page(buf, page_id))?;
        }
        let page = self.page_mut(block);
        init_page(page, page_id);
        Ok(block)
    }

    #[inline]
    fn find_latched(&self, page_id: PageId, mode: LatchMode) -> Option<BlockRef> {
        let idx = self.memo.iter().position(|slot| match slot {
            MemoSlot::PageX { fix, .. } => fix.page_id() == page_id,
            MemoSlot::PageS(fix) => fix.page_id() == page_id,
            _ => false,
        })?;
        if mode == LatchMode::Exclusive {
            assert!(
                matches!(self.memo[idx], MemoSlot::PageX { .. }),
                "upgrade shared latch of page {:?} in mini-transaction",
                page_id
            );
        }
        Some(BlockRef(idx))
    }

    #[inline]
    fn latch_fixed(&mut self, fix: PageFix<'a>, mode: LatchMode) -> BlockRef {
        let frame = fix.frame();
        let slot = match mode {
            LatchMode::Shared => {
                frame.latch.lock_shared();
                MemoSlot::PageS(fix)
            }
            LatchMode::Exclusive => {
                frame.latch.lock_exclusive();
                if fix.oldest_modification() == 0 {
                    self.made_dirty = true;
                }
                MemoSlot::PageX {
                    fix,
                    modified: false,
                }
            }
        };
        self.memo.push(slot);
        BlockRef(self.memo.len() - 1)
    }

    /// Acquire auxiliary latch in shared mode until commit.
    #[inline]
    pub fn s_lock(&mut self, latch: &'a RwLatch<()>) {
        std::mem::forget(latch.read());
        self.memo.push(MemoSlot::SLock(latch));
    }

    /// Acquire auxiliary latch in exclusive mode until commit.
    #[inline]
    pub fn x_lock(&mut self, latch: &'a RwLatch<()>) {
        std::mem::forget(latch.write());
        self.memo.push(MemoSlot::XLock(latch));
    }

    /// Returns whether the page is held by this mini-transaction in
    /// given mode, or in exclusive mode if shared mode is asked.
    #[inline]
    pub fn memo_contains(&self, page_id: PageId, mode: LatchMode) -> bool {
        self.memo.iter().any(|slot| match (slot, mode) {
            (MemoSlot::PageX { fix, .. }, _) => fix.page_id() == page_id,
            (MemoSlot::PageS(fix), LatchMode::Shared) => fix.page_id() == page_id,
            _ => false,
        })
    }

    /// Release a page fixed or shared latched before commit.
    /// Exclusively latched pages are held until commit.
    #[inline]
    pub fn release_page(&mut self, block: BlockRef) {
        let slot = &mut self.memo[block.0];
        assert!(
            matches!(slot, MemoSlot::BufFix(_) | MemoSlot::PageS(_)),
            "release page {:?} not fixed or shared latched by mini-transaction",
            slot.page_id()
        );
        slot.release();
    }

    #[inline]
    pub fn page_id(&self, block: BlockRef) -> PageId {
        self.memo[block.0]
            .page_id()
            .unwrap_or_else(|| panic!("block {:?} is not a page", block))
    }

    /// Returns content of a latched page.
    #[inline]
    pub fn page(&self, block: BlockRef) -> &[u8] {
        match &self.memo[block.0] {
            MemoSlot::PageS(fix) | MemoSlot::PageX { fix, .. } => unsafe { &fix.frame().page()[..] },
            _ => panic!("read page {:?} without latch", block),
        }
    }

    #[inline]
    fn page_mut(&mut self, block: BlockRef) -> &mut [u8] {
        let log_mode = self.log_mode;
        match &mut self.memo[block.0] {
            MemoSlot::PageX { fix, modified } => {
                if log_mode != LogMode::None {
                    *modified = true;
                }
                // exclusive latch is held.
                unsafe { &mut fix.frame().page_mut()[..] }
            }
            _ => panic!("modify page {:?} without exclusive latch", block),
        }
    }

    #[inline]
    pub fn write_u8(&mut self, block: BlockRef, offset: usize, value: u8) -> Result<()> {
        self.write_int(block, offset, 1, value as u64)
    }

    #[inline]
    pub fn write_u16(&mut self, block: BlockRef, offset: usize, value: u16) -> Result<()> {
        self.write_int(block, offset, 2, value as u64)
    }

    #[inline]
    pub fn write_u32(&mut self, block: BlockRef, offset: usize, value: u32) -> Result<()> {
        self.write_int(block, offset, 4, value as u64)
    }

    #[inline]
    pub fn write_u64(&mut self, block: BlockRef, offset: usize, value: u64) -> Result<()> {
        self.write_int(block, offset, 8, value)
    }

    /// Write little-endian integer of `len` bytes at `offset` of the
    /// page and log it.
    fn write_int(&mut self, block: BlockRef, offset: usize, len: u8, value: u64) -> Result<()> {
        check_payload_range(offset, len as usize)?;
        let page_id = self.page_id(block);
        if self.log_mode == LogMode::All {
            self.append_record(|buf| encode_write(buf, page_id, offset, len, value))?;
        }
        let page = self.page_mut(block);
        page[offset..offset + len as usize].copy_from_slice(&value.to_le_bytes()[..len as usize]);
        Ok(())
    }

    /// Write bytes at `offset` of the page and log them.
    pub fn write_bytes(&mut self, block: BlockRef, offset: usize, data: &[u8]) -> Result<()> {
        check_payload_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let page_id = self.page_id(block);
        if self.log_mode == LogMode::All {
            self.append_record(|buf| encode_write_string(buf, page_id, offset, data))?;
        }
        let page = self.page_mut(block);
        page[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Append one record to local redo buffer.
    /// The whole group, including its terminator, must fit in log buffer.
    #[inline]
    fn append_record<F: FnOnce(&mut Vec<u8>)>(&mut self, f: F) -> Result<()> {
        let prev_len = self.redo.len();
        f(&mut self.redo);
        let len = self.redo.len() + 1;
        let capacity = self.log.max_redo_len();
        if len > capacity {
            self.redo.truncate(prev_len);
            return Err(Error::RedoTooLarge { len, capacity });
        }
        self.n_recs += 1;
        Ok(())
    }

    #[inline]
    fn has_modifications(&self) -> bool {
        self.memo
            .iter()
            .any(|slot| matches!(slot, MemoSlot::PageX { modified: true, .. }))
    }

    /// Commit the mini-transaction.
    ///
    /// Returns end LSN of its redo, or None if nothing was logged.
    /// All latches and fixes are released, even on error.
    pub fn commit(mut self) -> Result<Option<Lsn>> {
        self.finished = true;
        let res = if !self.has_modifications() {
            Ok(None)
        } else {
            match self.log_mode {
                LogMode::All if self.n_recs > 0 => self.log_and_dirty().map(Some),
                LogMode::All | LogMode::None => Ok(None),
                LogMode::NoRedo => {
                    self.dirty_without_redo();
                    Ok(None)
                }
            }
        };
        self.release_all();
        res
    }

    fn log_and_dirty(&mut self) -> Result<Lsn> {
        if self.n_recs == 1 {
            self.redo[0] |= SINGLE_REC_FLAG;
        } else {
            encode_multi_rec_end(&mut self.redo);
        }
        // Flush list is sorted by oldest modification only if pages
        // are dirtied in the order of their reservation.
        let order = if self.made_dirty {
            Some(self.pool.flush_order())
        } else {
            None
        };
        let res = self.log.reserve(self.redo.len())?;
        for slot in &self.memo {
            if let MemoSlot::PageX {
                fix,
                modified: true,
            } = slot
            {
                self.pool
                    .note_modification(fix, res.start_lsn, res.end_lsn);
            }
        }
        drop(order);
        self.log.write(&res, &self.redo);
        let end_lsn = res.end_lsn;
        self.log.complete(res);
        Ok(end_lsn)
    }

    fn dirty_without_redo(&mut self) {
        let _order = self.pool.flush_order();
        let lsn = self.log.current_lsn();
        for slot in &self.memo {
            if let MemoSlot::PageX {
                fix,
                modified: true,
            } = slot
            {
                self.pool.note_modification(fix, lsn, lsn);
            }
        }
    }

    /// Release all latches without logging or dirtying pages.
    ///
    /// Changes already made to latched pages are not undone, they stay
    /// in the cached pages until those are overwritten or evicted.
    pub fn rollback(mut self) {
        self.finished = true;
        let modified = self.has_modifications();
        self.release_all();
        if modified {
            log::warn!("mini-transaction rolled back with unlogged page changes");
        }
    }

    #[inline]
    fn release_all(&mut self) {
        while let Some(mut slot) = self.memo.pop() {
            slot.release();
        }
        self.log.mtr_bufs().put(std::mem::take(&mut self.redo));
    }
}

impl Drop for Mtr<'_> {
    #[inline]
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let modified = self.has_modifications();
        self.release_all();
        if modified && !thread::panicking() {
            log::warn!("uncommitted mini-transaction dropped with unlogged page changes");
        }
    }
}

#[inline]
fn check_payload_range(offset: usize, len: usize) -> Result<()> {
    if offset < PAGE_DATA_START || offset + len > PAGE_DATA_END {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::page::page_lsn;
    use crate::buffer::{BufferPoolConfig, RedoDurability};
    use crate::io::FileSpaces;
    use crate::log::recv::parse_record_groups;
    use crate::log::tests::{mem_files, small_config};
    use crate::mtr::redo::RedoBody;
    use std::sync::Arc;

    fn setup() -> (Arc<LogSys>, BufferPool) {
        let config = small_config();
        let (files, _) = mem_files(&config);
        let log = LogSys::open(&config, files).unwrap();
        let spaces = Arc::new(FileSpaces::in_memory());
        spaces.create_space(1).unwrap();
        let pool = BufferPool::new(
            &BufferPoolConfig::default().frames(16),
            spaces,
            Arc::clone(&log) as Arc<dyn RedoDurability>,
        )
        .unwrap();
        (log, pool)
    }

    #[test]
    fn test_mtr_commit_stamps_pages() {
        let (log, pool) = setup();
        let start_lsn = log.current_lsn();
        let mut mtr = Mtr::start(&pool, &log);
        let b1 = mtr.create_page(PageId::new(1, 0)).unwrap();
        mtr.write_u32(b1, PAGE_DATA_START, 0xdead_beef).unwrap();
        let b2 = mtr.create_page(PageId::new(1, 1)).unwrap();
        mtr.write_bytes(b2, PAGE_DATA_START + 8, b"kestrel").unwrap();
        assert_eq!(mtr.n_records(), 4);
        let end_lsn = mtr.commit().unwrap().unwrap();
        assert!(end_lsn > start_lsn);
        assert_eq!(log.current_lsn(), end_lsn);

        for page_no in 0..2 {
            let fix = pool.get_if_in_pool(PageId::new(1, page_no), FetchMode::Peek).unwrap();
            assert_eq!(fix.oldest_modification(), start_lsn);
            assert_eq!(fix.newest_modification(), end_lsn);
            assert_eq!(fix.read().page_lsn(), end_lsn);
            assert_eq!(fix.frame().fix_count(), 1);
        }
        assert_eq!(pool.min_oldest_modification(), Some(start_lsn));

        // log content is one record group covering the reserved range.
        log.write_up_to(end_lsn).unwrap();
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.get_page(PageId::new(1, 1), LatchMode::Shared).unwrap();
        assert_eq!(&mtr.page(b)[PAGE_DATA_START + 8..PAGE_DATA_START + 15], b"kestrel");
        assert!(mtr.commit().unwrap().is_none());
        log.shutdown();
    }

    #[test]
    fn test_mtr_record_group_format() {
        let (log, pool) = setup();
        let start_lsn = log.current_lsn();
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.create_page(PageId::new(1, 2)).unwrap();
        mtr.write_u8(b, PAGE_DATA_START, 7).unwrap();
        mtr.write_u64(b, PAGE_DATA_START + 8, u64::MAX).unwrap();
        let redo = mtr.redo.clone();
        let end_lsn = mtr.commit().unwrap().unwrap();

        let mut group = redo;
        encode_multi_rec_end(&mut group);
        let (groups, torn) = parse_record_groups(start_lsn, &group).unwrap();
        assert_eq!(torn, 0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].end_lsn, end_lsn);
        assert_eq!(groups[0].records.len(), 3);
        assert_eq!(groups[0].records[0].body, RedoBody::InitPage);
        assert_eq!(
            groups[0].records[2].body,
            RedoBody::Write {
                offset: (PAGE_DATA_START + 8) as u16,
                len: 8,
                value: u64::MAX
            }
        );
        log.shutdown();
    }

    #[test]
    fn test_mtr_log_modes() {
        let (log, pool) = setup();
        let page_id = PageId::new(1, 3);
        let mut mtr = Mtr::start(&pool, &log);
        mtr.set_log_mode(LogMode::None);
        let b = mtr.create_page(page_id).unwrap();
        mtr.write_u16(b, PAGE_DATA_START, 42).unwrap();
        assert_eq!(mtr.n_records(), 0);
        assert!(mtr.commit().unwrap().is_none());
        let fix = pool.get_if_in_pool(page_id, FetchMode::Peek).unwrap();
        assert_eq!(fix.oldest_modification(), 0);
        drop(fix);

        let lsn = log.current_lsn();
        let mut mtr = Mtr::start(&pool, &log);
        assert_eq!(mtr.set_log_mode(LogMode::NoRedo), LogMode::All);
        let b = mtr.get_page(page_id, LatchMode::Exclusive).unwrap();
        mtr.write_u16(b, PAGE_DATA_START, 43).unwrap();
        assert!(mtr.commit().unwrap().is_none());
        assert_eq!(log.current_lsn(), lsn);
        let fix = pool.get_if_in_pool(page_id, FetchMode::Peek).unwrap();
        assert_eq!(fix.oldest_modification(), lsn);
        assert_eq!(page_lsn(&fix.read()[..]), lsn);
        drop(fix);
        log.shutdown();
    }

    #[test]
    fn test_mtr_memo_and_release() {
        let (log, pool) = setup();
        let aux = RwLatch::new(());
        {
            let mut mtr = Mtr::start(&pool, &log);
            mtr.create_page(PageId::new(1, 4)).unwrap();
            mtr.create_page(PageId::new(1, 5)).unwrap();
            mtr.commit().unwrap();
        }
        let mut mtr = Mtr::start(&pool, &log);
        mtr.x_lock(&aux);
        let b4 = mtr.get_page(PageId::new(1, 4), LatchMode::Shared).unwrap();
        let b5 = mtr.get_page(PageId::new(1, 5), LatchMode::Exclusive).unwrap();
        assert!(aux.try_read().is_none());
        assert!(mtr.memo_contains(PageId::new(1, 4), LatchMode::Shared));
        assert!(!mtr.memo_contains(PageId::new(1, 4), LatchMode::Exclusive));
        assert!(mtr.memo_contains(PageId::new(1, 5), LatchMode::Shared));
        // latched twice returns the same block.
        assert_eq!(mtr.get_page(PageId::new(1, 5), LatchMode::Shared).unwrap(), b5);

        mtr.release_page(b4);
        assert!(!mtr.memo_contains(PageId::new(1, 4), LatchMode::Shared));
        let fix = pool.get_if_in_pool(PageId::new(1, 4), FetchMode::Peek).unwrap();
        assert!(fix.try_write().is_some());
        assert_eq!(fix.frame().fix_count(), 1);
        drop(fix);

        mtr.rollback();
        assert!(aux.try_write().is_some());
        let fix = pool.get_if_in_pool(PageId::new(1, 5), FetchMode::Peek).unwrap();
        assert!(fix.try_write().is_some());
        assert_eq!(fix.frame().fix_count(), 1);
        drop(fix);
        log.shutdown();
    }

    #[test]
    fn test_mtr_drop_releases_latches() {
        let (log, pool) = setup();
        let aux = RwLatch::new(());
        {
            let mut mtr = Mtr::start(&pool, &log);
            mtr.create_page(PageId::new(1, 6)).unwrap();
            mtr.commit().unwrap();
        }
        {
            let mut mtr = Mtr::start(&pool, &log);
            mtr.s_lock(&aux);
            mtr.get_page(PageId::new(1, 6), LatchMode::Exclusive).unwrap();
        }
        assert!(aux.try_write().is_some());
        let fix = pool.get_if_in_pool(PageId::new(1, 6), FetchMode::Peek).unwrap();
        assert!(fix.try_write().is_some());
        drop(fix);
        log.shutdown();
    }

    #[test]
    fn test_mtr_rollback_modified_page() {
        let (log, pool) = setup();
        let page_id = PageId::new(1, 7);
        let lsn = log.current_lsn();
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.create_page(page_id).unwrap();
        mtr.write_u8(b, PAGE_DATA_START, 1).unwrap();
        mtr.rollback();
        assert_eq!(log.current_lsn(), lsn);
        let fix = pool.get_if_in_pool(page_id, FetchMode::Peek).unwrap();
        assert!(fix.try_write().is_some());
        assert_eq!(fix.oldest_modification(), 0);
        assert_eq!(fix.frame().fix_count(), 1);
        drop(fix);
        assert_eq!(pool.stats().dirty, 0);
        log.shutdown();
    }

    #[test]
    fn test_mtr_dropped_on_error_after_write() {
        let (log, pool) = setup();
        let page_id = PageId::new(1, 9);
        let lsn = log.current_lsn();
        fn update(mtr: &mut Mtr<'_>, page_id: PageId) -> Result<()> {
            let b = mtr.create_page(page_id)?;
            mtr.write_u32(b, PAGE_DATA_START, 5)?;
            mtr.write_u32(b, PAGE_DATA_END, 6)?;
            Ok(())
        }
        {
            let mut mtr = Mtr::start(&pool, &log);
            assert_eq!(update(&mut mtr, page_id), Err(Error::InvalidArgument));
        }
        assert_eq!(log.current_lsn(), lsn);
        // page can be latched and modified again.
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.get_page(page_id, LatchMode::Exclusive).unwrap();
        mtr.write_u32(b, PAGE_DATA_START, 7).unwrap();
        let end_lsn = mtr.commit().unwrap().unwrap();
        let fix = pool.get_if_in_pool(page_id, FetchMode::Peek).unwrap();
        assert!(fix.try_write().is_some());
        assert_eq!(fix.newest_modification(), end_lsn);
        drop(fix);
        assert_eq!(pool.flush_all().unwrap(), 1);
        log.shutdown();
    }

    #[test]
    fn test_mtr_invalid_writes() {
        let (log, pool) = setup();
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.create_page(PageId::new(1, 8)).unwrap();
        assert_eq!(mtr.write_u32(b, 0, 1), Err(Error::InvalidArgument));
        assert_eq!(
            mtr.write_u64(b, PAGE_DATA_END - 4, 1),
            Err(Error::InvalidArgument)
        );

        let data = vec![0xAAu8; 4096];
        let mut err = None;
        for i in 0..16 {
            if let Err(e) = mtr.write_bytes(b, PAGE_DATA_START, &data) {
                err = Some((i, e));
                break;
            }
        }
        let (i, e) = err.unwrap();
        assert!(i > 0);
        assert!(matches!(e, Error::RedoTooLarge { .. }));
        assert_eq!(mtr.n_records(), i + 1);
        mtr.commit().unwrap().unwrap();
        log.shutdown();
    }
}
