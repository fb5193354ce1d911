use kestrel_storage::buffer::page::{page_lsn, Lsn, PageId, PageNo, SpaceId, PAGE_DATA_START};
use kestrel_storage::buffer::{BufferPool, BufferPoolConfig, FetchMode, NoRedo, RedoDurability};
use kestrel_storage::engine::{Storage, StorageConfig};
use kestrel_storage::error::{Error, Result};
use kestrel_storage::io::{FileSpaces, Tablespaces};
use kestrel_storage::latch::LatchMode;
use kestrel_storage::log::{LogConfig, LogSync, LogSys};
use kestrel_storage::mtr::Mtr;
use rand::{Rng, RngCore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn memory_spaces() -> Arc<FileSpaces> {
    let spaces = Arc::new(FileSpaces::in_memory());
    spaces.create_space(1).unwrap();
    spaces
}

fn small_log_config() -> LogConfig {
    LogConfig::default()
        .log_file_size(2048 + 256 * 1024u64)
        .log_buffer_size(64 * 1024u64)
        .log_slots(16)
        .log_sync(LogSync::Fsync)
        .write_up_to_timeout_ms(5)
}

/// Page payload identifying its page number.
fn stamp(page: &mut [u8], page_no: PageNo) {
    page[PAGE_DATA_START..PAGE_DATA_START + 4].copy_from_slice(&page_no.to_le_bytes());
}

fn stamped(page: &[u8]) -> PageNo {
    PageNo::from_le_bytes(page[PAGE_DATA_START..PAGE_DATA_START + 4].try_into().unwrap())
}

#[test]
fn test_pinned_pages_never_evicted() {
    init_logger();
    const FRAMES: usize = 16;
    const PAGES: PageNo = 64;
    const THREADS: usize = 8;
    let config = BufferPoolConfig::default()
        .frames(FRAMES)
        .lru_old_threshold_ms(0);
    let pool = BufferPool::new(&config, memory_spaces(), Arc::new(NoRedo)).unwrap();
    for page_no in 0..PAGES {
        let fix = pool.create(PageId::new(1, page_no)).unwrap();
        {
            let mut page = fix.write();
            stamp(&mut page[..], page_no);
            pool.recv_note_modification(&fix, 1, 1);
        }
        assert!(pool.flush_page(fix.page_id()).unwrap());
    }

    let checks = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut rng = rand::rng();
                for _ in 0..500 {
                    let page_no = rng.random_range(0..PAGES);
                    let fix = pool.fetch(PageId::new(1, page_no), FetchMode::Normal).unwrap();
                    assert!(fix.frame().fix_count() > 0);
                    assert_eq!(stamped(&fix.read()[..]), page_no);
                    thread::yield_now();
                    // frame still holds the same page while pinned.
                    assert_eq!(fix.frame().meta.lock().page_id, fix.page_id());
                    assert_eq!(stamped(&fix.read()[..]), page_no);
                    checks.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });
    assert_eq!(checks.load(Ordering::Relaxed), THREADS * 500);
    let stats = pool.stats();
    assert!(stats.evictions > 0);
    assert_eq!(stats.lru_len + stats.free, FRAMES);
    pool.validate();
}

#[test]
fn test_page_round_trip_through_eviction() {
    init_logger();
    let spaces = memory_spaces();
    let log = LogSys::open(&small_log_config(), small_log_config().memory_files()).unwrap();
    let pool = BufferPool::new(
        &BufferPoolConfig::default().frames(8),
        spaces,
        Arc::clone(&log) as Arc<dyn RedoDurability>,
    )
    .unwrap();
    let mut rng = rand::rng();
    let mut contents = vec![];
    for page_no in 0..40 {
        let mut data = vec![0u8; 1024];
        rng.fill_bytes(&mut data);
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr.create_page(PageId::new(1, page_no)).unwrap();
        mtr.write_bytes(b, PAGE_DATA_START + 100, &data).unwrap();
        mtr.commit().unwrap().unwrap();
        contents.push(data);
    }
    // most pages were evicted to make room for later ones.
    assert!(pool.stats().evictions >= 32);
    for (page_no, data) in contents.iter().enumerate() {
        let mut mtr = Mtr::start(&pool, &log);
        let b = mtr
            .get_page(PageId::new(1, page_no as PageNo), LatchMode::Shared)
            .unwrap();
        assert_eq!(&mtr.page(b)[PAGE_DATA_START + 100..PAGE_DATA_START + 1124], &data[..]);
        mtr.commit().unwrap();
    }
    pool.validate();
    log.shutdown();
}

/// Tablespaces checking that redo of a page is durable when the page
/// is written.
struct CheckedSpaces {
    inner: FileSpaces,
    log: OnceLock<Arc<LogSys>>,
    writes: AtomicUsize,
}

impl Tablespaces for CheckedSpaces {
    fn exists(&self, space: SpaceId) -> bool {
        self.inner.exists(space)
    }

    fn size_in_pages(&self, space: SpaceId) -> Result<PageNo> {
        self.inner.size_in_pages(space)
    }

    fn extend(&self, space: SpaceId, n_pages: PageNo) -> Result<()> {
        self.inner.extend(space, n_pages)
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.inner.read_page(page_id, buf)
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        let log = self.log.get().unwrap();
        let lsn: Lsn = page_lsn(buf);
        assert!(
            log.flushed_lsn() >= lsn,
            "page {:?} with lsn {} written before redo flushed to {}",
            page_id,
            lsn,
            log.flushed_lsn()
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write_page(page_id, buf)
    }

    fn sync(&self, space: SpaceId) -> Result<()> {
        self.inner.sync(space)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }
}

#[test]
fn test_redo_durable_before_eviction() {
    init_logger();
    let spaces = Arc::new(CheckedSpaces {
        inner: FileSpaces::in_memory(),
        log: OnceLock::new(),
        writes: AtomicUsize::new(0),
    });
    spaces.inner.create_space(1).unwrap();
    let log = LogSys::open(&small_log_config(), small_log_config().memory_files()).unwrap();
    let _ = spaces.log.set(Arc::clone(&log));
    let pool = BufferPool::new(
        &BufferPoolConfig::default().frames(8).lru_scan_depth(4),
        Arc::clone(&spaces) as Arc<dyn Tablespaces>,
        Arc::clone(&log) as Arc<dyn RedoDurability>,
    )
    .unwrap();

    thread::scope(|s| {
        for t in 0..4u32 {
            let pool = &pool;
            let log = &log;
            s.spawn(move || {
                for i in 0..50u32 {
                    let page_no = t * 20 + i % 20;
                    let mut mtr = Mtr::start(pool, log);
                    let b = if i < 20 {
                        mtr.create_page(PageId::new(1, page_no)).unwrap()
                    } else {
                        mtr.get_page(PageId::new(1, page_no), LatchMode::Exclusive)
                            .unwrap()
                    };
                    mtr.write_u32(b, PAGE_DATA_START, i).unwrap();
                    mtr.commit().unwrap();
                }
            });
        }
    });
    assert!(spaces.writes.load(Ordering::Relaxed) > 0);
    pool.flush_all().unwrap();
    assert_eq!(pool.stats().dirty, 0);
    pool.validate();
    log.shutdown();
}

#[test]
fn test_flush_list_sorted_under_concurrent_commits() {
    init_logger();
    let log = LogSys::open(&small_log_config(), small_log_config().memory_files()).unwrap();
    let pool = BufferPool::new(
        &BufferPoolConfig::default().frames(256),
        memory_spaces(),
        Arc::clone(&log) as Arc<dyn RedoDurability>,
    )
    .unwrap();
    thread::scope(|s| {
        for t in 0..8u32 {
            let pool = &pool;
            let log = &log;
            s.spawn(move || {
                for i in 0..20u32 {
                    let mut mtr = Mtr::start(pool, log);
                    let b = mtr.create_page(PageId::new(1, t * 100 + i)).unwrap();
                    mtr.write_u64(b, PAGE_DATA_START, (t * 100 + i) as u64).unwrap();
                    mtr.commit().unwrap();
                }
            });
        }
    });
    assert_eq!(pool.stats().dirty, 160);
    // flush list ordering and membership are checked by validate.
    pool.validate();
    let min = pool.min_oldest_modification().unwrap();
    assert!(min < log.current_lsn());
    log.shutdown();
}

fn two_space_storage() -> (Arc<FileSpaces>, Storage) {
    let spaces = memory_spaces();
    spaces.create_space(2).unwrap();
    let config = StorageConfig::default()
        .buffer(BufferPoolConfig::default().frames(64))
        .log(small_log_config());
    let files = config.log.memory_files();
    let storage = Storage::open_with(config, Arc::clone(&spaces), files).unwrap();
    (spaces, storage)
}

fn update_pages(storage: &Storage, space: SpaceId, n_pages: PageNo) -> Lsn {
    let mut end = 0;
    for page_no in 0..n_pages {
        let mut mtr = storage.mtr().unwrap();
        let b = mtr.create_page(PageId::new(space, page_no)).unwrap();
        mtr.write_u32(b, PAGE_DATA_START, page_no).unwrap();
        end = mtr.commit().unwrap().unwrap();
    }
    end
}

#[test]
fn test_drop_space_discards_cached_pages() {
    init_logger();
    let (_spaces, storage) = two_space_storage();
    update_pages(&storage, 2, 10);
    let end = update_pages(&storage, 1, 4);
    assert_eq!(storage.pool.stats().dirty, 14);

    storage.drop_space(2).unwrap();
    assert_eq!(storage.pool.stats().dirty, 4);
    assert!(storage
        .pool
        .get_if_in_pool(PageId::new(2, 0), FetchMode::Peek)
        .is_none());
    assert_eq!(
        storage.mtr().unwrap().create_page(PageId::new(2, 0)).err(),
        Some(Error::SpaceDeleted(2))
    );
    assert_eq!(storage.checkpoint(true).unwrap(), end);
    assert_eq!(storage.pool.stats().dirty, 0);
    storage.pool.validate();
    storage.shutdown().unwrap();
}

#[test]
fn test_checkpoint_after_space_dropped_underneath() {
    init_logger();
    let (spaces, storage) = two_space_storage();
    let end = update_pages(&storage, 2, 10);
    // the pool is not told, its dirty pages are discarded on flush.
    spaces.drop_space(2).unwrap();
    assert_eq!(storage.pool.stats().dirty, 10);
    assert_eq!(storage.checkpoint(true).unwrap(), end);
    assert_eq!(storage.pool.stats().dirty, 0);
    storage.pool.validate();
    // clean pages of the dropped space can be evicted.
    assert!(storage.pool.evict_page(PageId::new(2, 3)).unwrap());
    storage.shutdown().unwrap();
}
