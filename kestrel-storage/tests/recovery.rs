use kestrel_storage::buffer::page::{PageId, PageNo, PAGE_DATA_START};
use kestrel_storage::buffer::BufferPoolConfig;
use kestrel_storage::engine::{CheckpointConfig, Storage, StorageConfig};
use kestrel_storage::io::{FileIo, FileSpaces, MemFile};
use kestrel_storage::latch::LatchMode;
use kestrel_storage::log::group::LOG_FILE_HDR_SIZE;
use kestrel_storage::log::{LogConfig, LogFiles, LogSync};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> StorageConfig {
    StorageConfig::default()
        .buffer(BufferPoolConfig::default().frames(16).lru_scan_depth(4))
        .log(
            LogConfig::default()
                .log_file_size(LOG_FILE_HDR_SIZE + 64 * 1024)
                .files_per_group(2)
                .log_groups(3)
                .log_buffer_size(16 * 1024u64)
                .log_slots(8)
                .log_sync(LogSync::Fsync)
                .write_up_to_timeout_ms(5),
        )
        .checkpoint(CheckpointConfig::default().interval_ms(5).flush_batch_pages(4))
}

/// Tablespace and log files kept in memory, which can be reduced to
/// their synced content to simulate a crash.
struct MemStorageFiles {
    space: Arc<MemFile>,
    log: Vec<Vec<Arc<MemFile>>>,
    created: bool,
}

impl MemStorageFiles {
    fn new(config: &StorageConfig) -> Self {
        MemStorageFiles {
            space: Arc::new(MemFile::new()),
            log: (0..config.log.log_groups)
                .map(|_| {
                    (0..config.log.files_per_group)
                        .map(|_| Arc::new(MemFile::new()))
                        .collect()
                })
                .collect(),
            created: true,
        }
    }

    fn open(&self, config: StorageConfig) -> Storage {
        let spaces = Arc::new(FileSpaces::in_memory());
        spaces
            .attach_space(1, Arc::clone(&self.space) as Arc<dyn FileIo>)
            .unwrap();
        let files = LogFiles {
            files: self
                .log
                .iter()
                .map(|g| g.iter().map(|f| Arc::clone(f) as Arc<dyn FileIo>).collect())
                .collect(),
            created: self.created,
        };
        Storage::open_with(config, spaces, files).unwrap()
    }

    fn crash(&self) -> Self {
        MemStorageFiles {
            space: Arc::new(MemFile::from_image(self.space.crash_image())),
            log: self
                .log
                .iter()
                .map(|g| {
                    g.iter()
                        .map(|f| Arc::new(MemFile::from_image(f.crash_image())))
                        .collect()
                })
                .collect(),
            created: false,
        }
    }
}

/// Apply random updates on pages, each page holding a counter and a
/// filler of its latest value. Expected counters are tracked.
fn random_updates(storage: &Storage, n_pages: PageNo, rounds: usize, expected: &mut BTreeMap<PageNo, u64>) {
    let mut rng = rand::rng();
    for _ in 0..rounds {
        let page_no = rng.random_range(0..n_pages);
        let mut mtr = storage.mtr().unwrap();
        let page_id = PageId::new(1, page_no);
        let b = match expected.get(&page_no) {
            Some(_) => mtr.get_page(page_id, LatchMode::Exclusive).unwrap(),
            None => mtr.create_page(page_id).unwrap(),
        };
        let value = expected.get(&page_no).copied().unwrap_or(0) + 1;
        mtr.write_u64(b, PAGE_DATA_START, value).unwrap();
        mtr.write_bytes(b, PAGE_DATA_START + 8, &[value as u8; 200])
            .unwrap();
        mtr.commit().unwrap();
        expected.insert(page_no, value);
    }
}

fn verify_pages(storage: &Storage, expected: &BTreeMap<PageNo, u64>) {
    for (&page_no, &value) in expected {
        let mut mtr = storage.mtr().unwrap();
        let b = mtr
            .get_page(PageId::new(1, page_no), LatchMode::Shared)
            .unwrap();
        let page = mtr.page(b);
        let stored = u64::from_le_bytes(
            page[PAGE_DATA_START..PAGE_DATA_START + 8]
                .try_into()
                .unwrap(),
        );
        assert_eq!(stored, value, "page {}", page_no);
        assert_eq!(&page[PAGE_DATA_START + 8..PAGE_DATA_START + 208], &[value as u8; 200]);
        mtr.commit().unwrap();
    }
}

#[test]
fn test_crash_recovery_with_partial_flush() {
    init_logger();
    let files = MemStorageFiles::new(&config());
    let storage = files.open(config());
    let mut expected = BTreeMap::new();
    // far more pages than frames, so many are written back by eviction.
    random_updates(&storage, 64, 300, &mut expected);
    storage.checkpoint(false).unwrap();
    random_updates(&storage, 64, 300, &mut expected);
    storage.log.write_up_to(storage.log.current_lsn()).unwrap();
    let end = storage.log.current_lsn();
    let crashed = files.crash();
    let _dead = storage;

    let storage = crashed.open(config());
    assert!(storage.recovery_stats().is_some());
    assert_eq!(storage.log.current_lsn(), end);
    verify_pages(&storage, &expected);
    storage.pool.validate();

    // second round on top of recovered state.
    random_updates(&storage, 64, 200, &mut expected);
    storage.log.write_up_to(storage.log.current_lsn()).unwrap();
    let crashed_again = crashed.crash();
    let _dead = storage;

    let storage = crashed_again.open(config());
    verify_pages(&storage, &expected);
    storage.shutdown().unwrap();
}

#[test]
fn test_log_wraps_around_groups() {
    init_logger();
    let files = MemStorageFiles::new(&config());
    let storage = files.open(config());
    let mut expected = BTreeMap::new();
    // several times of total log capacity, so groups are reused.
    let capacity = storage.log.group_capacity() * config().log.log_groups as u64;
    while storage.log.current_lsn() < capacity * 3 {
        random_updates(&storage, 32, 50, &mut expected);
    }
    assert!(
        storage
            .log
            .stats()
            .group_rotations
            .load(std::sync::atomic::Ordering::Relaxed)
            >= 3
    );
    storage.log.write_up_to(storage.log.current_lsn()).unwrap();
    let crashed = files.crash();
    let _dead = storage;

    let storage = crashed.open(config());
    verify_pages(&storage, &expected);
    storage.shutdown().unwrap();
}

#[test]
fn test_clean_shutdown_needs_no_replay() {
    init_logger();
    let files = MemStorageFiles::new(&config());
    let storage = files.open(config());
    let mut expected = BTreeMap::new();
    random_updates(&storage, 20, 100, &mut expected);
    storage.shutdown().unwrap();
    let checkpoint_lsn = storage.log.checkpoint_lsn();
    assert_eq!(checkpoint_lsn, storage.log.current_lsn());
    // a clean shutdown syncs everything.
    let reopened = files.crash();
    drop(storage);

    let storage = reopened.open(config());
    let stats = storage.recovery_stats().unwrap();
    assert_eq!(stats.groups, 0);
    assert_eq!(stats.applied, 0);
    assert_eq!(storage.log.checkpoint_lsn(), checkpoint_lsn);
    verify_pages(&storage, &expected);
    storage.shutdown().unwrap();
}

#[test]
fn test_skip_recovery_leaves_pages_stale() {
    init_logger();
    let files = MemStorageFiles::new(&config());
    let storage = files.open(config());
    let mut expected = BTreeMap::new();
    random_updates(&storage, 4, 20, &mut expected);
    storage.shutdown().unwrap();
    let clean = files.crash();
    drop(storage);

    let (&page_no, &clean_value) = expected.iter().next().unwrap();
    let page_id = PageId::new(1, page_no);
    let storage = clean.open(config());
    let mut mtr = storage.mtr().unwrap();
    let b = mtr.get_page(page_id, LatchMode::Exclusive).unwrap();
    mtr.write_u64(b, PAGE_DATA_START, 999).unwrap();
    let end = mtr.commit().unwrap().unwrap();
    storage.log.write_up_to(end).unwrap();
    let crashed = clean.crash();
    let _dead = storage;

    let storage = crashed.open(config().skip_recovery(true));
    assert_eq!(storage.recovery_stats(), None);
    let mut mtr = storage.mtr().unwrap();
    let b = mtr.get_page(page_id, LatchMode::Shared).unwrap();
    let stored = u64::from_le_bytes(
        mtr.page(b)[PAGE_DATA_START..PAGE_DATA_START + 8]
            .try_into()
            .unwrap(),
    );
    // page on disk is from the clean shutdown, redo was not applied.
    assert_eq!(stored, clean_value);
    mtr.commit().unwrap();
    storage.shutdown().unwrap();
}

#[test]
fn test_storage_on_disk_reopen() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.data_dir = dir.path().join("data");
    config.log = config.log.clone().log_dir(dir.path().join("log"));
    let storage = Storage::open(config.clone()).unwrap();
    storage.spaces.create_space(1).unwrap();
    let mut expected = BTreeMap::new();
    random_updates(&storage, 24, 100, &mut expected);
    storage.shutdown().unwrap();
    drop(storage);

    let storage = Storage::open(config).unwrap();
    assert_eq!(storage.recovery_stats().map_or(0, |s| s.groups), 0);
    verify_pages(&storage, &expected);
    storage.shutdown().unwrap();
}
