use kestrel_storage::buffer::page::{page_lsn, Lsn, PageId, PAGE_DATA_START};
use kestrel_storage::buffer::FetchMode;
use kestrel_storage::engine::{CheckpointConfig, Storage, StorageConfig};
use kestrel_storage::buffer::BufferPoolConfig;
use kestrel_storage::io::FileSpaces;
use kestrel_storage::log::group::LOG_FILE_HDR_SIZE;
use kestrel_storage::log::recv::parse_record_groups;
use kestrel_storage::log::{LogConfig, LogSync, LogSys};
use kestrel_storage::mtr::redo::{encode_write_string, RedoBody, SINGLE_REC_FLAG};
use kestrel_storage::mtr::LogMode;
use std::sync::Arc;
use std::thread;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn log_config() -> LogConfig {
    LogConfig::default()
        .log_file_size(LOG_FILE_HDR_SIZE + 128 * 1024)
        .files_per_group(2)
        .log_groups(2)
        .log_buffer_size(32 * 1024u64)
        .log_slots(16)
        .log_sync(LogSync::Fdatasync)
        .write_up_to_timeout_ms(5)
}

fn memory_storage() -> Storage {
    let spaces = Arc::new(FileSpaces::in_memory());
    spaces.create_space(1).unwrap();
    let config = StorageConfig::default()
        .buffer(BufferPoolConfig::default().frames(256))
        .log(log_config())
        .checkpoint(CheckpointConfig::default().interval_ms(10));
    let files = config.log.memory_files();
    Storage::open_with(config, spaces, files).unwrap()
}

fn single_record(page_no: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![];
    encode_write_string(&mut buf, PageId::new(1, page_no), PAGE_DATA_START, data);
    buf[0] |= SINGLE_REC_FLAG;
    buf
}

#[test]
fn test_commit_lsn_increases_across_threads() {
    init_logger();
    let storage = memory_storage();
    let per_thread: Vec<Vec<Lsn>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let storage = &storage;
                s.spawn(move || {
                    let mut ends = vec![];
                    for i in 0..100u32 {
                        let mut mtr = storage.mtr().unwrap();
                        let b = mtr.create_page(PageId::new(1, t * 10 + i % 10)).unwrap();
                        mtr.write_u32(b, PAGE_DATA_START, i).unwrap();
                        ends.push(mtr.commit().unwrap().unwrap());
                    }
                    ends
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for ends in &per_thread {
        assert!(ends.windows(2).all(|w| w[0] < w[1]));
    }
    let mut all: Vec<Lsn> = per_thread.into_iter().flatten().collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 800);
    assert!(*all.last().unwrap() <= storage.log.current_lsn());

    // page LSN is end LSN of the last commit which modified it.
    for t in 0..8u32 {
        for n in 0..10u32 {
            let fix = storage
                .pool
                .fetch(PageId::new(1, t * 10 + n), FetchMode::Normal)
                .unwrap();
            let lsn = page_lsn(&fix.read()[..]);
            assert_eq!(lsn, fix.newest_modification());
            assert!(fix.oldest_modification() <= lsn);
        }
    }
    storage.shutdown().unwrap();
}

#[test]
fn test_write_up_to_covers_own_commit() {
    init_logger();
    let storage = memory_storage();
    thread::scope(|s| {
        for t in 0..4u32 {
            let storage = &storage;
            s.spawn(move || {
                for i in 0..50u32 {
                    let mut mtr = storage.mtr().unwrap();
                    let b = mtr.create_page(PageId::new(1, t * 100 + i)).unwrap();
                    mtr.write_bytes(b, PAGE_DATA_START, &[t as u8; 64]).unwrap();
                    let end = mtr.commit().unwrap().unwrap();
                    storage.log.write_up_to(end).unwrap();
                    assert!(storage.log.flushed_lsn() >= end);
                }
            });
        }
    });
    let stats = storage.log.stats();
    assert!(stats.sync_count.load(std::sync::atomic::Ordering::Relaxed) > 0);
    storage.shutdown().unwrap();
}

#[test]
fn test_no_redo_mode_leaves_log_untouched() {
    init_logger();
    let storage = memory_storage();
    let before = storage.log.current_lsn();
    let mut mtr = storage.mtr().unwrap();
    mtr.set_log_mode(LogMode::NoRedo);
    let b = mtr.create_page(PageId::new(1, 5)).unwrap();
    mtr.write_u64(b, PAGE_DATA_START, 42).unwrap();
    assert_eq!(mtr.commit().unwrap(), None);
    assert_eq!(storage.log.current_lsn(), before);
    // page is still dirty, so checkpoint can not pass it before flush.
    assert_eq!(storage.pool.stats().dirty, 1);
    storage.shutdown().unwrap();
    assert_eq!(storage.pool.stats().dirty, 0);
}

#[test]
fn test_log_files_on_disk_reopen() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = log_config().log_dir(dir.path());
    let log = LogSys::open(&config, config.open_files().unwrap()).unwrap();
    let mut inputs = vec![];
    let mut end = 0;
    for i in 0..300u32 {
        let data = vec![(i % 251) as u8; (i as usize * 13) % 500 + 1];
        end = log.append(&single_record(i, &data)).unwrap();
        inputs.push(data);
    }
    log.write_up_to(end).unwrap();
    log.shutdown();
    drop(log);

    let files = config.open_files().unwrap();
    assert!(!files.created);
    let log = LogSys::open(&config, files).unwrap();
    assert_eq!(log.current_lsn(), end);
    let recovered = log.take_recovered().unwrap();
    let (groups, torn) = parse_record_groups(recovered.checkpoint_lsn, &recovered.data).unwrap();
    assert_eq!(torn, 0);
    assert_eq!(groups.len(), inputs.len());
    for (i, (group, data)) in groups.iter().zip(&inputs).enumerate() {
        assert_eq!(group.records.len(), 1);
        assert_eq!(group.records[0].page_id, PageId::new(1, i as u32));
        match &group.records[0].body {
            RedoBody::WriteString { offset, data: d } => {
                assert_eq!(*offset as usize, PAGE_DATA_START);
                assert_eq!(d, data);
            }
            body => panic!("unexpected redo body {:?}", body),
        }
    }
    assert_eq!(groups.last().unwrap().end_lsn, end);
    log.shutdown();
}

#[test]
fn test_log_file_count_mismatch_rejected() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = log_config().log_dir(dir.path());
    let log = LogSys::open(&config, config.open_files().unwrap()).unwrap();
    log.shutdown();
    drop(log);
    // same directory, different layout.
    let other = config.clone().files_per_group(3);
    assert!(other.open_files().is_err());
}
