//! Multi-threaded mini-transaction commits.
//! Each thread repeatedly modifies one of its own pages and commits,
//! optionally waiting for its redo to be durable.
//! Its goal is to test throughput of log reservation, log writer and
//! log flusher under contention.
use clap::Parser;
use easy_parallel::Parallel;
use kestrel_storage::buffer::page::{PageId, PAGE_DATA_START};
use kestrel_storage::buffer::BufferPoolConfig;
use kestrel_storage::engine::{CheckpointConfig, Storage, StorageConfig};
use kestrel_storage::latch::LatchMode;
use kestrel_storage::log::{LogConfig, LogSync};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn main() {
    let args = Args::parse();
    let temp_dir = TempDir::new().unwrap();
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| temp_dir.path().join("log"));
    let config = StorageConfig::default()
        .data_dir(temp_dir.path().join("data"))
        .buffer(BufferPoolConfig::default().pool_size(args.pool_size))
        .log(
            LogConfig::default()
                .log_dir(log_dir)
                .log_file_size(args.log_file_size)
                .log_buffer_size(args.log_buffer_size)
                .log_slots(args.log_slots)
                .log_sync(args.log_sync),
        )
        .checkpoint(CheckpointConfig::default());
    let storage = Storage::open(config).unwrap();
    storage.spaces.create_space(1).unwrap();
    // each thread owns a range of pages.
    for t in 0..args.threads {
        let mut mtr = storage.mtr().unwrap();
        for i in 0..args.pages_per_thread {
            mtr.create_page(page_of(t, i, args.pages_per_thread)).unwrap();
        }
        mtr.commit().unwrap();
    }

    let stop = AtomicBool::new(false);
    let commits = AtomicUsize::new(0);
    let start = Instant::now();
    let _ = Parallel::new()
        .each(0..args.threads, |t| {
            let mut n = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let page_id = page_of(t, n % args.pages_per_thread, args.pages_per_thread);
                let mut mtr = storage.mtr().unwrap();
                let b = mtr.get_page(page_id, LatchMode::Exclusive).unwrap();
                mtr.write_u64(b, PAGE_DATA_START, n as u64).unwrap();
                mtr.write_bytes(b, PAGE_DATA_START + 8, &vec![n as u8; args.payload])
                    .unwrap();
                let end = mtr.commit().unwrap();
                if args.durable {
                    if let Some(lsn) = end {
                        storage.log.write_up_to(lsn).unwrap();
                    }
                }
                n += 1;
            }
            commits.fetch_add(n, Ordering::Relaxed);
        })
        .finish(|| {
            std::thread::sleep(args.duration);
            stop.store(true, Ordering::SeqCst);
        });
    let dur = start.elapsed();

    let commit_count = commits.load(Ordering::Relaxed);
    let stats = storage.log.stats();
    let log_bytes = stats.log_bytes.load(Ordering::Relaxed);
    let write_count = stats.write_count.load(Ordering::Relaxed);
    let write_bytes = stats.write_bytes.load(Ordering::Relaxed);
    let sync_count = stats.sync_count.load(Ordering::Relaxed);
    let sync_nanos = stats.sync_nanos.load(Ordering::Relaxed);
    let reserve_waits = stats.reserve_waits.load(Ordering::Relaxed);
    let rotations = stats.group_rotations.load(Ordering::Relaxed);
    let checkpoints = stats.checkpoint_count.load(Ordering::Relaxed);
    println!(
        "threads={},dur={},commits={},writes={},write_kb={:.2},syncs={},sync_dur={:.2}us,reserve_waits={},rotations={},checkpoints={},mtr/s={:.0},log/s={:.2}MB",
        args.threads,
        dur.as_micros(),
        commit_count,
        write_count,
        write_bytes as f64 / 1024f64,
        sync_count,
        if sync_count == 0 { 0f64 } else { sync_nanos as f64 / 1000f64 / sync_count as f64 },
        reserve_waits,
        rotations,
        checkpoints,
        commit_count as f64 * 1_000_000_000f64 / dur.as_nanos() as f64,
        log_bytes as f64 / dur.as_micros() as f64,
    );
    let pool_stats = storage.pool.stats();
    println!(
        "pool: frames={},dirty={},writes={},evictions={},hit_rate={:.4}",
        pool_stats.capacity,
        pool_stats.dirty,
        pool_stats.writes,
        pool_stats.evictions,
        pool_stats.hit_rate(),
    );
    storage.shutdown().unwrap();
}

#[inline]
fn page_of(thread: usize, idx: usize, pages_per_thread: usize) -> PageId {
    PageId::new(1, (thread * pages_per_thread + idx) as u32)
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// thread number to run mini-transactions
    #[arg(long, default_value = "1")]
    threads: usize,

    /// duration of the run
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// pages modified by each thread in turn
    #[arg(long, default_value = "16")]
    pages_per_thread: usize,

    /// bytes written to page by each mini-transaction, besides a counter
    #[arg(long, default_value = "64")]
    payload: usize,

    /// wait for redo durability after each commit
    #[arg(long)]
    durable: bool,

    /// directory of redo log files, temporary directory if not set
    #[arg(long)]
    log_dir: Option<std::path::PathBuf>,

    #[arg(long, default_value = "fsync", value_parser = LogSync::from_str)]
    log_sync: LogSync,

    /// size of each log file
    #[arg(long, default_value = "67108864")]
    log_file_size: u64,

    #[arg(long, default_value = "8388608")]
    log_buffer_size: u64,

    #[arg(long, default_value = "1024")]
    log_slots: usize,

    #[arg(long, default_value = "134217728")]
    pool_size: u64,
}
