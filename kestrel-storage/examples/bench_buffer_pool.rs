use clap::Parser;
use easy_parallel::Parallel;
use kestrel_storage::buffer::page::{
    init_page, stamp_page_checksum, PageId, PageNo, PAGE_DATA_START, PAGE_SIZE,
};
use kestrel_storage::buffer::{BufferPool, BufferPoolConfig, FetchMode, NoRedo};
use kestrel_storage::io::{FileSpaces, Tablespaces};
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

#[derive(Debug, Parser)]
#[command(version, about = "Buffer pool cold/warm random read benchmark")]
struct Args {
    /// Number of pages written to tablespace.
    #[arg(long, default_value_t = 8192)]
    pages: u32,
    /// Number of random reads per thread in warm phase.
    #[arg(long, default_value_t = 1_000_000)]
    warm_reads: usize,
    /// Number of frames of buffer pool.
    #[arg(long, default_value_t = 4096)]
    frames: usize,
    /// Thread number of warm phase.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

fn main() {
    let args = Args::parse();
    let temp_dir = TempDir::new().unwrap();
    let spaces = Arc::new(FileSpaces::on_disk(temp_dir.path()).unwrap());
    spaces.create_space(1).unwrap();
    spaces.extend(1, args.pages).unwrap();
    let mut buf = vec![0u8; PAGE_SIZE];
    for page_no in 0..args.pages {
        init_page(&mut buf[..], PageId::new(1, page_no));
        buf[PAGE_DATA_START..PAGE_DATA_START + 4].copy_from_slice(&page_no.to_le_bytes());
        stamp_page_checksum(&mut buf);
        spaces.write_page(PageId::new(1, page_no), &buf).unwrap();
    }
    spaces.sync_all().unwrap();

    let pool = BufferPool::new(
        &BufferPoolConfig::default().frames(args.frames),
        spaces,
        Arc::new(NoRedo),
    )
    .unwrap();

    let cold_start = Instant::now();
    let mut cold_checksum = 0u64;
    for page_no in 0..args.pages {
        cold_checksum ^= read_page_no(&pool, page_no) as u64;
    }
    let cold_elapsed = cold_start.elapsed();
    let cold_per_read_ns = cold_elapsed.as_nanos() as f64 / args.pages.max(1) as f64;

    let warm_start = Instant::now();
    let checksums = Parallel::new()
        .each(0..args.threads, |_| {
            let mut rng = rand::rng();
            let mut checksum = 0u64;
            for _ in 0..args.warm_reads {
                let page_no = rng.random_range(0..args.pages);
                checksum ^= read_page_no(&pool, page_no) as u64;
            }
            checksum
        })
        .run();
    let warm_elapsed = warm_start.elapsed();
    let warm_reads = args.warm_reads * args.threads;
    let warm_per_read_ns = warm_elapsed.as_nanos() as f64 / warm_reads.max(1) as f64;
    let warm_checksum = checksums.into_iter().fold(0, |a, b| a ^ b);

    let stats = pool.stats();
    println!(
        "buffer-pool-bench pages={} frames={} threads={} warm_reads={} cold_ms={} warm_ms={} cold_ns_per_read={:.2} warm_ns_per_read={:.2} hit_rate={:.4} reads={} evictions={} young_moves={} cold_checksum={} warm_checksum={}",
        args.pages,
        stats.capacity,
        args.threads,
        warm_reads,
        cold_elapsed.as_millis(),
        warm_elapsed.as_millis(),
        cold_per_read_ns,
        warm_per_read_ns,
        stats.hit_rate(),
        stats.reads,
        stats.evictions,
        stats.young_moves,
        cold_checksum,
        warm_checksum,
    );
}

#[inline]
fn read_page_no(pool: &BufferPool, page_no: PageNo) -> PageNo {
    let fix = pool
        .fetch(PageId::new(1, page_no), FetchMode::Normal)
        .unwrap();
    let g = fix.read();
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&g[PAGE_DATA_START..PAGE_DATA_START + 4]);
    PageNo::from_le_bytes(arr)
}
