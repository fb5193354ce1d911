//! Redo log: log buffer, log writer and log flusher.
//!
//! Committing mini-transactions reserve an LSN range in the log buffer,
//! copy their records in concurrently, and mark their reservation slot
//! as copied. The log writer thread drains contiguous copied slots and
//! writes them to the current log group. The log flusher thread syncs
//! written files and wakes up threads waiting for durability.
pub mod block;
pub mod buffer;
mod checkpoint;
mod flusher;
pub mod group;
pub mod recv;
pub mod scan;
pub mod slot;
mod writer;

pub use checkpoint::CheckpointInfo;
pub use group::{GroupStatus, LogFiles};
pub use recv::{recover, RecoveredLog, RecoveryStats};

use crate::buffer::page::Lsn;
use crate::buffer::RedoDurability;
use crate::error::{Error, Result};
use crate::log::block::{
    block_floor, block_no, block_offset, init_block, lsn_add, LOG_BLOCK_DATA_END,
    LOG_BLOCK_HDR_SIZE, LOG_BLOCK_PAYLOAD_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE,
    LOG_FIRST_DATA_LSN, LOG_START_LSN,
};
use crate::log::buffer::LogBuffer;
use crate::log::checkpoint::CheckpointState;
use crate::log::group::{LogGroups, LOG_FILE_HDR_SIZE};
use crate::log::scan::LogScanner;
use crate::log::slot::{ReservePos, Reservation, SlotBank};
use crate::mtr::buf::MtrBufPool;
use crate::notify::Signal;
use crate::thread::spawn_named;
use byte_unit::Byte;
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Sequence number stored in reservation position once log writer
/// has stopped. No reservation can succeed afterwards.
const SEALED_SEQ: u64 = u64::MAX;

pub struct LogSys {
    buf: LogBuffer,
    reserve: CachePadded<AtomicCell<ReservePos>>,
    slots: SlotBank,
    written_lsn: CachePadded<AtomicU64>,
    flushed_lsn: CachePadded<AtomicU64>,
    checkpoint_lsn: CachePadded<AtomicU64>,
    groups: Mutex<LogGroups>,
    checkpoint_mu: Mutex<CheckpointState>,
    // Checkpoint LSN log writer needs before it can reuse next group.
    required_checkpoint_lsn: AtomicU64,
    // Log writer advanced, so buffer space and slots may be free.
    space_ev: Signal,
    // A slot is copied.
    slot_ev: Signal,
    // Waiters of write_up_to, bucketed by block number.
    flush_evs: Box<[Signal]>,
    // Checkpoint advanced.
    checkpoint_ev: Signal,
    // Log writer or free check asks for a checkpoint.
    checkpoint_req: Signal,
    shutdown: AtomicBool,
    flusher_exited: AtomicBool,
    log_sync: LogSync,
    max_write_size: usize,
    wait_interval: Duration,
    mtr_bufs: MtrBufPool,
    recovered: Mutex<Option<RecoveredLog>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    stats: LogStats,
}

impl LogSys {
    /// Open redo log on given files. New files are formatted, otherwise
    /// log is scanned from the latest checkpoint to find its end, and
    /// the records found are kept for recovery.
    /// Log writer and log flusher threads are started.
    pub fn open(config: &LogConfig, files: LogFiles) -> Result<Arc<LogSys>> {
        config.validate()?;
        if files.files.len() != config.log_groups
            || files.files.iter().any(|g| g.len() != config.files_per_group)
        {
            return Err(Error::InvalidConfig("log files do not match log config"));
        }
        let mut groups = LogGroups::new(files.files, config.log_file_size.as_u64())?;
        let buf = LogBuffer::new(config.log_buffer_size.as_u64() as usize);
        let (end_lsn, ckpt, recovered) = if files.created {
            groups.format()?;
            groups.init_fresh(LOG_FIRST_DATA_LSN);
            unsafe {
                init_block(
                    buf.bytes_mut(LOG_START_LSN, LOG_BLOCK_SIZE),
                    block_no(LOG_START_LSN),
                );
            }
            let ckpt = CheckpointInfo {
                no: 0,
                lsn: LOG_FIRST_DATA_LSN,
                group: 0,
                offset: groups.group_offset(0, LOG_FIRST_DATA_LSN),
                buf_size: buf.size() as u32,
            };
            ckpt.write(&*groups.checkpoint_file())?;
            log::info!(
                "redo log created with {} groups of {} bytes",
                groups.n_groups(),
                groups.capacity()
            );
            (LOG_FIRST_DATA_LSN, ckpt, None)
        } else {
            groups.verify()?;
            let ckpt = CheckpointInfo::read_latest(&groups)?;
            let base_lsn = groups.base_from_offset(ckpt.lsn, ckpt.offset)?;
            groups.init_from_checkpoint(ckpt.group as usize, base_lsn);
            let scanned = LogScanner::new(&groups, ckpt.lsn).scan()?;
            groups.set_end(scanned.end_lsn)?;
            let block_lsn = block_floor(scanned.end_lsn);
            unsafe {
                let block = buf.bytes_mut(block_lsn, LOG_BLOCK_SIZE);
                match &scanned.last_block {
                    Some(last) => block.copy_from_slice(last),
                    None => init_block(block, block_no(block_lsn)),
                }
            }
            log::info!(
                "redo log opened, checkpoint {} at lsn {}, end of log at lsn {}",
                ckpt.no,
                ckpt.lsn,
                scanned.end_lsn
            );
            let recovered = RecoveredLog {
                checkpoint_lsn: ckpt.lsn,
                end_lsn: scanned.end_lsn,
                data: scanned.data,
            };
            (scanned.end_lsn, ckpt, Some(recovered))
        };
        let log = Arc::new(LogSys {
            buf,
            reserve: CachePadded::new(AtomicCell::new(ReservePos {
                lsn: end_lsn,
                seq: 0,
            })),
            slots: SlotBank::new(config.log_slots, 0),
            written_lsn: CachePadded::new(AtomicU64::new(end_lsn)),
            flushed_lsn: CachePadded::new(AtomicU64::new(end_lsn)),
            checkpoint_lsn: CachePadded::new(AtomicU64::new(ckpt.lsn)),
            groups: Mutex::new(groups),
            checkpoint_mu: Mutex::new(CheckpointState {
                no: ckpt.no,
                lsn: ckpt.lsn,
            }),
            required_checkpoint_lsn: AtomicU64::new(0),
            space_ev: Signal::default(),
            slot_ev: Signal::default(),
            flush_evs: (0..config.flush_events)
                .map(|_| Signal::default())
                .collect(),
            checkpoint_ev: Signal::default(),
            checkpoint_req: Signal::default(),
            shutdown: AtomicBool::new(false),
            flusher_exited: AtomicBool::new(false),
            log_sync: config.log_sync,
            max_write_size: config.max_write_size.as_u64() as usize,
            wait_interval: Duration::from_millis(config.write_up_to_timeout_ms),
            mtr_bufs: MtrBufPool::new(config.log_slots.min(64)),
            recovered: Mutex::new(recovered),
            threads: Mutex::new(vec![]),
            stats: LogStats::default(),
        });
        let (tx, rx) = flume::unbounded();
        let writer = {
            let log = Arc::clone(&log);
            spawn_named("log-writer", AssertUnwindSafe(move || log.writer_loop(tx)))
        };
        let flusher = {
            let log = Arc::clone(&log);
            spawn_named("log-flusher", AssertUnwindSafe(move || log.flusher_loop(rx)))
        };
        log.threads.lock().extend([writer, flusher]);
        Ok(log)
    }

    /// Next LSN to be reserved.
    #[inline]
    pub fn current_lsn(&self) -> Lsn {
        self.reserve.load().lsn
    }

    /// LSN up to which log is written to files.
    #[inline]
    pub fn written_lsn(&self) -> Lsn {
        self.written_lsn.load(Ordering::Acquire)
    }

    /// LSN up to which log is synced to files.
    #[inline]
    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::Acquire)
    }

    #[inline]
    pub fn checkpoint_lsn(&self) -> Lsn {
        self.checkpoint_lsn.load(Ordering::Acquire)
    }

    /// LSN span of one log group.
    #[inline]
    pub fn group_capacity(&self) -> u64 {
        self.groups.lock().capacity()
    }

    /// Maximum distance between current LSN and checkpoint LSN before
    /// log writer may have to wait for checkpoint to reuse a group.
    #[inline]
    pub fn max_checkpoint_age(&self) -> u64 {
        let groups = self.groups.lock();
        groups.capacity() * (groups.n_groups() as u64 - 1)
    }

    /// Largest redo record group accepted by `reserve`.
    /// From any start position, it spans at most all blocks of log
    /// buffer but one.
    #[inline]
    pub fn max_redo_len(&self) -> usize {
        (self.buf.size() / LOG_BLOCK_SIZE - 2) * LOG_BLOCK_PAYLOAD_SIZE
    }

    #[inline]
    pub fn mtr_bufs(&self) -> &MtrBufPool {
        &self.mtr_bufs
    }

    #[inline]
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Take log content found after checkpoint at startup.
    #[inline]
    pub fn take_recovered(&self) -> Option<RecoveredLog> {
        self.recovered.lock().take()
    }

    /// Reserve an LSN range for `len` bytes of records.
    ///
    /// Blocks while log buffer has no space or the reservation slot is
    /// still used by an earlier round.
    pub fn reserve(&self, len: usize) -> Result<Reservation> {
        debug_assert!(len > 0);
        if len > self.max_redo_len() {
            return Err(Error::RedoTooLarge {
                len,
                capacity: self.max_redo_len(),
            });
        }
        let buf_size = self.buf.size() as Lsn;
        let mut waited = false;
        loop {
            if self.is_shutdown() {
                return Err(Error::StorageShutdown);
            }
            let cur = self.reserve.load();
            if cur.seq == SEALED_SEQ {
                return Err(Error::StorageShutdown);
            }
            let end_lsn = lsn_add(cur.lsn, len);
            let space_ok = || {
                block_floor(end_lsn) + LOG_BLOCK_SIZE as Lsn - block_floor(self.written_lsn())
                    <= buf_size
            };
            if !space_ok() || !self.slots.is_ready(cur.seq) {
                if !waited {
                    waited = true;
                    self.stats.reserve_waits.fetch_add(1, Ordering::Relaxed);
                }
                self.space_ev.wait_until(self.wait_interval, || {
                    self.is_shutdown()
                        || self.reserve.load() != cur
                        || (space_ok() && self.slots.is_ready(cur.seq))
                });
                continue;
            }
            let next = ReservePos {
                lsn: end_lsn,
                seq: cur.seq + 1,
            };
            if self.reserve.compare_exchange(cur, next).is_ok() {
                let res = Reservation {
                    start_lsn: cur.lsn,
                    end_lsn,
                    seq: cur.seq,
                };
                self.slots.fill(&res);
                self.stats.reserve_count.fetch_add(1, Ordering::Relaxed);
                self.stats.log_bytes.fetch_add(len, Ordering::Relaxed);
                return Ok(res);
            }
        }
    }

    /// Copy records into reserved range of log buffer.
    /// When a block is filled, header of next block is initialized.
    pub fn write(&self, res: &Reservation, data: &[u8]) {
        debug_assert_eq!(lsn_add(res.start_lsn, data.len()), res.end_lsn);
        let mut lsn = res.start_lsn;
        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(LOG_BLOCK_DATA_END - block_offset(lsn));
            // the range belongs to this reservation only.
            unsafe {
                self.buf.bytes_mut(lsn, n).copy_from_slice(&rest[..n]);
            }
            rest = &rest[n..];
            lsn += n as Lsn;
            if block_offset(lsn) == LOG_BLOCK_DATA_END {
                let next_block = lsn + LOG_BLOCK_TRL_SIZE as Lsn;
                unsafe {
                    init_block(
                        self.buf.bytes_mut(next_block, LOG_BLOCK_HDR_SIZE),
                        block_no(next_block),
                    );
                }
                lsn = next_block + LOG_BLOCK_HDR_SIZE as Lsn;
            }
        }
        debug_assert_eq!(lsn, res.end_lsn);
    }

    /// Hand the copied reservation to log writer.
    #[inline]
    pub fn complete(&self, res: Reservation) {
        self.slots.complete(&res);
        self.slot_ev.notify_one();
    }

    /// Block until log up to `lsn` is durable.
    /// LSN beyond current LSN is treated as current LSN.
    pub fn write_up_to(&self, lsn: Lsn) -> Result<()> {
        let lsn = lsn.min(self.current_lsn());
        if self.flushed_lsn() >= lsn {
            return Ok(());
        }
        self.stats.write_up_to_waits.fetch_add(1, Ordering::Relaxed);
        self.slot_ev.notify_one();
        let ev = &self.flush_evs[block_no(lsn) as usize % self.flush_evs.len()];
        ev.wait_until(self.wait_interval, || {
            self.flushed_lsn() >= lsn || self.flusher_exited.load(Ordering::Acquire)
        });
        if self.flushed_lsn() >= lsn {
            Ok(())
        } else {
            Err(Error::StorageShutdown)
        }
    }

    /// Reserve, copy and complete in one call.
    /// Returns end LSN of the records.
    #[inline]
    pub fn append(&self, data: &[u8]) -> Result<Lsn> {
        let res = self.reserve(data.len())?;
        self.write(&res, data);
        let end_lsn = res.end_lsn;
        self.complete(res);
        Ok(end_lsn)
    }

    /// Ask checkpointer to advance checkpoint to at least `lsn`.
    #[inline]
    pub fn request_checkpoint(&self, lsn: Lsn) {
        self.required_checkpoint_lsn.fetch_max(lsn, Ordering::AcqRel);
        self.checkpoint_req.notify_all();
    }

    /// Checkpoint LSN requested by log writer or free check.
    #[inline]
    pub fn required_checkpoint_lsn(&self) -> Lsn {
        self.required_checkpoint_lsn.load(Ordering::Acquire)
    }

    /// Wait for a checkpoint request, at most `timeout`.
    #[inline]
    pub fn wait_checkpoint_request(&self, timeout: Duration) {
        let required = self.required_checkpoint_lsn();
        if required > self.checkpoint_lsn() {
            return;
        }
        self.checkpoint_req.wait_until_for(timeout, timeout, || {
            self.required_checkpoint_lsn() > self.checkpoint_lsn() || self.is_shutdown()
        });
    }

    /// Stop log writer and flusher after all reserved records are
    /// written and synced. Reservation fails afterwards.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slot_ev.notify_all();
        self.space_ev.notify_all();
        self.checkpoint_ev.notify_all();
        self.checkpoint_req.notify_all();
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
        log::info!(
            "redo log stopped at lsn {}, flushed lsn {}",
            self.current_lsn(),
            self.flushed_lsn()
        );
    }
}

impl RedoDurability for LogSys {
    #[inline]
    fn flushed_lsn(&self) -> Lsn {
        LogSys::flushed_lsn(self)
    }

    #[inline]
    fn write_up_to(&self, lsn: Lsn) -> Result<()> {
        LogSys::write_up_to(self, lsn)
    }
}

#[derive(Default)]
pub struct LogStats {
    pub reserve_count: AtomicUsize,
    pub reserve_waits: AtomicUsize,
    pub log_bytes: AtomicUsize,
    pub write_count: AtomicUsize,
    pub write_bytes: AtomicUsize,
    pub sync_count: AtomicUsize,
    pub sync_nanos: AtomicUsize,
    pub write_up_to_waits: AtomicUsize,
    pub group_rotations: AtomicUsize,
    pub checkpoint_count: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogSync {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "fsync")]
    Fsync,
    #[serde(rename = "fdatasync")]
    Fdatasync,
}

impl FromStr for LogSync {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("fsync") {
            Ok(LogSync::Fsync)
        } else if s.eq_ignore_ascii_case("fdatasync") {
            Ok(LogSync::Fdatasync)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(LogSync::None)
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

pub const DEFAULT_LOG_FILE_PREFIX: &str = "redo.log";
pub const DEFAULT_LOG_FILE_SIZE: Byte = Byte::from_u64(64 * 1024 * 1024);
pub const DEFAULT_FILES_PER_GROUP: usize = 2;
pub const DEFAULT_LOG_GROUPS: usize = 2;
pub const DEFAULT_LOG_BUFFER_SIZE: Byte = Byte::from_u64(16 * 1024 * 1024);
pub const DEFAULT_LOG_SLOTS: usize = 1024;
pub const DEFAULT_LOG_SYNC: LogSync = LogSync::Fsync;
pub const DEFAULT_WRITE_UP_TO_TIMEOUT_MS: u64 = 10;
pub const DEFAULT_MAX_WRITE_SIZE: Byte = Byte::from_u64(4 * 1024 * 1024);
pub const DEFAULT_FLUSH_EVENTS: usize = 64;
const MIN_LOG_BUFFER_BLOCKS: u64 = 4;
const MIN_LOG_FILE_BLOCKS: u64 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    // Directory of log files.
    pub log_dir: PathBuf,
    // Prefix of log file.
    // the complete file name pattern is:
    // <file-prefix>.<group>.<file-no>
    // e.g. redo.log.0.1
    pub log_file_prefix: String,
    // Size of each log file, including file header.
    pub log_file_size: Byte,
    pub files_per_group: usize,
    // Log groups are reused in a ring, at least two are required
    // so writer can continue while checkpoint releases the other.
    pub log_groups: usize,
    pub log_buffer_size: Byte,
    // Number of reservation slots, limits concurrent uncopied
    // reservations.
    pub log_slots: usize,
    // Controls which method to sync data on disk.
    pub log_sync: LogSync,
    // Longest time a waiter sleeps before re-checking log progress.
    pub write_up_to_timeout_ms: u64,
    // Upper bound of bytes log writer collects for one write.
    pub max_write_size: Byte,
    // Number of event buckets for write_up_to waiters.
    pub flush_events: usize,
}

impl Default for LogConfig {
    #[inline]
    fn default() -> Self {
        LogConfig {
            log_dir: PathBuf::from("."),
            log_file_prefix: String::from(DEFAULT_LOG_FILE_PREFIX),
            log_file_size: DEFAULT_LOG_FILE_SIZE,
            files_per_group: DEFAULT_FILES_PER_GROUP,
            log_groups: DEFAULT_LOG_GROUPS,
            log_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
            log_slots: DEFAULT_LOG_SLOTS,
            log_sync: DEFAULT_LOG_SYNC,
            write_up_to_timeout_ms: DEFAULT_WRITE_UP_TO_TIMEOUT_MS,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            flush_events: DEFAULT_FLUSH_EVENTS,
        }
    }
}

impl LogConfig {
    #[inline]
    pub fn log_dir(mut self, log_dir: impl AsRef<Path>) -> Self {
        self.log_dir = log_dir.as_ref().to_path_buf();
        self
    }

    #[inline]
    pub fn log_file_prefix(mut self, log_file_prefix: impl Into<String>) -> Self {
        self.log_file_prefix = log_file_prefix.into();
        self
    }

    #[inline]
    pub fn log_file_size<T>(mut self, log_file_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.log_file_size = Byte::from(log_file_size);
        self
    }

    #[inline]
    pub fn files_per_group(mut self, files_per_group: usize) -> Self {
        self.files_per_group = files_per_group;
        self
    }

    #[inline]
    pub fn log_groups(mut self, log_groups: usize) -> Self {
        self.log_groups = log_groups;
        self
    }

    #[inline]
    pub fn log_buffer_size<T>(mut self, log_buffer_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.log_buffer_size = Byte::from(log_buffer_size);
        self
    }

    #[inline]
    pub fn log_slots(mut self, log_slots: usize) -> Self {
        self.log_slots = log_slots;
        self
    }

    #[inline]
    pub fn log_sync(mut self, log_sync: LogSync) -> Self {
        self.log_sync = log_sync;
        self
    }

    #[inline]
    pub fn write_up_to_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.write_up_to_timeout_ms = timeout_ms;
        self
    }

    #[inline]
    pub fn max_write_size<T>(mut self, max_write_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.max_write_size = Byte::from(max_write_size);
        self
    }

    #[inline]
    pub fn flush_events(mut self, flush_events: usize) -> Self {
        self.flush_events = flush_events;
        self
    }

    /// Open log files of this config on disk.
    #[inline]
    pub fn open_files(&self) -> Result<LogFiles> {
        LogFiles::on_disk(
            &self.log_dir,
            &self.log_file_prefix,
            self.log_groups,
            self.files_per_group,
        )
    }

    /// Create log files of this config in memory.
    #[inline]
    pub fn memory_files(&self) -> LogFiles {
        LogFiles::in_memory(self.log_groups, self.files_per_group)
    }

    pub fn validate(&self) -> Result<()> {
        let block = LOG_BLOCK_SIZE as u64;
        if self.log_groups < 2 {
            return Err(Error::InvalidConfig("at least two log groups required"));
        }
        if self.files_per_group == 0 {
            return Err(Error::InvalidConfig("files_per_group must be positive"));
        }
        let file_size = self.log_file_size.as_u64();
        if file_size % block != 0 || file_size < LOG_FILE_HDR_SIZE + MIN_LOG_FILE_BLOCKS * block {
            return Err(Error::InvalidConfig("invalid log_file_size"));
        }
        let buffer_size = self.log_buffer_size.as_u64();
        if buffer_size % block != 0 || buffer_size < MIN_LOG_BUFFER_BLOCKS * block {
            return Err(Error::InvalidConfig(
                "log_buffer_size must be multiple of block size and at least four blocks",
            ));
        }
        if buffer_size > u32::MAX as u64 {
            return Err(Error::InvalidConfig("log_buffer_size too large"));
        }
        if self.log_slots == 0 {
            return Err(Error::InvalidConfig("log_slots must be positive"));
        }
        if self.write_up_to_timeout_ms == 0 {
            return Err(Error::InvalidConfig("write_up_to_timeout_ms must be positive"));
        }
        if self.max_write_size.as_u64() == 0 {
            return Err(Error::InvalidConfig("max_write_size must be positive"));
        }
        if self.flush_events == 0 {
            return Err(Error::InvalidConfig("flush_events must be positive"));
        }
        Ok(())
    }
}

/// Elapsed nanoseconds as usize, for stats.
#[inline]
pub(crate) fn elapsed_nanos(start: Instant) -> usize {
    start.elapsed().as_nanos() as usize
}
