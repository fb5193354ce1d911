//! Storage engine of Kestrel.
//!
//! This module provides the main entry point of the storage kernel,
//! including open, recover, checkpoint and shutdown.
use crate::buffer::page::{Lsn, SpaceId};
use crate::buffer::{BufferPool, BufferPoolConfig, RedoDurability};
use crate::error::{Error, Result};
use crate::io::{FileSpaces, Tablespaces};
use crate::log::{recover, LogConfig, LogFiles, LogSys, RecoveryStats};
use crate::mtr::Mtr;
use crate::thread::spawn_named;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Storage engine of Kestrel.
///
/// Only this handle stops the engine. The checkpointer thread shares
/// the inner part.
pub struct Storage(Arc<StorageInner>);

impl Deref for Storage {
    type Target = StorageInner;
    #[inline]
    fn deref(&self) -> &StorageInner {
        &self.0
    }
}

pub struct StorageInner {
    pub config: StorageConfig,
    pub spaces: Arc<FileSpaces>,
    pub log: Arc<LogSys>,
    pub pool: BufferPool,
    recovered: Mutex<Option<RecoveryStats>>,
    stopped: AtomicBool,
    checkpointer: Mutex<Option<JoinHandle<()>>>,
}

impl Storage {
    /// Open storage under directories of the config.
    /// Log files are created if none exists.
    pub fn open(config: StorageConfig) -> Result<Storage> {
        config.validate()?;
        let spaces = Arc::new(FileSpaces::on_disk(&config.data_dir)?);
        let files = config.log.open_files()?;
        Storage::open_with(config, spaces, files)
    }

    /// Open storage on given tablespaces and log files.
    ///
    /// Log found after the last checkpoint is replayed before return,
    /// unless recovery is skipped by config.
    pub fn open_with(config: StorageConfig, spaces: Arc<FileSpaces>, files: LogFiles) -> Result<Storage> {
        config.validate()?;
        let log = LogSys::open(&config.log, files)?;
        let pool = match BufferPool::new(
            &config.buffer,
            Arc::clone(&spaces) as Arc<dyn Tablespaces>,
            Arc::clone(&log) as Arc<dyn RedoDurability>,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                log.shutdown();
                return Err(e);
            }
        };
        let storage = Storage(Arc::new(StorageInner {
            config,
            spaces,
            log,
            pool,
            recovered: Mutex::new(None),
            stopped: AtomicBool::new(false),
            checkpointer: Mutex::new(None),
        }));
        if storage.config.skip_recovery {
            if let Some(recovered) = storage.log.take_recovered() {
                if !recovered.data.is_empty() {
                    log::warn!(
                        "skip recovery of {} bytes of log from lsn {}",
                        recovered.data.len(),
                        recovered.checkpoint_lsn
                    );
                }
            }
        } else {
            // dropping storage on error stops the log.
            storage.recover()?;
        }
        let inner = Arc::clone(&storage.0);
        let handle = spawn_named(
            "checkpointer",
            AssertUnwindSafe(move || inner.checkpointer_loop()),
        );
        *storage.checkpointer.lock() = Some(handle);
        Ok(storage)
    }

    /// Stop checkpointer, flush all dirty pages, make a final
    /// checkpoint and stop redo log.
    pub fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let res = self.checkpoint(true);
        if let Err(e) = &res {
            log::error!("final checkpoint failed: {}", e);
        }
        self.log.shutdown();
        if let Some(handle) = self.checkpointer.lock().take() {
            let _ = handle.join();
        }
        log::info!("storage stopped at lsn {}", self.log.current_lsn());
        res.map(|_| ())
    }
}

impl Drop for Storage {
    #[inline]
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl StorageInner {
    /// Start a mini-transaction, after making sure redo log has room.
    #[inline]
    pub fn mtr(&self) -> Result<Mtr<'_>> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::StorageShutdown);
        }
        self.log_free_check()?;
        Ok(Mtr::start(&self.pool, &self.log))
    }

    /// Check distance between current LSN and checkpoint LSN.
    ///
    /// Past async threshold, checkpointer is asked to advance.
    /// Past sync threshold, caller flushes dirty pages and makes the
    /// checkpoint itself.
    /// Must not be called while holding page latches.
    pub fn log_free_check(&self) -> Result<()> {
        let (async_age, sync_age) = self.checkpoint_ages();
        let current = self.log.current_lsn();
        let age = current - self.log.checkpoint_lsn();
        if age <= async_age {
            return Ok(());
        }
        let target = current - async_age;
        if age <= sync_age {
            self.log.request_checkpoint(target);
            return Ok(());
        }
        log::debug!(
            "checkpoint age {} exceeds sync threshold {}, flush to lsn {}",
            age,
            sync_age,
            target
        );
        self.pool.flush_list_batch(target, usize::MAX)?;
        self.make_checkpoint()?;
        Ok(())
    }

    /// Drop a tablespace and discard its cached pages without writing
    /// them, so they no longer hold back checkpoint.
    pub fn drop_space(&self, space: SpaceId) -> Result<()> {
        self.spaces.drop_space(space)?;
        let n_freed = self.pool.discard_space(space);
        log::info!("tablespace {} dropped, {} cached pages discarded", space, n_freed);
        Ok(())
    }

    /// Async and sync checkpoint age thresholds.
    #[inline]
    pub fn checkpoint_ages(&self) -> (u64, u64) {
        let max_age = self.log.max_checkpoint_age() as f64;
        let async_age = (max_age * self.config.checkpoint.async_age_ratio) as u64;
        let sync_age = (max_age * self.config.checkpoint.sync_age_ratio) as u64;
        (async_age, sync_age)
    }

    /// Make a checkpoint. With `sync_flush`, all log is written and all
    /// dirty pages are flushed first, so the checkpoint reaches current
    /// LSN.
    /// Returns checkpoint LSN.
    pub fn checkpoint(&self, sync_flush: bool) -> Result<Lsn> {
        if sync_flush {
            self.log.write_up_to(self.log.current_lsn())?;
            self.pool.flush_all()?;
        }
        self.make_checkpoint()?;
        Ok(self.log.checkpoint_lsn())
    }

    /// Write checkpoint at the oldest modification not yet on disk.
    fn make_checkpoint(&self) -> Result<bool> {
        // Written LSN must be read before flush list. Any mini-transaction
        // whose redo is written has already linked its pages.
        let written = self.log.written_lsn();
        let lsn = match self.pool.min_oldest_modification() {
            Some(oldest) => oldest.min(written),
            None => written,
        };
        if lsn <= self.log.checkpoint_lsn() {
            return Ok(false);
        }
        // Pages flushed below checkpoint must survive a crash.
        self.spaces.sync_all()?;
        self.log.checkpoint(lsn)
    }

    /// Replay log found after the last checkpoint at startup.
    /// Calling it again returns stats of the first run, None if
    /// recovery was skipped.
    pub fn recover(&self) -> Result<Option<RecoveryStats>> {
        let Some(recovered) = self.log.take_recovered() else {
            return Ok(*self.recovered.lock());
        };
        let stats = recover(&self.pool, &recovered)?;
        *self.recovered.lock() = Some(stats);
        Ok(Some(stats))
    }

    /// Statistics of recovery done at startup.
    #[inline]
    pub fn recovery_stats(&self) -> Option<RecoveryStats> {
        *self.recovered.lock()
    }

    fn checkpointer_loop(&self) {
        let interval = Duration::from_millis(self.config.checkpoint.interval_ms);
        let batch = self.config.checkpoint.flush_batch_pages;
        let mut last = Instant::now();
        loop {
            self.log.wait_checkpoint_request(interval);
            if self.stopped.load(Ordering::Acquire) || self.log.is_shutdown() {
                break;
            }
            let required = self.log.required_checkpoint_lsn();
            let requested = required > self.log.checkpoint_lsn();
            if !requested && last.elapsed() < interval {
                continue;
            }
            last = Instant::now();
            let (async_age, _) = self.checkpoint_ages();
            let limit = self
                .log
                .current_lsn()
                .saturating_sub(async_age / 2)
                .max(required);
            let res = self
                .pool
                .flush_list_batch(limit, if requested { usize::MAX } else { batch })
                .and_then(|_| self.make_checkpoint());
            if let Err(e) = res {
                if self.stopped.load(Ordering::Acquire) {
                    break;
                }
                log::warn!("checkpoint failed: {}", e);
            }
        }
    }
}

pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_ASYNC_AGE_RATIO: f64 = 0.7;
pub const DEFAULT_SYNC_AGE_RATIO: f64 = 0.85;
pub const DEFAULT_FLUSH_BATCH_PAGES: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    // Interval of periodic checkpoint.
    pub interval_ms: u64,
    // Checkpoint age, as ratio of log capacity reusable without
    // checkpoint, from which checkpointer is asked to advance.
    pub async_age_ratio: f64,
    // Checkpoint age from which mini-transactions flush pages
    // themselves before start.
    pub sync_age_ratio: f64,
    // Pages flushed by one periodic checkpoint at most.
    pub flush_batch_pages: usize,
}

impl Default for CheckpointConfig {
    #[inline]
    fn default() -> Self {
        CheckpointConfig {
            interval_ms: DEFAULT_CHECKPOINT_INTERVAL_MS,
            async_age_ratio: DEFAULT_ASYNC_AGE_RATIO,
            sync_age_ratio: DEFAULT_SYNC_AGE_RATIO,
            flush_batch_pages: DEFAULT_FLUSH_BATCH_PAGES,
        }
    }
}

impl CheckpointConfig {
    #[inline]
    pub fn interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    #[inline]
    pub fn async_age_ratio(mut self, ratio: f64) -> Self {
        self.async_age_ratio = ratio;
        self
    }

    #[inline]
    pub fn sync_age_ratio(mut self, ratio: f64) -> Self {
        self.sync_age_ratio = ratio;
        self
    }

    #[inline]
    pub fn flush_batch_pages(mut self, pages: usize) -> Self {
        self.flush_batch_pages = pages;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidConfig("checkpoint interval_ms must be positive"));
        }
        if !(self.async_age_ratio > 0.0
            && self.async_age_ratio < self.sync_age_ratio
            && self.sync_age_ratio < 1.0)
        {
            return Err(Error::InvalidConfig(
                "checkpoint age ratios must satisfy 0 < async < sync < 1",
            ));
        }
        if self.flush_batch_pages == 0 {
            return Err(Error::InvalidConfig("flush_batch_pages must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Directory of tablespace files.
    pub data_dir: PathBuf,
    pub buffer: BufferPoolConfig,
    pub log: LogConfig,
    pub checkpoint: CheckpointConfig,
    // Open without replaying redo log, e.g. to inspect a damaged
    // database.
    pub skip_recovery: bool,
}

impl Default for StorageConfig {
    #[inline]
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("."),
            buffer: BufferPoolConfig::default(),
            log: LogConfig::default(),
            checkpoint: CheckpointConfig::default(),
            skip_recovery: false,
        }
    }
}

impl StorageConfig {
    #[inline]
    pub fn data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: BufferPoolConfig) -> Self {
        self.buffer = buffer;
        self
    }

    #[inline]
    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    #[inline]
    pub fn checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    #[inline]
    pub fn skip_recovery(mut self, skip_recovery: bool) -> Self {
        self.skip_recovery = skip_recovery;
        self
    }

    #[inline]
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StorageConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|_| Error::InvalidFormat)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        self.log.validate()?;
        self.checkpoint.validate()
    }
}
