use crate::buffer::page::{PageId, SpaceId};
use std::array::TryFromSliceError;
use std::io::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid format")]
    InvalidFormat,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("IO error: {0:?}")]
    IOError(ErrorKind),
    // buffer pool errors
    #[error("tablespace {0} has been deleted")]
    SpaceDeleted(SpaceId),
    #[error("page {0:?} corrupted")]
    PageCorrupted(PageId),
    #[error("no free frame in buffer pool after {0} attempts")]
    BufferPoolExhausted(usize),
    #[error("buffer pool size is too small")]
    BufferPoolSizeTooSmall,
    // redo log errors
    #[error("redo of {len} bytes exceeds log buffer capacity {capacity}")]
    RedoTooLarge { len: usize, capacity: usize },
    #[error("log file corrupted")]
    LogFileCorrupted,
    #[error("no valid checkpoint found in log files")]
    NoValidCheckpoint,
    #[error("storage shutdown")]
    StorageShutdown,
    #[error("glob error")]
    GlobError,
}

impl From<TryFromSliceError> for Error {
    #[inline]
    fn from(_src: TryFromSliceError) -> Error {
        Error::InvalidFormat
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(src: std::io::Error) -> Self {
        Error::IOError(src.kind())
    }
}

impl From<glob::GlobError> for Error {
    #[inline]
    fn from(_src: glob::GlobError) -> Self {
        Error::GlobError
    }
}

impl From<glob::PatternError> for Error {
    #[inline]
    fn from(_src: glob::PatternError) -> Self {
        Error::GlobError
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(_src: toml::de::Error) -> Self {
        Error::InvalidFormat
    }
}

/// Terminate the process after an IO failure that breaks the durability
/// contract, e.g. a torn redo write or a failed checkpoint.
/// Such failures can not be retried mid-stream.
#[cold]
#[inline(never)]
pub fn fatal_io(what: &str, err: &std::io::Error) -> ! {
    log::error!("fatal IO error on {}: {}, abort", what, err);
    std::process::abort()
}
