mod evict;
mod flush;
pub mod flush_list;
pub mod frame;
pub mod guard;
pub mod hash;
pub mod list;
pub mod lru;
pub mod page;
mod pool;

pub use guard::{PageFix, PageReadGuard, PageWriteGuard};
pub use pool::*;

use crate::buffer::page::Lsn;
use crate::error::Result;

/// Durability collaborator of buffer pool.
///
/// A dirty page can be written back only after redo log up to its newest
/// modification is on stable storage.
pub trait RedoDurability: Send + Sync {
    /// LSN up to which redo is durable.
    fn flushed_lsn(&self) -> Lsn;

    /// Block until redo up to `lsn` is durable.
    fn write_up_to(&self, lsn: Lsn) -> Result<()>;
}

/// Durability for pools without redo log, every LSN is durable.
pub struct NoRedo;

impl RedoDurability for NoRedo {
    #[inline]
    fn flushed_lsn(&self) -> Lsn {
        Lsn::MAX
    }

    #[inline]
    fn write_up_to(&self, _lsn: Lsn) -> Result<()> {
        Ok(())
    }
}
