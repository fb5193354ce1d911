pub mod buffer;
pub mod engine;
pub mod error;
pub mod io;
pub mod latch;
pub mod log;
pub mod mtr;
pub mod notify;
pub mod thread;

pub mod prelude {
    pub use crate::buffer::page::{Lsn, PageId, PageNo, SpaceId, PAGE_DATA_END, PAGE_DATA_START};
    pub use crate::buffer::{BufferPool, BufferPoolConfig, FetchMode, PageFix};
    pub use crate::engine::{CheckpointConfig, Storage, StorageConfig};
    pub use crate::error::*;
    pub use crate::io::{FileIo, FileSpaces, MemFile, Tablespaces};
    pub use crate::latch::LatchMode;
    pub use crate::log::{LogConfig, LogFiles, LogSync, LogSys};
    pub use crate::mtr::{BlockRef, LogMode, Mtr};
}
