mod rwlock;

pub use rwlock::RawRwLatch;

/// Reader-writer latch protecting a value.
pub type RwLatch<T> = parking_lot::lock_api::RwLock<RawRwLatch, T>;
pub type RwLatchReadGuard<'a, T> = parking_lot::lock_api::RwLockReadGuard<'a, RawRwLatch, T>;
pub type RwLatchWriteGuard<'a, T> = parking_lot::lock_api::RwLockWriteGuard<'a, RawRwLatch, T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}
