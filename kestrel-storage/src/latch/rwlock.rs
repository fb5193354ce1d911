use event_listener::{listener, Event, Listener};
use parking_lot::lock_api::{
    GuardSend, RawMutex as RawMutexApi, RawRwLock as RawRwLockApi,
    RawRwLockDowngrade as RawRwLockDowngradeApi,
};
use parking_lot::RawMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const WRITER_BIT: usize = 1;
const ONE_READER: usize = 2;

/// Reader-writer latch used for page content and auxiliary locks.
///
/// Writers are serialized by an inner mutex, then wait for existing
/// readers to drain. New readers are blocked as soon as a writer sets
/// the writer bit, so writers are not starved.
pub struct RawRwLatch {
    /// Acquired by the writer
    mu: RawMutex,
    /// Event triggered when last reader is dropped.
    no_readers: Event,
    /// Event triggered when writer is dropped.
    no_writer: Event,
    /// Current state of the latch.
    ///
    /// The least significant bit (`WRITER_BIT`) is set to 1 when a writer is holding the latch or
    /// trying to acquire it.
    ///
    /// The upper bits contain the number of currently active readers. Each active reader
    /// increments the state by `ONE_READER`.
    state: AtomicUsize,
}

impl RawRwLatch {
    #[inline]
    pub const fn new() -> Self {
        RawRwLatch {
            mu: RawMutex::INIT,
            no_readers: Event::new(),
            no_writer: Event::new(),
            state: AtomicUsize::new(0),
        }
    }

    /// Returns number of shared holders.
    #[inline]
    pub fn readers(&self) -> usize {
        self.state.load(Ordering::Acquire) >> 1
    }
}

impl Default for RawRwLatch {
    #[inline]
    fn default() -> Self {
        RawRwLatch::new()
    }
}

unsafe impl RawRwLockApi for RawRwLatch {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: RawRwLatch = RawRwLatch::new();

    type GuardMarker = GuardSend;

    #[inline]
    fn try_lock_shared(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & WRITER_BIT != 0 {
                return false;
            }
            match self.state.compare_exchange(
                state,
                state + ONE_READER,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(s) => state = s,
            }
        }
    }

    #[inline]
    fn lock_shared(&self) {
        loop {
            if self.try_lock_shared() {
                return;
            }
            listener!(self.no_writer => listener);
            // re-check after registration, unlock may happen in between.
            if self.try_lock_shared() {
                return;
            }
            listener.wait();
        }
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        if !self.mu.try_lock() {
            return false;
        }
        if self
            .state
            .compare_exchange(0, WRITER_BIT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true; // no reader, no writer
        }
        unsafe {
            self.mu.unlock();
        }
        false
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.mu.lock();
        let mut state = self.state.fetch_or(WRITER_BIT, Ordering::SeqCst);
        while state & !WRITER_BIT != 0 {
            listener!(self.no_readers => listener);
            state = self.state.load(Ordering::SeqCst);
            if state & !WRITER_BIT == 0 {
                break;
            }
            listener.wait();
            state = self.state.load(Ordering::SeqCst);
        }
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        let state = self.state.fetch_sub(ONE_READER, Ordering::SeqCst);
        assert!(
            state & !WRITER_BIT >= ONE_READER,
            "release shared latch which is not held"
        );
        if state & !WRITER_BIT == ONE_READER {
            // last reader should trigger "no_readers" event.
            self.no_readers.notify(usize::MAX);
        }
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        let state = self.state.fetch_and(!WRITER_BIT, Ordering::SeqCst);
        assert!(
            state & WRITER_BIT != 0,
            "release exclusive latch which is not held"
        );
        unsafe {
            self.mu.unlock();
        }
        self.no_writer.notify(usize::MAX);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) != 0
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        self.state.load(Ordering::Acquire) == WRITER_BIT
    }
}

unsafe impl RawRwLockDowngradeApi for RawRwLatch {
    #[inline]
    unsafe fn downgrade(&self) {
        debug_assert!(self.state.load(Ordering::Acquire) & !WRITER_BIT == 0);
        self.state.fetch_add(ONE_READER, Ordering::SeqCst);
        self.unlock_exclusive();
    }
}
