use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const MAX_CACHED_PER_SHARD: usize = 32;
/// Buffers grown beyond this are dropped instead of cached.
const MAX_CACHED_CAPACITY: usize = 64 * 1024;
const INITIAL_CAPACITY: usize = 512;

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD: usize = NEXT_SHARD.fetch_add(1, Ordering::Relaxed);
}

/// Pool of redo buffers of mini-transactions, sharded by thread.
pub struct MtrBufPool {
    shards: Box<[CachePadded<Mutex<Vec<Vec<u8>>>>]>,
}

impl MtrBufPool {
    #[inline]
    pub fn new(n_shards: usize) -> Self {
        let shards = (0..n_shards.max(1))
            .map(|_| CachePadded::new(Mutex::new(Vec::new())))
            .collect::<Vec<_>>();
        MtrBufPool {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    fn shard(&self) -> &Mutex<Vec<Vec<u8>>> {
        let idx = SHARD.with(|s| *s) % self.shards.len();
        &self.shards[idx]
    }

    #[inline]
    pub fn get(&self) -> Vec<u8> {
        self.shard()
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY))
    }

    #[inline]
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_CACHED_CAPACITY {
            return;
        }
        buf.clear();
        let mut shard = self.shard().lock();
        if shard.len() < MAX_CACHED_PER_SHARD {
            shard.push(buf);
        }
    }

    #[inline]
    pub fn cached(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}
