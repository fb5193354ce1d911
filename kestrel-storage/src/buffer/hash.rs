use crate::buffer::frame::FrameId;
use crate::buffer::page::PageId;
use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;

pub type HashPartition = HashMap<PageId, FrameId>;

/// Page hash mapping page id to frame, split into partitions each
/// protected by its own reader-writer lock.
pub struct PageHash {
    partitions: Box<[CachePadded<RwLock<HashPartition>>]>,
    mask: u64,
}

impl PageHash {
    /// Create page hash, number of partitions is rounded up to power of two.
    #[inline]
    pub fn new(n_partitions: usize) -> Self {
        let n = n_partitions.max(1).next_power_of_two();
        let partitions = (0..n)
            .map(|_| CachePadded::new(RwLock::new(HashMap::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        PageHash {
            partitions,
            mask: n as u64 - 1,
        }
    }

    #[inline]
    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    fn partition(&self, page_id: PageId) -> &RwLock<HashPartition> {
        let idx = (page_id.fold() >> 32) & self.mask;
        &self.partitions[idx as usize]
    }

    #[inline]
    pub fn read(&self, page_id: PageId) -> RwLockReadGuard<'_, HashPartition> {
        self.partition(page_id).read()
    }

    #[inline]
    pub fn write(&self, page_id: PageId) -> RwLockWriteGuard<'_, HashPartition> {
        self.partition(page_id).write()
    }

    /// Total number of entries, not a consistent snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect all entries, not a consistent snapshot.
    #[inline]
    pub fn entries(&self) -> Vec<(PageId, FrameId)> {
        let mut res = Vec::new();
        for p in self.partitions.iter() {
            res.extend(p.read().iter().map(|(k, v)| (*k, *v)));
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_hash_partitions() {
        let hash = PageHash::new(5);
        assert_eq!(hash.n_partitions(), 8);
        for i in 0..100u32 {
            let id = PageId::new(i % 3, i);
            hash.write(id).insert(id, i as usize);
        }
        assert_eq!(hash.len(), 100);
        let id = PageId::new(1, 1);
        assert_eq!(hash.read(id).get(&id), Some(&1));
        hash.write(id).remove(&id);
        assert_eq!(hash.read(id).get(&id), None);
        assert_eq!(hash.entries().len(), 99);
    }
}
