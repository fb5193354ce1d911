use crate::buffer::frame::FrameId;
use crate::buffer::list::IndexList;
use crate::buffer::page::Lsn;

/// List of dirty frames ordered by oldest modification LSN.
///
/// Head holds the most recently dirtied frame and tail the oldest one.
/// Normal commits always insert at head, which keeps the order as long
/// as insertions are serialized in LSN order.
pub struct FlushList {
    list: IndexList,
    oldest: Box<[Lsn]>,
}

impl FlushList {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        FlushList {
            list: IndexList::new(capacity),
            oldest: vec![0; capacity].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: FrameId) -> bool {
        self.list.contains(id)
    }

    /// Insert a newly dirtied frame at head.
    #[inline]
    pub fn insert_front(&mut self, id: FrameId, oldest: Lsn) {
        if let Some(head) = self.list.front() {
            assert!(
                self.oldest[head] <= oldest,
                "flush list out of order: head={} new={}",
                self.oldest[head],
                oldest
            );
        }
        self.oldest[id] = oldest;
        self.list.push_front(id);
    }

    /// Insert a frame at its ordered position, searching from head.
    /// Used by recovery, where modifications are not stamped in order.
    #[inline]
    pub fn insert_sorted(&mut self, id: FrameId, oldest: Lsn) {
        self.oldest[id] = oldest;
        let mut cur = self.list.front();
        while let Some(c) = cur {
            if self.oldest[c] <= oldest {
                self.list.insert_before(c, id);
                return;
            }
            cur = self.list.next(c);
        }
        self.list.push_back(id);
    }

    #[inline]
    pub fn remove(&mut self, id: FrameId) {
        self.list.remove(id);
        self.oldest[id] = 0;
    }

    /// Returns the minimum oldest modification, i.e. LSN of tail.
    #[inline]
    pub fn min_lsn(&self) -> Option<Lsn> {
        self.list.back().map(|id| self.oldest[id])
    }

    #[inline]
    pub fn oldest_of(&self, id: FrameId) -> Lsn {
        self.oldest[id]
    }

    /// Iterate (frame id, oldest modification) from tail to head.
    #[inline]
    pub fn iter_oldest(&self) -> impl Iterator<Item = (FrameId, Lsn)> + '_ {
        self.list.iter_rev().map(|id| (id, self.oldest[id]))
    }

    /// Check that LSNs are non-decreasing from tail to head.
    pub fn validate(&self) -> bool {
        let mut prev = 0;
        for (_, lsn) in self.iter_oldest() {
            if lsn < prev || lsn == 0 {
                return false;
            }
            prev = lsn;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flush_list_front_insert() {
        let mut fl = FlushList::new(8);
        assert_eq!(fl.min_lsn(), None);
        fl.insert_front(3, 100);
        fl.insert_front(1, 100);
        fl.insert_front(5, 180);
        assert_eq!(fl.min_lsn(), Some(100));
        assert_eq!(
            fl.iter_oldest().collect::<Vec<_>>(),
            vec![(3, 100), (1, 100), (5, 180)]
        );
        fl.remove(3);
        fl.remove(1);
        assert_eq!(fl.min_lsn(), Some(180));
        assert!(fl.validate());
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_flush_list_front_insert_out_of_order() {
        let mut fl = FlushList::new(4);
        fl.insert_front(0, 200);
        fl.insert_front(1, 100);
    }

    proptest! {
        #[test]
        fn prop_flush_list_insert_sorted(lsns in prop::collection::vec(1u64..10_000, 1..64)) {
            let mut fl = FlushList::new(64);
            for (id, lsn) in lsns.iter().enumerate() {
                fl.insert_sorted(id, *lsn);
                prop_assert!(fl.validate());
            }
            prop_assert_eq!(fl.min_lsn(), lsns.iter().copied().min());
            // removing arbitrary frames keeps order.
            for id in (0..lsns.len()).step_by(3) {
                fl.remove(id);
                prop_assert!(fl.validate());
            }
        }
    }
}
