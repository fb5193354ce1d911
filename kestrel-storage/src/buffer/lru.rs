use crate::buffer::frame::FrameId;
use crate::buffer::list::IndexList;

/// Below this length the LRU list has no old sublist.
pub const LRU_OLD_MIN_LEN: usize = 16;
/// Allowed deviation of old sublist length before it is adjusted.
pub const LRU_OLD_TOLERANCE: usize = 2;

/// LRU list split into a young sublist at head and an old sublist at
/// tail. Newly read pages enter at the head of the old sublist, so a
/// scan touching many pages once can not flush out the hot set.
///
/// The boundary is tracked by `old_head`, the first frame of the old
/// sublist. Once the old sublist deviates from `old_pct` percent of the
/// list by more than `LRU_OLD_TOLERANCE`, the boundary is walked back
/// to the exact target.
pub struct LruList {
    list: IndexList,
    old: Box<[bool]>,
    old_head: Option<FrameId>,
    old_len: usize,
    old_pct: usize,
}

impl LruList {
    #[inline]
    pub fn new(capacity: usize, old_pct: usize) -> Self {
        debug_assert!(old_pct > 0 && old_pct < 100);
        LruList {
            list: IndexList::new(capacity),
            old: vec![false; capacity].into_boxed_slice(),
            old_head: None,
            old_len: 0,
            old_pct,
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
    pub fn old_len(&self) -> usize {
        self.old_len
    }

    #[inline]
    pub fn contains(&self, id: FrameId) -> bool {
        self.list.contains(id)
    }

    #[inline]
    pub fn is_old(&self, id: FrameId) -> bool {
        self.old[id]
    }

    /// Change ratio of old sublist.
    #[inline]
    pub fn set_old_pct(&mut self, old_pct: usize) {
        debug_assert!(old_pct > 0 && old_pct < 100);
        self.old_pct = old_pct;
        self.rebalance();
    }

    /// Add a frame into LRU list.
    /// If `old` is true and old sublist exists, the frame is inserted at
    /// head of old sublist, otherwise at head of the whole list.
    #[inline]
    pub fn add(&mut self, id: FrameId, old: bool) {
        match self.old_head {
            Some(old_head) if old => {
                self.list.insert_before(old_head, id);
                self.old[id] = true;
                self.old_head = Some(id);
                self.old_len += 1;
            }
            _ => self.list.push_front(id),
        }
        self.rebalance();
    }

    #[inline]
    pub fn remove(&mut self, id: FrameId) {
        if self.old[id] {
            if self.old_head == Some(id) {
                self.old_head = self.list.next(id);
            }
            self.old[id] = false;
            self.old_len -= 1;
        }
        self.list.remove(id);
        self.rebalance();
    }

    /// Move the frame to head of the whole list.
    #[inline]
    pub fn make_young(&mut self, id: FrameId) {
        self.remove(id);
        self.add(id, false);
    }

    /// Iterate from tail (least recently used) to head.
    #[inline]
    pub fn iter_rev(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.list.iter_rev()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.list.iter()
    }

    #[inline]
    fn target_old_len(&self) -> usize {
        (self.list.len() * self.old_pct / 100).max(1)
    }

    fn rebalance(&mut self) {
        let len = self.list.len();
        if len < LRU_OLD_MIN_LEN {
            // too short to keep old sublist.
            if let Some(old_head) = self.old_head.take() {
                let mut cur = Some(old_head);
                while let Some(id) = cur {
                    self.old[id] = false;
                    cur = self.list.next(id);
                }
                self.old_len = 0;
            }
            return;
        }
        let target = self.target_old_len();
        if self.old_head.is_none() {
            debug_assert_eq!(self.old_len, 0);
            // initialize old sublist from tail.
            let mut cur = self.list.back();
            while let Some(id) = cur {
                if self.old_len == target {
                    break;
                }
                self.old[id] = true;
                self.old_len += 1;
                self.old_head = Some(id);
                cur = self.list.prev(id);
            }
            return;
        }
        if self.old_len + LRU_OLD_TOLERANCE >= target && self.old_len <= target + LRU_OLD_TOLERANCE
        {
            return;
        }
        while self.old_len < target {
            let Some(prev) = self.old_head.and_then(|id| self.list.prev(id)) else {
                break;
            };
            self.old[prev] = true;
            self.old_head = Some(prev);
            self.old_len += 1;
        }
        while self.old_len > target {
            let Some(id) = self.old_head else {
                break;
            };
            self.old[id] = false;
            self.old_head = self.list.next(id);
            self.old_len -= 1;
        }
    }

    /// Check boundary consistency, used by validation.
    pub fn validate(&self) -> bool {
        let mut in_old = false;
        let mut n_old = 0;
        for id in self.list.iter() {
            if Some(id) == self.old_head {
                in_old = true;
            }
            if self.old[id] != in_old {
                return false;
            }
            if in_old {
                n_old += 1;
            }
        }
        if n_old != self.old_len {
            return false;
        }
        if self.list.len() < LRU_OLD_MIN_LEN {
            return n_old == 0;
        }
        let target = self.target_old_len();
        n_old + LRU_OLD_TOLERANCE >= target && n_old <= target + LRU_OLD_TOLERANCE
    }
}
