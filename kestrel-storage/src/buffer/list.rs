use crate::buffer::frame::FrameId;

const NIL: FrameId = FrameId::MAX;

#[derive(Clone, Copy)]
struct Link {
    prev: FrameId,
    next: FrameId,
    linked: bool,
}

impl Default for Link {
    #[inline]
    fn default() -> Self {
        Link {
            prev: NIL,
            next: NIL,
            linked: false,
        }
    }
}

/// Intrusive-style doubly linked list over frame ids.
///
/// Links are stored in an array indexed by frame id, so every operation
/// is O(1) without allocation. A frame can be linked at most once.
pub struct IndexList {
    head: FrameId,
    tail: FrameId,
    len: usize,
    links: Box<[Link]>,
}

impl IndexList {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        IndexList {
            head: NIL,
            tail: NIL,
            len: 0,
            links: vec![Link::default(); capacity].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn contains(&self, id: FrameId) -> bool {
        self.links[id].linked
    }

    #[inline]
    pub fn front(&self) -> Option<FrameId> {
        some_if_valid(self.head)
    }

    #[inline]
    pub fn back(&self) -> Option<FrameId> {
        some_if_valid(self.tail)
    }

    #[inline]
    pub fn next(&self, id: FrameId) -> Option<FrameId> {
        debug_assert!(self.links[id].linked);
        some_if_valid(self.links[id].next)
    }

    #[inline]
    pub fn prev(&self, id: FrameId) -> Option<FrameId> {
        debug_assert!(self.links[id].linked);
        some_if_valid(self.links[id].prev)
    }

    #[inline]
    pub fn push_front(&mut self, id: FrameId) {
        self.link(id, NIL, self.head);
    }

    #[inline]
    pub fn push_back(&mut self, id: FrameId) {
        self.link(id, self.tail, NIL);
    }

    /// Insert `id` right before `anchor`, i.e. closer to head.
    #[inline]
    pub fn insert_before(&mut self, anchor: FrameId, id: FrameId) {
        assert!(self.links[anchor].linked, "anchor frame not in list");
        let prev = self.links[anchor].prev;
        self.link(id, prev, anchor);
    }

    /// Insert `id` right after `anchor`, i.e. closer to tail.
    #[inline]
    pub fn insert_after(&mut self, anchor: FrameId, id: FrameId) {
        assert!(self.links[anchor].linked, "anchor frame not in list");
        let next = self.links[anchor].next;
        self.link(id, anchor, next);
    }

    #[inline]
    pub fn remove(&mut self, id: FrameId) {
        let link = self.links[id];
        assert!(link.linked, "frame {} not in list", id);
        if link.prev == NIL {
            self.head = link.next;
        } else {
            self.links[link.prev].next = link.next;
        }
        if link.next == NIL {
            self.tail = link.prev;
        } else {
            self.links[link.next].prev = link.prev;
        }
        self.links[id] = Link::default();
        self.len -= 1;
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<FrameId> {
        let id = self.front()?;
        self.remove(id);
        Some(id)
    }

    #[inline]
    pub fn pop_back(&mut self) -> Option<FrameId> {
        let id = self.back()?;
        self.remove(id);
        Some(id)
    }

    /// Iterate from head to tail.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let id = some_if_valid(cur)?;
            cur = self.links[id].next;
            Some(id)
        })
    }

    /// Iterate from tail to head.
    #[inline]
    pub fn iter_rev(&self) -> impl Iterator<Item = FrameId> + '_ {
        let mut cur = self.tail;
        std::iter::from_fn(move || {
            let id = some_if_valid(cur)?;
            cur = self.links[id].prev;
            Some(id)
        })
    }

    #[inline]
    fn link(&mut self, id: FrameId, prev: FrameId, next: FrameId) {
        assert!(!self.links[id].linked, "frame {} already in list", id);
        self.links[id] = Link {
            prev,
            next,
            linked: true,
        };
        if prev == NIL {
            self.head = id;
        } else {
            self.links[prev].next = id;
        }
        if next == NIL {
            self.tail = id;
        } else {
            self.links[next].prev = id;
        }
        self.len += 1;
    }
}

#[inline]
fn some_if_valid(id: FrameId) -> Option<FrameId> {
    if id == NIL {
        None
    } else {
        Some(id)
    }
}
