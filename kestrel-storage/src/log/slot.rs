use crate::buffer::page::Lsn;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

const SLOT_FREE: u8 = 0;
const SLOT_RESERVED: u8 = 1;
const SLOT_COPIED: u8 = 2;

/// Reservation position: next LSN to hand out and number of
/// reservations made so far. Both change in one compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservePos {
    pub lsn: Lsn,
    pub seq: u64,
}

/// A reserved LSN range of the log buffer.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub seq: u64,
}

struct Slot {
    /// Sequence number of the reservation allowed to use this slot.
    seq: AtomicU64,
    state: AtomicU8,
    start: AtomicU64,
    end: AtomicU64,
}

/// Fixed ring of reservation slots.
///
/// Reservation `seq` uses slot `seq % n`. The slot is handed to the
/// next round only after log writer has drained it, so a reserver may
/// have to wait until its slot is recycled.
pub struct SlotBank {
    slots: Box<[CachePadded<Slot>]>,
}

impl SlotBank {
    #[inline]
    pub fn new(n_slots: usize, start_seq: u64) -> Self {
        assert!(n_slots > 0);
        let slots = (0..n_slots)
            .map(|_| {
                CachePadded::new(Slot {
                    seq: AtomicU64::new(0),
                    state: AtomicU8::new(SLOT_FREE),
                    start: AtomicU64::new(0),
                    end: AtomicU64::new(0),
                })
            })
            .collect::<Vec<_>>();
        let bank = SlotBank {
            slots: slots.into_boxed_slice(),
        };
        // assign first round of sequence numbers.
        for seq in start_seq..start_seq + n_slots as u64 {
            bank.slot(seq).seq.store(seq, Ordering::Relaxed);
        }
        bank
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    fn slot(&self, seq: u64) -> &Slot {
        &self.slots[(seq % self.slots.len() as u64) as usize]
    }

    /// Whether slot of given reservation is recycled and can be used.
    #[inline]
    pub fn is_ready(&self, seq: u64) -> bool {
        self.slot(seq).seq.load(Ordering::Acquire) == seq
    }

    #[inline]
    pub fn fill(&self, res: &Reservation) {
        let slot = self.slot(res.seq);
        debug_assert_eq!(slot.seq.load(Ordering::Acquire), res.seq);
        debug_assert_eq!(slot.state.load(Ordering::Acquire), SLOT_FREE);
        slot.start.store(res.start_lsn, Ordering::Relaxed);
        slot.end.store(res.end_lsn, Ordering::Relaxed);
        slot.state.store(SLOT_RESERVED, Ordering::Release);
    }

    #[inline]
    pub fn complete(&self, res: &Reservation) {
        let slot = self.slot(res.seq);
        let prev = slot.state.swap(SLOT_COPIED, Ordering::AcqRel);
        assert_eq!(prev, SLOT_RESERVED, "complete a slot which is not reserved");
    }

    /// Returns range of reservation `seq` if it is copied.
    #[inline]
    pub fn copied(&self, seq: u64) -> Option<(Lsn, Lsn)> {
        let slot = self.slot(seq);
        if slot.seq.load(Ordering::Acquire) != seq
            || slot.state.load(Ordering::Acquire) != SLOT_COPIED
        {
            return None;
        }
        Some((
            slot.start.load(Ordering::Relaxed),
            slot.end.load(Ordering::Relaxed),
        ))
    }

    /// Hand the slot of `seq` to the next round.
    #[inline]
    pub fn recycle(&self, seq: u64) {
        let slot = self.slot(seq);
        debug_assert_eq!(slot.seq.load(Ordering::Acquire), seq);
        slot.state.store(SLOT_FREE, Ordering::Release);
        slot.seq
            .store(seq + self.slots.len() as u64, Ordering::Release);
    }
}
