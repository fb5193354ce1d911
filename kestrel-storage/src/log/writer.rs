use crate::buffer::page::Lsn;
use crate::error::fatal_io;
use crate::io::FileIo;
use crate::log::block::{
    block_first_rec_group, block_floor, block_no, block_offset, set_block_data_len,
    set_block_first_rec_group, set_block_hdr_no, stamp_block_checksum, LOG_BLOCK_DATA_END,
    LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE,
};
use crate::log::slot::ReservePos;
use crate::log::{LogSys, SEALED_SEQ};
use flume::Sender;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval of warning when log writer is blocked by checkpoint.
const ROTATE_WARN_INTERVAL: Duration = Duration::from_secs(10);

pub(super) enum FlushMsg {
    Written(Lsn),
    Shutdown,
}

impl LogSys {
    /// Main loop of log writer.
    ///
    /// Only contiguous copied reservations are written, so log reaches
    /// files in LSN order even if reservations are copied out of order.
    pub(super) fn writer_loop(&self, tx: Sender<FlushMsg>) {
        let mut next_seq = self.reserve.load().seq;
        let mut staging = Vec::with_capacity(self.max_write_size + 2 * LOG_BLOCK_SIZE);
        loop {
            let start = self.written_lsn();
            let mut end = start;
            let mut seq = next_seq;
            while let Some((slot_start, slot_end)) = self.slots.copied(seq) {
                debug_assert_eq!(slot_start, end);
                self.mark_first_rec_group(slot_start);
                end = slot_end;
                seq += 1;
                if (end - start) as usize >= self.max_write_size {
                    break;
                }
            }
            if seq == next_seq {
                if self.is_shutdown() {
                    if self.seal_reservation(next_seq) {
                        break;
                    }
                    self.slot_ev.wait_timeout(self.wait_interval);
                } else {
                    self.slot_ev.wait_until(self.wait_interval, || {
                        self.slots.copied(next_seq).is_some() || self.is_shutdown()
                    });
                }
                continue;
            }
            if !self.write_span(start, end, &mut staging) {
                break;
            }
            self.written_lsn.store(end, Ordering::Release);
            for s in next_seq..seq {
                self.slots.recycle(s);
            }
            next_seq = seq;
            self.space_ev.notify_all();
            let _ = tx.send(FlushMsg::Written(end));
        }
        let _ = tx.send(FlushMsg::Shutdown);
    }

    /// Stop further reservations if every reservation is written.
    #[inline]
    fn seal_reservation(&self, next_seq: u64) -> bool {
        let cur = self.reserve.load();
        cur.seq == next_seq
            && self
                .reserve
                .compare_exchange(
                    cur,
                    ReservePos {
                        lsn: cur.lsn,
                        seq: SEALED_SEQ,
                    },
                )
                .is_ok()
    }

    /// Record offset of first record group starting in the block.
    #[inline]
    fn mark_first_rec_group(&self, lsn: Lsn) {
        // header of this block was initialized by an earlier drained
        // reservation, no one else touches it.
        let hdr = unsafe { self.buf.bytes_mut(block_floor(lsn), LOG_BLOCK_HDR_SIZE) };
        if block_first_rec_group(hdr) == 0 {
            set_block_first_rec_group(hdr, block_offset(lsn));
        }
    }

    /// Write blocks covering [start, end) to log files.
    /// Returns false if writer has to stop.
    fn write_span(&self, start: Lsn, end: Lsn, staging: &mut Vec<u8>) -> bool {
        let span_start = block_floor(start);
        let span_end = block_floor(end) + LOG_BLOCK_SIZE as Lsn;
        staging.clear();
        staging.resize((span_end - span_start) as usize, 0);
        // Bytes after `end` may be written by later reservations now,
        // so only completed range is copied. Tail of last block stays
        // zero.
        unsafe {
            self.buf
                .copy_out(span_start, &mut staging[..(end - span_start) as usize]);
        }
        for (i, block) in staging.chunks_mut(LOG_BLOCK_SIZE).enumerate() {
            let block_lsn = span_start + (i * LOG_BLOCK_SIZE) as Lsn;
            let data_len = if block_lsn < block_floor(end) {
                LOG_BLOCK_DATA_END
            } else {
                block_offset(end)
            };
            set_block_hdr_no(block, block_no(block_lsn), i == 0);
            set_block_data_len(block, data_len);
            stamp_block_checksum(block);
        }
        let mut pos = span_start;
        let mut off = 0usize;
        while pos < span_end {
            let Some((file, file_off, file_end)) = self.locate_for_write(pos, span_end) else {
                return false;
            };
            let n = (file_end.min(span_end) - pos) as usize;
            if let Err(e) = file.write_at(file_off, &staging[off..off + n]) {
                fatal_io("redo log write", &e);
            }
            pos += n as Lsn;
            off += n;
        }
        self.stats.write_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .write_bytes
            .fetch_add(staging.len(), Ordering::Relaxed);
        true
    }

    /// Locate file position of `pos`, switching to next log group when
    /// current one is full. Before a group is reused, checkpoint must
    /// have passed all its content.
    fn locate_for_write(&self, pos: Lsn, span_end: Lsn) -> Option<(Arc<dyn FileIo>, u64, Lsn)> {
        let mut blocked_since: Option<Instant> = None;
        let mut last_warn = Instant::now();
        loop {
            let mut groups = self.groups.lock();
            let idx = groups.current_idx();
            if pos < groups.group_end(idx) {
                return Some(groups.locate(idx, pos));
            }
            if groups.can_rotate() {
                groups.rotate();
                let cur = groups.current();
                log::info!(
                    "log writer switched to group {} at lsn {}",
                    cur.id,
                    cur.base_lsn
                );
                self.stats.group_rotations.fetch_add(1, Ordering::Relaxed);
                if let Some(since) = blocked_since {
                    log::info!("log writer was blocked by checkpoint for {:?}", since.elapsed());
                }
                continue;
            }
            let required = groups.rotate_required_lsn();
            drop(groups);
            if self.is_shutdown() {
                log::error!(
                    "log writer stopped before lsn {}, next group waits for checkpoint to lsn {}",
                    span_end,
                    required
                );
                return None;
            }
            let since = *blocked_since.get_or_insert_with(Instant::now);
            if last_warn.elapsed() >= ROTATE_WARN_INTERVAL {
                log::warn!(
                    "log writer blocked for {:?}, waiting for checkpoint to lsn {}",
                    since.elapsed(),
                    required
                );
                last_warn = Instant::now();
            }
            self.request_checkpoint(required);
            self.checkpoint_ev.wait_until(self.wait_interval, || {
                self.checkpoint_lsn() >= required || self.is_shutdown()
            });
        }
    }
}
