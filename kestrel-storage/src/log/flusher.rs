use crate::buffer::page::Lsn;
use crate::error::fatal_io;
use crate::log::block::block_no;
use crate::log::writer::FlushMsg;
use crate::log::{elapsed_nanos, LogSync, LogSys};
use flume::{Receiver, RecvTimeoutError};
use std::sync::atomic::Ordering;
use std::time::Instant;

impl LogSys {
    /// Main loop of log flusher.
    ///
    /// Messages of log writer are merged, so one sync covers all
    /// writes finished meanwhile.
    pub(super) fn flusher_loop(&self, rx: Receiver<FlushMsg>) {
        let mut last_group = self.groups.lock().current_idx();
        let mut stop = false;
        while !stop {
            let mut target = None;
            let mut handle = |msg: FlushMsg| match msg {
                FlushMsg::Written(lsn) => target = Some(lsn),
                FlushMsg::Shutdown => stop = true,
            };
            match rx.recv_timeout(self.wait_interval) {
                Ok(msg) => handle(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(msg) = rx.try_recv() {
                handle(msg);
            }
            if let Some(lsn) = target {
                last_group = self.sync_groups(last_group);
                self.advance_flushed(lsn);
            }
        }
        self.flusher_exited.store(true, Ordering::Release);
        for ev in self.flush_evs.iter() {
            ev.notify_all();
        }
    }

    /// Sync files of groups from `last_group` to current group.
    /// Returns current group.
    fn sync_groups(&self, last_group: usize) -> usize {
        let (files, cur) = {
            let groups = self.groups.lock();
            let cur = groups.current_idx();
            let mut idxs = vec![last_group];
            let mut idx = last_group;
            while idx != cur {
                idx = groups.next_idx(idx);
                idxs.push(idx);
            }
            (groups.files_of(idxs), cur)
        };
        if self.log_sync == LogSync::None {
            return cur;
        }
        let start = Instant::now();
        for file in files {
            let res = match self.log_sync {
                LogSync::Fsync => file.sync_all(),
                LogSync::Fdatasync => file.sync_data(),
                LogSync::None => Ok(()),
            };
            if let Err(e) = res {
                fatal_io("redo log sync", &e);
            }
        }
        self.stats.sync_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .sync_nanos
            .fetch_add(elapsed_nanos(start), Ordering::Relaxed);
        cur
    }

    /// Publish flushed LSN and wake up waiters covered by it.
    fn advance_flushed(&self, lsn: Lsn) {
        let prev = self.flushed_lsn.swap(lsn, Ordering::AcqRel);
        debug_assert!(prev <= lsn);
        let (from, to) = (block_no(prev), block_no(lsn));
        let n = self.flush_evs.len() as u64;
        if to - from >= n {
            for ev in self.flush_evs.iter() {
                ev.notify_all();
            }
        } else {
            for no in from..=to {
                self.flush_evs[(no % n) as usize].notify_all();
            }
        }
    }
}
