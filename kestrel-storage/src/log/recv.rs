//! Redo log recovery.
//!
//! Log found after the last checkpoint is split into record groups,
//! one per committed mini-transaction. A torn group at the end of log is
//! dropped. Every record is applied to its page unless the page on disk
//! already contains the modification, judged by its page LSN.
use crate::buffer::page::{page_lsn, Lsn, PageId};
use crate::buffer::{BufferPool, FetchMode};
use crate::error::{Error, Result};
use crate::log::block::lsn_add;
use crate::mtr::redo::{ParsedRecord, RedoRecord};
use std::collections::HashMap;
use std::time::Instant;

/// Log content between checkpoint and end of log found at startup.
#[derive(Debug, Default)]
pub struct RecoveredLog {
    pub checkpoint_lsn: Lsn,
    pub end_lsn: Lsn,
    /// Record bytes starting at checkpoint LSN.
    pub data: Vec<u8>,
}

/// Records of one committed mini-transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordGroup {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub records: Vec<RedoRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub groups: usize,
    pub records: usize,
    pub applied: usize,
    pub skipped_pages: usize,
    pub torn_bytes: usize,
}

/// Parse complete record groups from log data starting at `start_lsn`.
/// Returns the groups and number of trailing bytes of a torn group.
pub fn parse_record_groups(start_lsn: Lsn, data: &[u8]) -> Result<(Vec<RecordGroup>, usize)> {
    let mut groups = vec![];
    let mut pos = 0;
    'group: while pos < data.len() {
        let group_start = pos;
        let mut records = vec![];
        loop {
            let Some((parsed, n)) = RedoRecord::parse(&data[pos..])? else {
                pos = group_start;
                break 'group;
            };
            pos += n;
            match parsed {
                ParsedRecord::Record { record, single } => {
                    if single && !records.is_empty() {
                        return Err(Error::InvalidFormat);
                    }
                    records.push(record);
                    if single {
                        break;
                    }
                }
                ParsedRecord::MultiRecEnd => {
                    if records.is_empty() {
                        return Err(Error::InvalidFormat);
                    }
                    break;
                }
            }
        }
        groups.push(RecordGroup {
            start_lsn: lsn_add(start_lsn, group_start),
            end_lsn: lsn_add(start_lsn, pos),
            records,
        });
    }
    Ok((groups, data.len() - pos))
}

/// Replay recovered log into buffer pool.
///
/// Modified pages are left dirty in the pool, linked into flush list in
/// LSN order. Records of dropped tablespaces are skipped.
pub fn recover(pool: &BufferPool, log: &RecoveredLog) -> Result<RecoveryStats> {
    let start = Instant::now();
    let (groups, torn_bytes) = parse_record_groups(log.checkpoint_lsn, &log.data).map_err(|e| {
        log::error!("parse redo log from lsn {} failed: {}", log.checkpoint_lsn, e);
        Error::LogFileCorrupted
    })?;
    if torn_bytes > 0 {
        log::warn!(
            "drop {} bytes of incomplete record group at end of log",
            torn_bytes
        );
    }
    let mut stats = RecoveryStats {
        groups: groups.len(),
        torn_bytes,
        ..Default::default()
    };
    for group in &groups {
        apply_group(pool, group, &mut stats)?;
    }
    log::info!(
        "recovery applied {} of {} records in {} groups, lsn {} to {}, took {:?}",
        stats.applied,
        stats.records,
        stats.groups,
        log.checkpoint_lsn,
        log.end_lsn,
        start.elapsed()
    );
    Ok(stats)
}

fn apply_group(pool: &BufferPool, group: &RecordGroup, stats: &mut RecoveryStats) -> Result<()> {
    // Whether each page needs the group, decided on its LSN before
    // the first record of the group is applied.
    let mut decisions: HashMap<PageId, bool> = HashMap::new();
    for record in &group.records {
        stats.records += 1;
        let fix = match pool.fetch(record.page_id, FetchMode::Normal) {
            Ok(fix) => fix,
            Err(Error::SpaceDeleted(space)) => {
                log::debug!("skip redo of page {:?} in dropped space {}", record.page_id, space);
                stats.skipped_pages += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let mut page = fix.write();
        let apply = *decisions
            .entry(record.page_id)
            .or_insert_with(|| page_lsn(&page[..]) < group.end_lsn);
        if !apply {
            continue;
        }
        record.apply(&mut page[..]).map_err(|e| {
            log::error!("apply redo to page {:?} failed: {}", record.page_id, e);
            Error::LogFileCorrupted
        })?;
        pool.recv_note_modification(&fix, group.start_lsn, group.end_lsn);
        stats.applied += 1;
    }
    Ok(())
}
