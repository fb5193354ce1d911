use crate::buffer::page::Lsn;
use crate::error::{fatal_io, Error, Result};
use crate::io::FileIo;
use crate::log::block::LOG_BLOCK_SIZE;
use crate::log::group::{LogGroups, LOG_CHECKPOINT_1, LOG_CHECKPOINT_2};
use crate::log::LogSys;
use std::sync::atomic::Ordering;
use std::time::Instant;

// Checkpoint record layout:
//
// | no(8) | lsn(8) | group(4) | offset(8) | buf_size(4) | checksum1(4) | checksum2(4) |
//
// checksum1 covers [0, 16), checksum2 covers [16, 32).
const CKPT_NO: usize = 0;
const CKPT_LSN: usize = 8;
const CKPT_GROUP: usize = 16;
const CKPT_OFFSET: usize = 20;
const CKPT_BUF_SIZE: usize = 28;
const CKPT_CHECKSUM_1: usize = 32;
const CKPT_CHECKSUM_2: usize = 36;
const CKPT_LEN: usize = 40;

/// Checkpoint: recovery starts scanning log at `lsn`, located at byte
/// `offset` of log group `group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub no: u64,
    pub lsn: Lsn,
    pub group: u32,
    pub offset: u64,
    pub buf_size: u32,
}

impl CheckpointInfo {
    #[inline]
    pub fn encode(&self) -> [u8; LOG_BLOCK_SIZE] {
        let mut block = [0u8; LOG_BLOCK_SIZE];
        block[CKPT_NO..CKPT_NO + 8].copy_from_slice(&self.no.to_le_bytes());
        block[CKPT_LSN..CKPT_LSN + 8].copy_from_slice(&self.lsn.to_le_bytes());
        block[CKPT_GROUP..CKPT_GROUP + 4].copy_from_slice(&self.group.to_le_bytes());
        block[CKPT_OFFSET..CKPT_OFFSET + 8].copy_from_slice(&self.offset.to_le_bytes());
        block[CKPT_BUF_SIZE..CKPT_BUF_SIZE + 4].copy_from_slice(&self.buf_size.to_le_bytes());
        let checksum1 = crc32fast::hash(&block[..CKPT_GROUP]);
        let checksum2 = crc32fast::hash(&block[CKPT_GROUP..CKPT_CHECKSUM_1]);
        block[CKPT_CHECKSUM_1..CKPT_CHECKSUM_2].copy_from_slice(&checksum1.to_le_bytes());
        block[CKPT_CHECKSUM_2..CKPT_LEN].copy_from_slice(&checksum2.to_le_bytes());
        block
    }

    #[inline]
    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < CKPT_LEN {
            return Err(Error::InvalidFormat);
        }
        let checksum1 = u32::from_le_bytes(block[CKPT_CHECKSUM_1..CKPT_CHECKSUM_2].try_into()?);
        let checksum2 = u32::from_le_bytes(block[CKPT_CHECKSUM_2..CKPT_LEN].try_into()?);
        if checksum1 != crc32fast::hash(&block[..CKPT_GROUP])
            || checksum2 != crc32fast::hash(&block[CKPT_GROUP..CKPT_CHECKSUM_1])
        {
            return Err(Error::ChecksumMismatch);
        }
        Ok(CheckpointInfo {
            no: u64::from_le_bytes(block[CKPT_NO..CKPT_NO + 8].try_into()?),
            lsn: u64::from_le_bytes(block[CKPT_LSN..CKPT_LSN + 8].try_into()?),
            group: u32::from_le_bytes(block[CKPT_GROUP..CKPT_GROUP + 4].try_into()?),
            offset: u64::from_le_bytes(block[CKPT_OFFSET..CKPT_OFFSET + 8].try_into()?),
            buf_size: u32::from_le_bytes(block[CKPT_BUF_SIZE..CKPT_BUF_SIZE + 4].try_into()?),
        })
    }

    /// Slots are used alternately, so a torn write never destroys
    /// the previous checkpoint.
    #[inline]
    pub fn slot_offset(no: u64) -> u64 {
        if no % 2 == 0 {
            LOG_CHECKPOINT_1
        } else {
            LOG_CHECKPOINT_2
        }
    }

    /// Write and sync the checkpoint into its slot.
    #[inline]
    pub fn write(&self, file: &dyn FileIo) -> std::io::Result<()> {
        file.write_at(Self::slot_offset(self.no), &self.encode())?;
        file.sync_all()
    }

    /// Read the newest valid checkpoint.
    pub fn read_latest(groups: &LogGroups) -> Result<Self> {
        let file = groups.checkpoint_file();
        let mut latest: Option<CheckpointInfo> = None;
        for offset in [LOG_CHECKPOINT_1, LOG_CHECKPOINT_2] {
            let mut block = [0u8; LOG_BLOCK_SIZE];
            file.read_at(offset, &mut block)?;
            match CheckpointInfo::decode(&block) {
                Ok(info) => {
                    if (info.group as usize) >= groups.n_groups() {
                        log::warn!("checkpoint at offset {} has invalid group", offset);
                        continue;
                    }
                    if latest.map(|l| l.no < info.no).unwrap_or(true) {
                        latest = Some(info);
                    }
                }
                Err(e) => log::warn!("checkpoint at offset {} is invalid: {}", offset, e),
            }
        }
        latest.ok_or(Error::NoValidCheckpoint)
    }
}

/// Last checkpoint written, protected by checkpoint mutex.
pub(super) struct CheckpointState {
    pub(super) no: u64,
    pub(super) lsn: Lsn,
}

impl LogSys {
    /// Make a checkpoint at `lsn`.
    ///
    /// Caller must guarantee every page modification before `lsn` has
    /// been written back. The LSN is capped by written LSN. Returns false
    /// if a checkpoint at or beyond it already exists.
    pub fn checkpoint(&self, lsn: Lsn) -> Result<bool> {
        let mut state = self.checkpoint_mu.lock();
        let lsn = lsn.min(self.written_lsn());
        if lsn <= state.lsn {
            return Ok(false);
        }
        self.write_up_to(lsn)?;
        let start = Instant::now();
        let (info, file) = {
            let groups = self.groups.lock();
            let group = groups.group_of(lsn).ok_or(Error::LogFileCorrupted)?;
            let info = CheckpointInfo {
                no: state.no + 1,
                lsn,
                group: group as u32,
                offset: groups.group_offset(group, lsn),
                buf_size: self.buf.size() as u32,
            };
            (info, groups.checkpoint_file())
        };
        if let Err(e) = info.write(&*file) {
            fatal_io("log checkpoint", &e);
        }
        state.no = info.no;
        state.lsn = lsn;
        self.checkpoint_lsn.store(lsn, Ordering::Release);
        self.groups.lock().on_checkpoint(lsn);
        drop(state);
        self.checkpoint_ev.notify_all();
        self.stats.checkpoint_count.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "checkpoint {} at lsn {} in group {}, took {:?}",
            info.no,
            lsn,
            info.group,
            start.elapsed()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::group::{LogFiles, LOG_FILE_HDR_SIZE};
    use std::sync::Arc;

    #[test]
    fn test_checkpoint_encode_decode() {
        let info = CheckpointInfo {
            no: 9,
            lsn: 123_456,
            group: 1,
            offset: 4096,
            buf_size: 65536,
        };
        let mut block = info.encode();
        assert_eq!(CheckpointInfo::decode(&block).unwrap(), info);
        block[CKPT_OFFSET] ^= 1;
        assert_eq!(
            CheckpointInfo::decode(&block),
            Err(Error::ChecksumMismatch)
        );
        assert_eq!(CheckpointInfo::slot_offset(9), LOG_CHECKPOINT_2);
        assert_eq!(CheckpointInfo::slot_offset(10), LOG_CHECKPOINT_1);
    }

    #[test]
    fn test_read_latest_survives_torn_slot() {
        let lf = LogFiles::in_memory(2, 1);
        let first = Arc::clone(&lf.files[0][0]);
        let groups = LogGroups::new(lf.files, LOG_FILE_HDR_SIZE + 4096).unwrap();
        let file = groups.checkpoint_file();
        assert_eq!(
            CheckpointInfo::read_latest(&groups),
            Err(Error::NoValidCheckpoint)
        );
        for no in 1..=3u64 {
            let info = CheckpointInfo {
                no,
                lsn: 10_000 + no * 100,
                group: 0,
                offset: 2048,
                buf_size: 8192,
            };
            info.write(&*file).unwrap();
        }
        assert_eq!(CheckpointInfo::read_latest(&groups).unwrap().no, 3);
        // tear the newest slot
        first.write_at(LOG_CHECKPOINT_2 + 3, &[0xFF]).unwrap();
        let latest = CheckpointInfo::read_latest(&groups).unwrap();
        assert_eq!(latest.no, 2);
        assert_eq!(latest.lsn, 10_200);
    }
}
