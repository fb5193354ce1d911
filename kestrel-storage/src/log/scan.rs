use crate::buffer::page::Lsn;
use crate::error::{Error, Result};
use crate::log::block::{
    block_data_len, block_floor, block_hdr_no, block_no, block_offset, verify_block_checksum,
    LOG_BLOCK_DATA_END, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE,
};
use crate::log::group::LogGroups;

/// Bytes read from log file at a time.
const SCAN_CHUNK_SIZE: usize = 64 * LOG_BLOCK_SIZE;

/// Log content found from a start LSN to the end of log.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Record bytes with block headers and trailers stripped.
    pub data: Vec<u8>,
    pub end_lsn: Lsn,
    /// Last block if it is partially filled.
    pub last_block: Option<Vec<u8>>,
    pub n_blocks: usize,
}

/// Reads log blocks sequentially through log groups.
///
/// The end of log is the first block which has unexpected block number,
/// bad checksum, invalid data length, or is not full.
pub struct LogScanner<'a> {
    groups: &'a LogGroups,
    start_lsn: Lsn,
}

impl<'a> LogScanner<'a> {
    #[inline]
    pub fn new(groups: &'a LogGroups, start_lsn: Lsn) -> Self {
        LogScanner { groups, start_lsn }
    }

    pub fn scan(&self) -> Result<ScanResult> {
        let start_block = block_floor(self.start_lsn);
        let mut res = ScanResult {
            end_lsn: self.start_lsn,
            ..Default::default()
        };
        let mut block_lsn = start_block;
        let limit = start_block + self.groups.total_capacity();
        'scan: while block_lsn < limit {
            let Some(idx) = self.groups.group_of(block_lsn) else {
                break;
            };
            let (file, offset, file_end) = self.groups.locate(idx, block_lsn);
            let len = ((file_end - block_lsn) as usize).min(SCAN_CHUNK_SIZE);
            let mut chunk = vec![0u8; len];
            file.read_at(offset, &mut chunk)?;
            for block in chunk.chunks(LOG_BLOCK_SIZE) {
                let from = if block_lsn == start_block {
                    block_offset(self.start_lsn)
                } else {
                    LOG_BLOCK_HDR_SIZE
                };
                let Some(data_len) = check_block(block, block_lsn) else {
                    if block_lsn == start_block && from > LOG_BLOCK_HDR_SIZE {
                        log::error!("log block at checkpoint lsn {} is invalid", block_lsn);
                        return Err(Error::LogFileCorrupted);
                    }
                    break 'scan;
                };
                if data_len < from {
                    log::error!(
                        "log block at lsn {} ends at {} before scan start",
                        block_lsn,
                        data_len
                    );
                    return Err(Error::LogFileCorrupted);
                }
                res.data.extend_from_slice(&block[from..data_len]);
                res.n_blocks += 1;
                if data_len < LOG_BLOCK_DATA_END {
                    res.end_lsn = block_lsn + data_len as Lsn;
                    res.last_block = Some(block.to_vec());
                    break 'scan;
                }
                block_lsn += LOG_BLOCK_SIZE as Lsn;
                res.end_lsn = block_lsn + LOG_BLOCK_HDR_SIZE as Lsn;
            }
        }
        log::debug!(
            "scanned {} log blocks from lsn {} to {}",
            res.n_blocks,
            self.start_lsn,
            res.end_lsn
        );
        Ok(res)
    }
}

/// Returns data length of a valid block.
#[inline]
fn check_block(block: &[u8], block_lsn: Lsn) -> Option<usize> {
    if block_hdr_no(block) != block_no(block_lsn) || !verify_block_checksum(block) {
        return None;
    }
    let data_len = block_data_len(block);
    if !(LOG_BLOCK_HDR_SIZE..=LOG_BLOCK_DATA_END).contains(&data_len) {
        return None;
    }
    Some(data_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::block::{
        init_block, set_block_data_len, set_block_hdr_no, stamp_block_checksum, LOG_START_LSN,
    };
    use crate::log::group::{LogFiles, LOG_FILE_HDR_SIZE};

    fn write_block(groups: &LogGroups, block_lsn: Lsn, fill: u8, data_len: usize) {
        write_block_as(groups, block_lsn, block_lsn, fill, data_len)
    }

    fn write_block_as(groups: &LogGroups, block_lsn: Lsn, hdr_lsn: Lsn, fill: u8, data_len: usize) {
        let mut block = [0u8; LOG_BLOCK_SIZE];
        init_block(&mut block, block_no(hdr_lsn));
        set_block_hdr_no(&mut block, block_no(hdr_lsn), true);
        set_block_data_len(&mut block, data_len);
        block[LOG_BLOCK_HDR_SIZE..data_len].fill(fill);
        stamp_block_checksum(&mut block);
        let idx = groups.group_of(block_lsn).unwrap();
        let (file, offset, _) = groups.locate(idx, block_lsn);
        file.write_at(offset, &block).unwrap();
    }

    fn new_groups() -> LogGroups {
        let lf = LogFiles::in_memory(2, 2);
        let mut groups = LogGroups::new(lf.files, LOG_FILE_HDR_SIZE + 2048).unwrap();
        groups.init_from_checkpoint(0, LOG_START_LSN);
        groups
    }

    #[test]
    fn test_scan_across_files_to_partial_block() {
        let groups = new_groups();
        // four blocks per file, the sixth block is in the second file.
        for i in 0..5u64 {
            write_block(&groups, LOG_START_LSN + i * 512, i as u8 + 1, LOG_BLOCK_DATA_END);
        }
        write_block(&groups, LOG_START_LSN + 5 * 512, 6, 100);
        let start = LOG_START_LSN + 512 + 200;
        let res = LogScanner::new(&groups, start).scan().unwrap();
        assert_eq!(res.n_blocks, 5);
        assert_eq!(res.end_lsn, LOG_START_LSN + 5 * 512 + 100);
        assert_eq!(res.data.len(), (508 - 200) + 3 * 496 + (100 - 12));
        assert!(res.data[..308].iter().all(|b| *b == 2));
        assert!(res.data[res.data.len() - 88..].iter().all(|b| *b == 6));
        let last = res.last_block.unwrap();
        assert_eq!(block_data_len(&last), 100);
    }

    #[test]
    fn test_scan_stops_at_stale_or_corrupted_block() {
        let groups = new_groups();
        write_block(&groups, LOG_START_LSN, 1, LOG_BLOCK_DATA_END);
        // block from an older round of the log
        write_block_as(
            &groups,
            LOG_START_LSN + 512,
            LOG_START_LSN + 512 - 8192,
            2,
            LOG_BLOCK_DATA_END,
        );
        let res = LogScanner::new(&groups, LOG_START_LSN + 12).scan().unwrap();
        assert_eq!(res.n_blocks, 1);
        assert_eq!(res.end_lsn, LOG_START_LSN + 512 + 12);
        assert!(res.last_block.is_none());

        write_block(&groups, LOG_START_LSN + 512, 2, 300);
        let idx = groups.group_of(LOG_START_LSN + 512).unwrap();
        let (file, offset, _) = groups.locate(idx, LOG_START_LSN + 512);
        file.write_at(offset + 50, &[0xAB]).unwrap();
        let res = LogScanner::new(&groups, LOG_START_LSN + 12).scan().unwrap();
        assert_eq!(res.end_lsn, LOG_START_LSN + 512 + 12);
    }

    #[test]
    fn test_scan_empty_and_corrupted_start() {
        let groups = new_groups();
        let res = LogScanner::new(&groups, LOG_START_LSN + 12).scan().unwrap();
        assert_eq!(res.end_lsn, LOG_START_LSN + 12);
        assert!(res.data.is_empty());
        assert_eq!(
            LogScanner::new(&groups, LOG_START_LSN + 40).scan().unwrap_err(),
            Error::LogFileCorrupted
        );
    }
}
