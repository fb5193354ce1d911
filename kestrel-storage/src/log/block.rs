use crate::buffer::page::Lsn;

// Log block layout:
//
// | hdr_no(8) | data_len(2) | first_rec_group(2) | payload(496) | checksum(4) |
//
// hdr_no is the block number, i.e. LSN of block start divided by block
// size. Its top bit is set on the first block of each write to disk.
// data_len is offset of the end of data, including header bytes.
// first_rec_group is offset of the first record group starting in this
// block, zero if none. Checksum is CRC32 over all bytes before it.
//
// LSNs count header and trailer bytes as well, so block number and
// offset of any LSN are plain arithmetic.
pub const LOG_BLOCK_SIZE: usize = 512;
pub const LOG_BLOCK_HDR_SIZE: usize = 12;
pub const LOG_BLOCK_TRL_SIZE: usize = 4;
pub const LOG_BLOCK_DATA_END: usize = LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE;
pub const LOG_BLOCK_PAYLOAD_SIZE: usize = LOG_BLOCK_DATA_END - LOG_BLOCK_HDR_SIZE;
pub const LOG_BLOCK_FLUSH_BIT: u64 = 1 << 63;

const LOG_BLOCK_HDR_NO: usize = 0;
const LOG_BLOCK_DATA_LEN: usize = 8;
const LOG_BLOCK_FIRST_REC_GROUP: usize = 10;
const LOG_BLOCK_CHECKSUM: usize = LOG_BLOCK_DATA_END;

/// LSN of the first block ever written.
pub const LOG_START_LSN: Lsn = 16 * LOG_BLOCK_SIZE as Lsn;
/// LSN of the first record ever written.
pub const LOG_FIRST_DATA_LSN: Lsn = LOG_START_LSN + LOG_BLOCK_HDR_SIZE as Lsn;

#[inline]
pub const fn block_floor(lsn: Lsn) -> Lsn {
    lsn & !(LOG_BLOCK_SIZE as Lsn - 1)
}

#[inline]
pub const fn block_ceil(lsn: Lsn) -> Lsn {
    block_floor(lsn + LOG_BLOCK_SIZE as Lsn - 1)
}

#[inline]
pub const fn block_no(lsn: Lsn) -> u64 {
    lsn / LOG_BLOCK_SIZE as Lsn
}

#[inline]
pub const fn block_offset(lsn: Lsn) -> usize {
    (lsn % LOG_BLOCK_SIZE as Lsn) as usize
}

/// Advance `lsn` by `len` payload bytes, skipping block headers and
/// trailers. The result never points at a block trailer: if the last
/// block becomes full, it points right after next block header.
#[inline]
pub fn lsn_add(mut lsn: Lsn, mut len: usize) -> Lsn {
    debug_assert!(is_data_lsn(lsn));
    loop {
        let avail = LOG_BLOCK_DATA_END - block_offset(lsn);
        if len < avail {
            return lsn + len as Lsn;
        }
        len -= avail;
        lsn += (avail + LOG_BLOCK_TRL_SIZE + LOG_BLOCK_HDR_SIZE) as Lsn;
        if len == 0 {
            return lsn;
        }
    }
}

/// Number of payload bytes between two LSNs.
#[inline]
pub fn lsn_payload_len(from: Lsn, to: Lsn) -> usize {
    debug_assert!(from <= to);
    debug_assert!(is_data_lsn(from) && is_data_lsn(to));
    let (from_block, to_block) = (block_floor(from), block_floor(to));
    if from_block == to_block {
        return (to - from) as usize;
    }
    let full_blocks = ((to_block - from_block) / LOG_BLOCK_SIZE as Lsn - 1) as usize;
    (LOG_BLOCK_DATA_END - block_offset(from))
        + full_blocks * LOG_BLOCK_PAYLOAD_SIZE
        + (block_offset(to) - LOG_BLOCK_HDR_SIZE)
}

/// Whether the LSN is a valid position of record data.
#[inline]
pub fn is_data_lsn(lsn: Lsn) -> bool {
    let off = block_offset(lsn);
    (LOG_BLOCK_HDR_SIZE..LOG_BLOCK_DATA_END).contains(&off)
}

/// Upper bound of LSN span occupied by `len` payload bytes from any start.
#[inline]
pub fn max_lsn_span(len: usize) -> usize {
    len + (len / LOG_BLOCK_PAYLOAD_SIZE + 2) * (LOG_BLOCK_HDR_SIZE + LOG_BLOCK_TRL_SIZE)
}

#[inline]
pub fn block_hdr_no(block: &[u8]) -> u64 {
    u64::from_le_bytes(read_array(block, LOG_BLOCK_HDR_NO)) & !LOG_BLOCK_FLUSH_BIT
}

#[inline]
pub fn block_flush_bit(block: &[u8]) -> bool {
    u64::from_le_bytes(read_array(block, LOG_BLOCK_HDR_NO)) & LOG_BLOCK_FLUSH_BIT != 0
}

#[inline]
pub fn set_block_hdr_no(block: &mut [u8], no: u64, flush: bool) {
    let v = if flush { no | LOG_BLOCK_FLUSH_BIT } else { no };
    block[LOG_BLOCK_HDR_NO..LOG_BLOCK_HDR_NO + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn block_data_len(block: &[u8]) -> usize {
    u16::from_le_bytes(read_array(block, LOG_BLOCK_DATA_LEN)) as usize
}

#[inline]
pub fn set_block_data_len(block: &mut [u8], len: usize) {
    debug_assert!(len <= LOG_BLOCK_DATA_END);
    block[LOG_BLOCK_DATA_LEN..LOG_BLOCK_DATA_LEN + 2].copy_from_slice(&(len as u16).to_le_bytes());
}

#[inline]
pub fn block_first_rec_group(block: &[u8]) -> usize {
    u16::from_le_bytes(read_array(block, LOG_BLOCK_FIRST_REC_GROUP)) as usize
}

#[inline]
pub fn set_block_first_rec_group(block: &mut [u8], offset: usize) {
    block[LOG_BLOCK_FIRST_REC_GROUP..LOG_BLOCK_FIRST_REC_GROUP + 2]
        .copy_from_slice(&(offset as u16).to_le_bytes());
}

/// Initialize header of a new block in place.
#[inline]
pub fn init_block(block: &mut [u8], no: u64) {
    set_block_hdr_no(block, no, false);
    set_block_data_len(block, LOG_BLOCK_HDR_SIZE);
    set_block_first_rec_group(block, 0);
}

#[inline]
pub fn block_checksum(block: &[u8]) -> u32 {
    crc32fast::hash(&block[..LOG_BLOCK_CHECKSUM])
}

#[inline]
pub fn stamp_block_checksum(block: &mut [u8]) {
    let checksum = block_checksum(block);
    block[LOG_BLOCK_CHECKSUM..LOG_BLOCK_SIZE].copy_from_slice(&checksum.to_le_bytes());
}

#[inline]
pub fn verify_block_checksum(block: &[u8]) -> bool {
    let stored = u32::from_le_bytes(read_array(block, LOG_BLOCK_CHECKSUM));
    stored == block_checksum(block)
}

#[inline]
fn read_array<const N: usize>(block: &[u8], offset: usize) -> [u8; N] {
    let mut res = [0u8; N];
    res.copy_from_slice(&block[offset..offset + N]);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_add_within_block() {
        let lsn = LOG_FIRST_DATA_LSN;
        assert_eq!(lsn_add(lsn, 0), lsn);
        assert_eq!(lsn_add(lsn, 100), lsn + 100);
        assert_eq!(lsn_add(lsn, LOG_BLOCK_PAYLOAD_SIZE - 1), lsn + 495);
    }

    #[test]
    fn test_lsn_add_crosses_blocks() {
        let lsn = LOG_FIRST_DATA_LSN;
        // exactly fills the first block: points after next header.
        let end = lsn_add(lsn, LOG_BLOCK_PAYLOAD_SIZE);
        assert_eq!(end, LOG_START_LSN + 512 + 12);
        assert!(is_data_lsn(end));
        // spanning three blocks
        let end = lsn_add(lsn + 400, 1000);
        assert_eq!(lsn_payload_len(lsn + 400, end), 1000);
        assert_eq!(block_no(end), block_no(lsn) + 2);
        for len in [1usize, 95, 96, 97, 496, 497, 992, 5000] {
            let start = lsn + 400;
            assert_eq!(lsn_payload_len(start, lsn_add(start, len)), len);
            assert!((lsn_add(start, len) - start) as usize <= max_lsn_span(len));
        }
    }

    #[test]
    fn test_block_header_fields() {
        let mut block = [0u8; LOG_BLOCK_SIZE];
        init_block(&mut block, 77);
        assert_eq!(block_hdr_no(&block), 77);
        assert!(!block_flush_bit(&block));
        assert_eq!(block_data_len(&block), LOG_BLOCK_HDR_SIZE);
        set_block_hdr_no(&mut block, 77, true);
        assert_eq!(block_hdr_no(&block), 77);
        assert!(block_flush_bit(&block));
        set_block_first_rec_group(&mut block, 40);
        set_block_data_len(&mut block, 300);
        assert_eq!(block_first_rec_group(&block), 40);
        assert_eq!(block_data_len(&block), 300);
        stamp_block_checksum(&mut block);
        assert!(verify_block_checksum(&block));
        block[100] = 1;
        assert!(!verify_block_checksum(&block));
    }

    #[test]
    fn test_block_floor_ceil() {
        assert_eq!(block_floor(LOG_START_LSN + 13), LOG_START_LSN);
        assert_eq!(block_ceil(LOG_START_LSN + 13), LOG_START_LSN + 512);
        assert_eq!(block_ceil(LOG_START_LSN), LOG_START_LSN);
        assert_eq!(block_offset(LOG_START_LSN + 13), 13);
    }
}
