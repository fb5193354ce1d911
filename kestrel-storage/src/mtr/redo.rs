//! Redo record format.
//!
//! A record starts with one type byte, followed by space id and page
//! number in compressed form, then a type specific body:
//!
//! - Write1/Write2/Write4: offset(u16), value(compressed).
//! - Write8: offset(u16), value(u64).
//! - WriteString: offset(u16), length(u16), bytes.
//! - InitPage: empty.
//!
//! Records of one mini-transaction form a record group. A group of one
//! record has `SINGLE_REC_FLAG` set in its type byte, otherwise the
//! group is terminated by a one byte `MultiRecEnd` record.
use crate::buffer::page::{init_page, PageId, PAGE_DATA_END, PAGE_DATA_START};
use crate::error::{Error, Result};

pub const SINGLE_REC_FLAG: u8 = 0x80;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoType {
    Write1 = 1,
    Write2 = 2,
    Write4 = 4,
    Write8 = 8,
    InitPage = 29,
    WriteString = 30,
    MultiRecEnd = 31,
}

impl TryFrom<u8> for RedoType {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        let ty = match value {
            1 => RedoType::Write1,
            2 => RedoType::Write2,
            4 => RedoType::Write4,
            8 => RedoType::Write8,
            29 => RedoType::InitPage,
            30 => RedoType::WriteString,
            31 => RedoType::MultiRecEnd,
            _ => return Err(Error::InvalidFormat),
        };
        Ok(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoBody {
    /// Little-endian integer of `len` bytes at `offset`.
    Write { offset: u16, len: u8, value: u64 },
    WriteString { offset: u16, data: Vec<u8> },
    InitPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoRecord {
    pub page_id: PageId,
    pub body: RedoBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRecord {
    Record { record: RedoRecord, single: bool },
    MultiRecEnd,
}

impl RedoRecord {
    /// Parse one record from the beginning of `buf`.
    /// Returns None if `buf` ends in the middle of the record.
    pub fn parse(buf: &[u8]) -> Result<Option<(ParsedRecord, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let single = first & SINGLE_REC_FLAG != 0;
        let ty = RedoType::try_from(first & !SINGLE_REC_FLAG)?;
        if ty == RedoType::MultiRecEnd {
            if single {
                return Err(Error::InvalidFormat);
            }
            return Ok(Some((ParsedRecord::MultiRecEnd, 1)));
        }
        let mut pos = 1;
        let Some((space, n)) = read_compressed(&buf[pos..]) else {
            return Ok(None);
        };
        pos += n;
        let Some((page_no, n)) = read_compressed(&buf[pos..]) else {
            return Ok(None);
        };
        pos += n;
        let body = match ty {
            RedoType::InitPage => RedoBody::InitPage,
            RedoType::Write1 | RedoType::Write2 | RedoType::Write4 => {
                let Some(offset) = read_u16(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += 2;
                let Some((value, n)) = read_compressed(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += n;
                let len = ty as u8;
                if len < 4 && value >> (len * 8) != 0 {
                    return Err(Error::InvalidFormat);
                }
                RedoBody::Write {
                    offset,
                    len,
                    value: value as u64,
                }
            }
            RedoType::Write8 => {
                let Some(offset) = read_u16(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += 2;
                if buf.len() < pos + 8 {
                    return Ok(None);
                }
                let value = u64::from_le_bytes(buf[pos..pos + 8].try_into()?);
                pos += 8;
                RedoBody::Write {
                    offset,
                    len: 8,
                    value,
                }
            }
            RedoType::WriteString => {
                let (Some(offset), Some(len)) = (
                    read_u16(&buf[pos..]),
                    buf.get(pos + 2..).and_then(read_u16),
                ) else {
                    return Ok(None);
                };
                pos += 4;
                let len = len as usize;
                if buf.len() < pos + len {
                    return Ok(None);
                }
                let data = buf[pos..pos + len].to_vec();
                pos += len;
                RedoBody::WriteString { offset, data }
            }
            RedoType::MultiRecEnd => unreachable!(),
        };
        let record = RedoRecord {
            page_id: PageId::new(space, page_no),
            body,
        };
        Ok(Some((ParsedRecord::Record { record, single }, pos)))
    }

    /// Apply the record to page content.
    pub fn apply(&self, page: &mut [u8]) -> Result<()> {
        match &self.body {
            RedoBody::Write { offset, len, value } => {
                let offset = *offset as usize;
                let len = *len as usize;
                check_range(offset, len)?;
                page[offset..offset + len].copy_from_slice(&value.to_le_bytes()[..len]);
            }
            RedoBody::WriteString { offset, data } => {
                let offset = *offset as usize;
                check_range(offset, data.len())?;
                page[offset..offset + data.len()].copy_from_slice(data);
            }
            RedoBody::InitPage => init_page(page, self.page_id),
        }
        Ok(())
    }
}

#[inline]
fn check_range(offset: usize, len: usize) -> Result<()> {
    if offset < PAGE_DATA_START || offset + len > PAGE_DATA_END {
        return Err(Error::InvalidFormat);
    }
    Ok(())
}

#[inline]
fn read_u16(buf: &[u8]) -> Option<u16> {
    buf.get(..2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
fn write_header(buf: &mut Vec<u8>, ty: RedoType, page_id: PageId) {
    buf.push(ty as u8);
    write_compressed(buf, page_id.space);
    write_compressed(buf, page_id.page_no);
}

/// Append a record writing `len` (1, 2, 4 or 8) little-endian bytes.
#[inline]
pub fn encode_write(buf: &mut Vec<u8>, page_id: PageId, offset: usize, len: u8, value: u64) {
    let ty = match len {
        1 => RedoType::Write1,
        2 => RedoType::Write2,
        4 => RedoType::Write4,
        8 => RedoType::Write8,
        _ => panic!("invalid redo write length {}", len),
    };
    write_header(buf, ty, page_id);
    buf.extend_from_slice(&(offset as u16).to_le_bytes());
    if len == 8 {
        buf.extend_from_slice(&value.to_le_bytes());
    } else {
        write_compressed(buf, value as u32);
    }
}

#[inline]
pub fn encode_write_string(buf: &mut Vec<u8>, page_id: PageId, offset: usize, data: &[u8]) {
    write_header(buf, RedoType::WriteString, page_id);
    buf.extend_from_slice(&(offset as u16).to_le_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(data);
}

#[inline]
pub fn encode_init_page(buf: &mut Vec<u8>, page_id: PageId) {
    write_header(buf, RedoType::InitPage, page_id);
}

#[inline]
pub fn encode_multi_rec_end(buf: &mut Vec<u8>) {
    buf.push(RedoType::MultiRecEnd as u8);
}

/// Number of bytes of compressed form of `v`.
#[inline]
pub const fn compressed_size(v: u32) -> usize {
    if v < 0x80 {
        1
    } else if v < 0x4000 {
        2
    } else if v < 0x20_0000 {
        3
    } else if v < 0x1000_0000 {
        4
    } else {
        5
    }
}

/// Append `v` in compressed form. Leading bits of first byte tell the
/// total length, remaining bits are big-endian value.
#[inline]
pub fn write_compressed(buf: &mut Vec<u8>, v: u32) {
    match compressed_size(v) {
        1 => buf.push(v as u8),
        2 => buf.extend_from_slice(&((v | 0x8000) as u16).to_be_bytes()),
        3 => buf.extend_from_slice(&(v | 0xC0_0000).to_be_bytes()[1..]),
        4 => buf.extend_from_slice(&(v | 0xE000_0000).to_be_bytes()),
        _ => {
            buf.push(0xF0);
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }
}

/// Read a compressed integer, returns value and bytes consumed.
/// Returns None if buffer is too short.
#[inline]
pub fn read_compressed(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()? as u32;
    let (len, value) = if first < 0x80 {
        (1, first)
    } else if first < 0xC0 {
        (2, first & 0x3F)
    } else if first < 0xE0 {
        (3, first & 0x1F)
    } else if first < 0xF0 {
        (4, first & 0x0F)
    } else {
        (5, 0)
    };
    let bytes = buf.get(1..len)?;
    let value = bytes.iter().fold(value, |acc, b| (acc << 8) | *b as u32);
    Some((value, len))
}
