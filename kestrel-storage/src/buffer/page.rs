use crate::error::{Error, Result};
use std::fmt;

pub const PAGE_SIZE: usize = 16 * 1024;
pub type Page = [u8; PAGE_SIZE];
pub type SpaceId = u32;
pub type PageNo = u32;
pub type Lsn = u64;

// Page layout:
//
// | lsn(8) | space id(4) | page no(4) | payload ... | checksum(4) |
//
// Lsn is the end LSN of the latest mini-transaction which modified
// the page. Checksum covers all bytes before it and is stamped only
// on the copy being written to disk.
pub const PAGE_LSN_OFFSET: usize = 0;
pub const PAGE_SPACE_OFFSET: usize = 8;
pub const PAGE_NO_OFFSET: usize = 12;
pub const PAGE_HEADER_SIZE: usize = 16;
pub const PAGE_TRAILER_SIZE: usize = 4;
pub const PAGE_CHECKSUM_OFFSET: usize = PAGE_SIZE - PAGE_TRAILER_SIZE;
/// Payload range available to callers.
pub const PAGE_DATA_START: usize = PAGE_HEADER_SIZE;
pub const PAGE_DATA_END: usize = PAGE_CHECKSUM_OFFSET;

/// Identifier of a page: tablespace id and page number within it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub space: SpaceId,
    pub page_no: PageNo,
}

impl PageId {
    #[inline]
    pub const fn new(space: SpaceId, page_no: PageNo) -> Self {
        PageId { space, page_no }
    }

    /// Fold page id into a hash value, used to select hash partition.
    #[inline]
    pub fn fold(&self) -> u64 {
        let v = ((self.space as u64) << 32) | self.page_no as u64;
        // fibonacci hashing
        v.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

impl fmt::Debug for PageId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.space, self.page_no)
    }
}

#[inline]
pub fn page_lsn(page: &[u8]) -> Lsn {
    Lsn::from_le_bytes(page[PAGE_LSN_OFFSET..PAGE_LSN_OFFSET + 8].try_into().unwrap())
}

#[inline]
pub fn set_page_lsn(page: &mut [u8], lsn: Lsn) {
    page[PAGE_LSN_OFFSET..PAGE_LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
}

#[inline]
pub fn page_header_id(page: &[u8]) -> PageId {
    let space = SpaceId::from_le_bytes(
        page[PAGE_SPACE_OFFSET..PAGE_SPACE_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    let page_no = PageNo::from_le_bytes(page[PAGE_NO_OFFSET..PAGE_NO_OFFSET + 4].try_into().unwrap());
    PageId { space, page_no }
}

/// Zero the page and write its identity into header.
#[inline]
pub fn init_page(page: &mut [u8], page_id: PageId) {
    page.fill(0);
    page[PAGE_SPACE_OFFSET..PAGE_SPACE_OFFSET + 4].copy_from_slice(&page_id.space.to_le_bytes());
    page[PAGE_NO_OFFSET..PAGE_NO_OFFSET + 4].copy_from_slice(&page_id.page_no.to_le_bytes());
}

#[inline]
pub fn page_checksum(page: &[u8]) -> u32 {
    crc32fast::hash(&page[..PAGE_CHECKSUM_OFFSET])
}

/// Stamp checksum in the trailer, called on the copy to write.
#[inline]
pub fn stamp_page_checksum(page: &mut [u8]) {
    let checksum = page_checksum(page);
    page[PAGE_CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
}

/// Verify a page read from disk.
/// All-zero page is valid because tablespace extension does not
/// write anything.
#[inline]
pub fn verify_page(page: &[u8], page_id: PageId) -> Result<()> {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    let stored = u32::from_le_bytes(page[PAGE_CHECKSUM_OFFSET..].try_into()?);
    if stored != page_checksum(page) {
        if page.iter().all(|b| *b == 0) {
            return Ok(());
        }
        return Err(Error::PageCorrupted(page_id));
    }
    if page_header_id(page) != page_id {
        return Err(Error::PageCorrupted(page_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_and_checksum() {
        let page_id = PageId::new(2, 9);
        let mut page = vec![0u8; PAGE_SIZE];
        // fresh page is accepted
        assert!(verify_page(&page, page_id).is_ok());

        init_page(&mut page, page_id);
        set_page_lsn(&mut page, 12345);
        page[PAGE_DATA_START..PAGE_DATA_START + 4].copy_from_slice(b"data");
        stamp_page_checksum(&mut page);
        assert!(verify_page(&page, page_id).is_ok());
        assert_eq!(page_lsn(&page), 12345);
        assert_eq!(page_header_id(&page), page_id);

        // page stored at wrong location
        assert_eq!(
            verify_page(&page, PageId::new(2, 10)),
            Err(Error::PageCorrupted(PageId::new(2, 10)))
        );
        // torn page
        page[100] ^= 0xff;
        assert_eq!(
            verify_page(&page, page_id),
            Err(Error::PageCorrupted(page_id))
        );
    }

    #[test]
    fn test_page_id_fold_spreads() {
        let a = PageId::new(0, 1).fold();
        let b = PageId::new(0, 2).fold();
        let c = PageId::new(1, 1).fold();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{:?}", PageId::new(3, 4)), "[3:4]");
    }
}
