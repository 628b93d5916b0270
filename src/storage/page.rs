use crate::common::{DbError, DbResult, Lsn, PageNum};
use crate::config::{PAGE_DATA_BYTES, PAGE_SIZE_BYTES};

/// One fixed-size page.
///
/// On disk a page is laid out as
/// `[page_num: i32][lsn: i64][check_sum: u32][data: PAGE_DATA_BYTES]`.
/// The checksum covers the data region only and is refreshed right
/// before the page goes out through the double-write buffer.
#[derive(Debug, Clone)]
pub struct Page {
    pub page_num: PageNum,
    pub lsn: Lsn,
    pub check_sum: u32,
    pub data: Vec<u8>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            page_num: 0,
            lsn: 0,
            check_sum: 0,
            data: vec![0u8; PAGE_DATA_BYTES],
        }
    }

    pub fn compute_check_sum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }

    pub fn refresh_check_sum(&mut self) {
        self.check_sum = self.compute_check_sum();
    }

    pub fn check_sum_ok(&self) -> bool {
        self.check_sum == self.compute_check_sum()
    }

    pub fn reset(&mut self, page_num: PageNum) {
        self.page_num = page_num;
        self.lsn = 0;
        self.check_sum = 0;
        self.data.fill(0);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE_BYTES);
        buf.extend(&self.page_num.to_le_bytes());
        buf.extend(&self.lsn.to_le_bytes());
        buf.extend(&self.check_sum.to_le_bytes());
        buf.extend(&self.data);
        debug_assert_eq!(buf.len(), PAGE_SIZE_BYTES);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> DbResult<Self> {
        if buf.len() != PAGE_SIZE_BYTES {
            return Err(DbError::Internal(format!(
                "bad page buffer length {}",
                buf.len()
            )));
        }
        let page_num = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let lsn = i64::from_le_bytes(buf[4..12].try_into().unwrap());
        let check_sum = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Ok(Self {
            page_num,
            lsn,
            check_sum,
            data: buf[16..].to_vec(),
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

/// File header stored in the data region of page 0.
///
/// Layout: `[buffer_pool_id: i32][page_count: i32][allocated_pages: i32]`
/// followed by the allocation bitmap (bit N set <=> page N allocated).
#[derive(Debug, Clone)]
pub struct BPFileHeader {
    pub buffer_pool_id: i32,
    pub page_count: i32,
    pub allocated_pages: i32,
    pub bitmap: Vec<u8>,
}

pub const FILE_HEADER_FIXED_BYTES: usize = 12;
pub const BITMAP_BYTES: usize = PAGE_DATA_BYTES - FILE_HEADER_FIXED_BYTES;

impl BPFileHeader {
    /// The bitmap capacity bounds how many pages one file can hold.
    pub const MAX_PAGE_NUM: i32 = (BITMAP_BYTES * 8) as i32;

    /// A fresh file: page 0 (the header itself) is the only page.
    pub fn new(buffer_pool_id: i32) -> Self {
        let mut hdr = Self {
            buffer_pool_id,
            page_count: 1,
            allocated_pages: 1,
            bitmap: vec![0u8; BITMAP_BYTES],
        };
        hdr.set_allocated(0);
        hdr
    }

    pub fn is_allocated(&self, page_num: PageNum) -> bool {
        let byte = (page_num / 8) as usize;
        let bit = page_num % 8;
        self.bitmap[byte] & (1 << bit) != 0
    }

    pub fn set_allocated(&mut self, page_num: PageNum) {
        let byte = (page_num / 8) as usize;
        let bit = page_num % 8;
        self.bitmap[byte] |= 1 << bit;
    }

    pub fn clear_allocated(&mut self, page_num: PageNum) {
        let byte = (page_num / 8) as usize;
        let bit = page_num % 8;
        self.bitmap[byte] &= !(1 << bit);
    }

    /// First clear bit below page_count, if any.
    pub fn first_free_page(&self) -> Option<PageNum> {
        if self.allocated_pages >= self.page_count {
            return None;
        }
        (0..self.page_count).find(|&i| !self.is_allocated(i))
    }

    pub fn store(&self, data: &mut [u8]) {
        data[0..4].copy_from_slice(&self.buffer_pool_id.to_le_bytes());
        data[4..8].copy_from_slice(&self.page_count.to_le_bytes());
        data[8..12].copy_from_slice(&self.allocated_pages.to_le_bytes());
        data[FILE_HEADER_FIXED_BYTES..FILE_HEADER_FIXED_BYTES + BITMAP_BYTES]
            .copy_from_slice(&self.bitmap);
    }

    pub fn load(data: &[u8]) -> Self {
        Self {
            buffer_pool_id: i32::from_le_bytes(data[0..4].try_into().unwrap()),
            page_count: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            allocated_pages: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            bitmap: data[FILE_HEADER_FIXED_BYTES..FILE_HEADER_FIXED_BYTES + BITMAP_BYTES]
                .to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_round_trip() {
        let mut page = Page::new();
        page.page_num = 7;
        page.lsn = 42;
        page.data[0] = 0xAB;
        page.data[PAGE_DATA_BYTES - 1] = 0xCD;
        page.refresh_check_sum();

        let bytes = page.to_bytes();
        let loaded = Page::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.page_num, 7);
        assert_eq!(loaded.lsn, 42);
        assert!(loaded.check_sum_ok());
        assert_eq!(loaded.data[0], 0xAB);
    }

    #[test]
    fn test_check_sum_detects_corruption() {
        let mut page = Page::new();
        page.data[100] = 1;
        page.refresh_check_sum();
        assert!(page.check_sum_ok());
        page.data[100] = 2;
        assert!(!page.check_sum_ok());
    }

    #[test]
    fn test_header_bitmap_invariant() {
        let mut hdr = BPFileHeader::new(3);
        assert!(hdr.is_allocated(0));
        assert_eq!(hdr.allocated_pages, 1);

        hdr.page_count = 3;
        hdr.set_allocated(2);
        hdr.allocated_pages += 1;
        assert_eq!(hdr.first_free_page(), Some(1));

        let popcount: i32 = hdr.bitmap.iter().map(|b| b.count_ones() as i32).sum();
        assert_eq!(popcount, hdr.allocated_pages);

        let mut data = vec![0u8; PAGE_DATA_BYTES];
        hdr.store(&mut data);
        let loaded = BPFileHeader::load(&data);
        assert_eq!(loaded.page_count, 3);
        assert_eq!(loaded.allocated_pages, 2);
        assert!(loaded.is_allocated(2));
        assert!(!loaded.is_allocated(1));
    }
}
