use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::common::{DbError, DbResult, PageNum, Rid, SlotNum};
use crate::config::PAGE_DATA_BYTES;
use crate::storage::buffer_pool::DiskBufferPool;
use crate::storage::frame::Frame;

/// Slotted page layout inside a page's data region:
/// `[record_num: i32][record_capacity: i32][record_size: i32]`
/// `[occupancy bitmap][slot 0][slot 1]...` — all slots are fixed size.
const PAGE_HDR_BYTES: usize = 12;

fn capacity_for(record_size: usize) -> usize {
    // one record costs its bytes plus one bitmap bit
    (PAGE_DATA_BYTES - PAGE_HDR_BYTES) * 8 / (record_size * 8 + 1)
}

fn bitmap_bytes(capacity: usize) -> usize {
    capacity.div_ceil(8)
}

struct PageView<'a> {
    data: &'a mut [u8],
}

impl<'a> PageView<'a> {
    fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    fn record_num(&self) -> i32 {
        i32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    fn set_record_num(&mut self, n: i32) {
        self.data[0..4].copy_from_slice(&n.to_le_bytes());
    }

    fn capacity(&self) -> usize {
        i32::from_le_bytes(self.data[4..8].try_into().unwrap()) as usize
    }

    fn record_size(&self) -> usize {
        i32::from_le_bytes(self.data[8..12].try_into().unwrap()) as usize
    }

    fn init(&mut self, record_size: usize) {
        let capacity = capacity_for(record_size);
        self.data.fill(0);
        self.data[4..8].copy_from_slice(&(capacity as i32).to_le_bytes());
        self.data[8..12].copy_from_slice(&(record_size as i32).to_le_bytes());
    }

    fn is_occupied(&self, slot: SlotNum) -> bool {
        let byte = PAGE_HDR_BYTES + (slot / 8) as usize;
        self.data[byte] & (1 << (slot % 8)) != 0
    }

    fn set_occupied(&mut self, slot: SlotNum, occupied: bool) {
        let byte = PAGE_HDR_BYTES + (slot / 8) as usize;
        if occupied {
            self.data[byte] |= 1 << (slot % 8);
        } else {
            self.data[byte] &= !(1 << (slot % 8));
        }
    }

    fn first_free_slot(&self) -> Option<SlotNum> {
        (0..self.capacity() as SlotNum).find(|&s| !self.is_occupied(s))
    }

    fn slot_range(&self, slot: SlotNum) -> std::ops::Range<usize> {
        let record_size = self.record_size();
        let start = PAGE_HDR_BYTES + bitmap_bytes(self.capacity()) + slot as usize * record_size;
        start..start + record_size
    }

    fn record(&self, slot: SlotNum) -> &[u8] {
        let range = self.slot_range(slot);
        &self.data[range]
    }

    fn record_mut(&mut self, slot: SlotNum) -> &mut [u8] {
        let range = self.slot_range(slot);
        &mut self.data[range]
    }
}

/// One record pulled out of a table: its identity plus a copy of the
/// raw bytes (system fields first, then user fields).
#[derive(Debug, Clone)]
pub struct Record {
    pub rid: Rid,
    pub data: Vec<u8>,
}

/// Fixed-length record storage over one buffer pool file.
pub struct RecordFileHandler {
    pool: Arc<DiskBufferPool>,
    record_size: usize,
    // page that most recently had room, a hint only
    insert_hint: Mutex<PageNum>,
}

impl RecordFileHandler {
    pub fn new(pool: Arc<DiskBufferPool>, record_size: usize) -> DbResult<Self> {
        if record_size == 0 || capacity_for(record_size) == 0 {
            return Err(DbError::InvalidArgument(format!(
                "record size {} does not fit a page",
                record_size
            )));
        }
        Ok(Self {
            pool,
            record_size,
            insert_hint: Mutex::new(0),
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn pool(&self) -> &Arc<DiskBufferPool> {
        &self.pool
    }

    pub fn insert_record(&self, data: &[u8]) -> DbResult<Rid> {
        if data.len() != self.record_size {
            return Err(DbError::InvalidArgument(format!(
                "record length {} != schema record size {}",
                data.len(),
                self.record_size
            )));
        }

        // try the hint page first, then every allocated page
        let hint = *self.insert_hint.lock().unwrap();
        let mut candidates: Vec<PageNum> = Vec::new();
        if hint > 0 && self.pool.is_page_allocated(hint) {
            candidates.push(hint);
        }
        candidates.extend((1..self.pool.page_count()).filter(|p| self.pool.is_page_allocated(*p)));

        for page_num in candidates {
            let frame = self.pool.get_page(page_num)?;
            let result = self.try_insert_into(&frame, data);
            self.pool.unpin_page(&frame);
            if let Some(slot) = result {
                *self.insert_hint.lock().unwrap() = page_num;
                return Ok(Rid::new(page_num, slot));
            }
        }

        // no room anywhere: extend the file
        let frame = self.pool.allocate_page()?;
        let page_num = frame.page_num();
        {
            let mut page = frame.page_mut_dirty();
            PageView::new(&mut page.data).init(self.record_size);
        }
        let slot = self
            .try_insert_into(&frame, data)
            .expect("fresh record page must accept a record");
        self.pool.unpin_page(&frame);
        *self.insert_hint.lock().unwrap() = page_num;
        debug!(
            "record file {} grew to page {}",
            self.pool.file_name(),
            page_num
        );
        Ok(Rid::new(page_num, slot))
    }

    fn try_insert_into(&self, frame: &Arc<Frame>, data: &[u8]) -> Option<SlotNum> {
        let mut page = frame.page_mut();
        let mut view = PageView::new(&mut page.data);
        if view.record_size() != self.record_size {
            return None; // not a record page of this table
        }
        let slot = view.first_free_slot()?;
        view.set_occupied(slot, true);
        view.record_mut(slot).copy_from_slice(data);
        let n = view.record_num() + 1;
        view.set_record_num(n);
        drop(page);
        frame.mark_dirty();
        Some(slot)
    }

    pub fn delete_record(&self, rid: &Rid) -> DbResult<()> {
        let frame = self.pool.get_page(rid.page_num)?;
        let result = (|| {
            let mut page = frame.page_mut();
            let mut view = PageView::new(&mut page.data);
            if rid.slot_num < 0 || rid.slot_num as usize >= view.capacity() {
                return Err(DbError::RecordNotExist(rid.to_string()));
            }
            if !view.is_occupied(rid.slot_num) {
                return Err(DbError::RecordNotExist(rid.to_string()));
            }
            view.set_occupied(rid.slot_num, false);
            let n = view.record_num() - 1;
            view.set_record_num(n);
            Ok(())
        })();
        if result.is_ok() {
            frame.mark_dirty();
        }
        self.pool.unpin_page(&frame);
        result
    }

    pub fn get_record(&self, rid: &Rid) -> DbResult<Record> {
        let frame = self.pool.get_page(rid.page_num)?;
        let result = (|| {
            let mut page = frame.page_mut();
            let view = PageView::new(&mut page.data);
            if rid.slot_num < 0
                || rid.slot_num as usize >= view.capacity()
                || !view.is_occupied(rid.slot_num)
            {
                return Err(DbError::RecordNotExist(rid.to_string()));
            }
            Ok(Record {
                rid: *rid,
                data: view.record(rid.slot_num).to_vec(),
            })
        })();
        self.pool.unpin_page(&frame);
        result
    }

    /// Run `updater` over a mutable view of the record. The updater's
    /// return decides whether its edits are kept; the page only becomes
    /// dirty when bytes actually changed.
    pub fn visit_record<F>(&self, rid: &Rid, updater: F) -> DbResult<()>
    where
        F: FnOnce(&mut [u8]) -> bool,
    {
        let frame = self.pool.get_page(rid.page_num)?;
        let result = (|| {
            let mut page = frame.page_mut();
            let mut view = PageView::new(&mut page.data);
            if rid.slot_num < 0
                || rid.slot_num as usize >= view.capacity()
                || !view.is_occupied(rid.slot_num)
            {
                return Err(DbError::RecordNotExist(rid.to_string()));
            }
            let before = view.record(rid.slot_num).to_vec();
            let slice = view.record_mut(rid.slot_num);
            let keep = updater(slice);
            if !keep {
                slice.copy_from_slice(&before);
                return Ok(false);
            }
            Ok(*slice != *before)
        })();
        match result {
            Ok(changed) => {
                if changed {
                    frame.mark_dirty();
                }
                self.pool.unpin_page(&frame);
                Ok(())
            }
            Err(e) => {
                self.pool.unpin_page(&frame);
                Err(e)
            }
        }
    }

    pub fn scanner(&self) -> RecordFileScanner {
        RecordFileScanner {
            pool: self.pool.clone(),
            record_size: self.record_size,
            next_page: 1,
            next_slot: 0,
            current: None,
        }
    }
}

/// Raw scan over every occupied slot of a record file, page by page.
/// Visibility filtering happens one layer up, where the transaction and
/// the table schema are known. The scanner owns its pool handle so it
/// can outlive the handler that made it.
pub struct RecordFileScanner {
    pool: Arc<DiskBufferPool>,
    record_size: usize,
    next_page: PageNum,
    next_slot: SlotNum,
    current: Option<Arc<Frame>>,
}

impl RecordFileScanner {
    /// Next occupied record, or `RecordEof` past the last page.
    pub fn next_record(&mut self) -> DbResult<Record> {
        loop {
            if self.current.is_none() {
                if self.next_page >= self.pool.page_count() {
                    return Err(DbError::RecordEof);
                }
                if !self.pool.is_page_allocated(self.next_page) {
                    self.next_page += 1;
                    continue;
                }
                let frame = self.pool.get_page(self.next_page)?;
                // skip pages not formatted for this record size
                let ok = {
                    let mut page = frame.page_mut();
                    PageView::new(&mut page.data).record_size() == self.record_size
                };
                if !ok {
                    self.pool.unpin_page(&frame);
                    self.next_page += 1;
                    continue;
                }
                self.current = Some(frame);
                self.next_slot = 0;
            }

            let frame = self.current.as_ref().unwrap().clone();
            let found = {
                let mut page = frame.page_mut();
                let view = PageView::new(&mut page.data);
                let capacity = view.capacity() as SlotNum;
                let mut found = None;
                while self.next_slot < capacity {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    if view.is_occupied(slot) {
                        found = Some(Record {
                            rid: Rid::new(self.next_page, slot),
                            data: view.record(slot).to_vec(),
                        });
                        break;
                    }
                }
                found
            };
            match found {
                Some(record) => return Ok(record),
                None => {
                    self.pool.unpin_page(&frame);
                    self.current = None;
                    self.next_page += 1;
                }
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(frame) = self.current.take() {
            self.pool.unpin_page(&frame);
        }
    }
}

impl Drop for RecordFileScanner {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBLWR_MAX_PAGES;
    use crate::storage::buffer_pool::BufferPoolManager;
    use crate::storage::dblwr::DoubleWriteBuffer;
    use crate::storage::wal::LogHandler;
    use crate::utils;

    fn setup(annot: &str, record_size: usize) -> RecordFileHandler {
        let dir = utils::test_dir(annot);
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr =
            Arc::new(DoubleWriteBuffer::open(&dir.join("test.dblwr"), DBLWR_MAX_PAGES).unwrap());
        let manager = BufferPoolManager::new(log, dblwr, 64);
        let path = dir.join("records.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();
        RecordFileHandler::new(pool, record_size).unwrap()
    }

    fn record_bytes(tag: u8, size: usize) -> Vec<u8> {
        let mut v = vec![0u8; size];
        v[0] = tag;
        v[size - 1] = tag;
        v
    }

    #[test]
    fn test_insert_get_delete() {
        let handler = setup("rec_basic", 32);
        let rid = handler.insert_record(&record_bytes(1, 32)).unwrap();
        let record = handler.get_record(&rid).unwrap();
        assert_eq!(record.data[0], 1);

        handler.delete_record(&rid).unwrap();
        assert!(matches!(
            handler.get_record(&rid),
            Err(DbError::RecordNotExist(_))
        ));
        // the slot is reused
        let rid2 = handler.insert_record(&record_bytes(2, 32)).unwrap();
        assert_eq!(rid, rid2);
    }

    #[test]
    fn test_scan_spans_pages() {
        let size = 1000; // few records per page, forces page growth
        let handler = setup("rec_scan", size);
        let n = 25;
        for i in 0..n {
            handler.insert_record(&record_bytes(i as u8, size)).unwrap();
        }
        let mut scanner = handler.scanner();
        let mut tags = Vec::new();
        loop {
            match scanner.next_record() {
                Ok(record) => tags.push(record.data[0]),
                Err(DbError::RecordEof) => break,
                Err(e) => panic!("scan failed: {}", e),
            }
        }
        tags.sort_unstable();
        assert_eq!(tags, (0..n as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_visit_record_dirty_only_on_change() {
        let handler = setup("rec_visit", 16);
        let rid = handler.insert_record(&record_bytes(9, 16)).unwrap();
        handler.pool().flush_all_pages().unwrap();

        // an update that changes nothing leaves the page clean
        handler.visit_record(&rid, |_data| true).unwrap();
        let frame = handler.pool().get_page(rid.page_num).unwrap();
        assert!(!frame.is_dirty());
        handler.pool().unpin_page(&frame);

        // a rejected update is rolled back
        handler
            .visit_record(&rid, |data| {
                data[1] = 0xFF;
                false
            })
            .unwrap();
        assert_eq!(handler.get_record(&rid).unwrap().data[1], 0);

        // an accepted change marks the page dirty
        handler
            .visit_record(&rid, |data| {
                data[1] = 0xAA;
                true
            })
            .unwrap();
        let frame = handler.pool().get_page(rid.page_num).unwrap();
        assert!(frame.is_dirty());
        handler.pool().unpin_page(&frame);
        assert_eq!(handler.get_record(&rid).unwrap().data[1], 0xAA);
    }
}
