use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Weak};

use tracing::{info, warn};

use crate::common::error::{io_read_err, io_write_err};
use crate::common::{DbResult, PageNum};
use crate::config::PAGE_SIZE_BYTES;
use crate::storage::buffer_pool::BufferPoolManager;
use crate::storage::frame::FrameId;
use crate::storage::page::Page;

const HEADER_MAGIC: u32 = 0x5257_4244; // 'DBWR' in little endian hex
const HEADER_BYTES: u64 = 8; // magic + staged slot count
const SLOT_BYTES: u64 = 8 + PAGE_SIZE_BYTES as u64; // pool id + page num + page

struct StagedPage {
    slot: usize,
    page: Page,
}

struct DblwrInner {
    pages: HashMap<FrameId, StagedPage>,
    next_slot: usize,
}

/// Torn-write protection.
///
/// Flushed pages are first staged durably in this small sequential file;
/// only once a batch is staged are the pages written to their home files.
/// After a crash, any staged page that is newer than its home copy is
/// written back before normal operation resumes.
pub struct DoubleWriteBuffer {
    file: Mutex<fs::File>,
    path: PathBuf,
    inner: Mutex<DblwrInner>,
    manager: Mutex<Weak<BufferPoolManager>>,
    max_pages: usize,
}

impl DoubleWriteBuffer {
    pub fn open(path: &Path, max_pages: usize) -> DbResult<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_write_err("create dblwr dir", e))?;
            }
            let mut file =
                fs::File::create(path).map_err(|e| io_write_err("create dblwr file", e))?;
            file.write_all(&HEADER_MAGIC.to_le_bytes())
                .map_err(|e| io_write_err("init dblwr header", e))?;
            file.write_all(&0u32.to_le_bytes())
                .map_err(|e| io_write_err("init dblwr header", e))?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_read_err("open dblwr file", e))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            inner: Mutex::new(DblwrInner {
                pages: HashMap::new(),
                next_slot: 0,
            }),
            manager: Mutex::new(Weak::new()),
            max_pages,
        })
    }

    /// The manager is attached after construction since each owns a
    /// reference to the other.
    pub fn set_manager(&self, manager: Weak<BufferPoolManager>) {
        *self.manager.lock().unwrap() = manager;
    }

    /// Stage one flushed page. When the staging area is full, every
    /// staged page is written through to its home file and the staging
    /// area starts over.
    pub fn add_page(&self, buffer_pool_id: i32, page_num: PageNum, page: Page) -> DbResult<()> {
        let key = FrameId::new(buffer_pool_id, page_num);
        let mut inner = self.inner.lock().unwrap();

        let existing_slot = inner.pages.get(&key).map(|staged| staged.slot);
        let slot = match existing_slot {
            Some(slot) => slot,
            None => {
                let slot = inner.next_slot;
                inner.next_slot += 1;
                slot
            }
        };
        self.write_slot(slot, inner.next_slot, buffer_pool_id, page_num, &page)?;
        inner.pages.insert(key, StagedPage { slot, page });

        if inner.pages.len() >= self.max_pages {
            self.write_through(&mut inner)?;
        }
        Ok(())
    }

    /// The buffer pool asks here first when loading a page: the staging
    /// area may hold a copy newer than the home file.
    pub fn read_page(&self, buffer_pool_id: i32, page_num: PageNum) -> Option<Page> {
        let inner = self.inner.lock().unwrap();
        inner
            .pages
            .get(&FrameId::new(buffer_pool_id, page_num))
            .map(|staged| staged.page.clone())
    }

    /// Flush everything staged to home files; checkpoint path.
    pub fn flush_pages(&self) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        self.write_through(&mut inner)
    }

    /// Called when a buffer pool closes: its staged pages are written to
    /// the home file and dropped so a reopened file never sees a stale
    /// staged copy under the same pool id.
    pub fn clear_pages(&self, pool: &crate::storage::buffer_pool::DiskBufferPool) -> DbResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<FrameId> = inner
            .pages
            .keys()
            .filter(|k| k.buffer_pool_id == pool.id())
            .copied()
            .collect();
        for key in keys {
            if let Some(staged) = inner.pages.remove(&key) {
                pool.write_page(key.page_num, &staged.page)?;
            }
        }
        Ok(())
    }

    /// Crash-recovery entry point: re-apply staged pages that are intact
    /// and newer than the home copy. Runs before the log replay touches
    /// any page.
    pub fn recover(&self) -> DbResult<()> {
        let staged = self.load_staged()?;
        let manager = self.manager.lock().unwrap().upgrade();
        let Some(manager) = manager else {
            return Ok(());
        };

        let mut applied = 0usize;
        for (pool_id, page_num, page) in staged {
            if !page.check_sum_ok() {
                warn!(
                    "dblwr: staged page pool={} page={} fails checksum, skipped",
                    pool_id, page_num
                );
                continue;
            }
            let Some(pool) = manager.get_buffer_pool(pool_id) else {
                warn!("dblwr: no open pool with id {}, skipped", pool_id);
                continue;
            };
            let disk_lsn = pool.read_page_raw(page_num).map(|p| p.lsn).unwrap_or(-1);
            if page.lsn >= disk_lsn {
                // the staged page may be past what the header knows about
                pool.recover_page(page_num)?;
                pool.write_page(page_num, &page)?;
                applied += 1;
            }
        }
        if applied > 0 {
            info!("dblwr: recovered {} pages", applied);
        }
        self.reset()
    }

    fn load_staged(&self) -> DbResult<Vec<(i32, PageNum, Page)>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(4))
            .map_err(|e| io_read_err("seek dblwr header", e))?;
        let mut cnt_buf = [0u8; 4];
        if file.read_exact(&mut cnt_buf).is_err() {
            return Ok(Vec::new());
        }
        let count = u32::from_le_bytes(cnt_buf) as usize;

        let mut staged = Vec::with_capacity(count);
        for slot in 0..count {
            let offset = HEADER_BYTES + slot as u64 * SLOT_BYTES;
            if file.seek(SeekFrom::Start(offset)).is_err() {
                break;
            }
            let mut slot_buf = vec![0u8; SLOT_BYTES as usize];
            if file.read_exact(&mut slot_buf).is_err() {
                break; // torn tail
            }
            let pool_id = i32::from_le_bytes(slot_buf[0..4].try_into().unwrap());
            let page_num = i32::from_le_bytes(slot_buf[4..8].try_into().unwrap());
            match Page::from_bytes(&slot_buf[8..]) {
                Ok(page) => staged.push((pool_id, page_num, page)),
                Err(_) => break,
            }
        }
        Ok(staged)
    }

    fn write_slot(
        &self,
        slot: usize,
        staged_count: usize,
        buffer_pool_id: i32,
        page_num: PageNum,
        page: &Page,
    ) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        let offset = HEADER_BYTES + slot as u64 * SLOT_BYTES;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_write_err("seek dblwr slot", e))?;
        file.write_all(&buffer_pool_id.to_le_bytes())
            .map_err(|e| io_write_err("write dblwr slot", e))?;
        file.write_all(&page_num.to_le_bytes())
            .map_err(|e| io_write_err("write dblwr slot", e))?;
        file.write_all(&page.to_bytes())
            .map_err(|e| io_write_err("write dblwr slot", e))?;
        // the staged count goes out with the slot in one sync
        file.seek(SeekFrom::Start(4))
            .map_err(|e| io_write_err("seek dblwr header", e))?;
        file.write_all(&(staged_count as u32).to_le_bytes())
            .map_err(|e| io_write_err("write dblwr header", e))?;
        file.sync_data()
            .map_err(|e| io_write_err("sync dblwr file", e))?;
        Ok(())
    }

    fn write_through(&self, inner: &mut DblwrInner) -> DbResult<()> {
        let manager = self.manager.lock().unwrap().upgrade();
        if let Some(manager) = manager {
            for (key, staged) in inner.pages.iter() {
                if let Some(pool) = manager.get_buffer_pool(key.buffer_pool_id) {
                    pool.write_page(key.page_num, &staged.page)?;
                } else {
                    warn!(
                        "dblwr: pool {} closed with pages still staged",
                        key.buffer_pool_id
                    );
                }
            }
        }
        inner.pages.clear();
        inner.next_slot = 0;
        self.reset()
    }

    fn reset(&self) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(4))
            .map_err(|e| io_write_err("seek dblwr header", e))?;
        file.write_all(&0u32.to_le_bytes())
            .map_err(|e| io_write_err("reset dblwr header", e))?;
        file.set_len(HEADER_BYTES)
            .map_err(|e| io_write_err("truncate dblwr file", e))?;
        file.sync_data()
            .map_err(|e| io_write_err("sync dblwr file", e))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use super::*;
    use crate::storage::wal::LogHandler;
    use crate::utils;

    #[test]
    #[serial]
    fn test_staged_page_survives_restart() {
        let dir = utils::test_dir("dblwr_recover");
        let dblwr_path = dir.join("test.dblwr");
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr = Arc::new(DoubleWriteBuffer::open(&dblwr_path, 16).unwrap());
        let manager =
            crate::storage::buffer_pool::BufferPoolManager::new(log, dblwr.clone(), 64);
        let data_path = dir.join("t.data");
        manager.create_file(&data_path).unwrap();
        let pool = manager.open_file(&data_path).unwrap();

        // stage a page that never reached the home file
        let mut page = Page::new();
        page.page_num = 1;
        page.lsn = 99;
        page.data[5] = 0xAB;
        page.refresh_check_sum();
        dblwr.add_page(pool.id(), 1, page).unwrap();

        // a fresh buffer over the same staging file plays the part of a
        // process that crashed after staging
        let reopened = DoubleWriteBuffer::open(&dblwr_path, 16).unwrap();
        reopened.set_manager(Arc::downgrade(&manager));
        reopened.recover().unwrap();

        let recovered = pool.read_page_raw(1).unwrap();
        assert_eq!(recovered.lsn, 99);
        assert_eq!(recovered.data[5], 0xAB);
        assert!(recovered.check_sum_ok());
        assert!(pool.is_page_allocated(1));
    }

    #[test]
    #[serial]
    fn test_corrupt_staged_page_is_skipped() {
        let dir = utils::test_dir("dblwr_corrupt");
        let dblwr_path = dir.join("test.dblwr");
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr = Arc::new(DoubleWriteBuffer::open(&dblwr_path, 16).unwrap());
        let manager =
            crate::storage::buffer_pool::BufferPoolManager::new(log, dblwr.clone(), 64);
        let data_path = dir.join("t.data");
        manager.create_file(&data_path).unwrap();
        let pool = manager.open_file(&data_path).unwrap();

        // a torn page: checksum does not match the data
        let mut page = Page::new();
        page.page_num = 1;
        page.lsn = 50;
        page.data[0] = 1;
        page.check_sum = 0xDEAD;
        dblwr.add_page(pool.id(), 1, page).unwrap();

        let reopened = DoubleWriteBuffer::open(&dblwr_path, 16).unwrap();
        reopened.set_manager(Arc::downgrade(&manager));
        reopened.recover().unwrap();
        // nothing was applied
        assert!(!pool.is_page_allocated(1));
    }
}
