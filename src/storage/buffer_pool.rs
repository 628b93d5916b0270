use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::common::error::{io_read_err, io_write_err};
use crate::common::{BP_HEADER_PAGE, DbError, DbResult, Lsn, PageNum};
use crate::config::{FRAME_PURGE_BATCH, PAGE_SIZE_BYTES};
use crate::storage::dblwr::DoubleWriteBuffer;
use crate::storage::frame::{Frame, FrameId, FrameManager};
use crate::storage::page::{BPFileHeader, Page};
use crate::storage::wal::{LogEntry, LogHandler, LogPayload, LogReplayer};

/// Buffer pool over one file.
///
/// The header mutex serializes every structural operation on the file
/// (allocation bitmap, page loads); the file mutex only guards the
/// positional read/write pair on the descriptor.
pub struct DiskBufferPool {
    id: i32,
    file_name: String,
    file: Mutex<fs::File>,
    header: Mutex<BPFileHeader>,
    hdr_frame: Mutex<Option<Arc<Frame>>>,
    frame_manager: Arc<FrameManager>,
    log: Arc<LogHandler>,
    dblwr: Arc<DoubleWriteBuffer>,
    manager: Weak<BufferPoolManager>,
}

impl DiskBufferPool {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Return a pinned frame carrying the requested page.
    pub fn get_page(&self, page_num: PageNum) -> DbResult<Arc<Frame>> {
        let header = self.header.lock().unwrap();
        self.check_page_num(&header, page_num)?;
        self.get_page_internal(page_num)
    }

    /// Page lookup without allocation-bitmap checks; the header lock
    /// must be held by the caller.
    fn get_page_internal(&self, page_num: PageNum) -> DbResult<Arc<Frame>> {
        let frame_id = FrameId::new(self.id, page_num);
        loop {
            match self.frame_manager.get_or_alloc(frame_id) {
                Some((frame, true)) => return Ok(frame),
                Some((frame, false)) => {
                    if let Err(e) = self.load_page(page_num, &frame) {
                        frame.unpin();
                        let _ = self.frame_manager.free(frame_id);
                        return Err(e);
                    }
                    return Ok(frame);
                }
                None => self.evict_some()?,
            }
        }
    }

    /// Allocate a page: reuse the first clear bitmap bit, or grow the
    /// file. Returns a pinned frame for the new page.
    pub fn allocate_page(&self) -> DbResult<Arc<Frame>> {
        let mut header = self.header.lock().unwrap();

        if let Some(page_num) = header.first_free_page() {
            header.set_allocated(page_num);
            header.allocated_pages += 1;
            let lsn = self.log.append(LogPayload::AllocatePage {
                buffer_pool_id: self.id,
                page_num,
            })?;
            self.stamp_header(&header, lsn);

            let frame = self.get_page_internal(page_num)?;
            frame.page_mut_dirty().data.fill(0);
            return Ok(frame);
        }

        if header.page_count >= BPFileHeader::MAX_PAGE_NUM {
            warn!(
                "file buffer pool is full. page count {}, max page count {}",
                header.page_count,
                BPFileHeader::MAX_PAGE_NUM
            );
            return Err(DbError::BufferPoolNoBuf(format!(
                "file {} is full",
                self.file_name
            )));
        }

        let page_num = header.page_count;
        let lsn = self.log.append(LogPayload::AllocatePage {
            buffer_pool_id: self.id,
            page_num,
        })?;

        let frame_id = FrameId::new(self.id, page_num);
        let frame = loop {
            match self.frame_manager.get_or_alloc(frame_id) {
                Some((frame, _)) => break frame,
                None => self.evict_some()?,
            }
        };
        frame.reset_for(self.id, page_num);
        frame.mark_dirty();

        header.page_count += 1;
        header.allocated_pages += 1;
        header.set_allocated(page_num);
        self.stamp_header(&header, lsn);

        debug!(
            "allocate new page. file={}, page_num={}, pin={}",
            self.file_name,
            page_num,
            frame.pin_count()
        );
        Ok(frame)
    }

    /// Drop a page. The header page cannot be disposed, and a page that
    /// is still pinned by someone is refused.
    pub fn dispose_page(&self, page_num: PageNum) -> DbResult<()> {
        if page_num == BP_HEADER_PAGE {
            return Err(DbError::Internal(
                "cannot dispose the file header page".to_string(),
            ));
        }
        let mut header = self.header.lock().unwrap();
        self.check_page_num(&header, page_num)?;

        let frame_id = FrameId::new(self.id, page_num);
        if let Some(frame) = self.frame_manager.get(frame_id) {
            let pin = frame.unpin(); // undo the pin from the lookup
            if pin > 0 {
                return Err(DbError::Internal(format!(
                    "disposing page {} of {} while it is in use, pin={}",
                    page_num, self.file_name, pin
                )));
            }
            // content is being dropped, dirty or not
            frame.clear_dirty();
            self.frame_manager.free(frame_id)?;
        }

        let lsn = self.log.append(LogPayload::DeallocatePage {
            buffer_pool_id: self.id,
            page_num,
        })?;
        header.clear_allocated(page_num);
        header.allocated_pages -= 1;
        self.stamp_header(&header, lsn);
        Ok(())
    }

    pub fn unpin_page(&self, frame: &Arc<Frame>) {
        frame.unpin();
    }

    pub fn flush_page(&self, frame: &Arc<Frame>) -> DbResult<()> {
        self.flush_page_internal(frame)
    }

    /// The flush protocol: log first (WAL), then checksum, then the
    /// double-write staging area, then the frame is clean.
    pub(crate) fn flush_page_internal(&self, frame: &Arc<Frame>) -> DbResult<()> {
        let page_copy = {
            let mut page = frame.page_mut();
            self.log.append_and_flush(LogPayload::FlushPage {
                buffer_pool_id: self.id,
                page_num: page.page_num,
                page_lsn: page.lsn,
            })?;
            page.refresh_check_sum();
            page.clone()
        };
        self.dblwr.add_page(self.id, page_copy.page_num, page_copy)?;
        frame.clear_dirty();
        Ok(())
    }

    pub fn flush_all_pages(&self) -> DbResult<()> {
        if let Some(hdr) = self.hdr_frame.lock().unwrap().as_ref()
            && hdr.is_dirty()
        {
            self.flush_page_internal(hdr)?;
        }
        for frame in self.frame_manager.frames_of_pool(self.id) {
            if frame.is_dirty() {
                self.flush_page_internal(&frame)?;
            }
        }
        Ok(())
    }

    /// Drop one resident page, flushing it first when dirty.
    pub fn purge_page(&self, page_num: PageNum) -> DbResult<()> {
        let _header = self.header.lock().unwrap();
        let frame_id = FrameId::new(self.id, page_num);
        if let Some(frame) = self.frame_manager.get(frame_id) {
            let pin = frame.unpin();
            if pin > 0 {
                return Err(DbError::Internal(format!(
                    "purging page {} of {} while it is in use, pin={}",
                    page_num, self.file_name, pin
                )));
            }
            if frame.is_dirty() {
                self.flush_page_internal(&frame)?;
            }
            self.frame_manager.free(frame_id)?;
        }
        Ok(())
    }

    /// Drop every resident page of this pool; pinned frames are left
    /// alone with a warning.
    pub fn purge_all_pages(&self) -> DbResult<()> {
        let _header = self.header.lock().unwrap();
        for frame in self.frame_manager.frames_of_pool(self.id) {
            if frame.page_num() == BP_HEADER_PAGE {
                continue; // held by hdr_frame until close
            }
            if !frame.can_purge() {
                warn!(
                    "cannot purge pinned page {} of {}",
                    frame.page_num(),
                    self.file_name
                );
                continue;
            }
            if frame.is_dirty() {
                self.flush_page_internal(&frame)?;
            }
            self.frame_manager.free(frame.frame_id())?;
        }
        Ok(())
    }

    /// Raw positional write, bypassing frames; used by the double-write
    /// buffer when writing staged pages through to their home file.
    pub fn write_page(&self, page_num: PageNum, page: &Page) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE_BYTES as u64))
            .map_err(|e| io_seek_ctx(&self.file_name, e))?;
        file.write_all(&page.to_bytes())
            .map_err(|e| io_write_err(&self.file_name, e))?;
        file.sync_data()
            .map_err(|e| io_write_err(&self.file_name, e))?;
        debug!(
            "write_page: buffer_pool_id={}, page_num={}, lsn={}, check_sum={}",
            self.id, page_num, page.lsn, page.check_sum
        );
        Ok(())
    }

    /// Raw positional read, bypassing frames and the double-write
    /// staging area. The file grows lazily: a page past the current end
    /// of file reads back as zeroes.
    pub fn read_page_raw(&self, page_num: PageNum) -> DbResult<Page> {
        let mut file = self.file.lock().unwrap();
        let offset = page_num as u64 * PAGE_SIZE_BYTES as u64;
        let file_len = file
            .metadata()
            .map_err(|e| io_read_err(&self.file_name, e))?
            .len();
        if offset + PAGE_SIZE_BYTES as u64 > file_len {
            let mut page = Page::new();
            page.page_num = page_num;
            return Ok(page);
        }
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_seek_ctx(&self.file_name, e))?;
        let mut buf = vec![0u8; PAGE_SIZE_BYTES];
        file.read_exact(&mut buf)
            .map_err(|e| io_read_err(&self.file_name, e))?;
        Page::from_bytes(&buf)
    }

    /// During recovery: force a specific page number into the allocated
    /// set, growing the counters as needed.
    pub fn recover_page(&self, page_num: PageNum) -> DbResult<()> {
        let mut header = self.header.lock().unwrap();
        if page_num >= BPFileHeader::MAX_PAGE_NUM {
            return Err(DbError::BufferPoolInvalidPageNum(format!(
                "recover page {} beyond bitmap capacity",
                page_num
            )));
        }
        if !header.is_allocated(page_num) {
            header.set_allocated(page_num);
            header.allocated_pages += 1;
            if header.page_count <= page_num {
                header.page_count = page_num + 1;
            }
            let lsn = self.hdr_lsn();
            self.stamp_header(&header, lsn);
        }
        Ok(())
    }

    /// Idempotent redo of a logged page allocation, guarded by the
    /// header's stored LSN.
    pub fn redo_allocate_page(&self, lsn: Lsn, page_num: PageNum) -> DbResult<()> {
        let mut header = self.header.lock().unwrap();
        if self.hdr_lsn() >= lsn {
            return Ok(());
        }
        if header.page_count <= page_num {
            header.page_count = page_num + 1;
        }
        if !header.is_allocated(page_num) {
            header.set_allocated(page_num);
            header.allocated_pages += 1;
        }
        self.stamp_header(&header, lsn);
        Ok(())
    }

    pub fn redo_deallocate_page(&self, lsn: Lsn, page_num: PageNum) -> DbResult<()> {
        let mut header = self.header.lock().unwrap();
        if self.hdr_lsn() >= lsn {
            return Ok(());
        }
        if header.is_allocated(page_num) {
            header.clear_allocated(page_num);
            header.allocated_pages -= 1;
        }
        self.stamp_header(&header, lsn);
        Ok(())
    }

    pub fn page_count(&self) -> i32 {
        self.header.lock().unwrap().page_count
    }

    pub fn is_page_allocated(&self, page_num: PageNum) -> bool {
        let header = self.header.lock().unwrap();
        page_num >= 0 && page_num < header.page_count && header.is_allocated(page_num)
    }

    fn check_page_num(&self, header: &BPFileHeader, page_num: PageNum) -> DbResult<()> {
        if page_num < 0 || page_num >= header.page_count || !header.is_allocated(page_num) {
            return Err(DbError::BufferPoolInvalidPageNum(format!(
                "page {} of {} (page_count={})",
                page_num, self.file_name, header.page_count
            )));
        }
        Ok(())
    }

    fn load_page(&self, page_num: PageNum, frame: &Arc<Frame>) -> DbResult<()> {
        // the staging area may hold a newer copy than the home file
        let page = match self.dblwr.read_page(self.id, page_num) {
            Some(page) => page,
            None => self.read_page_raw(page_num)?,
        };
        *frame.page_mut() = page;
        frame.set_page_num(page_num);
        Ok(())
    }

    /// Reclaim cold frames across every pool; dirty victims are flushed
    /// through their owning pool.
    fn evict_some(&self) -> DbResult<()> {
        let manager = self.manager.upgrade().ok_or_else(|| {
            DbError::Internal("buffer pool manager dropped while pool in use".to_string())
        })?;
        let purged = self.frame_manager.purge_frames(FRAME_PURGE_BATCH, |frame| {
            if frame.is_dirty() {
                manager.flush_frame(frame)?;
            }
            Ok(())
        });
        if purged == 0 {
            return Err(DbError::BufferPoolNoBuf(
                "all frames are pinned".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the in-memory header into the pinned header frame and stamp
    /// the given LSN, so WAL replay can tell old headers from new.
    fn stamp_header(&self, header: &BPFileHeader, lsn: Lsn) {
        let hdr_frame = self.hdr_frame.lock().unwrap();
        if let Some(frame) = hdr_frame.as_ref() {
            let mut page = frame.page_mut_dirty();
            if lsn > page.lsn {
                page.lsn = lsn;
            }
            header.store(&mut page.data);
        }
    }

    fn hdr_lsn(&self) -> Lsn {
        self.hdr_frame
            .lock()
            .unwrap()
            .as_ref()
            .map(|f| f.lsn())
            .unwrap_or(0)
    }

    fn close(&self) -> DbResult<()> {
        self.flush_all_pages()?;
        self.purge_all_pages()?;
        {
            let mut hdr_frame = self.hdr_frame.lock().unwrap();
            if let Some(frame) = hdr_frame.take() {
                frame.unpin();
                self.frame_manager.free(frame.frame_id())?;
            }
        }
        self.dblwr.clear_pages(self)?;
        info!("closed buffer pool file {}", self.file_name);
        Ok(())
    }
}

fn io_seek_ctx(file: &str, e: std::io::Error) -> DbError {
    crate::common::error::io_seek_err(file, e)
}

/// Owns every open [`DiskBufferPool`] plus the shared frame pool.
pub struct BufferPoolManager {
    frame_manager: Arc<FrameManager>,
    dblwr: Arc<DoubleWriteBuffer>,
    log: Arc<LogHandler>,
    pools_by_name: Mutex<HashMap<String, Arc<DiskBufferPool>>>,
    pools_by_id: Mutex<HashMap<i32, Arc<DiskBufferPool>>>,
    next_pool_id: AtomicI32,
}

impl BufferPoolManager {
    pub fn new(
        log: Arc<LogHandler>,
        dblwr: Arc<DoubleWriteBuffer>,
        frame_capacity: usize,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            frame_manager: Arc::new(FrameManager::new(frame_capacity)),
            dblwr: dblwr.clone(),
            log,
            pools_by_name: Mutex::new(HashMap::new()),
            pools_by_id: Mutex::new(HashMap::new()),
            next_pool_id: AtomicI32::new(1),
        });
        dblwr.set_manager(Arc::downgrade(&manager));
        manager
    }

    /// Initialize a fresh file: an 8 KiB page 0 carrying the file header
    /// with a newly assigned buffer pool id.
    pub fn create_file(&self, path: &Path) -> DbResult<i32> {
        if path.exists() {
            return Err(DbError::BufferPoolOpen(format!(
                "file already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_write_err("create data dir", e))?;
        }
        let pool_id = self.next_pool_id.fetch_add(1, Ordering::SeqCst);
        let header = BPFileHeader::new(pool_id);
        let mut page = Page::new();
        page.page_num = BP_HEADER_PAGE;
        header.store(&mut page.data);
        page.refresh_check_sum();

        let mut file = fs::File::create(path).map_err(|e| io_write_err("create file", e))?;
        file.write_all(&page.to_bytes())
            .map_err(|e| io_write_err("write file header", e))?;
        file.sync_all()
            .map_err(|e| io_write_err("sync new file", e))?;
        info!(
            "created buffer pool file {} with id {}",
            path.display(),
            pool_id
        );
        Ok(pool_id)
    }

    /// Open a file and pin its header frame. A file can be open at most
    /// once across the process.
    pub fn open_file(self: &Arc<Self>, path: &Path) -> DbResult<Arc<DiskBufferPool>> {
        let file_name = path.to_string_lossy().to_string();
        let mut by_name = self.pools_by_name.lock().unwrap();
        if by_name.contains_key(&file_name) {
            return Err(DbError::BufferPoolOpen(format!(
                "file already open: {}",
                file_name
            )));
        }
        if !path.exists() {
            return Err(DbError::FileNotExist(file_name));
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_read_err(&file_name, e))?;

        // bootstrap: read page 0 straight off disk to learn the pool id
        let mut header_buf = vec![0u8; PAGE_SIZE_BYTES];
        {
            let mut f = &file;
            f.seek(SeekFrom::Start(0))
                .map_err(|e| io_seek_ctx(&file_name, e))?;
            f.read_exact(&mut header_buf)
                .map_err(|e| io_read_err(&file_name, e))?;
        }
        let hdr_page = Page::from_bytes(&header_buf)?;
        let header = BPFileHeader::load(&hdr_page.data);
        let pool_id = header.buffer_pool_id;

        let pool = Arc::new(DiskBufferPool {
            id: pool_id,
            file_name: file_name.clone(),
            file: Mutex::new(file),
            header: Mutex::new(header),
            hdr_frame: Mutex::new(None),
            frame_manager: self.frame_manager.clone(),
            log: self.log.clone(),
            dblwr: self.dblwr.clone(),
            manager: Arc::downgrade(self),
        });

        // pin the header frame for the pool's lifetime
        let hdr_frame = {
            let _guard: MutexGuard<'_, BPFileHeader> = pool.header.lock().unwrap();
            pool.get_page_internal(BP_HEADER_PAGE)?
        };
        *pool.hdr_frame.lock().unwrap() = Some(hdr_frame);

        self.next_pool_id
            .fetch_max(pool_id + 1, Ordering::SeqCst);
        by_name.insert(file_name.clone(), pool.clone());
        self.pools_by_id
            .lock()
            .unwrap()
            .insert(pool_id, pool.clone());
        info!("opened buffer pool file {} with id {}", file_name, pool_id);
        Ok(pool)
    }

    pub fn close_file(&self, file_name: &str) -> DbResult<()> {
        let pool = {
            let mut by_name = self.pools_by_name.lock().unwrap();
            by_name.remove(file_name)
        };
        match pool {
            Some(pool) => {
                self.pools_by_id.lock().unwrap().remove(&pool.id());
                pool.close()
            }
            None => Err(DbError::NotFound(format!("file not open: {}", file_name))),
        }
    }

    pub fn get_buffer_pool(&self, id: i32) -> Option<Arc<DiskBufferPool>> {
        self.pools_by_id.lock().unwrap().get(&id).cloned()
    }

    /// Route a dirty frame to its owning pool's flush protocol.
    pub fn flush_frame(&self, frame: &Arc<Frame>) -> DbResult<()> {
        match self.get_buffer_pool(frame.buffer_pool_id()) {
            Some(pool) => pool.flush_page_internal(frame),
            None => Err(DbError::Internal(format!(
                "no open pool with id {}",
                frame.buffer_pool_id()
            ))),
        }
    }

    /// Checkpoint: flush every pool, then drain the double-write
    /// staging area, then make sure the log itself is durable.
    pub fn flush_all(&self) -> DbResult<()> {
        let pools: Vec<Arc<DiskBufferPool>> = {
            let by_id = self.pools_by_id.lock().unwrap();
            by_id.values().cloned().collect()
        };
        for pool in pools {
            pool.flush_all_pages()?;
        }
        self.dblwr.flush_pages()?;
        self.log.flush()
    }

    pub fn frame_manager(&self) -> &Arc<FrameManager> {
        &self.frame_manager
    }
}

/// Replays the buffer-pool family of log entries: page allocations and
/// deallocations, both guarded by the header LSN so replay is
/// idempotent. Flush entries carry no redo work.
pub struct BufferPoolLogReplayer {
    manager: Arc<BufferPoolManager>,
}

impl BufferPoolLogReplayer {
    pub fn new(manager: Arc<BufferPoolManager>) -> Self {
        Self { manager }
    }
}

impl LogReplayer for BufferPoolLogReplayer {
    fn replay_entry(&self, entry: &LogEntry) -> DbResult<()> {
        match &entry.payload {
            LogPayload::AllocatePage {
                buffer_pool_id,
                page_num,
            } => match self.manager.get_buffer_pool(*buffer_pool_id) {
                Some(pool) => pool.redo_allocate_page(entry.lsn, *page_num),
                None => {
                    warn!("replay: no pool with id {}, skipped", buffer_pool_id);
                    Ok(())
                }
            },
            LogPayload::DeallocatePage {
                buffer_pool_id,
                page_num,
            } => match self.manager.get_buffer_pool(*buffer_pool_id) {
                Some(pool) => pool.redo_deallocate_page(entry.lsn, *page_num),
                None => {
                    warn!("replay: no pool with id {}, skipped", buffer_pool_id);
                    Ok(())
                }
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBLWR_MAX_PAGES;
    use crate::utils;

    fn setup(annot: &str) -> (Arc<BufferPoolManager>, std::path::PathBuf) {
        let dir = utils::test_dir(annot);
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr =
            Arc::new(DoubleWriteBuffer::open(&dir.join("test.dblwr"), DBLWR_MAX_PAGES).unwrap());
        let manager = BufferPoolManager::new(log, dblwr, 64);
        (manager, dir)
    }

    #[test]
    fn test_allocate_get_dispose() {
        let (manager, dir) = setup("bp_basic");
        let path = dir.join("t1.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();

        let frame = pool.allocate_page().unwrap();
        let page_num = frame.page_num();
        assert_eq!(page_num, 1); // page 0 is the header
        frame.page_mut_dirty().data[0] = 0x5A;
        pool.unpin_page(&frame);

        let frame = pool.get_page(page_num).unwrap();
        assert_eq!(frame.page().data[0], 0x5A);
        pool.unpin_page(&frame);

        pool.dispose_page(page_num).unwrap();
        assert!(pool.get_page(page_num).is_err());

        // the freed page number is reused by the next allocation
        let frame = pool.allocate_page().unwrap();
        assert_eq!(frame.page_num(), page_num);
        pool.unpin_page(&frame);
    }

    #[test]
    fn test_dispose_header_page_is_internal() {
        let (manager, dir) = setup("bp_hdr");
        let path = dir.join("t2.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();
        assert!(matches!(
            pool.dispose_page(BP_HEADER_PAGE),
            Err(DbError::Internal(_))
        ));
    }

    #[test]
    fn test_flush_all_leaves_no_dirty_frame() {
        let (manager, dir) = setup("bp_flush");
        let path = dir.join("t3.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();

        for _ in 0..4 {
            let frame = pool.allocate_page().unwrap();
            frame.page_mut_dirty().data[10] = 7;
            pool.unpin_page(&frame);
        }
        pool.flush_all_pages().unwrap();
        for frame in manager.frame_manager().frames_of_pool(pool.id()) {
            assert!(!frame.is_dirty());
        }
    }

    #[test]
    fn test_data_survives_close_and_reopen() {
        let (manager, dir) = setup("bp_reopen");
        let path = dir.join("t4.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();
        let frame = pool.allocate_page().unwrap();
        let page_num = frame.page_num();
        frame.page_mut_dirty().data[123] = 0xEE;
        pool.unpin_page(&frame);
        let name = pool.file_name().to_string();
        drop(pool);
        manager.close_file(&name).unwrap();

        let pool = manager.open_file(&path).unwrap();
        let frame = pool.get_page(page_num).unwrap();
        assert_eq!(frame.page().data[123], 0xEE);
        assert!(frame.page().check_sum_ok());
        pool.unpin_page(&frame);
    }

    #[test]
    fn test_eviction_under_pressure() {
        let dir = utils::test_dir("bp_evict");
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr =
            Arc::new(DoubleWriteBuffer::open(&dir.join("test.dblwr"), DBLWR_MAX_PAGES).unwrap());
        // room for the header frame plus three data pages
        let manager = BufferPoolManager::new(log, dblwr, 4);
        let path = dir.join("t5.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();

        let mut nums = Vec::new();
        for i in 0..8 {
            let frame = pool.allocate_page().unwrap();
            frame.page_mut_dirty().data[0] = i as u8;
            nums.push(frame.page_num());
            pool.unpin_page(&frame);
        }
        // every page is still readable after evictions
        for (i, page_num) in nums.iter().enumerate() {
            let frame = pool.get_page(*page_num).unwrap();
            assert_eq!(frame.page().data[0], i as u8);
            pool.unpin_page(&frame);
        }
    }

    #[test]
    fn test_redo_allocate_is_idempotent() {
        let (manager, dir) = setup("bp_redo");
        let path = dir.join("t6.data");
        manager.create_file(&path).unwrap();
        let pool = manager.open_file(&path).unwrap();

        pool.redo_allocate_page(100, 3).unwrap();
        assert_eq!(pool.page_count(), 4);
        assert!(pool.is_page_allocated(3));
        // an older lsn must not re-apply
        pool.redo_deallocate_page(50, 3).unwrap();
        assert!(pool.is_page_allocated(3));
        // a newer one must
        pool.redo_deallocate_page(200, 3).unwrap();
        assert!(!pool.is_page_allocated(3));
    }
}
