use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use linked_hash_map::LinkedHashMap;
use tracing::{debug, warn};

use crate::common::{DbError, DbResult, Lsn, PageNum};
use crate::storage::page::Page;

/// Identifies a frame by the page it carries: which pool, which page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub buffer_pool_id: i32,
    pub page_num: PageNum,
}

impl FrameId {
    pub fn new(buffer_pool_id: i32, page_num: PageNum) -> Self {
        Self {
            buffer_pool_id,
            page_num,
        }
    }
}

/// In-memory carrier of one page.
///
/// A frame with pin count > 0 is in use and must not be evicted; the
/// dirty flag is set on any payload mutation and cleared only by flush.
pub struct Frame {
    buffer_pool_id: AtomicI32,
    page_num: AtomicI32,
    pin_count: AtomicI32,
    dirty: AtomicBool,
    page: RwLock<Page>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buffer_pool_id: AtomicI32::new(-1),
            page_num: AtomicI32::new(-1),
            pin_count: AtomicI32::new(0),
            dirty: AtomicBool::new(false),
            page: RwLock::new(Page::new()),
        }
    }

    pub fn buffer_pool_id(&self) -> i32 {
        self.buffer_pool_id.load(Ordering::Relaxed)
    }

    pub fn set_buffer_pool_id(&self, id: i32) {
        self.buffer_pool_id.store(id, Ordering::Relaxed);
    }

    pub fn page_num(&self) -> PageNum {
        self.page_num.load(Ordering::Relaxed)
    }

    pub fn set_page_num(&self, page_num: PageNum) {
        self.page_num.store(page_num, Ordering::Relaxed);
        self.page.write().unwrap().page_num = page_num;
    }

    pub fn frame_id(&self) -> FrameId {
        FrameId::new(self.buffer_pool_id(), self.page_num())
    }

    pub fn pin(&self) -> i32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn unpin(&self) -> i32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "unpin on a frame with pin count {}", old);
        old - 1
    }

    pub fn pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    pub fn can_purge(&self) -> bool {
        self.pin_count() == 0
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn lsn(&self) -> Lsn {
        self.page.read().unwrap().lsn
    }

    pub fn set_lsn(&self, lsn: Lsn) {
        self.page.write().unwrap().lsn = lsn;
    }

    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read().unwrap()
    }

    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write().unwrap()
    }

    /// Write access that also flips the dirty flag; the common path for
    /// record and index mutation.
    pub fn page_mut_dirty(&self) -> RwLockWriteGuard<'_, Page> {
        self.mark_dirty();
        self.page.write().unwrap()
    }

    /// Reset identity when the frame is recycled for another page.
    pub fn reset_for(&self, buffer_pool_id: i32, page_num: PageNum) {
        self.set_buffer_pool_id(buffer_pool_id);
        self.page_num.store(page_num, Ordering::Relaxed);
        self.clear_dirty();
        self.page.write().unwrap().reset(page_num);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Global frame pool shared by every buffer pool.
///
/// The LinkedHashMap doubles as the LRU list: `get_refresh` moves a hit
/// to the back, so iteration from the front visits the coldest frames.
pub struct FrameManager {
    frames: Mutex<LinkedHashMap<FrameId, Arc<Frame>>>,
    capacity: usize,
}

impl FrameManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(LinkedHashMap::new()),
            capacity,
        }
    }

    /// Look up a resident frame; on hit the frame is pinned and bumped
    /// to most-recently-used.
    pub fn get(&self, frame_id: FrameId) -> Option<Arc<Frame>> {
        let mut frames = self.frames.lock().unwrap();
        frames.get_refresh(&frame_id).map(|f| {
            f.pin();
            f.clone()
        })
    }

    /// Look up or allocate in one step. On a hit the resident frame is
    /// pinned and returned with `resident = true`; on a miss a fresh
    /// pinned frame is installed (`resident = false`, the caller loads
    /// it). Returns None when the pool is full; the caller is expected
    /// to purge and retry.
    pub fn get_or_alloc(&self, frame_id: FrameId) -> Option<(Arc<Frame>, bool)> {
        let mut frames = self.frames.lock().unwrap();
        if let Some(f) = frames.get_refresh(&frame_id) {
            f.pin();
            return Some((f.clone(), true));
        }
        if frames.len() >= self.capacity {
            return None;
        }
        let frame = Arc::new(Frame::new());
        frame.reset_for(frame_id.buffer_pool_id, frame_id.page_num);
        frame.pin();
        frames.insert(frame_id, frame.clone());
        Some((frame, false))
    }

    /// Evict up to `count` cold, unpinned frames. The purger flushes a
    /// dirty victim before it is dropped; a purger error keeps the frame.
    pub fn purge_frames<F>(&self, count: usize, mut purger: F) -> usize
    where
        F: FnMut(&Arc<Frame>) -> DbResult<()>,
    {
        let victims: Vec<(FrameId, Arc<Frame>)> = {
            let frames = self.frames.lock().unwrap();
            frames
                .iter()
                .filter(|(_, f)| f.can_purge())
                .take(count.max(1))
                .map(|(id, f)| (*id, f.clone()))
                .collect()
        };

        let mut freed = 0;
        for (frame_id, frame) in victims {
            if let Err(e) = purger(&frame) {
                warn!("failed to purge frame {:?}: {}", frame_id, e);
                continue;
            }
            let mut frames = self.frames.lock().unwrap();
            // the frame may have been pinned again while unlocked
            if frame.can_purge() {
                frames.remove(&frame_id);
                freed += 1;
            }
        }
        debug!("purged {} frames", freed);
        freed
    }

    /// Drop a specific frame. The caller must hold no pin on it.
    pub fn free(&self, frame_id: FrameId) -> DbResult<()> {
        let mut frames = self.frames.lock().unwrap();
        let pin_count = frames.get(&frame_id).map(|f| f.pin_count());
        match pin_count {
            Some(pin) if pin > 0 => Err(DbError::Internal(format!(
                "freeing a pinned frame. pool={}, page={}, pin={}",
                frame_id.buffer_pool_id, frame_id.page_num, pin
            ))),
            Some(_) => {
                frames.remove(&frame_id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// All resident frames of one buffer pool, coldest first.
    pub fn frames_of_pool(&self, buffer_pool_id: i32) -> Vec<Arc<Frame>> {
        let frames = self.frames.lock().unwrap();
        frames
            .iter()
            .filter(|(id, _)| id.buffer_pool_id == buffer_pool_id)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_get_free() {
        let mgr = FrameManager::new(2);
        let id = FrameId::new(1, 5);
        let (frame, resident) = mgr.get_or_alloc(id).unwrap();
        assert!(!resident);
        assert_eq!(frame.pin_count(), 1);

        let (again, resident) = mgr.get_or_alloc(id).unwrap();
        assert!(resident);
        assert_eq!(again.pin_count(), 2);

        again.unpin();
        frame.unpin();
        assert_eq!(frame.pin_count(), 0);
        mgr.free(id).unwrap();
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn test_alloc_full_returns_none() {
        let mgr = FrameManager::new(1);
        let (f1, _) = mgr.get_or_alloc(FrameId::new(1, 1)).unwrap();
        assert!(mgr.get_or_alloc(FrameId::new(1, 2)).is_none());

        // pinned frames are not eligible for purging
        assert_eq!(mgr.purge_frames(1, |_| Ok(())), 0);

        f1.unpin();
        assert_eq!(mgr.purge_frames(1, |_| Ok(())), 1);
        assert!(mgr.get_or_alloc(FrameId::new(1, 2)).is_some());
    }

    #[test]
    fn test_purge_prefers_cold_frames() {
        let mgr = FrameManager::new(3);
        for page in 0..3 {
            let (f, _) = mgr.get_or_alloc(FrameId::new(1, page)).unwrap();
            f.unpin();
        }
        // touch page 0 so page 1 becomes the coldest
        mgr.get(FrameId::new(1, 0)).unwrap().unpin();

        let mut purged = Vec::new();
        mgr.purge_frames(1, |f| {
            purged.push(f.page_num());
            Ok(())
        });
        assert_eq!(purged, vec![1]);
    }

    #[test]
    fn test_free_pinned_frame_is_rejected() {
        let mgr = FrameManager::new(1);
        let id = FrameId::new(1, 1);
        let _f = mgr.get_or_alloc(id).unwrap();
        assert!(mgr.free(id).is_err());
    }
}
