use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::{
    FrameId, PageId, Result, StratumError, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Management state; every public operation serializes on this one latch.
struct PoolState {
    /// Frame directory: which frame holds which page.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames holding no page at all.
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    /// Monotonic allocator. Deleted page ids are abandoned, never reused.
    next_page_id: u32,
}

/// Shared pool internals; page guards keep this alive so a guard can outlive
/// the `BufferPoolManager` handle that produced it.
pub(crate) struct PoolCore {
    frames: Vec<Arc<FrameHeader>>,
    state: Mutex<PoolState>,
    scheduler: DiskScheduler,
}

impl PoolCore {
    /// Pin-count release path shared by guards and `unpin_page`.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Obtains a frame for a new resident page: from the free list if any,
    /// otherwise by evicting a victim (writing it back first when dirty).
    fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            warn!("buffer pool exhausted: no free frame and nothing evictable");
            return Err(StratumError::BufferPoolFull);
        };

        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            self.scheduler.schedule_write_sync(old_page_id, &buf)?;
        }
        debug!("evicted {} from {}", old_page_id, frame_id);
        state.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

/// BufferPoolManager mediates every page access between callers and the
/// disk, caching pages in a fixed set of frames and evicting with LRU-K.
///
/// Fetching (or creating) a page pins its frame; the returned guard owes
/// exactly one unpin, paid on drop. A frame stays non-evictable while its
/// pin count is positive.
pub struct BufferPoolManager {
    pool_size: usize,
    core: Arc<PoolCore>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames over `disk_manager`, evicting
    /// with LRU-`replacer_k`. Page id allocation resumes after the highest
    /// page already on disk; page 0 is reserved for the header page.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let next_page_id = disk_manager.num_pages().max(1);

        let core = Arc::new(PoolCore {
            frames,
            state: Mutex::new(PoolState {
                page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
                free_list,
                replacer: LruKReplacer::new(replacer_k, pool_size),
                next_page_id,
            }),
            scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, core }
    }

    /// Allocates a fresh page id, installs it in a frame with a zeroed
    /// buffer, and returns it pinned for writing.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let (page_id, frame_id) = {
            let mut guard = self.core.state.lock();
            let state = &mut *guard;

            let frame_id = self.core.allocate_frame(state)?;
            let page_id = PageId::new(state.next_page_id);
            state.next_page_id += 1;

            let frame = &self.core.frames[frame_id.as_usize()];
            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();

            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            state.page_table.insert(page_id, frame_id);
            (page_id, frame_id)
        };

        let frame = Arc::clone(&self.core.frames[frame_id.as_usize()]);
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.core)) })
    }

    /// Fetches a page for shared access, reading it from disk on a miss.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.pin_page(page_id)?;
        let frame = Arc::clone(&self.core.frames[frame_id.as_usize()]);
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.core)) })
    }

    /// Fetches a page for exclusive access, reading it from disk on a miss.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.pin_page(page_id)?;
        let frame = Arc::clone(&self.core.frames[frame_id.as_usize()]);
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.core)) })
    }

    /// Pins `page_id` into a frame and returns the frame id. The caller owes
    /// one unpin (normally paid by a guard drop).
    fn pin_page(&self, page_id: PageId) -> Result<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(StratumError::InvalidPageId(page_id));
        }

        let mut guard = self.core.state.lock();
        let state = &mut *guard;

        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &self.core.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.core.allocate_frame(state)?;
        let mut buf = [0u8; PAGE_SIZE];
        self.core.scheduler.schedule_read_sync(page_id, &mut buf)?;

        let frame = &self.core.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.fill_from(&buf);
        frame.set_dirty(false);
        frame.pin();

        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        state.page_table.insert(page_id, frame_id);
        Ok(frame_id)
    }

    /// Releases one pin on `page_id`, recording the dirty hint. Returns
    /// false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.core.unpin_page(page_id, is_dirty)
    }

    /// Writes a resident page back to disk unconditionally and clears its
    /// dirty flag. Returns false for non-resident or invalid ids.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let state = self.core.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.core.frames[frame_id.as_usize()];

        let mut buf = [0u8; PAGE_SIZE];
        frame.copy_into(&mut buf);
        self.core.scheduler.schedule_write_sync(page_id, &buf)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _state = self.core.state.lock();
        for frame in &self.core.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            self.core.scheduler.schedule_write_sync(page_id, &buf)?;
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Drops `page_id` from the pool. Absent pages count as deleted; pinned
    /// pages cannot be deleted. The id itself is abandoned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut guard = self.core.state.lock();
        let state = &mut *guard;

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.core.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        frame.reset();
        state.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Pin count of a resident page, or `None` if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.core.state.lock();
        state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.core.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.core.state.lock().free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_new_pool_is_all_free() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_is_pinned_and_zeroed() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert!(guard.data().iter().all(|&b| b == 0));
        assert_eq!(bpm.get_pin_count(page_id), Some(1));

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_write_then_read() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
            guard.page_id()
        };

        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_pin_counting_composes() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap().page_id();

        let g1 = bpm.read_page(page_id).unwrap();
        let g2 = bpm.read_page(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        drop(g1);
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(g2);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_unpin_unpinned_page_fails() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap().page_id();

        assert!(!bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(PageId::new(9999), false));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (bpm, _temp) = create_bpm(2);

        let _g1 = bpm.new_page().unwrap();
        let _g2 = bpm.new_page().unwrap();
        assert!(matches!(bpm.new_page(), Err(StratumError::BufferPoolFull)));
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap().page_id();

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        // Deleting an absent page counts as deleted.
        assert!(bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let (bpm, _temp) = create_bpm(10);
        let guard = bpm.new_page().unwrap();
        assert!(!bpm.delete_page(guard.page_id()).unwrap());
    }

    #[test]
    fn test_deleted_page_id_not_reused() {
        let (bpm, _temp) = create_bpm(3);
        let page_id = bpm.new_page().unwrap().page_id();
        assert!(bpm.delete_page(page_id).unwrap());

        for _ in 0..3 {
            let guard = bpm.new_page().unwrap();
            assert_ne!(guard.page_id(), page_id);
        }
    }

    #[test]
    fn test_flush_invalid_page() {
        let (bpm, _temp) = create_bpm(10);
        assert!(!bpm.flush_page(INVALID_PAGE_ID).unwrap());
        assert!(!bpm.flush_page(PageId::new(1234)).unwrap());
    }

    #[test]
    fn test_flush_persists_across_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        let page_id = {
            let dm = Arc::new(DiskManager::new(&path).unwrap());
            let bpm = BufferPoolManager::new(10, 2, dm);
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            let page_id = guard.page_id();
            drop(guard);
            bpm.flush_page(page_id).unwrap();
            page_id
        };

        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, 2, dm);
        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }
}
