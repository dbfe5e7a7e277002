use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolCore;
use super::FrameHeader;

/// RAII guard for shared access to a pinned page.
///
/// Holding the guard holds the pin; dropping it releases the page back to
/// the pool (clean). The caller must not retain references to the bytes past
/// the guard's lifetime.
pub struct ReadPageGuard {
    page_id: PageId,
    core: Arc<PoolCore>,
    /// Keeps the frame (and the borrowed lock below) alive.
    _frame: Arc<FrameHeader>,
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    ///
    /// The data lock is extended to `'static`; the `Arc<FrameHeader>` stored
    /// alongside it guarantees the lock outlives the guard.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<FrameHeader>, core: Arc<PoolCore>) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);
        Self {
            page_id,
            core,
            _frame: frame,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the data lock before touching the pool latch.
        self.data_guard.take();
        self.core.unpin_page(self.page_id, false);
    }
}

/// RAII guard for exclusive access to a pinned page.
///
/// The page is released dirty iff `data_mut` was called.
pub struct WritePageGuard {
    page_id: PageId,
    core: Arc<PoolCore>,
    is_dirty: bool,
    _frame: Arc<FrameHeader>,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    ///
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<FrameHeader>, core: Arc<PoolCore>) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);
        Self {
            page_id,
            core,
            is_dirty: false,
            _frame: frame,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Mutable access to the page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.core.unpin_page(self.page_id, self.is_dirty);
    }
}
