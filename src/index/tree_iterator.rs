use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result, INVALID_PAGE_ID};

use super::key_comparator::IndexKey;
use super::tree_page::TreeNodeRef;

/// Forward iterator over the leaf chain in key order.
///
/// Holds exactly one pinned leaf at a time; advancing past a leaf releases
/// it before fetching its successor. A long-lived iterator therefore keeps
/// one frame non-evictable for its whole lifetime.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
        }
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_leaf_id = {
                let guard = self.leaf.as_ref()?;
                let node = TreeNodeRef::new(guard.data());
                if self.index < node.size() {
                    let item = (node.leaf_key_at(self.index), node.leaf_rid_at(self.index));
                    self.index += 1;
                    return Some(Ok(item));
                }
                node.next_page_id()
            };

            // Release the exhausted leaf before pinning the next one.
            self.leaf = None;
            if next_leaf_id == INVALID_PAGE_ID {
                return None;
            }
            match self.bpm.read_page(next_leaf_id) {
                Ok(guard) => {
                    self.leaf = Some(guard);
                    self.index = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
