use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result, StratumError, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::key_comparator::{IndexKey, KeyComparator};
use super::tree_iterator::TreeIterator;
use super::tree_page::{max_internal_capacity, max_leaf_capacity, TreeNode, TreeNodeRef};

/// Disk-resident B+ tree mapping unique keys to record ids.
///
/// Nodes live on pages owned by the buffer pool; links between nodes are
/// page ids only, never pointers. A single tree-level reader/writer latch
/// serializes structural changes against lookups; it doubles as the root
/// page id tracker. The root id is also persisted in the header page under
/// the index name.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: usize,
    internal_max_size: usize,
    root: RwLock<PageId>,
}

impl BPlusTree {
    /// Opens the index named `index_name`, picking up its root from the
    /// header page if it was created before.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(
            leaf_max_size >= 2 && leaf_max_size <= max_leaf_capacity(),
            "leaf_max_size out of range"
        );
        assert!(
            internal_max_size >= 3 && internal_max_size <= max_internal_capacity(),
            "internal_max_size out of range"
        );

        let index_name = index_name.into();
        let root = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(root),
        })
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    fn min_size_for(&self, is_leaf: bool) -> usize {
        if is_leaf {
            self.leaf_min_size()
        } else {
            self.internal_min_size()
        }
    }

    /// Point lookup: the record id stored under `key`, if any.
    pub fn get(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let leaf_id = self.find_leaf(*root, key)?;
        let guard = self.bpm.read_page(leaf_id)?;
        let node = TreeNodeRef::new(guard.data());
        let idx = node.leaf_key_index(key, &*self.comparator);
        if idx < node.size() && self.keys_equal(&node.leaf_key_at(idx), key) {
            Ok(Some(node.leaf_rid_at(idx)))
        } else {
            Ok(None)
        }
    }

    /// Inserts `key -> rid`. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: &IndexKey, rid: RecordId) -> Result<bool> {
        let mut root = self.root.write();

        if *root == INVALID_PAGE_ID {
            let mut guard = self.bpm.new_page()?;
            let page_id = guard.page_id();
            let mut node = TreeNode::new(guard.data_mut());
            node.init_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            node.leaf_insert_at(0, key, rid);
            drop(guard);

            *root = page_id;
            self.update_root(page_id, true)?;
            debug!("index {}: created root leaf {}", self.index_name, page_id);
            return Ok(true);
        }

        let leaf_id = self.find_leaf(*root, key)?;
        let mut guard = self.bpm.write_page(leaf_id)?;

        let idx = {
            let node = TreeNodeRef::new(guard.data());
            let idx = node.leaf_key_index(key, &*self.comparator);
            if idx < node.size() && self.keys_equal(&node.leaf_key_at(idx), key) {
                return Ok(false);
            }
            idx
        };

        let (new_size, parent_id) = {
            let mut node = TreeNode::new(guard.data_mut());
            node.leaf_insert_at(idx, key, rid);
            (node.size(), node.parent_page_id())
        };
        if new_size <= self.leaf_max_size {
            return Ok(true);
        }

        // Leaf overflow: move the upper half to a fresh leaf and promote its
        // first key.
        let mut new_guard = self.bpm.new_page()?;
        let new_leaf_id = new_guard.page_id();
        let separator = {
            let mut node = TreeNode::new(guard.data_mut());
            let mut new_node = TreeNode::new(new_guard.data_mut());
            new_node.init_leaf(new_leaf_id, parent_id, self.leaf_max_size);
            node.leaf_split_to(&mut new_node, self.leaf_min_size());
            new_node.set_next_page_id(node.next_page_id());
            node.set_next_page_id(new_leaf_id);
            new_node.leaf_key_at(0)
        };
        drop(new_guard);
        drop(guard);

        self.insert_into_parent(&mut root, leaf_id, parent_id, new_leaf_id, separator)?;
        Ok(true)
    }

    /// Links `right_id` (the upper half of a split of `left_id`) into the
    /// parent under `separator`, splitting upward as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_id: PageId,
        parent_id: PageId,
        right_id: PageId,
        separator: IndexKey,
    ) -> Result<()> {
        if left_id == *root {
            let mut guard = self.bpm.new_page()?;
            let new_root_id = guard.page_id();
            let mut node = TreeNode::new(guard.data_mut());
            node.init_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
            node.set_size(2);
            node.set_child_at(0, left_id);
            node.set_key_at(1, &separator);
            node.set_child_at(1, right_id);
            drop(guard);

            self.set_parent(left_id, new_root_id)?;
            self.set_parent(right_id, new_root_id)?;
            *root = new_root_id;
            self.update_root(new_root_id, false)?;
            debug!("index {}: new root {}", self.index_name, new_root_id);
            return Ok(());
        }

        let mut guard = self.bpm.write_page(parent_id)?;
        let (new_size, grandparent_id) = {
            let mut node = TreeNode::new(guard.data_mut());
            let idx = node.child_index(left_id).ok_or_else(|| {
                StratumError::IndexCorrupted(format!("{} not a child of {}", left_id, parent_id))
            })?;
            node.internal_insert_at(idx + 1, &separator, right_id);
            (node.size(), node.parent_page_id())
        };
        if new_size <= self.internal_max_size {
            return Ok(());
        }

        // Parent overflow: split it too and recurse.
        let mut new_guard = self.bpm.new_page()?;
        let new_internal_id = new_guard.page_id();
        let (promoted, moved_children) = {
            let mut node = TreeNode::new(guard.data_mut());
            let mut new_node = TreeNode::new(new_guard.data_mut());
            new_node.init_internal(new_internal_id, grandparent_id, self.internal_max_size);
            node.internal_split_to(&mut new_node, self.internal_min_size());
            let moved: Vec<PageId> = (0..new_node.size()).map(|i| new_node.child_at(i)).collect();
            (new_node.key_at(0), moved)
        };
        drop(new_guard);
        drop(guard);

        for child in moved_children {
            self.set_parent(child, new_internal_id)?;
        }
        self.insert_into_parent(root, parent_id, grandparent_id, new_internal_id, promoted)
    }

    /// Deletes `key` if present, rebalancing underflowed nodes.
    pub fn remove(&self, key: &IndexKey) -> Result<()> {
        let mut root = self.root.write();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        let leaf_id = self.find_leaf(*root, key)?;
        let mut guard = self.bpm.write_page(leaf_id)?;

        let idx = {
            let node = TreeNodeRef::new(guard.data());
            let idx = node.leaf_key_index(key, &*self.comparator);
            if idx >= node.size() || !self.keys_equal(&node.leaf_key_at(idx), key) {
                return Ok(());
            }
            idx
        };

        let (new_size, parent_id) = {
            let mut node = TreeNode::new(guard.data_mut());
            node.leaf_remove_at(idx);
            (node.size(), node.parent_page_id())
        };

        if leaf_id == *root {
            // A root leaf may shrink to any size; at zero the tree empties.
            if new_size == 0 {
                drop(guard);
                *root = INVALID_PAGE_ID;
                self.update_root(INVALID_PAGE_ID, false)?;
                self.bpm.delete_page(leaf_id)?;
                debug!("index {}: tree emptied", self.index_name);
            }
            return Ok(());
        }
        if new_size >= self.leaf_min_size() {
            return Ok(());
        }

        drop(guard);
        self.rebalance(&mut root, leaf_id, parent_id)
    }

    /// Fixes the underflowed node `node_id`. Redistribution is preferred
    /// over merging, and the left sibling over the right, for both.
    fn rebalance(&self, root: &mut PageId, node_id: PageId, parent_id: PageId) -> Result<()> {
        let mut parent_guard = self.bpm.write_page(parent_id)?;
        let idx = TreeNodeRef::new(parent_guard.data())
            .child_index(node_id)
            .ok_or_else(|| {
                StratumError::IndexCorrupted(format!("{} not a child of {}", node_id, parent_id))
            })?;

        // Borrow from the left sibling.
        if idx > 0 {
            let left_id = TreeNodeRef::new(parent_guard.data()).child_at(idx - 1);
            let mut left_guard = self.bpm.write_page(left_id)?;
            let left_node = TreeNodeRef::new(left_guard.data());
            let (left_size, is_leaf) = (left_node.size(), left_node.is_leaf());

            if left_size > self.min_size_for(is_leaf) {
                let mut node_guard = self.bpm.write_page(node_id)?;
                let mut parent = TreeNode::new(parent_guard.data_mut());
                let mut left = TreeNode::new(left_guard.data_mut());
                let mut node = TreeNode::new(node_guard.data_mut());

                if is_leaf {
                    let moved_key = left.leaf_key_at(left_size - 1);
                    let moved_rid = left.leaf_rid_at(left_size - 1);
                    left.set_size(left_size - 1);
                    node.leaf_insert_at(0, &moved_key, moved_rid);
                    parent.set_key_at(idx, &moved_key);
                } else {
                    let moved_key = left.key_at(left_size - 1);
                    let moved_child = left.child_at(left_size - 1);
                    let old_separator = parent.key_at(idx);
                    left.set_size(left_size - 1);
                    node.internal_prepend(&old_separator, moved_child);
                    parent.set_key_at(idx, &moved_key);
                    drop(node_guard);
                    drop(left_guard);
                    drop(parent_guard);
                    self.set_parent(moved_child, node_id)?;
                }
                return Ok(());
            }
        }

        // Borrow from the right sibling.
        let parent_size = TreeNodeRef::new(parent_guard.data()).size();
        if idx + 1 < parent_size {
            let right_id = TreeNodeRef::new(parent_guard.data()).child_at(idx + 1);
            let mut right_guard = self.bpm.write_page(right_id)?;
            let right_node = TreeNodeRef::new(right_guard.data());
            let (right_size, is_leaf) = (right_node.size(), right_node.is_leaf());

            if right_size > self.min_size_for(is_leaf) {
                let mut node_guard = self.bpm.write_page(node_id)?;
                let mut parent = TreeNode::new(parent_guard.data_mut());
                let mut right = TreeNode::new(right_guard.data_mut());
                let mut node = TreeNode::new(node_guard.data_mut());

                if is_leaf {
                    let moved_key = right.leaf_key_at(0);
                    let moved_rid = right.leaf_rid_at(0);
                    right.leaf_remove_at(0);
                    node.leaf_insert_at(node.size(), &moved_key, moved_rid);
                    let new_separator = right.leaf_key_at(0);
                    parent.set_key_at(idx + 1, &new_separator);
                } else {
                    let old_separator = parent.key_at(idx + 1);
                    let moved_child = right.child_at(0);
                    let new_separator = right.key_at(1);
                    node.internal_append(&old_separator, moved_child);
                    right.internal_remove_at(0);
                    parent.set_key_at(idx + 1, &new_separator);
                    drop(node_guard);
                    drop(right_guard);
                    drop(parent_guard);
                    self.set_parent(moved_child, node_id)?;
                }
                return Ok(());
            }
        }

        // No sibling can lend: merge, preferring the left sibling.
        if idx > 0 {
            let left_id = TreeNodeRef::new(parent_guard.data()).child_at(idx - 1);
            self.merge_into_left(&mut parent_guard, idx, left_id, node_id)?;
        } else {
            let right_id = TreeNodeRef::new(parent_guard.data()).child_at(idx + 1);
            self.merge_into_left(&mut parent_guard, idx + 1, node_id, right_id)?;
        }

        // The parent lost a separator; check it next.
        let parent_node = TreeNodeRef::new(parent_guard.data());
        let parent_size = parent_node.size();
        let grandparent_id = parent_node.parent_page_id();

        if parent_id == *root {
            if parent_size == 1 {
                let only_child = TreeNodeRef::new(parent_guard.data()).child_at(0);
                drop(parent_guard);
                self.set_parent(only_child, INVALID_PAGE_ID)?;
                *root = only_child;
                self.update_root(only_child, false)?;
                self.bpm.delete_page(parent_id)?;
                debug!("index {}: root collapsed to {}", self.index_name, only_child);
            }
            return Ok(());
        }
        if parent_size < self.internal_min_size() {
            drop(parent_guard);
            return self.rebalance(root, parent_id, grandparent_id);
        }
        Ok(())
    }

    /// Merges the child at parent entry `right_idx` into its left sibling,
    /// removes the separator, and frees the emptied page.
    fn merge_into_left(
        &self,
        parent_guard: &mut crate::buffer::WritePageGuard,
        right_idx: usize,
        left_id: PageId,
        right_id: PageId,
    ) -> Result<()> {
        let mut left_guard = self.bpm.write_page(left_id)?;
        let mut right_guard = self.bpm.write_page(right_id)?;

        let moved_children = {
            let mut parent = TreeNode::new(parent_guard.data_mut());
            let mut left = TreeNode::new(left_guard.data_mut());
            let mut right = TreeNode::new(right_guard.data_mut());

            let moved = if right.is_leaf() {
                left.set_next_page_id(right.next_page_id());
                right.leaf_merge_into(&mut left);
                Vec::new()
            } else {
                // The right node's slot-0 key is vacant; the separator fills
                // it as the entries move over.
                let separator = parent.key_at(right_idx);
                let mut moved = Vec::with_capacity(right.size());
                left.internal_append(&separator, right.child_at(0));
                moved.push(right.child_at(0));
                for i in 1..right.size() {
                    left.internal_append(&right.key_at(i), right.child_at(i));
                    moved.push(right.child_at(i));
                }
                right.set_size(0);
                moved
            };
            parent.internal_remove_at(right_idx);
            moved
        };

        drop(right_guard);
        drop(left_guard);
        for child in moved_children {
            self.set_parent(child, left_id)?;
        }
        self.bpm.delete_page(right_id)?;
        Ok(())
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<TreeIterator> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let leaf_id = self.find_leftmost_leaf(*root)?;
        let guard = self.bpm.read_page(leaf_id)?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), guard, 0))
    }

    /// Forward iterator positioned at the first key `>= key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<TreeIterator> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(TreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let leaf_id = self.find_leaf(*root, key)?;
        let guard = self.bpm.read_page(leaf_id)?;
        let index = TreeNodeRef::new(guard.data()).leaf_key_index(key, &*self.comparator);
        Ok(TreeIterator::new(Arc::clone(&self.bpm), guard, index))
    }

    /// Descends from `root_id` to the leaf that may contain `key`. Each
    /// internal page is released before its child is fetched.
    fn find_leaf(&self, root_id: PageId, key: &IndexKey) -> Result<PageId> {
        let mut current = root_id;
        loop {
            let guard = self.bpm.read_page(current)?;
            let node = TreeNodeRef::new(guard.data());
            if node.is_leaf() {
                return Ok(current);
            }
            current = node.internal_lookup(key, &*self.comparator);
        }
    }

    fn find_leftmost_leaf(&self, root_id: PageId) -> Result<PageId> {
        let mut current = root_id;
        loop {
            let guard = self.bpm.read_page(current)?;
            let node = TreeNodeRef::new(guard.data());
            if node.is_leaf() {
                return Ok(current);
            }
            current = node.child_at(0);
        }
    }

    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(page_id)?;
        TreeNode::new(guard.data_mut()).set_parent_page_id(parent_id);
        Ok(())
    }

    /// Persists the root page id under this index's name in the header page.
    fn update_root(&self, root_id: PageId, insert_record: bool) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if insert_record || !header.update_record(&self.index_name, root_id) {
            header.insert_record(&self.index_name, root_id)?;
        }
        Ok(())
    }

    fn keys_equal(&self, a: &IndexKey, b: &IndexKey) -> bool {
        self.comparator.compare(a.as_bytes(), b.as_bytes()) == std::cmp::Ordering::Equal
    }
}
