//! Stratum - the storage-engine core of a disk-oriented database
//!
//! This crate provides the hot loop by which higher layers read and mutate
//! persistent data: a buffer pool over a paged file, an LRU-K replacement
//! policy, an extendible hash table serving as the frame directory, and a
//! B+ tree index whose nodes live as buffer-pool pages.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and well-known page formats
//!   - `DiskManager`: reads and writes fixed-size pages against one file
//!   - `DiskScheduler`: background worker funneling page I/O over a channel
//!   - `HeaderPage`: page 0, mapping index names to root page ids
//!
//! - **Container** (`container`): generic data structures
//!   - `ExtendibleHashTable`: directory-doubling hash map with bounded
//!     buckets, used as the buffer pool's page table
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: caches pages in a fixed set of frames
//!   - `LruKReplacer`: two-pool LRU-K eviction policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pins over page bytes
//!
//! - **Index** (`index`): ordered access paths
//!   - `BPlusTree`: disk-resident unique-key index with point lookup,
//!     insert, delete, and leaf-order iteration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum::buffer::BufferPoolManager;
//! use stratum::index::{BPlusTree, IndexKey, IntegerComparator};
//! use stratum::storage::disk::DiskManager;
//! use stratum::{RecordId, PageId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, Arc::new(IntegerComparator), 32, 32).unwrap();
//! let rid = RecordId::new(PageId::new(12), SlotId::new(3));
//! tree.insert(&IndexKey::from_u64(42), rid).unwrap();
//! assert_eq!(tree.get(&IndexKey::from_u64(42)).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, PageId, RecordId, Result, SlotId, StratumError};
