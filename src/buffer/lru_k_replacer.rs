use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    History,
    Cache,
}

#[derive(Debug)]
struct FrameRecord {
    /// Number of recorded accesses (saturates once the frame reaches `k`).
    access_count: usize,
    is_evictable: bool,
    pool: Pool,
    /// Ordering stamp within the frame's pool. History frames keep the stamp
    /// of their oldest access; cache frames are re-stamped on every access.
    stamp: Timestamp,
}

/// LRU-K replacement policy.
///
/// Frames with fewer than `k` recorded accesses live in the *history* pool
/// and are evicted before any frame with `k` or more accesses (the *cache*
/// pool). Within the history pool, victims are ordered by oldest first
/// access; within the cache pool, by least recent access.
pub struct LruKReplacer {
    k: usize,
    /// Frame ids at or above this bound are ignored.
    replacer_size: usize,
    state: Mutex<ReplacerState>,
}

struct ReplacerState {
    frames: HashMap<FrameId, FrameRecord>,
    /// Oldest-first access order per pool; values are the frames at each stamp.
    history: BTreeMap<Timestamp, FrameId>,
    cache: BTreeMap<Timestamp, FrameId>,
    current_timestamp: Timestamp,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize, replacer_size: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            replacer_size,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                history: BTreeMap::new(),
                cache: BTreeMap::new(),
                current_timestamp: 0,
                num_evictable: 0,
            }),
        }
    }

    /// Records an access to `frame_id`, creating a tracking record on first
    /// access and promoting the frame to the cache pool on its k-th.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.replacer_size {
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.current_timestamp += 1;
        let now = state.current_timestamp;

        if !state.frames.contains_key(&frame_id) {
            state.frames.insert(
                frame_id,
                FrameRecord {
                    access_count: 1,
                    is_evictable: false,
                    pool: Pool::History,
                    stamp: now,
                },
            );
            state.history.insert(now, frame_id);
            return;
        }

        let record = state.frames.get_mut(&frame_id).expect("record exists");
        if record.pool == Pool::Cache {
            // Move to most-recent position.
            let old = record.stamp;
            record.stamp = now;
            state.cache.remove(&old);
            state.cache.insert(now, frame_id);
        } else {
            record.access_count += 1;
            if record.access_count >= self.k {
                // Promote: leaves the history pool at its old position and
                // enters the cache as most recent.
                let old = record.stamp;
                record.pool = Pool::Cache;
                record.stamp = now;
                state.history.remove(&old);
                state.cache.insert(now, frame_id);
            }
            // Below k the history position stays at the oldest access.
        }
    }

    /// Marks `frame_id` evictable or pinned. Unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(record) = state.frames.get_mut(&frame_id) {
            if record.is_evictable != is_evictable {
                record.is_evictable = is_evictable;
                if is_evictable {
                    state.num_evictable += 1;
                } else {
                    state.num_evictable -= 1;
                }
            }
        }
    }

    /// Evicts and returns the best victim, or `None` if nothing is evictable.
    /// History frames go before cache frames; within each pool, oldest first.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let victim = state
            .history
            .iter()
            .chain(state.cache.iter())
            .find(|&(_, fid)| state.frames[fid].is_evictable)
            .map(|(_, fid)| *fid)?;

        state.drop_record(victim);
        Some(victim)
    }

    /// Removes `frame_id` from the replacer entirely.
    ///
    /// # Panics
    ///
    /// Panics if the frame is tracked but not evictable; that is a caller
    /// error in the pin accounting.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if let Some(record) = state.frames.get(&frame_id) {
            assert!(
                record.is_evictable,
                "removing non-evictable frame {} from replacer",
                frame_id
            );
            state.drop_record(frame_id);
        }
    }

    /// Number of frames currently marked evictable.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl ReplacerState {
    fn drop_record(&mut self, frame_id: FrameId) {
        let record = self.frames.remove(&frame_id).expect("record exists");
        match record.pool {
            Pool::History => self.history.remove(&record.stamp),
            Pool::Cache => self.cache.remove(&record.stamp),
        };
        if record.is_evictable {
            self.num_evictable -= 1;
        }
    }
}
