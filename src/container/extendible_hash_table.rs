use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size` entries and the number of hash bits
/// that discriminate its contents from every other bucket.
struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: usize, capacity: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(capacity),
        }
    }
}

struct TableState<K, V> {
    global_depth: usize,
    num_buckets: usize,
    /// Directory of length `1 << global_depth`; each slot names a bucket in
    /// the arena. Slots alias the same bucket while its local depth is below
    /// the global depth.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Extendible hash table: an associative map with bounded per-bucket size.
///
/// Overflowing a bucket splits it in two on one additional hash bit; when the
/// overflowing bucket already uses every directory bit, the directory doubles
/// first. The directory only ever grows.
///
/// Used by the buffer pool as its page table (`PageId -> FrameId`), and
/// usable standalone; all operations take `&self` behind an internal latch.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    state: Mutex<TableState<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table with a single bucket and `global_depth = 0`.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be positive");
        Self {
            bucket_size,
            state: Mutex::new(TableState {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (Self::hash_of(key) & mask) as usize
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let bucket = &state.buckets[state.dir[Self::index_of(key, state.global_depth)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes the entry under `key`; returns whether a removal occurred.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let slot = state.dir[Self::index_of(key, state.global_depth)];
        let bucket = &mut state.buckets[slot];
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Inserts `key -> value`, overwriting any existing entry. Splits the
    /// target bucket (doubling the directory when necessary) until the entry
    /// fits; a skewed hash distribution may force several splits in a row.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        loop {
            let slot = state.dir[Self::index_of(&key, state.global_depth)];
            let bucket = &mut state.buckets[slot];

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            if state.buckets[slot].local_depth == state.global_depth {
                Self::double_directory(&mut state);
            }
            self.split_bucket(&mut state, slot);
        }
    }

    /// Doubles the directory; each new slot aliases the bucket of the slot
    /// with the same low `global_depth` bits.
    fn double_directory(state: &mut TableState<K, V>) {
        let old_len = state.dir.len();
        for i in 0..old_len {
            let target = state.dir[i];
            state.dir.push(target);
        }
        state.global_depth += 1;
    }

    /// Splits the bucket at arena index `which` on one extra hash bit. The
    /// half whose new bit is 0 stays in place; the other half moves to a
    /// fresh bucket, and every aliasing directory slot is repointed.
    fn split_bucket(&self, state: &mut TableState<K, V>, which: usize) {
        let old_depth = state.buckets[which].local_depth;
        let new_depth = old_depth + 1;
        let old_mask = (1usize << old_depth) - 1;
        let new_mask = (1usize << new_depth) - 1;

        // Shared low bits of every slot aliasing this bucket.
        let low = state
            .dir
            .iter()
            .position(|&b| b == which)
            .expect("bucket unreferenced by directory")
            & old_mask;

        let moved_index = state.buckets.len();
        state.buckets.push(Bucket::new(new_depth, self.bucket_size));
        state.buckets[which].local_depth = new_depth;

        let items = std::mem::take(&mut state.buckets[which].items);
        for (k, v) in items {
            let bits = (Self::hash_of(&k) as usize) & new_mask;
            if bits == low {
                state.buckets[which].items.push((k, v));
            } else {
                state.buckets[moved_index].items.push((k, v));
            }
        }

        for i in 0..state.dir.len() {
            if i & old_mask == low && i & new_mask != low {
                state.dir[i] = moved_index;
            }
        }
        state.num_buckets += 1;
    }

    /// Number of hash bits the directory currently indexes on.
    pub fn global_depth(&self) -> usize {
        self.state.lock().global_depth
    }

    /// Local depth of the bucket referenced by directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let state = self.state.lock();
        state.buckets[state.dir[dir_index]].local_depth
    }

    /// Number of live buckets.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().num_buckets
    }

    /// Snapshot of every entry, in no particular order.
    pub fn entries(&self) -> Vec<(K, V)> {
        let state = self.state.lock();
        let mut seen = vec![false; state.buckets.len()];
        let mut out = Vec::new();
        for &b in &state.dir {
            if !seen[b] {
                seen[b] = true;
                out.extend(state.buckets[b].items.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(2, "b");
        table.insert(3, "c");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
    }

    #[test]
    fn test_overwrite() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(1, "z");
        assert_eq!(table.find(&1), Some("z"));
    }

    #[test]
    fn test_remove() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, 10);
        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_grows_directory() {
        let table = ExtendibleHashTable::new(1);
        for i in 0..16 {
            table.insert(i, i * 10);
        }
        assert!(table.global_depth() >= 1);
        assert!(table.num_buckets() >= 2);
        for i in 0..16 {
            assert_eq!(table.find(&i), Some(i * 10), "lost key {}", i);
        }
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i);
        }
        let depth = table.global_depth();
        for slot in 0..(1usize << depth) {
            assert!(table.local_depth(slot) <= depth);
        }
    }

    #[test]
    fn test_entries_snapshot() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..10 {
            table.insert(i, i);
        }
        let mut entries = table.entries();
        entries.sort();
        assert_eq!(entries.len(), 10);
        for (i, (k, v)) in entries.into_iter().enumerate() {
            assert_eq!(k, i as i32);
            assert_eq!(v, i as i32);
        }
    }
}
