use std::sync::Arc;

use stratum::buffer::BufferPoolManager;
use stratum::index::{BPlusTree, IndexKey, IntegerComparator};
use stratum::storage::disk::DiskManager;
use stratum::{PageId, RecordId, SlotId};

fn main() {
    println!("Stratum - storage engine core demo");
    println!("==================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool with 16 frames (LRU-2)\n");

    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), Arc::new(IntegerComparator), 4, 4)
        .expect("failed to open index");

    for key in [30u64, 10, 50, 20, 40, 60, 70] {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        tree.insert(&IndexKey::from_u64(key), rid)
            .expect("insert failed");
        println!("Inserted key {}", key);
    }

    println!("\nPoint lookups:");
    for key in [20u64, 45, 70] {
        match tree.get(&IndexKey::from_u64(key)).expect("lookup failed") {
            Some(rid) => println!("  key {} -> page {}", key, rid.page_id),
            None => println!("  key {} -> not found", key),
        }
    }

    println!("\nIn-order scan:");
    for item in tree.iter().expect("iterator failed") {
        let (key, rid) = item.expect("scan failed");
        println!("  {} -> page {}", key.as_u64(), rid.page_id);
    }

    tree.remove(&IndexKey::from_u64(30)).expect("remove failed");
    println!("\nRemoved key 30; lookup now: {:?}", {
        tree.get(&IndexKey::from_u64(30)).expect("lookup failed")
    });

    bpm.flush_all_pages().expect("flush failed");
    println!("Flushed all pages; root page id is {}", tree.root_page_id());

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
