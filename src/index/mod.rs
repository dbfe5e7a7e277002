pub mod b_plus_tree;
pub mod key_comparator;
pub mod tree_iterator;
pub mod tree_page;

pub use b_plus_tree::BPlusTree;
pub use key_comparator::{BytewiseComparator, IndexKey, IntegerComparator, KeyComparator};
pub use tree_iterator::TreeIterator;
pub use tree_page::{TreeNode, TreeNodeRef};
