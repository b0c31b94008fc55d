pub mod btree_partition;
pub mod dn;

pub use btree_partition::{BTreePartition, StoredEntry};
