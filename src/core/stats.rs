/// Point-in-time partition counters, returned by BTreePartition::stats().
#[derive(Debug, Clone)]
pub struct PartitionStats {
    pub uptime_secs: u64,
    pub entry_count: usize,
    pub user_index_count: usize,
    pub search_count: u64,
    pub write_count: u64,
}
