pub mod core;
pub mod schema;
pub mod index;
pub mod cursor;
pub mod query;
pub mod search;
pub mod partition;
pub mod storage;

/*
Layering, bottom up:

  core      EntryId / IndexKey / IndexRecord / Entry, Error, PartitionConfig
  schema    Normalizer trait + SchemaRegistry (per-attribute value canonicalization)
  index     BTreeIndex<K>: ordered key -> id set with reverse map and scan counts
  cursor    Cursor + Assertion traits, IndexCursor, DisjunctionCursor, PrefetchCursor
  query     Filter AST, annotate() cost pass, FilterMatcher (per-entry evaluation)
  search    SearchEngine: base resolution, scope cursors, bottom-up cursor build
  partition BTreePartition: entry store + system/user indices, CRUD, lifecycle
  storage   StorageLayout + crc-guarded bincode Checkpoint

A search enters BTreePartition::search, which resolves the base DN through the
ndn index, wraps the filter as And(Scope, filter), annotates every node with a
scan-count estimate, and builds the cursor tree bottom-up: the cheapest child
drives each conjunction, disjunctions union with id dedupe, negations scan the
master universe behind an inverted assertion. Callers pull candidate ids
lazily and resolve survivors through BTreePartition::lookup.
*/
