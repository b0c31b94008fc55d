use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::config::PartitionConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::PartitionStats;
use crate::core::types::{Entry, EntryId, IndexRecord, Modification, ModOp, ALIAS_ATTRIBUTE};
use crate::cursor::{Cursor, IndexCursor};
use crate::index::BTreeIndex;
use crate::partition::dn;
use crate::query::ast::Filter;
use crate::query::optimizer::ScanCountView;
use crate::schema::SchemaRegistry;
use crate::search::SearchEngine;
use crate::storage::{Checkpoint, StorageLayout};

/// One entry as held in the master table: the attributes plus the
/// hierarchy bookkeeping needed to rebuild every index from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: EntryId,
    pub parent: Option<EntryId>,
    /// DN as the caller wrote it.
    pub updn: String,
    /// Normalized DN, the primary lookup key.
    pub ndn: String,
    pub entry: Entry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionState {
    Open,
    Closed,
}

/// Everything behind the partition's RwLock: the master table, the system
/// indices and the user indices. Writes validate fully before touching any
/// structure, so a failed operation leaves master and indices agreeing.
pub struct PartitionInner {
    state: PartitionState,
    schema: Arc<SchemaRegistry>,
    suffix_ndn: String,
    next_id: u64,
    master: BTreeMap<EntryId, StoredEntry>,
    // System indices.
    ndn: BTreeIndex<String>,
    updn: BTreeIndex<String>,
    existence: BTreeIndex<String>,
    one_level: BTreeIndex<EntryId>,
    sub_level: BTreeIndex<EntryId>,
    one_alias: BTreeIndex<EntryId>,
    sub_alias: BTreeIndex<EntryId>,
    /// Alias entry id -> normalized target DN.
    alias: BTreeMap<EntryId, String>,
    user_indices: HashMap<String, BTreeIndex<String>>,
    properties: HashMap<String, String>,
}

impl PartitionInner {
    pub fn new(schema: Arc<SchemaRegistry>, suffix_ndn: String) -> Self {
        PartitionInner {
            state: PartitionState::Open,
            schema,
            suffix_ndn,
            next_id: 1,
            master: BTreeMap::new(),
            ndn: BTreeIndex::new("ndn"),
            updn: BTreeIndex::new("updn"),
            existence: BTreeIndex::new("existence"),
            one_level: BTreeIndex::new("one_level"),
            sub_level: BTreeIndex::new("sub_level"),
            one_alias: BTreeIndex::new("one_alias"),
            sub_alias: BTreeIndex::new("sub_alias"),
            alias: BTreeMap::new(),
            user_indices: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn check_open(&self) -> Result<()> {
        match self.state {
            PartitionState::Open => Ok(()),
            PartitionState::Closed => Err(Error::partition_closed()),
        }
    }

    pub fn suffix_ndn(&self) -> &str {
        &self.suffix_ndn
    }

    pub fn stored(&self, id: EntryId) -> Option<&StoredEntry> {
        self.master.get(&id)
    }

    pub fn resolve_ndn(&self, ndn: &str) -> Option<EntryId> {
        self.ndn.forward_first(&ndn.to_string())
    }

    pub fn entry_count(&self) -> usize {
        self.master.len()
    }

    pub fn is_alias(&self, id: EntryId) -> bool {
        self.alias.contains_key(&id)
    }

    /// Resolve an alias entry to its target's id; None for non-aliases and
    /// for aliases whose target no longer exists.
    pub fn alias_target_id(&self, id: EntryId) -> Option<EntryId> {
        let target_ndn = self.alias.get(&id)?;
        self.resolve_ndn(target_ndn)
    }

    pub fn one_level_contains(&self, base: EntryId, id: EntryId) -> bool {
        self.one_level.forward_contains(&base, id)
    }

    pub fn sub_level_contains(&self, base: EntryId, id: EntryId) -> bool {
        self.sub_level.forward_contains(&base, id)
    }

    /// Is id the resolved target of an alias directly under base?
    pub fn one_alias_contains(&self, base: EntryId, id: EntryId) -> bool {
        self.one_alias
            .forward(&base)
            .into_iter()
            .any(|alias_id| self.alias_target_id(alias_id) == Some(id))
    }

    /// Is id the resolved target of an alias anywhere under base?
    pub fn sub_alias_contains(&self, base: EntryId, id: EntryId) -> bool {
        self.sub_alias
            .forward(&base)
            .into_iter()
            .any(|alias_id| self.alias_target_id(alias_id) == Some(id))
    }

    /// Alias entry ids one level under base.
    pub fn one_alias_entries(&self, base: EntryId) -> Vec<EntryId> {
        self.one_alias.forward(&base)
    }

    /// Alias entry ids anywhere under base.
    pub fn sub_alias_entries(&self, base: EntryId) -> Vec<EntryId> {
        self.sub_alias.forward(&base)
    }

    pub fn one_level_children(&self, base: EntryId) -> Vec<EntryId> {
        self.one_level.forward(&base)
    }

    pub fn sub_level_members(&self, base: EntryId) -> Vec<EntryId> {
        self.sub_level.forward(&base)
    }

    pub fn one_level_records(&self, base: EntryId) -> Vec<IndexRecord> {
        self.one_level.records_for_key(&base)
    }

    /// Ids of entries carrying the attribute, as (attr, id) records.
    pub fn existence_records(&self, attr: &str) -> Vec<IndexRecord> {
        self.existence.records_for_key(&attr.to_lowercase())
    }

    /// The full candidate universe: every entry id, ascending.
    pub fn master_records(&self) -> Vec<IndexRecord> {
        self.master
            .keys()
            .map(|id| IndexRecord::new(*id, *id))
            .collect()
    }

    pub fn user_index(&self, attr: &str) -> Result<&BTreeIndex<String>> {
        self.user_indices
            .get(&attr.to_lowercase())
            .ok_or_else(|| Error::index_not_found(attr))
    }

    pub fn has_user_index(&self, attr: &str) -> bool {
        self.user_indices.contains_key(&attr.to_lowercase())
    }

    pub fn user_index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.user_indices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    /// Proper ancestors of an entry, nearest first, ending at the suffix.
    fn ancestors(&self, id: EntryId) -> Vec<EntryId> {
        let mut chain = Vec::new();
        let mut current = self.master.get(&id).and_then(|s| s.parent);
        while let Some(a) = current {
            chain.push(a);
            current = self.master.get(&a).and_then(|s| s.parent);
        }
        chain
    }

    fn in_suffix(&self, ndn: &str) -> bool {
        ndn == self.suffix_ndn || ndn.ends_with(&format!(",{}", self.suffix_ndn))
    }

    /// Normalized target DN of an alias entry, validated to resolve.
    fn validated_alias_target(&self, entry: &Entry) -> Result<Option<String>> {
        let raw = match entry.first(ALIAS_ATTRIBUTE) {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let target_ndn = dn::normalize_dn(&self.schema, raw)?;
        if self.resolve_ndn(&target_ndn).is_none() {
            return Err(Error::no_such_object(&target_ndn));
        }
        Ok(Some(target_ndn))
    }

    pub fn add_entry(&mut self, updn: &str, entry: Entry) -> Result<EntryId> {
        self.check_open()?;
        let ndn = dn::normalize_dn(&self.schema, updn)?;
        if !self.in_suffix(&ndn) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("'{}' is outside partition suffix '{}'", ndn, self.suffix_ndn),
            ));
        }
        if self.resolve_ndn(&ndn).is_some() {
            return Err(Error::new(
                ErrorKind::EntryExists,
                format!("entry '{}' already exists", ndn),
            ));
        }
        let parent = if ndn == self.suffix_ndn {
            None
        } else {
            let parent_ndn = dn::parent_dn(&ndn).unwrap_or_default();
            Some(
                self.resolve_ndn(&parent_ndn)
                    .ok_or_else(|| Error::no_such_object(&parent_ndn))?,
            )
        };
        let alias_target = self.validated_alias_target(&entry)?;

        // All validation passed; from here the write commits as one unit.
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.master.insert(
            id,
            StoredEntry {
                id,
                parent,
                updn: updn.trim().to_string(),
                ndn,
                entry,
            },
        );
        self.link_entry(id, alias_target);
        Ok(id)
    }

    /// Insert every index row for a freshly stored entry.
    fn link_entry(&mut self, id: EntryId, alias_target: Option<String>) {
        let stored = self.master.get(&id).cloned().expect("entry just stored");
        self.ndn.insert(stored.ndn.clone(), id);
        self.updn.insert(stored.updn.clone(), id);
        for (attr, values) in &stored.entry.attributes {
            self.existence.insert(attr.clone(), id);
            if let Some(index) = self.user_indices.get_mut(attr) {
                for value in values {
                    index.insert(self.schema.normalize(attr, value), id);
                }
            }
        }
        if let Some(parent) = stored.parent {
            self.one_level.insert(parent, id);
        }
        self.sub_level.insert(id, id);
        let ancestors = self.ancestors(id);
        for a in &ancestors {
            self.sub_level.insert(*a, id);
        }
        if let Some(target_ndn) = alias_target {
            self.alias.insert(id, target_ndn);
            if let Some(parent) = stored.parent {
                self.one_alias.insert(parent, id);
            }
            for a in &ancestors {
                self.sub_alias.insert(*a, id);
            }
        }
    }

    pub fn delete_entry(&mut self, id: EntryId) -> Result<()> {
        self.check_open()?;
        let stored = self
            .master
            .get(&id)
            .ok_or_else(|| missing_id(id))?
            .clone();
        if self.one_level.count_key(&id) > 0 {
            return Err(Error::new(
                ErrorKind::ContextNotEmpty,
                format!("'{}' still has children", stored.ndn),
            ));
        }
        self.ndn.remove(&stored.ndn, id);
        self.updn.remove(&stored.updn, id);
        self.existence.drop_all(id);
        for index in self.user_indices.values_mut() {
            index.drop_all(id);
        }
        self.one_level.drop_all(id);
        self.sub_level.drop_all(id);
        self.one_alias.drop_all(id);
        self.sub_alias.drop_all(id);
        self.alias.remove(&id);
        self.master.remove(&id);
        Ok(())
    }

    pub fn modify_entry(&mut self, target_dn: &str, mods: &[Modification]) -> Result<()> {
        self.check_open()?;
        let ndn = dn::normalize_dn(&self.schema, target_dn)?;
        let id = self
            .resolve_ndn(&ndn)
            .ok_or_else(|| Error::no_such_object(&ndn))?;
        let old_entry = self.master.get(&id).map(|s| s.entry.clone()).expect("resolved");
        let new_entry = self.apply_modifications(&old_entry, mods)?;

        let alias_changed = old_entry.get(ALIAS_ATTRIBUTE) != new_entry.get(ALIAS_ATTRIBUTE);
        let new_alias_target = if alias_changed {
            self.validated_alias_target(&new_entry)?
        } else {
            None
        };

        let touched: HashSet<String> = mods.iter().map(|m| m.attr.clone()).collect();
        for attr in &touched {
            let old_values = old_entry.get(attr).cloned().unwrap_or_default();
            let new_values = new_entry.get(attr).cloned().unwrap_or_default();
            self.reindex_attr(id, attr, &old_values, &new_values);
        }
        if alias_changed {
            self.unlink_alias(id);
            if let Some(target_ndn) = new_alias_target {
                self.link_alias(id, target_ndn);
            }
        }
        if let Some(stored) = self.master.get_mut(&id) {
            stored.entry = new_entry;
        }
        Ok(())
    }

    fn apply_modifications(&self, entry: &Entry, mods: &[Modification]) -> Result<Entry> {
        let mut out = entry.clone();
        for m in mods {
            match m.op {
                ModOp::Add => {
                    for value in &m.values {
                        out.add_attribute(&m.attr, value);
                    }
                }
                ModOp::Replace => {
                    out.remove_attribute(&m.attr);
                    for value in &m.values {
                        out.add_attribute(&m.attr, value);
                    }
                }
                ModOp::Remove => {
                    if m.values.is_empty() {
                        out.remove_attribute(&m.attr);
                    } else if let Some(values) = out.attributes.get_mut(&m.attr) {
                        let drop: HashSet<String> = m
                            .values
                            .iter()
                            .map(|v| self.schema.normalize(&m.attr, v))
                            .collect();
                        values.retain(|v| !drop.contains(&self.schema.normalize(&m.attr, v)));
                        if values.is_empty() {
                            out.remove_attribute(&m.attr);
                        }
                    }
                }
            }
            if self.schema.is_single_valued(&m.attr)
                && out.get(&m.attr).map_or(0, Vec::len) > 1
            {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("attribute '{}' is single-valued", m.attr),
                ));
            }
        }
        Ok(out)
    }

    /// Re-derive existence and user-index rows for one attribute of one
    /// entry after its value set changed.
    fn reindex_attr(&mut self, id: EntryId, attr: &str, old_values: &[String], new_values: &[String]) {
        let key = attr.to_string();
        if old_values.is_empty() != new_values.is_empty() {
            if new_values.is_empty() {
                self.existence.remove(&key, id);
            } else {
                self.existence.insert(key.clone(), id);
            }
        }
        let old_norm: HashSet<String> = old_values
            .iter()
            .map(|v| self.schema.normalize(attr, v))
            .collect();
        let new_norm: HashSet<String> = new_values
            .iter()
            .map(|v| self.schema.normalize(attr, v))
            .collect();
        if let Some(index) = self.user_indices.get_mut(&key) {
            for gone in old_norm.difference(&new_norm) {
                index.remove(gone, id);
            }
            for added in new_norm.difference(&old_norm) {
                index.insert(added.clone(), id);
            }
        }
    }

    fn unlink_alias(&mut self, id: EntryId) {
        if self.alias.remove(&id).is_some() {
            self.one_alias.drop_all(id);
            self.sub_alias.drop_all(id);
        }
    }

    fn link_alias(&mut self, id: EntryId, target_ndn: String) {
        self.alias.insert(id, target_ndn);
        if let Some(parent) = self.master.get(&id).and_then(|s| s.parent) {
            self.one_alias.insert(parent, id);
        }
        for a in self.ancestors(id) {
            self.sub_alias.insert(a, id);
        }
    }

    /// Shared implementation of rename and move: reparent and/or re-label
    /// the entry, then rewrite the DNs and hierarchy rows of its whole
    /// subtree.
    pub fn relocate(
        &mut self,
        target_dn: &str,
        new_parent_dn: Option<&str>,
        new_rdn: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.check_open()?;
        let old_ndn = dn::normalize_dn(&self.schema, target_dn)?;
        let id = self
            .resolve_ndn(&old_ndn)
            .ok_or_else(|| Error::no_such_object(&old_ndn))?;
        if old_ndn == self.suffix_ndn {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "cannot relocate the partition suffix".to_string(),
            ));
        }
        let stored = self.master.get(&id).expect("resolved").clone();
        let old_parent = stored.parent.expect("non-suffix entry has a parent");

        let new_parent = match new_parent_dn {
            Some(pdn) => {
                let parent_ndn = dn::normalize_dn(&self.schema, pdn)?;
                let parent_id = self
                    .resolve_ndn(&parent_ndn)
                    .ok_or_else(|| Error::no_such_object(&parent_ndn))?;
                if self.sub_level.forward_contains(&id, parent_id) {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("cannot move '{}' under its own subtree", old_ndn),
                    ));
                }
                parent_id
            }
            None => old_parent,
        };

        let old_rdn = dn::rdn(&stored.updn);
        let rdn_part = match new_rdn {
            Some(r) => {
                dn::parse_rdn(r)?;
                r.trim().to_string()
            }
            None => old_rdn.clone(),
        };
        let parent_updn = self
            .master
            .get(&new_parent)
            .map(|s| s.updn.clone())
            .expect("parent resolved");
        let new_updn = format!("{},{}", rdn_part, parent_updn);
        let new_ndn = dn::normalize_dn(&self.schema, &new_updn)?;
        if new_ndn != old_ndn && self.resolve_ndn(&new_ndn).is_some() {
            return Err(Error::new(
                ErrorKind::EntryExists,
                format!("entry '{}' already exists", new_ndn),
            ));
        }

        // Hierarchy rewiring: only the ancestor chain above the moved entry
        // changes; links inside its subtree stay as they are.
        let old_ancestors = self.ancestors(id);
        let members = self.sub_level.forward(&id);
        if new_parent != old_parent {
            self.one_level.remove(&old_parent, id);
            self.one_level.insert(new_parent, id);
            if self.alias.contains_key(&id) {
                self.one_alias.remove(&old_parent, id);
                self.one_alias.insert(new_parent, id);
            }
            if let Some(s) = self.master.get_mut(&id) {
                s.parent = Some(new_parent);
            }
            let new_ancestors = {
                let mut chain = vec![new_parent];
                chain.extend(self.ancestors(new_parent));
                chain
            };
            for m in &members {
                for a in &old_ancestors {
                    self.sub_level.remove(a, *m);
                }
                for a in &new_ancestors {
                    self.sub_level.insert(*a, *m);
                }
                if self.alias.contains_key(m) {
                    for a in &old_ancestors {
                        self.sub_alias.remove(a, *m);
                    }
                    for a in &new_ancestors {
                        self.sub_alias.insert(*a, *m);
                    }
                }
            }
        }

        // Rewrite DNs top-down so every parent's new DN is in place before
        // its children compose theirs.
        let mut by_depth = members.clone();
        by_depth.sort_by_key(|m| {
            self.master
                .get(m)
                .map_or(usize::MAX, |s| dn::split_rdns(&s.ndn).len())
        });
        for m in by_depth {
            let (m_old_updn, m_old_ndn, m_parent) = {
                let s = self.master.get(&m).expect("subtree member");
                (s.updn.clone(), s.ndn.clone(), s.parent)
            };
            let m_new_updn = if m == id {
                new_updn.clone()
            } else {
                let parent_updn = m_parent
                    .and_then(|p| self.master.get(&p))
                    .map(|s| s.updn.clone())
                    .expect("member parent resolved");
                format!("{},{}", dn::rdn(&m_old_updn), parent_updn)
            };
            let m_new_ndn = dn::normalize_dn(&self.schema, &m_new_updn)?;
            self.ndn.remove(&m_old_ndn, m);
            self.ndn.insert(m_new_ndn.clone(), m);
            self.updn.remove(&m_old_updn, m);
            self.updn.insert(m_new_updn.clone(), m);
            if let Some(s) = self.master.get_mut(&m) {
                s.updn = m_new_updn;
                s.ndn = m_new_ndn;
            }
        }

        // RDN attribute upkeep: the new RDN value is added; the old one is
        // removed only when asked and when it actually differs.
        if let Some(r) = new_rdn {
            let (new_attr, new_value) = dn::parse_rdn(r)?;
            let (old_attr, old_value) = dn::parse_rdn(&old_rdn)?;
            let mut entry = self.master.get(&id).map(|s| s.entry.clone()).expect("resolved");
            let before_new = entry.get(&new_attr).cloned().unwrap_or_default();
            entry.add_attribute(&new_attr, &new_value);
            let after_new = entry.get(&new_attr).cloned().unwrap_or_default();
            self.reindex_attr(id, &new_attr, &before_new, &after_new);

            let same_value = old_attr == new_attr
                && self.schema.normalize(&old_attr, &old_value)
                    == self.schema.normalize(&new_attr, &new_value);
            if delete_old_rdn && !same_value {
                let before_old = entry.get(&old_attr).cloned().unwrap_or_default();
                let old_norm = self.schema.normalize(&old_attr, &old_value);
                if let Some(values) = entry.attributes.get_mut(&old_attr) {
                    values.retain(|v| self.schema.normalize(&old_attr, v) != old_norm);
                    if values.is_empty() {
                        entry.remove_attribute(&old_attr);
                    }
                }
                let after_old = entry.get(&old_attr).cloned().unwrap_or_default();
                self.reindex_attr(id, &old_attr, &before_old, &after_old);
            }
            if let Some(s) = self.master.get_mut(&id) {
                s.entry = entry;
            }
        }
        Ok(())
    }

    pub fn add_index_on(&mut self, attr: &str) -> Result<()> {
        self.check_open()?;
        let attr = attr.to_lowercase();
        if self.user_indices.contains_key(&attr) {
            return Ok(());
        }
        let mut index = BTreeIndex::new(&attr);
        for (id, stored) in &self.master {
            if let Some(values) = stored.entry.get(&attr) {
                for value in values {
                    index.insert(self.schema.normalize(&attr, value), *id);
                }
            }
        }
        log::info!(
            "built index on '{}': {} records from {} entries",
            attr,
            index.count(),
            self.master.len()
        );
        self.user_indices.insert(attr, index);
        Ok(())
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.next_id = checkpoint.next_id;
        self.properties = checkpoint.properties;
        for stored in checkpoint.entries {
            self.master.insert(stored.id, stored);
        }
        let ids: Vec<EntryId> = self.master.keys().copied().collect();
        for id in ids {
            let alias_target = match self.master.get(&id).map(|s| s.entry.clone()) {
                Some(entry) if entry.is_alias() => entry
                    .first(ALIAS_ATTRIBUTE)
                    .map(|raw| dn::normalize_dn(&self.schema, raw))
                    .transpose()?,
                _ => None,
            };
            self.link_entry(id, alias_target);
        }
        for attr in checkpoint.user_indices {
            self.add_index_on(&attr)?;
        }
        Ok(())
    }

    fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.suffix_ndn.clone(),
            self.next_id,
            self.properties.clone(),
            self.user_index_names(),
            self.master.values().cloned().collect(),
        )
    }

    fn close(&mut self) {
        self.state = PartitionState::Closed;
        self.master.clear();
        self.alias.clear();
        self.user_indices.clear();
    }
}

impl ScanCountView for PartitionInner {
    fn total_count(&self) -> u64 {
        self.master.len() as u64
    }

    fn one_level_count(&self, base: EntryId) -> u64 {
        self.one_level.count_key(&base) as u64
    }

    fn existence_count(&self, attr: &str) -> u64 {
        self.existence.count_key(&attr.to_string()) as u64
    }

    fn index_count(&self, attr: &str) -> Result<u64> {
        Ok(self.user_index(attr)?.count() as u64)
    }

    fn index_count_for(&self, attr: &str, value: &str) -> Result<u64> {
        Ok(self.user_index(attr)?.count_key(&value.to_string()) as u64)
    }

    fn index_count_from(&self, attr: &str, value: &str) -> Result<u64> {
        Ok(self.user_index(attr)?.count_from(&value.to_string()) as u64)
    }

    fn index_count_to(&self, attr: &str, value: &str) -> Result<u64> {
        Ok(self.user_index(attr)?.count_to(&value.to_string()) as u64)
    }
}

fn missing_id(id: EntryId) -> Error {
    Error::new(
        ErrorKind::NoSuchObject,
        format!("no entry with id {}", id.value()),
    )
}

/// The partition facade: one suffix, an entry store checkpointed to disk,
/// eight system indices and any number of user indices, searched through
/// the cost-annotated cursor algebra.
pub struct BTreePartition {
    config: PartitionConfig,
    schema: Arc<SchemaRegistry>,
    inner: Arc<RwLock<PartitionInner>>,
    engine: SearchEngine,
    layout: Option<StorageLayout>,
    opened_at: Instant,
    search_count: AtomicU64,
    write_count: AtomicU64,
}

impl BTreePartition {
    pub fn open(schema: Arc<SchemaRegistry>, config: PartitionConfig) -> Result<Self> {
        let suffix_ndn = dn::normalize_dn(&schema, &config.suffix_dn)?;
        let layout = match &config.working_dir {
            Some(dir) => Some(StorageLayout::new(dir)?),
            None => None,
        };
        let mut inner = PartitionInner::new(schema.clone(), suffix_ndn.clone());
        let mut restored = 0;
        if let Some(layout) = &layout {
            if let Some(checkpoint) = Checkpoint::load(&layout.checkpoint_path())? {
                restored = checkpoint.entries.len();
                inner.restore(checkpoint)?;
            }
        }
        for attr in &config.indexed_attributes {
            inner.add_index_on(attr)?;
        }
        log::info!(
            "partition '{}' open: {} entries restored, {} user indices",
            suffix_ndn,
            restored,
            inner.user_indices.len()
        );
        let inner = Arc::new(RwLock::new(inner));
        let engine = SearchEngine::new(inner.clone(), schema.clone());
        Ok(BTreePartition {
            config,
            schema,
            inner,
            engine,
            layout,
            opened_at: Instant::now(),
            search_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
        })
    }

    pub fn suffix_dn(&self) -> &str {
        &self.config.suffix_dn
    }

    pub fn add(&self, updn: &str, entry: Entry) -> Result<EntryId> {
        let id = self.inner.write().add_entry(updn, entry)?;
        self.after_write()?;
        Ok(id)
    }

    pub fn lookup(&self, id: EntryId) -> Result<Entry> {
        let guard = self.inner.read();
        guard.check_open()?;
        guard
            .stored(id)
            .map(|s| s.entry.clone())
            .ok_or_else(|| missing_id(id))
    }

    pub fn entry_dn(&self, id: EntryId) -> Result<String> {
        let guard = self.inner.read();
        guard.check_open()?;
        guard
            .stored(id)
            .map(|s| s.updn.clone())
            .ok_or_else(|| missing_id(id))
    }

    /// Id of the entry with the given DN.
    pub fn entry_id(&self, target_dn: &str) -> Result<EntryId> {
        let guard = self.inner.read();
        guard.check_open()?;
        let ndn = dn::normalize_dn(&self.schema, target_dn)?;
        guard
            .resolve_ndn(&ndn)
            .ok_or_else(|| Error::no_such_object(&ndn))
    }

    pub fn delete(&self, id: EntryId) -> Result<()> {
        self.inner.write().delete_entry(id)?;
        self.after_write()
    }

    pub fn modify(&self, target_dn: &str, mods: &[Modification]) -> Result<()> {
        self.inner.write().modify_entry(target_dn, mods)?;
        self.after_write()
    }

    pub fn modify_rdn(&self, target_dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        self.inner
            .write()
            .relocate(target_dn, None, Some(new_rdn), delete_old_rdn)?;
        self.after_write()
    }

    pub fn move_entry(&self, target_dn: &str, new_parent_dn: &str) -> Result<()> {
        self.inner
            .write()
            .relocate(target_dn, Some(new_parent_dn), None, false)?;
        self.after_write()
    }

    pub fn move_and_rename(
        &self,
        target_dn: &str,
        new_parent_dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.inner
            .write()
            .relocate(target_dn, Some(new_parent_dn), Some(new_rdn), delete_old_rdn)?;
        self.after_write()
    }

    /// Cursor over the direct children of an entry.
    pub fn list(&self, id: EntryId) -> Result<Box<dyn Cursor>> {
        let guard = self.inner.read();
        guard.check_open()?;
        if guard.stored(id).is_none() {
            return Err(missing_id(id));
        }
        Ok(Box::new(IndexCursor::new(guard.one_level_records(id))))
    }

    pub fn child_count(&self, id: EntryId) -> Result<usize> {
        let guard = self.inner.read();
        guard.check_open()?;
        Ok(guard.one_level_children(id).len())
    }

    pub fn count(&self) -> Result<usize> {
        let guard = self.inner.read();
        guard.check_open()?;
        Ok(guard.entry_count())
    }

    pub fn search(
        &self,
        base_dn: &str,
        scope: crate::core::types::SearchScope,
        deref: crate::core::types::AliasDerefMode,
        filter: &Filter,
    ) -> Result<Box<dyn Cursor>> {
        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.engine.search(base_dn, scope, deref, filter)
    }

    pub fn add_index_on(&self, attr: &str) -> Result<()> {
        self.inner.write().add_index_on(attr)?;
        self.after_write()
    }

    pub fn has_user_index_on(&self, attr: &str) -> bool {
        self.inner.read().has_user_index(attr)
    }

    pub fn user_indices(&self) -> Vec<String> {
        self.inner.read().user_index_names()
    }

    pub fn system_indices(&self) -> &'static [&'static str] {
        &[
            "ndn",
            "updn",
            "existence",
            "one_level",
            "sub_level",
            "one_alias",
            "sub_alias",
            "alias",
        ]
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.inner.write();
        guard.check_open()?;
        guard.set_property(key, value);
        drop(guard);
        self.after_write()
    }

    pub fn property(&self, key: &str) -> Result<Option<String>> {
        let guard = self.inner.read();
        guard.check_open()?;
        Ok(guard.properties().get(key).cloned())
    }

    pub fn stats(&self) -> Result<PartitionStats> {
        let guard = self.inner.read();
        guard.check_open()?;
        Ok(PartitionStats {
            uptime_secs: self.opened_at.elapsed().as_secs(),
            entry_count: guard.entry_count(),
            user_index_count: guard.user_indices.len(),
            search_count: self.search_count.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
        })
    }

    /// Write a checkpoint. A no-op for in-memory partitions.
    pub fn sync(&self) -> Result<()> {
        let layout = match &self.layout {
            Some(layout) => layout,
            None => {
                self.inner.read().check_open()?;
                return Ok(());
            }
        };
        let guard = self.inner.read();
        guard.check_open()?;
        let checkpoint = guard.to_checkpoint();
        drop(guard);
        checkpoint.save(&layout.checkpoint_path())?;
        self.config.save(&layout.config_path())?;
        Ok(())
    }

    /// Sync, then permanently disable the partition. Closing twice is a
    /// no-op; every other operation afterwards fails with PartitionClosed.
    pub fn close(&self) -> Result<()> {
        if self.inner.read().check_open().is_err() {
            return Ok(());
        }
        self.sync()?;
        self.inner.write().close();
        log::info!("partition '{}' closed", self.config.suffix_dn);
        Ok(())
    }

    /// Close without syncing and remove the on-disk state.
    pub fn destroy(self) -> Result<()> {
        self.inner.write().close();
        if let Some(layout) = &self.layout {
            fs::remove_dir_all(&layout.base_dir)?;
        }
        Ok(())
    }

    fn after_write(&self) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        if self.config.sync_on_write && self.layout.is_some() {
            self.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AliasDerefMode, SearchScope};

    fn person(cn: &str, sn: &str) -> Entry {
        Entry::new()
            .with_attribute("objectclass", "person")
            .with_attribute("cn", cn)
            .with_attribute("sn", sn)
    }

    fn open_partition() -> BTreePartition {
        let config = PartitionConfig {
            suffix_dn: "dc=example,dc=com".to_string(),
            indexed_attributes: vec!["cn".to_string(), "sn".to_string()],
            ..Default::default()
        };
        let partition = BTreePartition::open(Arc::new(SchemaRegistry::new()), config).unwrap();
        partition
            .add(
                "dc=example,dc=com",
                Entry::new().with_attribute("dc", "example"),
            )
            .unwrap();
        partition
            .add(
                "ou=people,dc=example,dc=com",
                Entry::new().with_attribute("ou", "people"),
            )
            .unwrap();
        partition
    }

    fn drain_ids(cursor: &mut dyn Cursor) -> Vec<u64> {
        let mut out = Vec::new();
        while cursor.has_more().unwrap() {
            out.push(cursor.next().unwrap().id.value());
        }
        out
    }

    #[test]
    fn add_lookup_and_hierarchy() {
        let p = open_partition();
        let id = p
            .add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();

        assert_eq!(p.lookup(id).unwrap().first("cn"), Some("Alice"));
        assert_eq!(p.entry_dn(id).unwrap(), "cn=Alice,ou=people,dc=example,dc=com");
        assert_eq!(
            p.entry_id("CN=alice, OU=People, dc=example, dc=com").unwrap(),
            id
        );

        let people = p.entry_id("ou=people,dc=example,dc=com").unwrap();
        assert_eq!(p.child_count(people).unwrap(), 1);
        let mut listing = p.list(people).unwrap();
        assert_eq!(drain_ids(listing.as_mut()), vec![id.value()]);
        assert_eq!(p.count().unwrap(), 3);
    }

    #[test]
    fn add_validates_parent_suffix_and_uniqueness() {
        let p = open_partition();
        let err = p
            .add("cn=x,ou=nowhere,dc=example,dc=com", person("x", "y"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchObject);

        let err = p.add("cn=x,dc=other,dc=org", person("x", "y")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        p.add("cn=Bob,ou=people,dc=example,dc=com", person("Bob", "Baker"))
            .unwrap();
        let err = p
            .add("cn=BOB, ou=People, dc=example, dc=com", person("Bob", "Baker"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EntryExists);
    }

    #[test]
    fn delete_refuses_non_leaves_and_cleans_indices() {
        let p = open_partition();
        let people = p.entry_id("ou=people,dc=example,dc=com").unwrap();
        let alice = p
            .add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();

        let err = p.delete(people).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContextNotEmpty);

        p.delete(alice).unwrap();
        assert_eq!(p.lookup(alice).unwrap_err().kind, ErrorKind::NoSuchObject);
        assert_eq!(p.child_count(people).unwrap(), 0);
        let mut found = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("cn", "alice"),
            )
            .unwrap();
        assert!(drain_ids(found.as_mut()).is_empty());
    }

    #[test]
    fn modify_reindexes_changed_attributes() {
        let p = open_partition();
        p.add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();

        p.modify(
            "cn=alice,ou=people,dc=example,dc=com",
            &[
                Modification::replace("sn", &["Jones"]),
                Modification::add("mail", &["alice@example.com"]),
            ],
        )
        .unwrap();

        let search = |filter: &Filter| {
            let mut cursor = p
                .search(
                    "dc=example,dc=com",
                    SearchScope::Subtree,
                    AliasDerefMode::Never,
                    filter,
                )
                .unwrap();
            drain_ids(cursor.as_mut())
        };
        assert_eq!(search(&Filter::eq("sn", "jones")).len(), 1);
        assert!(search(&Filter::eq("sn", "smith")).is_empty());
        assert_eq!(search(&Filter::present("mail")).len(), 1);

        p.modify(
            "cn=alice,ou=people,dc=example,dc=com",
            &[Modification::remove("mail", &[])],
        )
        .unwrap();
        assert!(search(&Filter::present("mail")).is_empty());
    }

    #[test]
    fn single_valued_violation_changes_nothing() {
        let schema = SchemaRegistry::new().with_attribute(crate::schema::AttributeType::new(
            "uid",
            true,
            Arc::new(crate::schema::CaseIgnoreNormalizer),
        ));
        let config = PartitionConfig {
            suffix_dn: "dc=example,dc=com".to_string(),
            ..Default::default()
        };
        let p = BTreePartition::open(Arc::new(schema), config).unwrap();
        p.add("dc=example,dc=com", Entry::new().with_attribute("dc", "example"))
            .unwrap();
        p.add(
            "cn=a,dc=example,dc=com",
            person("a", "b").with_attribute("uid", "a1"),
        )
        .unwrap();

        let err = p
            .modify(
                "cn=a,dc=example,dc=com",
                &[Modification::add("uid", &["a2"])],
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let id = p.entry_id("cn=a,dc=example,dc=com").unwrap();
        assert_eq!(p.lookup(id).unwrap().get("uid"), Some(&vec!["a1".to_string()]));
    }

    #[test]
    fn rename_rewrites_dn_and_rdn_attribute() {
        let p = open_partition();
        let id = p
            .add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();

        p.modify_rdn("cn=alice,ou=people,dc=example,dc=com", "cn=Alicia", true)
            .unwrap();

        assert_eq!(p.entry_dn(id).unwrap(), "cn=Alicia,ou=people,dc=example,dc=com");
        assert_eq!(p.entry_id("cn=alicia,ou=people,dc=example,dc=com").unwrap(), id);
        assert_eq!(
            p.entry_id("cn=alice,ou=people,dc=example,dc=com").unwrap_err().kind,
            ErrorKind::NoSuchObject
        );
        let entry = p.lookup(id).unwrap();
        assert_eq!(entry.get("cn"), Some(&vec!["Alicia".to_string()]));

        // The cn index moved with the rename.
        let mut cursor = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("cn", "alicia"),
            )
            .unwrap();
        assert_eq!(drain_ids(cursor.as_mut()), vec![id.value()]);
    }

    #[test]
    fn move_rewrites_the_whole_subtree() {
        let p = open_partition();
        p.add(
            "ou=staff,dc=example,dc=com",
            Entry::new().with_attribute("ou", "staff"),
        )
        .unwrap();
        p.add("ou=eng,ou=people,dc=example,dc=com", Entry::new().with_attribute("ou", "eng"))
            .unwrap();
        let alice = p
            .add("cn=Alice,ou=eng,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();

        p.move_entry("ou=eng,ou=people,dc=example,dc=com", "ou=staff,dc=example,dc=com")
            .unwrap();

        assert_eq!(p.entry_dn(alice).unwrap(), "cn=Alice,ou=eng,ou=staff,dc=example,dc=com");
        let staff = p.entry_id("ou=staff,dc=example,dc=com").unwrap();
        let mut cursor = p
            .search(
                "ou=staff,dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("cn", "alice"),
            )
            .unwrap();
        assert_eq!(drain_ids(cursor.as_mut()), vec![alice.value()]);

        // The old location no longer reaches the entry.
        let people = p.entry_id("ou=people,dc=example,dc=com").unwrap();
        let mut cursor = p
            .search(
                "ou=people,dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("cn", "alice"),
            )
            .unwrap();
        assert!(drain_ids(cursor.as_mut()).is_empty());
        assert_eq!(p.child_count(people).unwrap(), 0);
        assert_eq!(p.child_count(staff).unwrap(), 1);
    }

    #[test]
    fn move_under_own_subtree_is_refused() {
        let p = open_partition();
        p.add("ou=a,ou=people,dc=example,dc=com", Entry::new().with_attribute("ou", "a"))
            .unwrap();
        let err = p
            .move_entry("ou=people,dc=example,dc=com", "ou=a,ou=people,dc=example,dc=com")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let err = p
            .move_entry("ou=people,dc=example,dc=com", "ou=people,dc=example,dc=com")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn add_index_on_backfills_existing_entries() {
        let p = open_partition();
        let id = p
            .add(
                "cn=Alice,ou=people,dc=example,dc=com",
                person("Alice", "Smith").with_attribute("mail", "alice@example.com"),
            )
            .unwrap();

        assert!(!p.has_user_index_on("mail"));
        let err = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("mail", "alice@example.com"),
            )
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::IndexNotFound);

        p.add_index_on("mail").unwrap();
        assert!(p.has_user_index_on("mail"));
        let mut cursor = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("mail", "alice@example.com"),
            )
            .unwrap();
        assert_eq!(drain_ids(cursor.as_mut()), vec![id.value()]);
        assert!(p.user_indices().contains(&"mail".to_string()));
    }

    #[test]
    fn open_cursor_is_unaffected_by_later_writes() {
        let p = open_partition();
        p.add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();
        p.add("cn=Bob,ou=people,dc=example,dc=com", person("Bob", "Smith"))
            .unwrap();

        let mut cursor = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("sn", "smith"),
            )
            .unwrap();
        let first = cursor.next().unwrap().id;

        // Committed after construction: must not appear in this cursor.
        p.add("cn=Carol,ou=people,dc=example,dc=com", person("Carol", "Smith"))
            .unwrap();

        let mut rest = vec![first.value()];
        rest.extend(drain_ids(cursor.as_mut()));
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn deleted_entry_stops_asserting_mid_iteration() {
        let p = open_partition();
        let alice = p
            .add("cn=Alice,ou=people,dc=example,dc=com", person("Alice", "Smith"))
            .unwrap();
        let bob = p
            .add("cn=Bob,ou=people,dc=example,dc=com", person("Bob", "Smith"))
            .unwrap();
        let carol = p
            .add("cn=Carol,ou=people,dc=example,dc=com", person("Carol", "Smith"))
            .unwrap();
        // A fourth match outside the base keeps the scope cursor cheapest,
        // so the equality operand is evaluated per candidate.
        p.add("cn=Dan,dc=example,dc=com", person("Dan", "Smith"))
            .unwrap();

        let mut cursor = p
            .search(
                "ou=people,dc=example,dc=com",
                SearchScope::OneLevel,
                AliasDerefMode::Never,
                &Filter::eq("sn", "smith"),
            )
            .unwrap();
        assert_eq!(cursor.next().unwrap().id, alice);

        // Deleted before being staged: it must be skipped, not error.
        p.delete(carol).unwrap();

        let mut rest = Vec::new();
        while cursor.has_more().unwrap() {
            rest.push(cursor.next().unwrap().id);
        }
        assert_eq!(rest, vec![bob]);
        cursor.close().unwrap();
    }

    #[test]
    fn properties_and_stats() {
        let p = open_partition();
        p.set_property("owner", "ops").unwrap();
        assert_eq!(p.property("owner").unwrap(), Some("ops".to_string()));
        assert_eq!(p.property("absent").unwrap(), None);

        let stats = p.stats().unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.user_index_count, 2);
        assert!(stats.write_count >= 3);
        assert_eq!(p.system_indices().len(), 8);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let p = open_partition();
        p.close().unwrap();
        p.close().unwrap();
        assert_eq!(p.count().unwrap_err().kind, ErrorKind::PartitionClosed);
        assert_eq!(
            p.add("cn=x,dc=example,dc=com", person("x", "y")).unwrap_err().kind,
            ErrorKind::PartitionClosed
        );
        assert_eq!(
            p.search(
                "dc=example,dc=com",
                SearchScope::Base,
                AliasDerefMode::Never,
                &Filter::present("dc"),
            )
            .err()
            .unwrap()
            .kind,
            ErrorKind::PartitionClosed
        );
    }

    #[test]
    fn checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = PartitionConfig {
            suffix_dn: "dc=example,dc=com".to_string(),
            working_dir: Some(dir.path().to_path_buf()),
            indexed_attributes: vec!["cn".to_string()],
            ..Default::default()
        };

        let alice;
        {
            let p = BTreePartition::open(Arc::new(SchemaRegistry::new()), config.clone()).unwrap();
            p.add("dc=example,dc=com", Entry::new().with_attribute("dc", "example"))
                .unwrap();
            alice = p
                .add("cn=Alice,dc=example,dc=com", person("Alice", "Smith"))
                .unwrap();
            p.set_property("owner", "ops").unwrap();
            p.close().unwrap();
        }

        let p = BTreePartition::open(Arc::new(SchemaRegistry::new()), config).unwrap();
        assert_eq!(p.count().unwrap(), 2);
        assert_eq!(p.lookup(alice).unwrap().first("cn"), Some("Alice"));
        assert_eq!(p.property("owner").unwrap(), Some("ops".to_string()));
        assert!(p.has_user_index_on("cn"));

        // Indices were rebuilt, not just the master table.
        let mut cursor = p
            .search(
                "dc=example,dc=com",
                SearchScope::Subtree,
                AliasDerefMode::Never,
                &Filter::eq("cn", "alice"),
            )
            .unwrap();
        assert_eq!(drain_ids(cursor.as_mut()), vec![alice.value()]);

        // New ids continue after the restored high-water mark.
        let bob = p
            .add("cn=Bob,dc=example,dc=com", person("Bob", "Baker"))
            .unwrap();
        assert!(bob > alice);
        p.destroy().unwrap();
        assert!(!dir.path().join("meta").exists());
    }
}
