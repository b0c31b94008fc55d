use serde::{Serialize, Deserialize};
use std::collections::HashMap;

/// Attribute holding an alias entry's target DN.
pub const ALIAS_ATTRIBUTE: &str = "aliasedobjectname";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    pub fn new(id: u64) -> Self {
        EntryId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for EntryId {
    fn from(id: u64) -> Self {
        EntryId(id)
    }
}

/// Canonical index key form: a normalized string for attribute indices,
/// an entry id for hierarchy and alias indices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexKey {
    Text(String),
    Id(EntryId),
}

impl IndexKey {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            IndexKey::Text(s) => Some(s),
            IndexKey::Id(_) => None,
        }
    }

    pub fn as_id(&self) -> Option<EntryId> {
        match self {
            IndexKey::Text(_) => None,
            IndexKey::Id(id) => Some(*id),
        }
    }
}

impl From<String> for IndexKey {
    fn from(s: String) -> Self {
        IndexKey::Text(s)
    }
}

impl From<EntryId> for IndexKey {
    fn from(id: EntryId) -> Self {
        IndexKey::Id(id)
    }
}

/// A single (key, entry-id) pair produced by an index scan. Cursors hand
/// callers an owned copy per next(), so records stay valid across advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: IndexKey,
    pub id: EntryId,
}

impl IndexRecord {
    pub fn new(key: impl Into<IndexKey>, id: EntryId) -> Self {
        IndexRecord {
            key: key.into(),
            id,
        }
    }
}

/// A stored entry's attributes. Attribute ids are lowercased on insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub attributes: HashMap<String, Vec<String>>,
}

impl Entry {
    pub fn new() -> Self {
        Entry {
            attributes: HashMap::new(),
        }
    }

    pub fn add_attribute(&mut self, name: &str, value: &str) {
        let values = self.attributes.entry(name.to_lowercase()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.add_attribute(name, value);
        self
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(&name.to_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes.get(&name.to_lowercase())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }

    pub fn is_alias(&self) -> bool {
        self.has_attribute(ALIAS_ATTRIBUTE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// Alias handling during search, mirroring the LDAP dereferencing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasDerefMode {
    /// Aliases are ordinary entries everywhere.
    Never,
    /// Dereference aliases met while searching, but not an alias base.
    Searching,
    /// Dereference only when resolving the search base.
    Finding,
    /// Dereference both the base and entries met while searching.
    Always,
}

impl AliasDerefMode {
    pub fn deref_in_searching(&self) -> bool {
        matches!(self, AliasDerefMode::Searching | AliasDerefMode::Always)
    }

    pub fn deref_while_finding(&self) -> bool {
        matches!(self, AliasDerefMode::Finding | AliasDerefMode::Always)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    Add,
    Replace,
    Remove,
}

/// One attribute change applied by BTreePartition::modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new(op: ModOp, attr: &str, values: &[&str]) -> Self {
        Modification {
            op,
            attr: attr.to_lowercase(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn add(attr: &str, values: &[&str]) -> Self {
        Modification::new(ModOp::Add, attr, values)
    }

    pub fn replace(attr: &str, values: &[&str]) -> Self {
        Modification::new(ModOp::Replace, attr, values)
    }

    pub fn remove(attr: &str, values: &[&str]) -> Self {
        Modification::new(ModOp::Remove, attr, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lowercases_attribute_ids() {
        let mut entry = Entry::new();
        entry.add_attribute("CN", "Alice");
        entry.add_attribute("cn", "Alice");
        assert_eq!(entry.get("Cn"), Some(&vec!["Alice".to_string()]));
        assert!(entry.has_attribute("cN"));
    }

    #[test]
    fn entry_alias_detection() {
        let entry = Entry::new().with_attribute("aliasedObjectName", "cn=x,dc=example,dc=com");
        assert!(entry.is_alias());
        assert!(!Entry::new().is_alias());
    }

    #[test]
    fn index_key_orders_ids_numerically() {
        assert!(IndexKey::Id(EntryId(2)) < IndexKey::Id(EntryId(10)));
    }
}
