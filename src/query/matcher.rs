use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{EntryId, SearchScope};
use crate::partition::btree_partition::PartitionInner;
use crate::query::ast::Filter;
use crate::schema::SchemaRegistry;

/// Compile the fragments of a substring filter into an anchored regex.
/// Fragments are escaped literally, so regex metacharacters in values
/// cannot change the match. A filter with no fragment text at all would
/// match every value and is rejected as malformed.
pub(crate) fn substring_regex(
    initial: Option<&str>,
    any: &[String],
    final_part: Option<&str>,
) -> Result<Regex> {
    let no_text = initial.is_none_or(str::is_empty)
        && any.iter().all(|s| s.is_empty())
        && final_part.is_none_or(str::is_empty);
    if no_text {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "substring filter without any fragment text".to_string(),
        ));
    }
    let mut pattern = String::from("^");
    if let Some(init) = initial {
        pattern.push_str(&regex::escape(init));
    }
    for part in any {
        pattern.push_str(".*");
        pattern.push_str(&regex::escape(part));
    }
    pattern.push_str(".*");
    if let Some(fin) = final_part {
        pattern.push_str(&regex::escape(fin));
    }
    pattern.push('$');
    Ok(Regex::new(&pattern)?)
}

/// Evaluates a normalized filter tree against live entries. Used for the
/// residual operands of a conjunction and for negation, where an index
/// scan alone cannot decide membership.
///
/// Each call takes a short read lock; the matcher sees the store as it is
/// at evaluation time, not as it was when the enclosing cursor was built.
#[derive(Clone)]
pub struct FilterMatcher {
    inner: Arc<RwLock<PartitionInner>>,
    schema: Arc<SchemaRegistry>,
}

impl FilterMatcher {
    pub fn new(inner: Arc<RwLock<PartitionInner>>, schema: Arc<SchemaRegistry>) -> Self {
        FilterMatcher { inner, schema }
    }

    /// Does the entry with the given id satisfy the filter? Filter values
    /// must already be normalized; entry values are normalized here.
    pub fn matches(&self, filter: &Filter, id: EntryId) -> Result<bool> {
        // Recursive acquisition: cursor construction primes assertions while
        // the engine already holds the read lock on this thread.
        let guard = self.inner.read_recursive();
        self.eval(&guard, filter, id)
    }

    fn eval(&self, inner: &PartitionInner, filter: &Filter, id: EntryId) -> Result<bool> {
        match filter {
            Filter::And(children) => {
                for child in children {
                    if !self.eval(inner, child, id)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(children) => {
                for child in children {
                    if self.eval(inner, child, id)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(child) => Ok(!self.eval(inner, child, id)?),
            Filter::Scope { base, scope, deref } => {
                Ok(scope_contains(inner, *base, *scope, deref.deref_in_searching(), id))
            }
            Filter::Equality { attr, value }
            | Filter::Approximate { attr, value }
            | Filter::Extensible { attr, value } => {
                self.any_value(inner, id, attr, |v| v == value)
            }
            Filter::GreaterOrEqual { attr, value } => {
                self.any_value(inner, id, attr, |v| v >= value.as_str())
            }
            Filter::LessOrEqual { attr, value } => {
                self.any_value(inner, id, attr, |v| v <= value.as_str())
            }
            Filter::Presence { attr } => match inner.stored(id) {
                Some(stored) => Ok(stored.entry.has_attribute(attr)),
                None => Ok(false),
            },
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => {
                let regex = substring_regex(initial.as_deref(), any, final_part.as_deref())?;
                self.any_value(inner, id, attr, |v| regex.is_match(v))
            }
        }
    }

    /// True when any of the entry's normalized values for attr satisfies
    /// the predicate. A candidate deleted since the cursor was built has no
    /// values left, so it stops asserting rather than erroring.
    fn any_value(
        &self,
        inner: &PartitionInner,
        id: EntryId,
        attr: &str,
        pred: impl Fn(&str) -> bool,
    ) -> Result<bool> {
        let stored = match inner.stored(id) {
            Some(stored) => stored,
            None => return Ok(false),
        };
        let values = match stored.entry.get(attr) {
            Some(values) => values,
            None => return Ok(false),
        };
        Ok(values
            .iter()
            .any(|v| pred(&self.schema.normalize(attr, v))))
    }
}

/// Scope membership, mirroring the engine's scope cursors: with alias
/// dereferencing on, alias entries fall out of scope and their resolved
/// targets come in.
pub(crate) fn scope_contains(
    inner: &PartitionInner,
    base: EntryId,
    scope: SearchScope,
    deref: bool,
    id: EntryId,
) -> bool {
    match scope {
        SearchScope::Base => id == base,
        SearchScope::OneLevel => {
            if inner.one_level_contains(base, id) {
                !(deref && inner.is_alias(id))
            } else {
                deref && inner.one_alias_contains(base, id)
            }
        }
        SearchScope::Subtree => {
            if inner.sub_level_contains(base, id) {
                !(deref && inner.is_alias(id))
            } else {
                deref && inner.sub_alias_contains(base, id)
            }
        }
    }
}
