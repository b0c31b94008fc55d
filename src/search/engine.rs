use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{AliasDerefMode, EntryId, IndexRecord, SearchScope};
use crate::cursor::{Assertion, Cursor, DisjunctionCursor, IndexCursor, PrefetchCursor};
use crate::partition::btree_partition::PartitionInner;
use crate::partition::dn;
use crate::query::ast::Filter;
use crate::query::matcher::{substring_regex, FilterMatcher};
use crate::query::optimizer::{annotate, Annotated};
use crate::schema::SchemaRegistry;

/// Turns a search request into a candidate cursor: resolves the base DN,
/// normalizes the filter, folds the scope into the filter tree, annotates
/// every node with a scan-count estimate, and builds cursors bottom-up
/// with the cheapest operand driving each conjunction.
pub struct SearchEngine {
    inner: Arc<RwLock<PartitionInner>>,
    schema: Arc<SchemaRegistry>,
}

impl SearchEngine {
    pub fn new(inner: Arc<RwLock<PartitionInner>>, schema: Arc<SchemaRegistry>) -> Self {
        SearchEngine { inner, schema }
    }

    pub fn search(
        &self,
        base_dn: &str,
        scope: SearchScope,
        deref: AliasDerefMode,
        filter: &Filter,
    ) -> Result<Box<dyn Cursor>> {
        let guard = self.inner.read();
        guard.check_open()?;
        let base = self.resolve_base(&guard, base_dn, deref)?;
        let normalized = self.normalize_filter(filter);
        let wrapped = Filter::And(vec![
            Filter::Scope { base, scope, deref },
            normalized,
        ]);
        let annotated = annotate(&*guard, &wrapped)?;
        log::debug!(
            "search base='{}' scope={:?} deref={:?}: estimated {} candidates",
            base_dn,
            scope,
            deref,
            annotated.count
        );
        self.build(&guard, &annotated)
    }

    /// Normalize the base DN and look it up. In Finding/Always modes an
    /// alias base is followed to its target, with a visited set guarding
    /// against alias loops.
    fn resolve_base(
        &self,
        inner: &PartitionInner,
        base_dn: &str,
        deref: AliasDerefMode,
    ) -> Result<EntryId> {
        let ndn = dn::normalize_dn(&self.schema, base_dn)?;
        let mut id = inner
            .resolve_ndn(&ndn)
            .ok_or_else(|| Error::no_such_object(&ndn))?;
        if !deref.deref_while_finding() {
            return Ok(id);
        }
        let mut visited = HashSet::new();
        while inner.is_alias(id) {
            if !visited.insert(id) {
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    format!("alias loop while resolving '{}'", ndn),
                ));
            }
            id = inner
                .alias_target_id(id)
                .ok_or_else(|| Error::no_such_object(&ndn))?;
        }
        Ok(id)
    }

    /// Lowercase attribute ids and push every value through the same
    /// normalizers the write path used, so filter values compare equal to
    /// index keys.
    fn normalize_filter(&self, filter: &Filter) -> Filter {
        let norm = |attr: &str, value: &str| self.schema.normalize(attr, value);
        match filter {
            Filter::And(children) => {
                Filter::And(children.iter().map(|c| self.normalize_filter(c)).collect())
            }
            Filter::Or(children) => {
                Filter::Or(children.iter().map(|c| self.normalize_filter(c)).collect())
            }
            Filter::Not(child) => Filter::Not(Box::new(self.normalize_filter(child))),
            Filter::Scope { .. } => filter.clone(),
            Filter::Equality { attr, value } => Filter::Equality {
                attr: attr.to_lowercase(),
                value: norm(attr, value),
            },
            Filter::Approximate { attr, value } => Filter::Approximate {
                attr: attr.to_lowercase(),
                value: norm(attr, value),
            },
            Filter::GreaterOrEqual { attr, value } => Filter::GreaterOrEqual {
                attr: attr.to_lowercase(),
                value: norm(attr, value),
            },
            Filter::LessOrEqual { attr, value } => Filter::LessOrEqual {
                attr: attr.to_lowercase(),
                value: norm(attr, value),
            },
            Filter::Presence { attr } => Filter::Presence {
                attr: attr.to_lowercase(),
            },
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => Filter::Substring {
                attr: attr.to_lowercase(),
                initial: initial.as_deref().map(|f| norm(attr, f)),
                any: any.iter().map(|f| norm(attr, f)).collect(),
                final_part: final_part.as_deref().map(|f| norm(attr, f)),
            },
            Filter::Extensible { attr, value } => Filter::Extensible {
                attr: attr.to_lowercase(),
                value: norm(attr, value),
            },
        }
    }

    fn matcher(&self) -> FilterMatcher {
        FilterMatcher::new(self.inner.clone(), self.schema.clone())
    }

    fn build(&self, inner: &PartitionInner, node: &Annotated) -> Result<Box<dyn Cursor>> {
        match &node.filter {
            Filter::And(_) => self.build_and(inner, node),
            Filter::Or(_) => {
                let children: Result<Vec<Box<dyn Cursor>>> = node
                    .children
                    .iter()
                    .map(|c| self.build(inner, c))
                    .collect();
                Ok(Box::new(DisjunctionCursor::new(children?)?))
            }
            Filter::Not(child) => {
                // Negation scans the whole candidate universe behind the
                // inverted child assertion.
                let matcher = self.matcher();
                let child = (**child).clone();
                let assertion: Box<dyn Assertion> =
                    Box::new(move |record: &IndexRecord| Ok(!matcher.matches(&child, record.id)?));
                let universe = Box::new(IndexCursor::new(inner.master_records()));
                Ok(Box::new(PrefetchCursor::new(universe, assertion, false)?))
            }
            Filter::Scope { base, scope, deref } => Ok(Box::new(IndexCursor::new(
                scope_records(inner, *base, *scope, deref.deref_in_searching()),
            ))),
            Filter::Equality { attr, value } | Filter::Approximate { attr, value } => {
                let records = inner.user_index(attr)?.records_for_key(value);
                Ok(Box::new(IndexCursor::new(records)))
            }
            Filter::Presence { attr } => {
                Ok(Box::new(IndexCursor::new(inner.existence_records(attr))))
            }
            Filter::GreaterOrEqual { attr, value } => {
                self.range_cursor(inner.user_index(attr)?.records_from(value))
            }
            Filter::LessOrEqual { attr, value } => {
                self.range_cursor(inner.user_index(attr)?.records_to(value))
            }
            Filter::Substring {
                attr,
                initial,
                any,
                final_part,
            } => {
                let regex = substring_regex(initial.as_deref(), any, final_part.as_deref())?;
                let assertion: Box<dyn Assertion> = Box::new(move |record: &IndexRecord| {
                    Ok(record.key.as_text().is_some_and(|key| regex.is_match(key)))
                });
                let scan = Box::new(IndexCursor::new(inner.user_index(attr)?.records()));
                Ok(Box::new(PrefetchCursor::new(scan, assertion, true)?))
            }
            Filter::Extensible { attr, value } => {
                let value = value.clone();
                let assertion: Box<dyn Assertion> = Box::new(move |record: &IndexRecord| {
                    Ok(record.key.as_text() == Some(value.as_str()))
                });
                let scan = Box::new(IndexCursor::new(inner.user_index(attr)?.records()));
                Ok(Box::new(PrefetchCursor::new(scan, assertion, true)?))
            }
        }
    }

    /// The cheapest child drives; the rest collapse into one assertion
    /// evaluated per candidate.
    fn build_and(&self, inner: &PartitionInner, node: &Annotated) -> Result<Box<dyn Cursor>> {
        if node.children.len() == 1 {
            return self.build(inner, &node.children[0]);
        }
        let driving = node
            .children
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.count)
            .map(|(i, _)| i)
            .expect("non-empty conjunction");
        let cursor = self.build(inner, &node.children[driving])?;
        let residual: Vec<Filter> = node
            .children
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != driving)
            .map(|(_, c)| c.filter.clone())
            .collect();
        let matcher = self.matcher();
        let assertion: Box<dyn Assertion> = Box::new(move |record: &IndexRecord| {
            for filter in &residual {
                if !matcher.matches(filter, record.id)? {
                    return Ok(false);
                }
            }
            Ok(true)
        });
        Ok(Box::new(PrefetchCursor::new(cursor, assertion, false)?))
    }

    /// Range scans can surface one id under several keys; wrap the snapshot
    /// in a dedupe pass.
    fn range_cursor(&self, records: Vec<IndexRecord>) -> Result<Box<dyn Cursor>> {
        let scan = Box::new(IndexCursor::new(records));
        Ok(Box::new(PrefetchCursor::new(
            scan,
            Box::new(crate::cursor::AcceptAll),
            true,
        )?))
    }
}

/// Materialize the candidate ids a scope node stands for. With alias
/// dereferencing active in searching, alias entries drop out and their
/// resolved targets come in (deduplicated, first-seen order).
fn scope_records(
    inner: &PartitionInner,
    base: EntryId,
    scope: SearchScope,
    deref: bool,
) -> Vec<IndexRecord> {
    let members = match scope {
        SearchScope::Base => return vec![IndexRecord::new(base, base)],
        SearchScope::OneLevel => inner.one_level_children(base),
        SearchScope::Subtree => inner.sub_level_members(base),
    };
    if !deref {
        return members
            .into_iter()
            .map(|id| IndexRecord::new(id, id))
            .collect();
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in members {
        if !inner.is_alias(id) && seen.insert(id) {
            out.push(IndexRecord::new(id, id));
        }
    }
    let aliases = match scope {
        SearchScope::OneLevel => inner.one_alias_entries(base),
        SearchScope::Subtree => inner.sub_alias_entries(base),
        SearchScope::Base => Vec::new(),
    };
    for alias_id in aliases {
        if let Some(target) = inner.alias_target_id(alias_id) {
            if seen.insert(target) {
                out.push(IndexRecord::new(target, target));
            }
        }
    }
    out
}
