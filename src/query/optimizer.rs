use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{EntryId, SearchScope};
use crate::query::ast::Filter;

/// Scan-count metadata the optimizer reads. Filter values must already be
/// in normalized form. Counts are estimates for planning only.
pub trait ScanCountView {
    fn total_count(&self) -> u64;
    fn one_level_count(&self, base: EntryId) -> u64;
    fn existence_count(&self, attr: &str) -> u64;
    /// Total records in the attribute's user index.
    fn index_count(&self, attr: &str) -> Result<u64>;
    fn index_count_for(&self, attr: &str, value: &str) -> Result<u64>;
    fn index_count_from(&self, attr: &str, value: &str) -> Result<u64>;
    fn index_count_to(&self, attr: &str, value: &str) -> Result<u64>;
}

/// A filter node annotated with its estimated candidate scan-count.
/// Leaves have no children; Not has exactly one.
#[derive(Debug, Clone)]
pub struct Annotated {
    pub count: u64,
    pub filter: Filter,
    pub children: Vec<Annotated>,
}

/// Post-order cost pass: attaches an estimated scan-count to every node so
/// the engine can pick the cheapest driving cursor for each conjunction.
/// Unindexed attributes in leaves are signaled, never silently worst-cased.
pub fn annotate(view: &dyn ScanCountView, filter: &Filter) -> Result<Annotated> {
    match filter {
        Filter::And(children) => {
            if children.is_empty() {
                return Err(empty_branch("And"));
            }
            let annotated = annotate_children(view, children)?;
            // A conjunction can never outgrow its most selective operand.
            let count = annotated.iter().map(|c| c.count).min().unwrap_or(0);
            Ok(Annotated {
                count,
                filter: filter.clone(),
                children: annotated,
            })
        }
        Filter::Or(children) => {
            if children.is_empty() {
                return Err(empty_branch("Or"));
            }
            let annotated = annotate_children(view, children)?;
            // Upper bound on the union size, overlap ignored.
            let count = annotated
                .iter()
                .fold(0u64, |acc, c| acc.saturating_add(c.count));
            Ok(Annotated {
                count,
                filter: filter.clone(),
                children: annotated,
            })
        }
        Filter::Not(child) => {
            let annotated = annotate(view, child)?;
            // Crude worst case, kept as-is: the child's raw index count for
            // a leaf, the whole partition for a branch.
            let count = if child.is_leaf() {
                leaf_full_count(view, child)?
            } else {
                view.total_count()
            };
            Ok(Annotated {
                count,
                filter: filter.clone(),
                children: vec![annotated],
            })
        }
        Filter::Scope { base, scope, .. } => {
            let count = match scope {
                SearchScope::Base => 1,
                SearchScope::OneLevel => view.one_level_count(*base),
                SearchScope::Subtree => view.total_count(),
            };
            Ok(leaf(count, filter))
        }
        Filter::Equality { attr, value } | Filter::Approximate { attr, value } => {
            Ok(leaf(view.index_count_for(attr, value)?, filter))
        }
        Filter::GreaterOrEqual { attr, value } => {
            Ok(leaf(view.index_count_from(attr, value)?, filter))
        }
        Filter::LessOrEqual { attr, value } => {
            Ok(leaf(view.index_count_to(attr, value)?, filter))
        }
        Filter::Presence { attr } => Ok(leaf(view.existence_count(attr), filter)),
        // No per-value selectivity is available; a full attribute-index
        // scan is the estimate.
        Filter::Substring { attr, .. } | Filter::Extensible { attr, .. } => {
            Ok(leaf(view.index_count(attr)?, filter))
        }
    }
}

fn annotate_children(view: &dyn ScanCountView, children: &[Filter]) -> Result<Vec<Annotated>> {
    children.iter().map(|c| annotate(view, c)).collect()
}

fn leaf(count: u64, filter: &Filter) -> Annotated {
    Annotated {
        count,
        filter: filter.clone(),
        children: Vec::new(),
    }
}

fn empty_branch(kind: &str) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("{} filter node has no children", kind),
    )
}

/// Full count of the index relevant to a negated leaf.
fn leaf_full_count(view: &dyn ScanCountView, child: &Filter) -> Result<u64> {
    match child {
        Filter::Presence { attr } => Ok(view.existence_count(attr)),
        Filter::Scope { .. } => Err(Error::new(
            ErrorKind::InvalidArgument,
            "negation over a scope node is not a valid filter".to_string(),
        )),
        _ => match child.attribute() {
            Some(attr) => view.index_count(attr),
            None => Ok(view.total_count()),
        },
    }
}
