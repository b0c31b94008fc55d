use serde::{Serialize, Deserialize};
use crate::core::types::{AliasDerefMode, EntryId, SearchScope};

/// Pre-parsed boolean filter expression tree. The wire-level filter syntax
/// is parsed elsewhere; this crate only consumes the tree.
///
/// Scope nodes are injected by the search engine to fold the candidate
/// universe into the same annotate/build machinery as the user filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Scope {
        base: EntryId,
        scope: SearchScope,
        deref: AliasDerefMode,
    },
    Equality {
        attr: String,
        value: String,
    },
    Approximate {
        attr: String,
        value: String,
    },
    GreaterOrEqual {
        attr: String,
        value: String,
    },
    LessOrEqual {
        attr: String,
        value: String,
    },
    Presence {
        attr: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        final_part: Option<String>,
    },
    Extensible {
        attr: String,
        value: String,
    },
}

impl Filter {
    pub fn eq(attr: &str, value: &str) -> Self {
        Filter::Equality {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    pub fn approx(attr: &str, value: &str) -> Self {
        Filter::Approximate {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    pub fn ge(attr: &str, value: &str) -> Self {
        Filter::GreaterOrEqual {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    pub fn le(attr: &str, value: &str) -> Self {
        Filter::LessOrEqual {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    pub fn present(attr: &str) -> Self {
        Filter::Presence {
            attr: attr.to_string(),
        }
    }

    pub fn substring(attr: &str, initial: Option<&str>, any: &[&str], final_part: Option<&str>) -> Self {
        Filter::Substring {
            attr: attr.to_string(),
            initial: initial.map(str::to_string),
            any: any.iter().map(|s| s.to_string()).collect(),
            final_part: final_part.map(str::to_string),
        }
    }

    pub fn extensible(attr: &str, value: &str) -> Self {
        Filter::Extensible {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Or(children)
    }

    pub fn not(child: Filter) -> Self {
        Filter::Not(Box::new(child))
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Filter::And(_) | Filter::Or(_) | Filter::Not(_))
    }

    /// The attribute a leaf constrains; None for branches and scope nodes.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Filter::Equality { attr, .. }
            | Filter::Approximate { attr, .. }
            | Filter::GreaterOrEqual { attr, .. }
            | Filter::LessOrEqual { attr, .. }
            | Filter::Presence { attr }
            | Filter::Substring { attr, .. }
            | Filter::Extensible { attr, .. } => Some(attr),
            _ => None,
        }
    }
}
