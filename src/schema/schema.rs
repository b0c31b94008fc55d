use std::collections::HashMap;
use std::sync::Arc;

/// Computes the canonical form of an attribute value. Index keys and filter
/// values go through the same normalizer, so write and query time agree.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, value: &str) -> String;
}

/// Case-insensitive matching: trim, collapse inner whitespace, lowercase.
pub struct CaseIgnoreNormalizer;

impl Normalizer for CaseIgnoreNormalizer {
    fn normalize(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut pending_space = false;
        for c in value.trim().chars() {
            if c.is_whitespace() {
                pending_space = true;
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        }
        out
    }
}

/// Case-exact matching: trim only.
pub struct ExactMatchNormalizer;

impl Normalizer for ExactMatchNormalizer {
    fn normalize(&self, value: &str) -> String {
        value.trim().to_string()
    }
}

/// Per-attribute metadata the engine needs: how to normalize values and
/// whether the attribute holds a single value.
#[derive(Clone)]
pub struct AttributeType {
    pub name: String,
    pub single_valued: bool,
    pub normalizer: Arc<dyn Normalizer>,
}

impl AttributeType {
    pub fn new(name: &str, single_valued: bool, normalizer: Arc<dyn Normalizer>) -> Self {
        AttributeType {
            name: name.to_lowercase(),
            single_valued,
            normalizer,
        }
    }
}

/// Attribute-type lookup with a case-ignore default for anything not
/// explicitly registered.
pub struct SchemaRegistry {
    attributes: HashMap<String, AttributeType>,
    default_normalizer: Arc<dyn Normalizer>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry {
            attributes: HashMap::new(),
            default_normalizer: Arc::new(CaseIgnoreNormalizer),
        }
    }

    pub fn add_attribute(&mut self, attr: AttributeType) {
        self.attributes.insert(attr.name.clone(), attr);
    }

    pub fn with_attribute(mut self, attr: AttributeType) -> Self {
        self.add_attribute(attr);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attributes.get(&name.to_lowercase())
    }

    pub fn normalize(&self, attr: &str, value: &str) -> String {
        match self.attribute(attr) {
            Some(at) => at.normalizer.normalize(value),
            None => self.default_normalizer.normalize(value),
        }
    }

    pub fn is_single_valued(&self, attr: &str) -> bool {
        self.attribute(attr).map_or(false, |at| at.single_valued)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
