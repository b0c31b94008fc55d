pub mod schema;

pub use schema::{
    AttributeType, CaseIgnoreNormalizer, ExactMatchNormalizer, Normalizer, SchemaRegistry,
};
