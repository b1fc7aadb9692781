pub mod catalog;
pub mod prompt;

pub use catalog::{SchemaCatalog, TableSchema, FARS_JOIN_KEY};
pub use prompt::{GenerationRule, SchemaPromptBuilder};
