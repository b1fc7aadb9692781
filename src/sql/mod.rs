pub mod qualify;
pub mod sanitize;
pub mod tables;

pub use qualify::TableQualifier;
pub use sanitize::{is_blank_statement, sanitize_sql, strip_fences};
pub use tables::{referenced_tables, tables_in_statement};
