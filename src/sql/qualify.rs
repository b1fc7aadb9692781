//! Table Qualifier
//!
//! Rewrites bare table names to their fully-qualified form. An occurrence is
//! left alone when it is already preceded by a `.` (already qualified) or is
//! part of a longer identifier.

use crate::error::{QueryError, Result};
use crate::schema::SchemaCatalog;
use regex::Regex;

struct TableRewrite {
    pattern: Regex,
    qualified: String,
}

/// Qualifier compiled once from the catalog's table names.
pub struct TableQualifier {
    rewrites: Vec<TableRewrite>,
}

impl TableQualifier {
    pub fn new(pairs: &[(String, String)]) -> Result<Self> {
        let rewrites = pairs
            .iter()
            .map(|(short, qualified)| {
                let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(short)))
                    .map_err(|e| QueryError::Catalog(format!("bad table name '{}': {}", short, e)))?;
                Ok(TableRewrite {
                    pattern,
                    qualified: qualified.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rewrites })
    }

    pub fn from_catalog(catalog: &SchemaCatalog) -> Result<Self> {
        Self::new(&catalog.qualified_names())
    }

    /// Qualify every bare occurrence of every known table. Idempotent.
    pub fn qualify(&self, sql: &str) -> String {
        let mut out = sql.to_string();
        for rewrite in &self.rewrites {
            out = rewrite.apply(&out);
        }
        out
    }
}

impl TableRewrite {
    fn apply(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for m in self.pattern.find_iter(sql) {
            if is_qualified_or_embedded(sql, m.start(), m.end()) {
                continue;
            }
            out.push_str(&sql[last..m.start()]);
            out.push_str(&self.qualified);
            last = m.end();
        }
        out.push_str(&sql[last..]);
        out
    }
}

/// `\b` treats `$` as a boundary, so check the neighbouring characters directly.
fn is_qualified_or_embedded(sql: &str, start: usize, end: usize) -> bool {
    let before = sql[..start].chars().next_back();
    let after = sql[end..].chars().next();
    matches!(before, Some('.') | Some('$'))
        || matches!(after, Some('$'))
        || before.map_or(false, |c| c.is_alphanumeric() || c == '_')
        || after.map_or(false, |c| c.is_alphanumeric() || c == '_')
}
