//! Codebook
//!
//! Maps `(table, column, code)` to a human label, plus a description per
//! column. Loaded once at startup and read-only afterwards.

pub mod loader;
pub mod resolver;

pub use resolver::{CodeResolver, ColumnResolution, Resolution, ResolutionContext};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookEntry {
    pub description: String,
    /// Canonical code → label.
    pub codes: BTreeMap<String, String>,
}

impl CodebookEntry {
    /// Label for a raw code as the warehouse serialized it.
    pub fn label(&self, raw_code: &str) -> Option<&str> {
        self.codes.get(&canonical_code(raw_code)).map(String::as_str)
    }

    pub fn has_codes(&self) -> bool {
        !self.codes.is_empty()
    }
}

/// Table key (lower-case) → column key (upper-case) → entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codebook {
    tables: BTreeMap<String, BTreeMap<String, CodebookEntry>>,
}

impl Codebook {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn column_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Table keys in sorted order.
    pub fn tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn entry(&self, table: &str, column: &str) -> Option<&CodebookEntry> {
        self.tables
            .get(&table.trim().to_lowercase())
            .and_then(|cols| cols.get(&column.trim().to_uppercase()))
    }

    pub(crate) fn insert(&mut self, table: &str, column: &str, entry: CodebookEntry) {
        self.tables
            .entry(table.trim().to_lowercase())
            .or_default()
            .insert(column.trim().to_uppercase(), entry);
    }
}

/// Normalize a coded value for lookup: integral numbers lose any fractional
/// zeros (`"1.0"` → `"1"`); anything else is just trimmed.
pub fn canonical_code(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => trimmed.to_string(),
    }
}

/// Canonical code of a result cell.
pub fn canonical_cell(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(canonical_code(s)),
        serde_json::Value::Number(n) => Some(canonical_code(&n.to_string())),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
