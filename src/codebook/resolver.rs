//! Code Resolver
//!
//! Decides, for each result column, where its labels come from: a codebook
//! entry of a table the statement reads, a codebook entry of any table, a
//! generic "calculated value" for aggregates, or nothing.

use crate::codebook::{canonical_cell, Codebook, CodebookEntry};
use crate::execution::{display_value, TabularResult};
use crate::sql::referenced_tables;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const NOT_REPORTED: &str = "not reported in metadata";
pub const CALCULATED_VALUE: &str = "calculated value";

lazy_static! {
    /// Tokens that mark an alias as computed (`total_fatalities`, `crash_count`).
    static ref AGGREGATE_TOKEN: Regex =
        Regex::new(r"(?i)(?:^|[^a-z0-9])(sum|count|cnt|avg|average|mean|total|min|max|num)(?:[^a-z0-9]|$)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Found in the codebook under `table`.
    Coded { table: String, entry: CodebookEntry },
    /// Computed column; labeled generically.
    Aggregate,
    /// No codebook entry and no aggregate signature.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnResolution {
    pub column: String,
    pub resolution: Resolution,
}

impl ColumnResolution {
    /// Codebook entry with at least one code, i.e. a coded dimension.
    pub fn coded_entry(&self) -> Option<&CodebookEntry> {
        match &self.resolution {
            Resolution::Coded { entry, .. } if entry.has_codes() => Some(entry),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.resolution, Resolution::Aggregate)
    }

    pub fn description(&self) -> String {
        match &self.resolution {
            Resolution::Coded { entry, .. } => entry.description.clone(),
            Resolution::Aggregate => CALCULATED_VALUE.to_string(),
            Resolution::Unresolved => NOT_REPORTED.to_string(),
        }
    }
}

/// A cell rendered for display: the raw value and, for coded columns, its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCell {
    pub column: String,
    pub raw: String,
    pub label: Option<String>,
    /// Set when the code could not be labeled.
    pub not_reported: bool,
}

impl ResolvedCell {
    /// `label`, or the raw code with the not-reported qualifier.
    pub fn display(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None if self.not_reported => format!("{} ({})", self.raw, NOT_REPORTED),
            None => self.raw.clone(),
        }
    }
}

/// Per-query mapping from result columns to their resolution, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionContext {
    pub columns: Vec<ColumnResolution>,
}

impl ResolutionContext {
    pub fn get(&self, column: &str) -> Option<&ColumnResolution> {
        self.columns.iter().find(|c| c.column == column)
    }

    /// Resolve one row. Only that row's cells are read.
    pub fn resolve_row(&self, row: &[serde_json::Value]) -> Vec<ResolvedCell> {
        self.columns
            .iter()
            .zip(row.iter())
            .map(|(col, value)| {
                let raw = display_value(value);
                let (label, not_reported) = match &col.resolution {
                    Resolution::Coded { entry, .. } if entry.has_codes() => {
                        let label = canonical_cell(value)
                            .and_then(|code| entry.codes.get(&code).cloned());
                        let missing = label.is_none();
                        (label, missing)
                    }
                    Resolution::Coded { .. } | Resolution::Aggregate => (None, false),
                    Resolution::Unresolved => (None, true),
                };
                ResolvedCell {
                    column: col.column.clone(),
                    raw,
                    label,
                    not_reported,
                }
            })
            .collect()
    }
}

pub struct CodeResolver {
    codebook: Arc<Codebook>,
}

impl CodeResolver {
    pub fn new(codebook: Arc<Codebook>) -> Self {
        Self { codebook }
    }

    /// Build the context for a successful result of `sql`.
    pub fn resolve(&self, sql: &str, result: &TabularResult) -> ResolutionContext {
        let all_tables = self.codebook.tables();
        let detected = referenced_tables(sql, &all_tables);
        debug!("Codebook tables referenced by statement: {:?}", detected);

        let columns = result
            .columns
            .iter()
            .map(|column| ColumnResolution {
                column: column.clone(),
                resolution: self.resolve_column(column, &detected, &all_tables),
            })
            .collect();

        ResolutionContext { columns }
    }

    fn resolve_column(&self, column: &str, detected: &[String], all_tables: &[&str]) -> Resolution {
        // Function-call headers like `sum(coalesce(FATALS, 0))` are never codebook columns.
        if column.contains('(') {
            return Resolution::Aggregate;
        }

        let key = bare_column(column);
        let search = detected
            .iter()
            .map(String::as_str)
            .chain(all_tables.iter().copied().filter(|t| !detected.iter().any(|d| d == t)));
        for table in search {
            if let Some(entry) = self.codebook.entry(table, key) {
                return Resolution::Coded {
                    table: table.to_string(),
                    entry: entry.clone(),
                };
            }
        }

        if AGGREGATE_TOKEN.is_match(key) {
            Resolution::Aggregate
        } else {
            Resolution::Unresolved
        }
    }
}

/// Column name without any `alias.` prefix or quoting.
fn bare_column(column: &str) -> &str {
    let column = column.rsplit('.').next().unwrap_or(column);
    column.trim_matches(|c| c == '`' || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codebook() -> Arc<Codebook> {
        let csv = "\
file,name_ncsa,value,value_label,definition
accident,WEATHER,3,Sleet or Hail,Atmospheric conditions
accident,WEATHER,8,Other,
accident,STATE,51,Virginia,State
person,STATE,51,Virginia (person file),State
person,PER_TYP,1,Driver,Person type
accident,FATALS,,,Number of fatalities
";
        Arc::new(Codebook::from_csv_reader(csv.as_bytes()).unwrap())
    }

    fn result(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_detected_table_wins() {
        let resolver = CodeResolver::new(codebook());
        let sql = "SELECT STATE, COUNT(*) AS n FROM workspace.fars_database.person_master GROUP BY STATE;";
        let ctx = resolver.resolve(sql, &result(&["STATE", "n"], vec![]));
        match &ctx.get("STATE").unwrap().resolution {
            Resolution::Coded { table, .. } => assert_eq!(table, "person"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_falls_back_to_all_tables() {
        let resolver = CodeResolver::new(codebook());
        let sql = "SELECT PER_TYP FROM workspace.fars_database.accident_master;";
        let ctx = resolver.resolve(sql, &result(&["PER_TYP"], vec![]));
        match &ctx.get("PER_TYP").unwrap().resolution {
            Resolution::Coded { table, .. } => assert_eq!(table, "person"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_columns() {
        let resolver = CodeResolver::new(codebook());
        let ctx = resolver.resolve(
            "SELECT 1;",
            &result(&["sum(coalesce(FATALS, 0))", "total_fatalities", "crash_count"], vec![]),
        );
        assert!(ctx.columns.iter().all(|c| c.is_aggregate()));
        assert_eq!(ctx.columns[0].description(), CALCULATED_VALUE);
    }

    #[test]
    fn test_raw_columns_are_not_aggregates() {
        let resolver = CodeResolver::new(Arc::new(Codebook::empty()));
        let ctx = resolver.resolve("SELECT 1;", &result(&["COUNTY", "HOUR", "NUMBER_OF_LANES"], vec![]));
        assert!(ctx.columns.iter().all(|c| c.resolution == Resolution::Unresolved));
    }

    #[test]
    fn test_rows_resolved_independently() {
        let resolver = CodeResolver::new(codebook());
        let data = result(
            &["WEATHER", "FATALS"],
            vec![vec![json!("3"), json!("1")], vec![json!("8.0"), json!("1")]],
        );
        let ctx = resolver.resolve("SELECT WEATHER, SUM(FATALS) AS FATALS FROM accident_master GROUP BY WEATHER;", &data);

        let first = ctx.resolve_row(&data.rows[0]);
        let second = ctx.resolve_row(&data.rows[1]);
        assert_eq!(first[0].display(), "Sleet or Hail");
        assert_eq!(second[0].display(), "Other");
        assert_eq!(first[1].display(), "1");
        assert!(!first[1].not_reported);
    }

    #[test]
    fn test_unknown_code_marked_not_reported() {
        let resolver = CodeResolver::new(codebook());
        let data = result(&["WEATHER"], vec![vec![json!(98)]]);
        let ctx = resolver.resolve("SELECT WEATHER FROM accident_master;", &data);
        let cells = ctx.resolve_row(&data.rows[0]);
        assert_eq!(cells[0].display(), "98 (not reported in metadata)");
    }

    #[test]
    fn test_empty_codebook_leaves_columns_unresolved() {
        let resolver = CodeResolver::new(Arc::new(Codebook::empty()));
        let data = result(&["WEATHER"], vec![vec![json!("3")]]);
        let ctx = resolver.resolve("SELECT WEATHER FROM accident_master;", &data);
        assert_eq!(ctx.columns[0].resolution, Resolution::Unresolved);
        assert_eq!(ctx.resolve_row(&data.rows[0])[0].display(), "3 (not reported in metadata)");
    }

    #[test]
    fn test_qualified_column_header() {
        assert_eq!(bare_column("a.WEATHER"), "WEATHER");
        assert_eq!(bare_column("`WEATHER`"), "WEATHER");
    }
}
