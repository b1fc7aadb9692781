//! Schema prompt builder
//!
//! Renders the rule-bearing block that constrains SQL generation. Output is
//! a pure function of the catalog and the requested tables, so a retry sees
//! byte-identical schema text.

use crate::error::{QueryError, Result};
use crate::schema::catalog::SchemaCatalog;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A single generation constraint placed in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationRule {
    /// Only the listed tables and columns may appear in the statement.
    ListedOnly,
    /// Column names must never be guessed.
    NoInventedColumns,
    /// Functions must match a column's numeric/textual kind.
    RespectColumnKinds,
    /// Columns from several tables force a join on the join key.
    JoinOnKey,
    /// Totals use a null-safe sum.
    NullSafeSum,
    /// Every non-aggregated selected column is grouped.
    GroupNonAggregated,
    /// Coded columns are filtered by numeric code, never by text.
    NumericCodesOnly,
}

impl GenerationRule {
    pub const ALL: [GenerationRule; 7] = [
        GenerationRule::ListedOnly,
        GenerationRule::NoInventedColumns,
        GenerationRule::RespectColumnKinds,
        GenerationRule::JoinOnKey,
        GenerationRule::NullSafeSum,
        GenerationRule::GroupNonAggregated,
        GenerationRule::NumericCodesOnly,
    ];

    fn render(&self, join_key: &str) -> String {
        match self {
            GenerationRule::ListedOnly => {
                "ONLY use the tables and columns listed below. NEVER reference tables that are not listed.".to_string()
            }
            GenerationRule::NoInventedColumns => "NEVER guess or invent column names.".to_string(),
            GenerationRule::RespectColumnKinds => {
                "NEVER apply SQL functions to columns unless their type supports it. Numeric columns must never be quoted.".to_string()
            }
            GenerationRule::JoinOnKey => format!(
                "If a question requires columns from multiple tables, ALWAYS join them using `ON t1.{key} = t2.{key}`. {key} exists in every table and is ALWAYS the join key.",
                key = join_key
            ),
            GenerationRule::NullSafeSum => {
                "Prefer SUM() when a question asks for totals of numeric fields, written as `SUM(COALESCE(column, 0))`.".to_string()
            }
            GenerationRule::GroupNonAggregated => {
                "IMPERATIVE GROUP BY: every column in the SELECT clause that is NOT aggregated (SUM, COUNT, AVG, MIN, MAX) MUST appear in GROUP BY.".to_string()
            }
            GenerationRule::NumericCodesOnly => {
                "NEVER use string literals like 'DRIVER' or 'RAIN' in WHERE clauses on coded columns. Use only numeric codes (e.g. `PER_TYP = 1`).".to_string()
            }
        }
    }
}

/// Renders the schema/constraint block for a fixed rule set.
#[derive(Debug, Clone)]
pub struct SchemaPromptBuilder {
    rules: Vec<GenerationRule>,
}

impl Default for SchemaPromptBuilder {
    fn default() -> Self {
        Self {
            rules: GenerationRule::ALL.to_vec(),
        }
    }
}

impl SchemaPromptBuilder {
    pub fn with_rules(rules: Vec<GenerationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[GenerationRule] {
        &self.rules
    }

    /// Render the block for every table in the catalog.
    pub fn render_all(&self, catalog: &SchemaCatalog) -> String {
        let names = catalog.table_names();
        // Names come from the catalog itself so the lookup cannot miss.
        self.render(catalog, &names).unwrap_or_default()
    }

    /// Render the block for the given tables, in the order given.
    pub fn render(&self, catalog: &SchemaCatalog, tables: &[&str]) -> Result<String> {
        let mut parts = Vec::new();

        parts.push("You are an expert SQL generator for a Databricks SQL database.".to_string());
        parts.push("You MUST follow all the rules below:".to_string());
        parts.push(String::new());
        parts.push("Rules:".to_string());
        for (i, rule) in self.rules.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, rule.render(catalog.join_key())));
        }
        parts.push(format!(
            "{}. Output ONLY the SQL query. No comments. No markdown.",
            self.rules.len() + 1
        ));

        parts.push(String::new());
        parts.push("Available Tables and Columns:".to_string());
        for name in tables {
            let table = catalog.table(name).ok_or_else(|| {
                QueryError::Catalog(format!("table '{}' is not in the catalog", name))
            })?;
            parts.push(format!(
                "- {} (Join Key: {}):",
                catalog.qualified_name(&table.name),
                catalog.join_key()
            ));
            parts.push(format!("  All Columns: {}", table.columns.iter().join(", ")));

            let numeric = table.numeric_columns().join(", ");
            if !numeric.is_empty() {
                parts.push(format!("  Numeric Columns (Use for math/comparison): {}", numeric));
            }
            if !table.textual_columns.is_empty() {
                parts.push(format!(
                    "  String Columns (May need quotes): {}",
                    table.textual_columns.iter().join(", ")
                ));
            }
        }

        parts.push(String::new());
        parts.push(FINAL_INSTRUCTION.to_string());

        Ok(parts.join("\n"))
    }
}

pub const FINAL_INSTRUCTION: &str = "Final Instruction: Write ONLY one valid Databricks SQL query, starting with SELECT or WITH, and ending with a semicolon, with NO markdown formatting.";
