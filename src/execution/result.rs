//! Tabular results and execution outcomes

use crate::execution::classifier::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Rows returned by the warehouse, column names and order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    /// The empty table returned on unrecovered failures.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows as JSON objects keyed by column, in row order.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (column, value) in self.columns.iter().zip(row.iter()) {
                    obj.insert(column.clone(), value.clone());
                }
                serde_json::Value::Object(obj)
            })
            .collect();

        serde_json::json!({
            "rows": rows,
            "columns": self.columns,
        })
    }
}

/// Render a cell for display; integral floats lose their fractional part.
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::String(s) => trim_integral(s.trim()),
        serde_json::Value::Number(n) => trim_integral(&n.to_string()),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Numeric value of a cell, if it has one.
pub fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn trim_integral(text: &str) -> String {
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 && text.contains('.') => {
            format!("{}", f as i64)
        }
        _ => text.to_string(),
    }
}

/// Result of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(TabularResult),
    Failure {
        category: ErrorCategory,
        raw_message: String,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}
