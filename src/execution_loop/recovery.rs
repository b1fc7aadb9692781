//! Error Recovery
//!
//! Builds the corrective section added to the generation prompt after a
//! failed execution.

use crate::execution::ErrorCategory;
use serde::{Deserialize, Serialize};

/// What the next generation attempt is told about the previous failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryFeedback {
    pub category: ErrorCategory,
    /// The statement that was executed and failed.
    pub failed_sql: String,
    /// Driver error text, unmodified.
    pub raw_message: String,
}

/// Natural-language guidance for an error category.
pub fn guidance(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Syntax => {
            "The previous query had a SQL syntax error. Check keyword spelling, commas, parentheses and quoting, and return one complete statement."
        }
        ErrorCategory::MissingGrouping => {
            "The previous query selected a non-aggregated column without grouping it. Add EVERY non-aggregated SELECT column to GROUP BY."
        }
        ErrorCategory::TypeMismatch => {
            "The previous query compared or cast a column with the wrong type. Coded columns are numeric: compare them to numeric codes, never to quoted text."
        }
        ErrorCategory::UnknownTable => {
            "The previous query referenced a table that does not exist. Use ONLY the tables listed above, spelled exactly as shown."
        }
        ErrorCategory::Other => {
            "The previous query failed. Re-read the rules and the listed columns, and write a simpler query that answers the question."
        }
    }
}

impl RetryFeedback {
    pub fn render(&self) -> String {
        [
            format!(
                "PREVIOUS ATTEMPT FAILED (error category: {}).",
                self.category
            ),
            format!("Failed SQL: {}", self.failed_sql),
            format!("Error: {}", self.raw_message),
            format!("How to fix: {}", guidance(self.category)),
            "Generate a corrected query that follows every rule above.".to_string(),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_embeds_category_and_guidance() {
        let feedback = RetryFeedback {
            category: ErrorCategory::TypeMismatch,
            failed_sql: "SELECT * FROM t WHERE WEATHER = 'RAIN';".to_string(),
            raw_message: "[CAST_INVALID_INPUT] 'RAIN' cannot be cast".to_string(),
        };
        let text = feedback.render();
        assert!(text.contains("error category: type-mismatch"));
        assert!(text.contains("never to quoted text"));
        assert!(text.contains("WEATHER = 'RAIN'"));
        assert!(text.contains("[CAST_INVALID_INPUT]"));
    }

    #[test]
    fn test_every_category_has_distinct_guidance() {
        let all = [
            ErrorCategory::Syntax,
            ErrorCategory::MissingGrouping,
            ErrorCategory::TypeMismatch,
            ErrorCategory::UnknownTable,
            ErrorCategory::Other,
        ];
        let texts: std::collections::HashSet<_> = all.iter().map(|c| guidance(*c)).collect();
        assert_eq!(texts.len(), all.len());
    }
}
