//! Error Classifier
//!
//! Maps raw warehouse error text onto a closed set of categories the retry
//! loop can give targeted guidance for.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Syntax,
    MissingGrouping,
    TypeMismatch,
    UnknownTable,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "syntax"),
            ErrorCategory::MissingGrouping => write!(f, "missing-grouping"),
            ErrorCategory::TypeMismatch => write!(f, "type-mismatch"),
            ErrorCategory::UnknownTable => write!(f, "unknown-table"),
            ErrorCategory::Other => write!(f, "other"),
        }
    }
}

impl ErrorCategory {
    /// Wrap a raw message in the matching error variant.
    pub fn into_error(self, message: impl Into<String>) -> QueryError {
        let message = message.into();
        match self {
            ErrorCategory::Syntax => QueryError::Syntax(message),
            ErrorCategory::MissingGrouping => QueryError::MissingGrouping(message),
            ErrorCategory::TypeMismatch => QueryError::TypeMismatch(message),
            ErrorCategory::UnknownTable => QueryError::UnknownTable(message),
            ErrorCategory::Other => QueryError::Execution(message),
        }
    }
}

const UNKNOWN_TABLE_MARKERS: &[&str] = &[
    "table_or_view_not_found",
    "table or view not found",
    "table or view cannot be found",
    "no such table",
];

const GROUPING_MARKERS: &[&str] = &[
    "missing_aggregation",
    "missing_group_by",
    "group_by_pos",
    "not in group by",
    "neither present in the group by",
    "is not an aggregate function",
    "must appear in the group by",
];

const TYPE_MARKERS: &[&str] = &[
    "datatype_mismatch",
    "cast_invalid_input",
    "invalid_cast",
    "cannot be cast",
    "cannot cast",
    "type mismatch",
    "data type mismatch",
];

const SYNTAX_MARKERS: &[&str] = &[
    "parse_syntax_error",
    "syntax error",
    "parseexception",
    "mismatched input",
    "extraneous input",
];

/// Classify raw driver error text. Unrecognized text is `Other`.
pub fn classify_error(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();
    let has_any = |markers: &[&str]| markers.iter().any(|m| msg.contains(m));

    // Most specific first: a missing-table message may also carry parser context.
    if has_any(UNKNOWN_TABLE_MARKERS) {
        return ErrorCategory::UnknownTable;
    }
    if has_any(GROUPING_MARKERS) {
        return ErrorCategory::MissingGrouping;
    }
    if has_any(TYPE_MARKERS) {
        return ErrorCategory::TypeMismatch;
    }
    if has_any(SYNTAX_MARKERS) {
        return ErrorCategory::Syntax;
    }
    ErrorCategory::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_syntax() {
        let msg = "[PARSE_SYNTAX_ERROR] Syntax error at or near 'FORM'. SQLSTATE: 42601";
        assert_eq!(classify_error(msg), ErrorCategory::Syntax);
    }

    #[test]
    fn test_classify_missing_grouping() {
        let msg = "[MISSING_AGGREGATION] The non-aggregating expression \"WEATHER\" is based on columns which are not participating in the GROUP BY clause.";
        assert_eq!(classify_error(msg), ErrorCategory::MissingGrouping);
    }

    #[test]
    fn test_classify_type_mismatch() {
        let msg = "[CAST_INVALID_INPUT] The value 'RAIN' of the type \"STRING\" cannot be cast to \"INT\"";
        assert_eq!(classify_error(msg), ErrorCategory::TypeMismatch);
    }

    #[test]
    fn test_classify_unknown_table() {
        let msg = "[TABLE_OR_VIEW_NOT_FOUND] The table or view `crash_master` cannot be found.";
        assert_eq!(classify_error(msg), ErrorCategory::UnknownTable);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify_error("connection reset by peer"), ErrorCategory::Other);
        assert_eq!(classify_error(""), ErrorCategory::Other);
    }

    #[test]
    fn test_into_error_variant() {
        let err = ErrorCategory::MissingGrouping.into_error("boom");
        assert!(matches!(err, QueryError::MissingGrouping(_)));
        assert!(matches!(ErrorCategory::Other.into_error("x"), QueryError::Execution(_)));
    }
}
