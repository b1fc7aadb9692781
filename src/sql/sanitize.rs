//! SQL Sanitizer
//!
//! Normalizes raw model output into a single statement that starts with a
//! query keyword and ends with exactly one `;`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FENCE: Regex = Regex::new(r"(?i)```[ \t]*(?:sql)?").unwrap();
    /// `SELECT`, or `WITH` in the shape of a CTE (`WITH name AS (` or
    /// `WITH name(c1, c2) AS (`), so prose like "a query with a join" does not
    /// start the statement.
    static ref QUERY_START: Regex = Regex::new(
        r"(?i)\b(?:SELECT\b|WITH\s+(?:RECURSIVE\s+)?[A-Za-z_`][\w`]*(?:\s+|\s*\([^)]*\)\s*)AS\s*\()"
    )
    .unwrap();
}

/// Strip fenced code-block markers.
pub fn strip_fences(text: &str) -> String {
    FENCE.replace_all(text, "").into_owned()
}

/// Extract one statement from arbitrary generated text.
///
/// Falls back to the whole trimmed text when no query keyword is present; such
/// output will normally fail at execution and feed the retry loop.
pub fn sanitize_sql(raw: &str) -> String {
    let text = strip_fences(raw);
    let text = text.trim();

    let statement = match QUERY_START.find(text) {
        Some(start) => {
            let rest = &text[start.start()..];
            match rest.find(';') {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => text,
    };

    terminate(statement)
}

/// True when the sanitized statement carries nothing but the terminator.
pub fn is_blank_statement(sanitized: &str) -> bool {
    sanitized.trim_end_matches(';').trim().is_empty()
}

fn terminate(statement: &str) -> String {
    let body = statement.trim().trim_end_matches(';').trim_end();
    format!("{};", body)
}
