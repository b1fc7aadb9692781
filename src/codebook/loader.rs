//! Codebook Loader
//!
//! Two sources are accepted:
//! - a CSV record set with `file`, `name_ncsa`, `value`, `value_label`,
//!   `definition` columns (the FARS codebook export), and
//! - schema text whose column lines carry `-- description: code=label, ...`
//!   comments.
//!
//! A missing or malformed source degrades to an empty codebook through
//! [`Codebook::load_or_empty`]; answers then fall back to raw codes.

use crate::codebook::{canonical_code, Codebook, CodebookEntry};
use crate::error::{QueryError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const FALLBACK_TABLE: &str = "fars";

lazy_static! {
    static ref CREATE_TABLE: Regex =
        Regex::new(r"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([`\w.]+)").unwrap();
    static ref COLUMN_COMMENT: Regex =
        Regex::new(r"^\s*`?(\w+)`?\s+[^-]*--\s*(.*?)\s*$").unwrap();
    static ref CODE_KEY: Regex = Regex::new(r"(?:^|[,;])\s*(-?[\w.]+)\s*=\s*").unwrap();
}

/// Column positions in the CSV header.
struct CsvLayout {
    table: Option<usize>,
    column: usize,
    value: usize,
    label: usize,
    description: Option<usize>,
}

impl CsvLayout {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |aliases: &[&str]| names.iter().position(|n| aliases.iter().any(|a| *a == n.as_str()));

        let column = find(&["name_ncsa", "column"]);
        let value = find(&["value", "code"]);
        let label = find(&["value_label", "label"]);

        match (column, value, label) {
            (Some(column), Some(value), Some(label)) => Ok(Self {
                table: find(&["file", "table"]),
                column,
                value,
                label,
                description: find(&["definition", "description"]),
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("name_ncsa", column),
                    ("value", value),
                    ("value_label", label),
                ]
                .iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| *name)
                .collect();
                Err(QueryError::MetadataUnavailable(format!(
                    "codebook CSV missing required columns: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// Accumulates one `(table, column)` group in file order.
#[derive(Default)]
struct GroupBuilder {
    description: Option<String>,
    codes: BTreeMap<String, String>,
}

impl GroupBuilder {
    fn finish(self, column: &str) -> CodebookEntry {
        CodebookEntry {
            description: self
                .description
                .unwrap_or_else(|| format!("Codes for {}", column)),
            codes: self.codes,
        }
    }
}

fn build(groups: BTreeMap<(String, String), GroupBuilder>) -> Codebook {
    let mut codebook = Codebook::empty();
    for ((table, column), group) in groups {
        let entry = group.finish(&column);
        codebook.insert(&table, &column, entry);
    }
    codebook
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

impl Codebook {
    /// Load from a file; `.sql` files are read as annotated schema text,
    /// anything else as CSV.
    pub fn load(path: &Path) -> Result<Self> {
        let codebook = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("sql") => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    QueryError::MetadataUnavailable(format!("{}: {}", path.display(), e))
                })?;
                Self::from_annotated_schema(&text)
            }
            _ => {
                let file = std::fs::File::open(path).map_err(|e| {
                    QueryError::MetadataUnavailable(format!("{}: {}", path.display(), e))
                })?;
                Self::from_csv_reader(file)?
            }
        };

        info!(
            "Loaded codebook for {} tables ({} columns) from {}",
            codebook.table_count(),
            codebook.column_count(),
            path.display()
        );
        Ok(codebook)
    }

    /// Like [`Codebook::load`], but any failure yields an empty codebook.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(codebook) => codebook,
            Err(e) => {
                warn!("Codebook unavailable, answers will use raw codes: {}", e);
                Self::empty()
            }
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| QueryError::MetadataUnavailable(format!("unreadable codebook header: {}", e)))?
            .clone();
        let layout = CsvLayout::from_headers(&headers)?;

        let mut groups: BTreeMap<(String, String), GroupBuilder> = BTreeMap::new();
        for record in rdr.records() {
            let record = record?;

            let table = match layout.table {
                Some(idx) => match non_empty(record.get(idx)) {
                    Some(t) => t.to_lowercase(),
                    None => continue,
                },
                None => FALLBACK_TABLE.to_string(),
            };
            let column = match non_empty(record.get(layout.column)) {
                Some(c) => c.to_uppercase(),
                None => continue,
            };

            let group = groups.entry((table, column)).or_default();
            if group.description.is_none() {
                if let Some(desc) = layout.description.and_then(|idx| non_empty(record.get(idx))) {
                    group.description = Some(desc.to_string());
                }
            }

            if let (Some(value), Some(label)) = (
                non_empty(record.get(layout.value)),
                non_empty(record.get(layout.label)),
            ) {
                group.codes.insert(canonical_code(value), label.to_string());
            }
        }

        Ok(build(groups))
    }

    /// Parse `CREATE TABLE` blocks whose column lines carry
    /// `-- description: 1=Label, 2=Label` comments.
    pub fn from_annotated_schema(text: &str) -> Self {
        let mut groups: BTreeMap<(String, String), GroupBuilder> = BTreeMap::new();
        let mut current_table: Option<String> = None;

        for line in text.lines() {
            if let Some(caps) = CREATE_TABLE.captures(line) {
                let full = caps[1].replace('`', "");
                let short = full.rsplit('.').next().unwrap_or(&full).to_lowercase();
                current_table = Some(short);
                continue;
            }
            let Some(table) = current_table.as_ref() else {
                continue;
            };
            let Some(caps) = COLUMN_COMMENT.captures(line) else {
                continue;
            };

            let column = caps[1].to_uppercase();
            let (description, codes) = split_comment(&caps[2]);
            let group = groups.entry((table.clone(), column)).or_default();
            if group.description.is_none() {
                group.description = description;
            }
            group.codes.extend(codes);
        }

        build(groups)
    }
}

/// Split `Atmospheric conditions: 1=Clear, 2=Rain` into description and codes.
fn split_comment(comment: &str) -> (Option<String>, BTreeMap<String, String>) {
    let comment = comment.trim();
    let Some((desc, rest)) = comment.split_once(':') else {
        return (non_empty(Some(comment)).map(str::to_string), BTreeMap::new());
    };

    let codes = parse_code_list(rest);
    if codes.is_empty() {
        (non_empty(Some(comment)).map(str::to_string), codes)
    } else {
        (non_empty(Some(desc)).map(str::to_string), codes)
    }
}

fn parse_code_list(text: &str) -> BTreeMap<String, String> {
    let text = text.trim();
    let keys: Vec<(usize, usize, String)> = CODE_KEY
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), whole.end(), caps[1].to_string()))
        })
        .collect();

    // The list must start with a code, otherwise this is prose with a colon.
    if keys.first().map_or(true, |(start, _, _)| *start != 0) {
        return BTreeMap::new();
    }

    let mut codes = BTreeMap::new();
    for (i, (_, label_start, code)) in keys.iter().enumerate() {
        let label_end = keys.get(i + 1).map_or(text.len(), |(next, _, _)| *next);
        let label = text[*label_start..label_end].trim().trim_end_matches([',', ';']).trim();
        if !label.is_empty() {
            codes.insert(canonical_code(code), label.to_string());
        }
    }
    codes
}
