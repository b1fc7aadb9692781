//! Answer Synthesizer
//!
//! Turns a successful result and its resolution context into the final
//! answer. Two renderers share one format: a deterministic template, and a
//! second generation call under an enumerated instruction set that falls back
//! to the template when the call fails.

use crate::codebook::resolver::ResolvedCell;
use crate::codebook::ResolutionContext;
use crate::config::AnswerMode;
use crate::execution::{display_value, numeric_value, TabularResult};
use crate::llm::TextGenerator;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Leads every answer.
pub const DISCLOSURE: &str = "According to the FARS crash records,";
pub const BREAKDOWN_INTRO: &str = "here is the breakdown of the results.";
pub const NO_RECORDS: &str = "no records matched the question.";

const FORMAT_RULES: [&str; 8] = [
    "Start the answer with exactly: \"According to the FARS crash records,\"",
    "If there is exactly one row, write exactly one sentence and nothing else.",
    "If there are several rows, write \"here is the breakdown of the results.\" after the opening phrase, then exactly one sentence per row in the order given.",
    "Each sentence pairs the row's measured quantity with the label of that row's coded values.",
    "Use the singular noun when the quantity is 1 and the plural otherwise.",
    "Never reorder, merge, compare or total rows. Every value in a sentence must come from the same row.",
    "When a value is marked (not reported in metadata), write the raw value followed by \"(not reported in metadata)\".",
    "Do not add explanations, caveats, SQL, or markdown.",
];

/// Noun forms for well-known FARS measures.
fn known_measure(column: &str) -> Option<(&'static str, &'static str)> {
    match column {
        "FATALS" => Some(("fatality", "fatalities")),
        "DEATHS" => Some(("death", "deaths")),
        "PERSONS" | "PERMVIT" | "PERNOTMVIT" => Some(("person", "people")),
        "PEDS" => Some(("pedestrian", "pedestrians")),
        "VE_TOTAL" | "VE_FORMS" | "PVH_INVL" => Some(("vehicle", "vehicles")),
        "DRUNK_DR" => Some(("drunk driver", "drunk drivers")),
        _ => None,
    }
}

/// Noun forms guessed from an alias such as `total_fatalities` or `crash_count`.
fn inferred_measure(column: &str) -> Option<(&'static str, &'static str)> {
    let lower = column.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |needle: &str| tokens.iter().any(|t| t.starts_with(needle));

    if lower.contains("fatal") {
        Some(("fatality", "fatalities"))
    } else if lower.contains("death") {
        Some(("death", "deaths"))
    } else if has("crash") || has("accident") || has("case") {
        Some(("crash", "crashes"))
    } else if has("pedestrian") {
        Some(("pedestrian", "pedestrians"))
    } else if has("person") || has("people") {
        Some(("person", "people"))
    } else if has("driver") {
        Some(("driver", "drivers"))
    } else if has("vehicle") {
        Some(("vehicle", "vehicles"))
    } else if tokens
        .iter()
        .any(|t| matches!(*t, "count" | "cnt" | "num" | "number" | "n"))
    {
        Some(("record", "records"))
    } else {
        None
    }
}

fn measure_noun(column: &str) -> Option<(&'static str, &'static str)> {
    let bare = column.rsplit('.').next().unwrap_or(column).to_uppercase();
    known_measure(&bare).or_else(|| inferred_measure(column))
}

/// Index of the column that carries the row's quantity: the last aggregate,
/// else the last column without a code table.
fn quantity_index(ctx: &ResolutionContext) -> Option<usize> {
    ctx.columns
        .iter()
        .rposition(|c| c.is_aggregate())
        .or_else(|| ctx.columns.iter().rposition(|c| c.coded_entry().is_none()))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sentence for one row, lower-case first letter, terminated with `.`.
fn row_sentence(cells: &[ResolvedCell], ctx: &ResolutionContext, quantity: Option<usize>) -> String {
    let dimensions: Vec<String> = cells
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != quantity)
        .map(|(_, cell)| format!("{} is {}", cell.column.to_lowercase(), cell.display()))
        .collect();

    let lead = match quantity.and_then(|i| cells.get(i).map(|cell| (i, cell))) {
        Some((i, cell)) => {
            let is_one = numeric_value(&serde_json::Value::String(cell.raw.clone())) == Some(1.0);
            match measure_noun(&cell.column) {
                Some((singular, _)) if is_one => format!("there was {} {}", cell.raw, singular),
                Some((_, plural)) => format!("there were {} {}", cell.raw, plural),
                None if ctx.columns[i].is_aggregate() => {
                    format!("the calculated value was {}", cell.raw)
                }
                None => format!("the value of {} was {}", cell.column, cell.raw),
            }
        }
        None => "one record matched".to_string(),
    };

    if dimensions.is_empty() {
        format!("{}.", lead)
    } else {
        format!("{} where {}.", lead, dimensions.join(" and "))
    }
}

/// Deterministic rendering of the answer format.
pub fn render_template(result: &TabularResult, ctx: &ResolutionContext) -> String {
    if result.is_empty() {
        return format!("{} {}", DISCLOSURE, NO_RECORDS);
    }

    let quantity = quantity_index(ctx);
    let sentences: Vec<String> = result
        .rows
        .iter()
        .map(|row| row_sentence(&ctx.resolve_row(row), ctx, quantity))
        .collect();

    if sentences.len() == 1 {
        format!("{} {}", DISCLOSURE, sentences[0])
    } else {
        let body: Vec<String> = sentences.iter().map(|s| capitalize(s)).collect();
        format!("{} {}\n{}", DISCLOSURE, BREAKDOWN_INTRO, body.join("\n"))
    }
}

/// Answer for a request that ended without a result.
pub fn failure_answer(attempts: u32, message: &str) -> String {
    format!(
        "Sorry, the question could not be answered after {} attempt{}: {}",
        attempts,
        if attempts == 1 { "" } else { "s" },
        message
    )
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn TextGenerator>,
    mode: AnswerMode,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn TextGenerator>, mode: AnswerMode) -> Self {
        Self { llm, mode }
    }

    pub fn mode(&self) -> AnswerMode {
        self.mode
    }

    /// Instruction text for the second generation call. Identical inputs give
    /// identical prompts.
    pub fn build_prompt(question: &str, result: &TabularResult, ctx: &ResolutionContext) -> String {
        let mut parts = vec![
            "You are writing the final answer to a question about US fatal traffic crashes.".to_string(),
            String::new(),
            "FORMAT RULES:".to_string(),
        ];
        for (i, rule) in FORMAT_RULES.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, rule));
        }

        parts.push(String::new());
        parts.push("COLUMN METADATA:".to_string());
        for column in &ctx.columns {
            parts.push(format!("- {}: {}", column.column, column.description()));
        }
        for line in code_lines(result, ctx) {
            parts.push(line);
        }

        parts.push(String::new());
        parts.push(format!("ROWS ({}):", result.row_count()));
        let quantity = quantity_index(ctx);
        for (i, row) in result.rows.iter().enumerate() {
            let facts: Vec<String> = ctx
                .resolve_row(row)
                .iter()
                .enumerate()
                .map(|(j, cell)| match (&cell.label, cell.not_reported) {
                    (Some(label), _) => format!("{} = {} ({})", cell.column, cell.raw, label),
                    (None, true) if Some(j) != quantity => {
                        format!("{} = {}", cell.column, cell.display())
                    }
                    (None, _) => format!("{} = {}", cell.column, cell.raw),
                })
                .collect();
            parts.push(format!("Row {}: {}", i + 1, facts.join("; ")));
        }

        parts.push(String::new());
        parts.push(format!("Question: {}", question));
        parts.push("Answer:".to_string());
        parts.join("\n")
    }

    pub async fn synthesize(&self, question: &str, result: &TabularResult, ctx: &ResolutionContext) -> String {
        if self.mode == AnswerMode::Template || result.is_empty() {
            return render_template(result, ctx);
        }

        let prompt = Self::build_prompt(question, result, ctx);
        debug!("Answer prompt is {} chars", prompt.len());

        match self.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                info!("✅ Answer generated for {} row(s)", result.row_count());
                with_disclosure(text.trim())
            }
            Ok(_) => {
                warn!("Answer generation returned nothing, using template");
                render_template(result, ctx)
            }
            Err(e) => {
                warn!("Answer generation failed, using template: {}", e);
                render_template(result, ctx)
            }
        }
    }
}

/// Codes that actually occur in the result, per coded column.
fn code_lines(result: &TabularResult, ctx: &ResolutionContext) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, column) in ctx.columns.iter().enumerate() {
        let Some(entry) = column.coded_entry() else {
            continue;
        };
        let seen: BTreeSet<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get(i))
            .map(display_value)
            .collect();
        let pairs: Vec<String> = seen
            .iter()
            .filter_map(|code| entry.label(code).map(|label| format!("{}={}", code, label)))
            .collect();
        if !pairs.is_empty() {
            lines.push(format!("  {} codes: {}", column.column, pairs.join(", ")));
        }
    }
    lines
}

fn with_disclosure(text: &str) -> String {
    let has_phrase = text
        .get(..DISCLOSURE.len())
        .map_or(false, |lead| lead.eq_ignore_ascii_case(DISCLOSURE));
    if has_phrase {
        text.to_string()
    } else {
        format!("{} {}", DISCLOSURE, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::{CodeResolver, Codebook};
    use crate::error::{QueryError, Result};
    use async_trait::async_trait;
    use serde_json::json;

    const WEATHER_SQL: &str = "SELECT WEATHER, SUM(COALESCE(FATALS, 0)) AS FATALS \
        FROM workspace.fars_database.accident_master GROUP BY WEATHER;";

    fn codebook() -> Arc<Codebook> {
        let csv = "\
file,name_ncsa,value,value_label,definition
accident,WEATHER,3,Sleet or Hail,Atmospheric conditions
accident,WEATHER,8,Other,
";
        Arc::new(Codebook::from_csv_reader(csv.as_bytes()).unwrap())
    }

    fn table(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn context(sql: &str, result: &TabularResult) -> ResolutionContext {
        CodeResolver::new(codebook()).resolve(sql, result)
    }

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl TextGenerator for Down {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(QueryError::Llm("timeout".to_string()))
        }
    }

    #[test]
    fn test_single_row_is_one_sentence() {
        let result = table(&["FATALS"], vec![vec![json!(40901)]]);
        let ctx = context("SELECT SUM(FATALS) AS FATALS FROM accident_master;", &result);
        let answer = render_template(&result, &ctx);

        assert_eq!(answer, "According to the FARS crash records, there were 40901 fatalities.");
        assert_eq!(answer.matches('.').count(), 1);
    }

    #[test]
    fn test_multi_row_one_sentence_per_row_in_order() {
        let result = table(
            &["WEATHER", "FATALS"],
            vec![vec![json!("3"), json!(1)], vec![json!("8"), json!(1)]],
        );
        let ctx = context(WEATHER_SQL, &result);
        let answer = render_template(&result, &ctx);

        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "According to the FARS crash records, here is the breakdown of the results.");
        assert_eq!(lines[1], "There was 1 fatality where weather is Sleet or Hail.");
        assert_eq!(lines[2], "There was 1 fatality where weather is Other.");
        assert!(!lines[1].contains("Other"));
        assert!(!lines[2].contains("Sleet"));
    }

    #[test]
    fn test_plural_follows_each_row() {
        let result = table(
            &["WEATHER", "FATALS"],
            vec![vec![json!("3"), json!(2)], vec![json!("8"), json!("1.0")]],
        );
        let ctx = context(WEATHER_SQL, &result);
        let answer = render_template(&result, &ctx);
        assert!(answer.contains("There were 2 fatalities where weather is Sleet or Hail."));
        assert!(answer.contains("There was 1 fatality where weather is Other."));
    }

    #[test]
    fn test_unresolved_code_is_kept_with_marker() {
        let result = table(
            &["WEATHER", "FATALS"],
            vec![vec![json!("3"), json!(4)], vec![json!("98"), json!(7)]],
        );
        let ctx = context(WEATHER_SQL, &result);
        let answer = render_template(&result, &ctx);
        assert!(answer.contains("There were 7 fatalities where weather is 98 (not reported in metadata)."));
    }

    #[test]
    fn test_empty_result() {
        let result = table(&["FATALS"], vec![]);
        let ctx = context("SELECT FATALS FROM accident_master;", &result);
        assert_eq!(
            render_template(&result, &ctx),
            "According to the FARS crash records, no records matched the question."
        );
    }

    #[test]
    fn test_count_alias_and_calculated_value() {
        let result = table(&["crash_count"], vec![vec![json!(12)]]);
        let ctx = context("SELECT COUNT(*) AS crash_count FROM accident_master;", &result);
        assert!(render_template(&result, &ctx).ends_with("there were 12 crashes."));

        let result = table(&["avg(AGE)"], vec![vec![json!(41.5)]]);
        let ctx = context("SELECT AVG(AGE) FROM person_master;", &result);
        assert!(render_template(&result, &ctx).ends_with("the calculated value was 41.5."));
    }

    #[test]
    fn test_prompt_is_deterministic_and_row_scoped() {
        let result = table(
            &["WEATHER", "FATALS"],
            vec![vec![json!("3"), json!(1)], vec![json!("8"), json!(1)]],
        );
        let ctx = context(WEATHER_SQL, &result);
        let a = AnswerSynthesizer::build_prompt("fatalities by weather", &result, &ctx);
        let b = AnswerSynthesizer::build_prompt("fatalities by weather", &result, &ctx);
        assert_eq!(a, b);
        assert!(a.contains("Row 1: WEATHER = 3 (Sleet or Hail); FATALS = 1"));
        assert!(a.contains("Row 2: WEATHER = 8 (Other); FATALS = 1"));
        assert!(a.contains("WEATHER codes: 3=Sleet or Hail, 8=Other"));
    }

    #[tokio::test]
    async fn test_generated_answer_gets_disclosure_prefix() {
        let result = table(&["FATALS"], vec![vec![json!(40901)]]);
        let ctx = context("SELECT SUM(FATALS) AS FATALS FROM accident_master;", &result);
        let synth = AnswerSynthesizer::new(Arc::new(Canned("there were 40901 fatalities.")), AnswerMode::Generated);
        let answer = synth.synthesize("total fatalities in 2023", &result, &ctx).await;
        assert_eq!(answer, "According to the FARS crash records, there were 40901 fatalities.");
    }

    #[test]
    fn test_disclosure_not_doubled_in_other_case() {
        let reply = "according to the FARS crash records, there were 40901 fatalities.";
        assert_eq!(with_disclosure(reply), reply);
        let reply = "ACCORDING TO THE FARS CRASH RECORDS, there were 40901 fatalities.";
        assert_eq!(with_disclosure(reply), reply);
        assert_eq!(
            with_disclosure("There were 40901 fatalities."),
            "According to the FARS crash records, There were 40901 fatalities."
        );
        assert_eq!(with_disclosure("é"), "According to the FARS crash records, é");
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_to_template() {
        let result = table(&["FATALS"], vec![vec![json!(40901)]]);
        let ctx = context("SELECT SUM(FATALS) AS FATALS FROM accident_master;", &result);
        let synth = AnswerSynthesizer::new(Arc::new(Down), AnswerMode::Generated);
        let answer = synth.synthesize("total fatalities in 2023", &result, &ctx).await;
        assert_eq!(answer, render_template(&result, &ctx));
    }

    #[test]
    fn test_failure_answer() {
        assert_eq!(
            failure_answer(3, "SQL syntax error: [PARSE_SYNTAX_ERROR] near 'SELEC'"),
            "Sorry, the question could not be answered after 3 attempts: SQL syntax error: [PARSE_SYNTAX_ERROR] near 'SELEC'"
        );
    }
}
