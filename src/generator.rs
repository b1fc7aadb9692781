//! Query Generator
//!
//! Combines the question with the schema block, makes one text-generation
//! call, and normalizes the result into an executable statement.

use crate::error::{QueryError, Result};
use crate::execution_loop::recovery::RetryFeedback;
use crate::llm::TextGenerator;
use crate::schema::{SchemaCatalog, SchemaPromptBuilder};
use crate::sql::{is_blank_statement, sanitize_sql, TableQualifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One generated statement at each stage of normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    /// Text exactly as the model returned it.
    pub raw: String,
    /// Single statement, fences removed, one trailing `;`.
    pub sanitized: String,
    /// Sanitized text with table names fully qualified. This is what runs.
    pub qualified: String,
}

pub struct QueryGenerator {
    llm: Arc<dyn TextGenerator>,
    qualifier: TableQualifier,
    schema_block: String,
}

impl QueryGenerator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        catalog: &SchemaCatalog,
        prompt_builder: &SchemaPromptBuilder,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            qualifier: TableQualifier::from_catalog(catalog)?,
            schema_block: prompt_builder.render_all(catalog),
        })
    }

    pub fn schema_block(&self) -> &str {
        &self.schema_block
    }

    /// Prompt for a first attempt, or a corrective one when feedback is given.
    pub fn build_prompt(&self, question: &str, feedback: Option<&RetryFeedback>) -> String {
        let mut parts = vec![self.schema_block.clone(), String::new()];
        if let Some(feedback) = feedback {
            parts.push(feedback.render());
            parts.push(String::new());
        }
        parts.push(format!("Question: {}", question));
        parts.push(
            "Write ONLY the valid Databricks SQL query, starting with SELECT or WITH and ending with a semicolon."
                .to_string(),
        );
        parts.join("\n")
    }

    /// Sanitize and qualify raw model output.
    pub fn normalize(&self, raw: String) -> Result<GeneratedQuery> {
        let sanitized = sanitize_sql(&raw);
        if is_blank_statement(&sanitized) {
            return Err(QueryError::Generation(
                "the model returned no SQL statement".to_string(),
            ));
        }
        let qualified = self.qualifier.qualify(&sanitized);
        Ok(GeneratedQuery {
            raw,
            sanitized,
            qualified,
        })
    }

    /// One generation call. No retries at this layer.
    pub async fn generate(
        &self,
        question: &str,
        feedback: Option<&RetryFeedback>,
    ) -> Result<GeneratedQuery> {
        let prompt = self.build_prompt(question, feedback);
        debug!("SQL generation prompt is {} chars", prompt.len());

        let raw = self
            .llm
            .generate(&prompt)
            .await
            .map_err(|e| QueryError::Generation(e.to_string()))?;

        let query = self.normalize(raw)?;
        info!("Generated SQL: {}", query.qualified);
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ErrorCategory;
    use crate::execution_loop::recovery::guidance;
    use async_trait::async_trait;

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
            Err(QueryError::Llm("connection refused".to_string()))
        }
    }

    fn generator(llm: Arc<dyn TextGenerator>) -> QueryGenerator {
        let catalog = SchemaCatalog::fars("workspace.fars_database").unwrap();
        QueryGenerator::new(llm, &catalog, &SchemaPromptBuilder::default()).unwrap()
    }

    #[tokio::test]
    async fn test_generate_sanitizes_and_qualifies() {
        let qg = generator(Arc::new(Canned(
            "```sql\nSELECT SUM(COALESCE(FATALS, 0)) FROM accident_master WHERE YEAR = 2023\n```",
        )));
        let query = qg.generate("total fatalities in 2023", None).await.unwrap();
        assert_eq!(
            query.sanitized,
            "SELECT SUM(COALESCE(FATALS, 0)) FROM accident_master WHERE YEAR = 2023;"
        );
        assert_eq!(
            query.qualified,
            "SELECT SUM(COALESCE(FATALS, 0)) FROM workspace.fars_database.accident_master WHERE YEAR = 2023;"
        );
        assert!(query.raw.starts_with("```sql"));
    }

    #[tokio::test]
    async fn test_blank_output_is_generation_failure() {
        let qg = generator(Arc::new(Canned("```sql\n```")));
        let err = qg.generate("anything", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Generation(_)));
    }

    #[tokio::test]
    async fn test_llm_error_is_generation_failure() {
        let qg = generator(Arc::new(Down));
        let err = qg.generate("anything", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Generation(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_corrective_prompt_keeps_schema_block() {
        let qg = generator(Arc::new(Canned("")));
        let feedback = RetryFeedback {
            category: ErrorCategory::MissingGrouping,
            failed_sql: "SELECT WEATHER, SUM(FATALS) FROM accident_master;".to_string(),
            raw_message: "[MISSING_AGGREGATION] ...".to_string(),
        };
        let first = qg.build_prompt("fatalities by weather", None);
        let retry = qg.build_prompt("fatalities by weather", Some(&feedback));

        assert!(first.starts_with(qg.schema_block()));
        assert!(retry.starts_with(qg.schema_block()));
        assert!(retry.contains(guidance(ErrorCategory::MissingGrouping)));
        assert!(!first.contains("PREVIOUS ATTEMPT FAILED"));
        assert!(retry.contains(&feedback.failed_sql));
        assert!(first.ends_with(retry.lines().last().unwrap()));
    }
}
