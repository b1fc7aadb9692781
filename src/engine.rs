//! Query Engine
//!
//! Wires the pipeline together and exposes `ask`. The catalog and codebook
//! are built once and shared read-only by every request.

use crate::answer::{failure_answer, AnswerSynthesizer};
use crate::codebook::{CodeResolver, Codebook};
use crate::config::{AnswerMode, EngineConfig};
use crate::error::{QueryError, Result};
use crate::execution::{DatabricksWarehouse, ExecutionClient, TabularResult, Warehouse};
use crate::execution_loop::{GiveUpReason, LoopState, RetryController};
use crate::generator::QueryGenerator;
use crate::llm::{LlmClient, TextGenerator};
use crate::schema::{SchemaCatalog, SchemaPromptBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

static ENGINE: OnceCell<QueryEngine> = OnceCell::const_new();

/// Response to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    /// The executed (or last attempted) statement; `None` when no statement
    /// was ever produced.
    pub query: Option<String>,
    /// Empty on any unrecovered failure.
    pub results: TabularResult,
    pub answer: String,
}

pub struct QueryEngine {
    catalog: Arc<SchemaCatalog>,
    codebook: Arc<Codebook>,
    controller: RetryController,
    resolver: CodeResolver,
    synthesizer: AnswerSynthesizer,
}

impl QueryEngine {
    pub fn from_parts(
        catalog: SchemaCatalog,
        codebook: Codebook,
        llm: Arc<dyn TextGenerator>,
        warehouse: Arc<dyn Warehouse>,
        max_retries: u32,
        answer_mode: AnswerMode,
    ) -> Result<Self> {
        let catalog = Arc::new(catalog);
        let codebook = Arc::new(codebook);
        let generator = Arc::new(QueryGenerator::new(
            llm.clone(),
            &catalog,
            &SchemaPromptBuilder::default(),
        )?);

        Ok(Self {
            controller: RetryController::new(generator, ExecutionClient::new(warehouse), max_retries),
            resolver: CodeResolver::new(codebook.clone()),
            synthesizer: AnswerSynthesizer::new(llm, answer_mode),
            catalog,
            codebook,
        })
    }

    /// Build the production engine: OpenAI-compatible LLM, Databricks warehouse.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let catalog = match &config.schema_path {
            Some(path) => SchemaCatalog::load(path, &config.table_namespace)?,
            None => SchemaCatalog::fars(&config.table_namespace)?,
        };
        let codebook = Codebook::load_or_empty(&config.codebook_path);
        let llm: Arc<dyn TextGenerator> = Arc::new(LlmClient::new(&config.llm));
        let warehouse: Arc<dyn Warehouse> = Arc::new(DatabricksWarehouse::new(&config.warehouse)?);

        info!(
            "Query engine ready: {} tables in {}, model {}, max_retries {}",
            catalog.table_names().len(),
            catalog.namespace(),
            config.llm.model,
            config.max_retries
        );

        Self::from_parts(
            catalog,
            codebook,
            llm,
            warehouse,
            config.max_retries,
            config.answer_mode,
        )
    }

    /// Process-wide engine. The first caller builds it; concurrent first
    /// callers wait for the same initialization. Later configs are ignored.
    pub async fn global(config: &EngineConfig) -> Result<&'static QueryEngine> {
        ENGINE
            .get_or_try_init(|| async { Self::from_config(config) })
            .await
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    /// Answer one question. Failures are reported in `answer`, never as `Err`.
    pub async fn ask(&self, question: &str) -> AskResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("ask", %request_id);
        self.run(question).instrument(span).await
    }

    async fn run(&self, question: &str) -> AskResponse {
        let question = question.trim();
        info!("Question: {}", question);
        if question.is_empty() {
            return AskResponse {
                query: None,
                results: TabularResult::empty(),
                answer: "Please ask a question about the FARS crash records.".to_string(),
            };
        }

        match self.controller.run(question).await {
            LoopState::Done {
                attempts,
                query,
                result,
            } => {
                info!(
                    "Query succeeded after {} attempt(s) with {} row(s)",
                    attempts,
                    result.row_count()
                );
                let ctx = self.resolver.resolve(&query.qualified, &result);
                let answer = self.synthesizer.synthesize(question, &result, &ctx).await;
                AskResponse {
                    query: Some(query.qualified),
                    results: result,
                    answer,
                }
            }
            LoopState::GaveUp {
                attempts,
                query,
                reason,
            } => {
                let message = match reason {
                    // Already phrased by the generator.
                    GiveUpReason::Generation(message) => message,
                    GiveUpReason::Execution {
                        category,
                        raw_message,
                    } => category.into_error(raw_message).to_string(),
                };
                warn!("Question not answered: {}", message);
                AskResponse {
                    query: query.map(|q| q.qualified),
                    results: TabularResult::empty(),
                    answer: failure_answer(attempts, &message),
                }
            }
            other => {
                let message = QueryError::Execution(format!("retry loop stopped in {:?}", other));
                warn!("{}", message);
                AskResponse {
                    query: None,
                    results: TabularResult::empty(),
                    answer: failure_answer(0, &message.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct CountingWarehouse {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Warehouse for CountingWarehouse {
        async fn execute(&self, _sql: &str) -> Result<TabularResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TabularResult::new(vec!["FATALS".to_string()], vec![vec![json!("40901")]]))
        }
    }

    fn engine(llm: &'static str, warehouse: Arc<CountingWarehouse>) -> QueryEngine {
        QueryEngine::from_parts(
            SchemaCatalog::fars("workspace.fars_database").unwrap(),
            Codebook::empty(),
            Arc::new(Canned(llm)),
            warehouse,
            2,
            AnswerMode::Template,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ask_returns_qualified_query() {
        let warehouse = Arc::new(CountingWarehouse::default());
        let engine = engine("SELECT SUM(FATALS) AS FATALS FROM accident_master", warehouse.clone());
        let response = engine.ask("total fatalities").await;

        assert_eq!(
            response.query.as_deref(),
            Some("SELECT SUM(FATALS) AS FATALS FROM workspace.fars_database.accident_master;")
        );
        assert_eq!(response.results.row_count(), 1);
        assert!(response.answer.contains("40901"));
        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_question_skips_pipeline() {
        let warehouse = Arc::new(CountingWarehouse::default());
        let engine = engine("SELECT 1", warehouse.clone());
        let response = engine.ask("   ").await;
        assert!(response.query.is_none());
        assert!(response.results.is_empty());
        assert_eq!(warehouse.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_response_serializes() {
        let warehouse = Arc::new(CountingWarehouse::default());
        let engine = engine("SELECT SUM(FATALS) AS FATALS FROM accident_master", warehouse);
        let response = engine.ask("total fatalities").await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["results"]["columns"], json!(["FATALS"]));
        assert!(value["answer"].as_str().unwrap().starts_with("According to the FARS crash records,"));
    }
}
