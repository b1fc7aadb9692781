use crate::execution::classifier::classify_error;
use crate::execution::result::ExecutionOutcome;
use crate::execution::warehouse::Warehouse;
use crate::error::QueryError;
use std::sync::Arc;
use tracing::warn;

/// Runs qualified statements and folds driver errors into classified failures.
#[derive(Clone)]
pub struct ExecutionClient {
    warehouse: Arc<dyn Warehouse>,
}

impl ExecutionClient {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    pub async fn execute(&self, sql: &str) -> ExecutionOutcome {
        match self.warehouse.execute(sql).await {
            Ok(result) => ExecutionOutcome::Success(result),
            Err(e) => {
                let raw_message = match e {
                    QueryError::Warehouse(msg) => msg,
                    other => other.to_string(),
                };
                let category = classify_error(&raw_message);
                warn!("SQL execution failed ({}): {}", category, raw_message);
                ExecutionOutcome::Failure {
                    category,
                    raw_message,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::execution::classifier::ErrorCategory;
    use crate::execution::result::TabularResult;
    use async_trait::async_trait;

    struct FailingWarehouse(&'static str);

    #[async_trait]
    impl Warehouse for FailingWarehouse {
        async fn execute(&self, _sql: &str) -> Result<TabularResult> {
            Err(QueryError::Warehouse(self.0.to_string()))
        }
    }

    struct OneRowWarehouse;

    #[async_trait]
    impl Warehouse for OneRowWarehouse {
        async fn execute(&self, _sql: &str) -> Result<TabularResult> {
            Ok(TabularResult::new(
                vec!["FATALS".to_string()],
                vec![vec![serde_json::json!("40901")]],
            ))
        }
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let client = ExecutionClient::new(Arc::new(FailingWarehouse(
            "[PARSE_SYNTAX_ERROR] Syntax error at or near 'FORM'",
        )));
        match client.execute("SELECT a FORM t;").await {
            ExecutionOutcome::Failure {
                category,
                raw_message,
            } => {
                assert_eq!(category, ErrorCategory::Syntax);
                assert!(raw_message.starts_with("[PARSE_SYNTAX_ERROR]"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_passes_rows_through() {
        let client = ExecutionClient::new(Arc::new(OneRowWarehouse));
        let outcome = client.execute("SELECT 1;").await;
        assert!(outcome.is_success());
    }
}
