//! Warehouse access
//!
//! `DatabricksWarehouse` talks to the Databricks SQL Statement Execution API
//! over HTTP. Results are requested inline in `JSON_ARRAY` format, which
//! serializes every cell as a string (or null).

use crate::config::WarehouseConfig;
use crate::error::{QueryError, Result};
use crate::execution::result::TabularResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs one SQL statement and returns its rows, or the driver's error text as
/// `QueryError::Warehouse`.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<TabularResult>;
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: ManifestSchema,
    #[serde(default)]
    total_row_count: Option<u64>,
    /// Set when the warehouse dropped rows past its result size limit.
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
struct ManifestColumn {
    name: String,
    #[serde(default)]
    position: usize,
}

/// One chunk of inline rows. The first chunk arrives with the statement
/// response; later ones are fetched through `next_chunk_internal_link`.
#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

/// Rows collected so far for a succeeded statement.
#[derive(Debug)]
struct ChunkedResult {
    table: TabularResult,
    next_chunk: Option<String>,
    total_row_count: Option<u64>,
}

impl ChunkedResult {
    fn append(&mut self, chunk: ResultData) {
        self.table.rows.extend(chunk.data_array);
        self.next_chunk = chunk.next_chunk_internal_link;
    }

    /// All chunks read; the row count must match the manifest when it has one.
    fn finish(self) -> Result<TabularResult> {
        if let Some(link) = self.next_chunk {
            return Err(QueryError::Warehouse(format!(
                "Result chunk {} was never fetched",
                link
            )));
        }
        match self.total_row_count {
            Some(total) if total != self.table.row_count() as u64 => {
                Err(QueryError::Warehouse(format!(
                    "Warehouse reported {} rows but {} were received",
                    total,
                    self.table.row_count()
                )))
            }
            _ => Ok(self.table),
        }
    }
}

/// Databricks SQL warehouse client.
pub struct DatabricksWarehouse {
    http: reqwest::Client,
    host: String,
    token: String,
    warehouse_id: String,
    wait_timeout_secs: u32,
    max_polls: u32,
}

impl DatabricksWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| QueryError::Config("DATABRICKS_HOST is not set".to_string()))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| QueryError::Config("DATABRICKS_TOKEN is not set".to_string()))?;
        let warehouse_id = config.warehouse_id.clone().ok_or_else(|| {
            QueryError::Config(
                "DATABRICKS_WAREHOUSE_ID (or DATABRICKS_HTTP_PATH) is not set".to_string(),
            )
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            host: normalize_host(&host),
            token,
            warehouse_id,
            // The API accepts 5..=50 seconds.
            wait_timeout_secs: config.wait_timeout_secs.clamp(5, 50),
            max_polls: config.max_polls,
        })
    }

    fn statements_url(&self) -> String {
        format!("{}/api/2.0/sql/statements", self.host)
    }

    async fn submit(&self, sql: &str) -> Result<StatementResponse> {
        let body = StatementRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            wait_timeout: format!("{}s", self.wait_timeout_secs),
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };

        let response = self
            .http
            .post(self.statements_url())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Warehouse(format!("Warehouse request failed: {}", e)))?;

        read_response(response).await
    }

    async fn poll(&self, statement_id: &str) -> Result<StatementResponse> {
        let response = self
            .http
            .get(format!("{}/{}", self.statements_url(), statement_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| QueryError::Warehouse(format!("Warehouse poll failed: {}", e)))?;

        read_response(response).await
    }

    /// `link` is the host-relative path from `next_chunk_internal_link`.
    fn chunk_request(&self, link: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.host, link))
            .bearer_auth(&self.token)
    }

    async fn fetch_chunk(&self, link: &str) -> Result<ResultData> {
        let response = self
            .chunk_request(link)
            .send()
            .await
            .map_err(|e| QueryError::Warehouse(format!("Result chunk fetch failed: {}", e)))?;

        read_response(response).await
    }

    fn cancel_request(&self, statement_id: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/{}/cancel", self.statements_url(), statement_id))
            .bearer_auth(&self.token)
    }

    async fn cancel(&self, statement_id: &str) -> Result<()> {
        let response = self
            .cancel_request(statement_id)
            .send()
            .await
            .map_err(|e| QueryError::Warehouse(format!("Cancel request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QueryError::Warehouse(format!("Cancel returned HTTP {}", status)))
        }
    }
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| QueryError::Warehouse(format!("Failed to read warehouse response: {}", e)))?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        return Err(QueryError::Warehouse(format!("HTTP {}: {}", status, message)));
    }

    serde_json::from_str(&text)
        .map_err(|e| QueryError::Warehouse(format!("Failed to parse warehouse response: {}", e)))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Turn a finished statement response into its first chunk of rows, or the
/// driver error.
fn into_result(response: StatementResponse) -> Result<ChunkedResult> {
    match response.status.state.as_str() {
        "SUCCEEDED" => {
            let (mut columns, total_row_count) = match response.manifest {
                Some(manifest) if manifest.truncated => {
                    return Err(QueryError::Warehouse(
                        "Result was truncated by the warehouse; narrow the query".to_string(),
                    ));
                }
                Some(manifest) => (manifest.schema.columns, manifest.total_row_count),
                None => (Vec::new(), None),
            };
            columns.sort_by_key(|c| c.position);

            let mut chunked = ChunkedResult {
                table: TabularResult::new(columns.into_iter().map(|c| c.name).collect(), Vec::new()),
                next_chunk: None,
                total_row_count,
            };
            if let Some(first) = response.result {
                chunked.append(first);
            }
            Ok(chunked)
        }
        state => {
            let (code, message) = match response.status.error {
                Some(err) => (err.error_code, err.message),
                None => (None, None),
            };
            let message = message.unwrap_or_else(|| format!("statement {}", state));
            Err(QueryError::Warehouse(match code {
                Some(code) => format!("[{}] {}", code, message),
                None => message,
            }))
        }
    }
}

fn is_pending(state: &str) -> bool {
    matches!(state, "PENDING" | "RUNNING")
}

#[async_trait]
impl Warehouse for DatabricksWarehouse {
    async fn execute(&self, sql: &str) -> Result<TabularResult> {
        let start_time = std::time::Instant::now();
        info!("🔍 Executing SQL on warehouse {}", self.warehouse_id);

        let mut response = self.submit(sql).await?;
        let mut polls = 0;
        while is_pending(&response.status.state) {
            if polls >= self.max_polls {
                warn!("Statement still {} after {} polls", response.status.state, polls);
                if let Some(statement_id) = &response.statement_id {
                    match self.cancel(statement_id).await {
                        Ok(()) => info!("Cancelled statement {}", statement_id),
                        Err(e) => warn!("Failed to cancel statement {}: {}", statement_id, e),
                    }
                }
                return Err(QueryError::Warehouse(format!(
                    "Statement did not finish after {} polls",
                    polls
                )));
            }
            let statement_id = response.statement_id.clone().ok_or_else(|| {
                QueryError::Warehouse("Pending statement has no statement_id".to_string())
            })?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            polls += 1;
            debug!("Polling statement {} (poll {})", statement_id, polls);
            response = self.poll(&statement_id).await?;
        }

        let mut chunked = into_result(response)?;
        while let Some(link) = chunked.next_chunk.clone() {
            debug!("Fetching result chunk {}", link);
            let chunk = self.fetch_chunk(&link).await?;
            chunked.append(chunk);
        }

        let result = chunked.finish()?;
        info!(
            "✅ Query completed in {}ms, returned {} rows",
            start_time.elapsed().as_millis(),
            result.row_count()
        );
        Ok(result)
    }
}
