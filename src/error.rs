use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Could not generate a usable SQL query: {0}")]
    Generation(String),

    #[error("SQL syntax error: {0}")]
    Syntax(String),

    #[error("Missing GROUP BY for non-aggregated column: {0}")]
    MissingGrouping(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("SQL execution error: {0}")]
    Execution(String),

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
