pub mod answer;
pub mod codebook;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod generator;
pub mod llm;
pub mod schema;
pub mod sql;

pub use answer::{AnswerSynthesizer, DISCLOSURE};
pub use codebook::{CodeResolver, Codebook, CodebookEntry, ResolutionContext};
pub use config::{AnswerMode, EngineConfig};
pub use engine::{AskResponse, QueryEngine};
pub use error::{QueryError, Result};
pub use execution::{ExecutionOutcome, TabularResult, Warehouse};
pub use llm::{LlmClient, TextGenerator};
pub use schema::SchemaCatalog;
