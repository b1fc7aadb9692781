//! Execution Client
//!
//! Runs qualified statements against the warehouse and classifies failures.

pub mod classifier;
pub mod client;
pub mod result;
pub mod warehouse;

pub use classifier::{classify_error, ErrorCategory};
pub use client::ExecutionClient;
pub use result::{display_value, numeric_value, ExecutionOutcome, TabularResult};
pub use warehouse::{DatabricksWarehouse, Warehouse};
