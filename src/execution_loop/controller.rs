//! Retry Controller
//!
//! Drives the state machine against the real generator and execution client.
//! Strictly sequential: one generation call and at most one execution per
//! attempt, never speculative.

use crate::execution::ExecutionClient;
use crate::execution_loop::state::{LoopEvent, LoopState};
use crate::generator::QueryGenerator;
use std::sync::Arc;
use tracing::info;

pub struct RetryController {
    generator: Arc<QueryGenerator>,
    executor: ExecutionClient,
    max_retries: u32,
}

impl RetryController {
    pub fn new(generator: Arc<QueryGenerator>, executor: ExecutionClient, max_retries: u32) -> Self {
        Self {
            generator,
            executor,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run until `Done` or `GaveUp`. At most `max_retries + 1` generation calls.
    pub async fn run(&self, question: &str) -> LoopState {
        let mut state = LoopState::start();

        while !state.is_terminal() {
            let event = match &state {
                LoopState::Generating { attempt, retry } => {
                    info!(
                        "Generation attempt {} of {}",
                        attempt + 1,
                        self.max_retries.saturating_add(1)
                    );
                    let feedback = retry.as_ref().map(|r| &r.feedback);
                    match self.generator.generate(question, feedback).await {
                        Ok(query) => LoopEvent::Generated(query),
                        Err(e) => LoopEvent::GenerationFailed(e.to_string()),
                    }
                }
                LoopState::Executing { query, .. } => {
                    LoopEvent::Executed(self.executor.execute(&query.qualified).await)
                }
                _ => break,
            };
            state = state.next(event, self.max_retries);
        }

        state
    }
}
