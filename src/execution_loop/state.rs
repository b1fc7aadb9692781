//! Retry state machine
//!
//! `Generating → Executing → {Done | Generating | GaveUp}`. Transitions are a
//! pure function of the current state and the event that just happened, so
//! the loop can be exercised without a model or a warehouse.

use crate::execution::{ErrorCategory, ExecutionOutcome, TabularResult};
use crate::execution_loop::recovery::RetryFeedback;
use crate::generator::GeneratedQuery;
use tracing::{info, warn};

/// A failed attempt carried into the next generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRetry {
    pub query: GeneratedQuery,
    pub feedback: RetryFeedback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GiveUpReason {
    /// Generation produced nothing executable.
    Generation(String),
    /// The last execution failed and the retry budget is spent.
    Execution {
        category: ErrorCategory,
        raw_message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    /// About to make generation call number `attempt` (0-based).
    Generating {
        attempt: u32,
        retry: Option<PendingRetry>,
    },
    Executing {
        attempt: u32,
        query: GeneratedQuery,
    },
    Done {
        attempts: u32,
        query: GeneratedQuery,
        result: TabularResult,
    },
    GaveUp {
        attempts: u32,
        query: Option<GeneratedQuery>,
        reason: GiveUpReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Generated(GeneratedQuery),
    GenerationFailed(String),
    Executed(ExecutionOutcome),
}

impl LoopState {
    pub fn start() -> Self {
        LoopState::Generating {
            attempt: 0,
            retry: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Done { .. } | LoopState::GaveUp { .. })
    }

    /// Apply one event. Terminal states absorb every event; an event that does
    /// not belong to the current state leaves it unchanged.
    pub fn next(self, event: LoopEvent, max_retries: u32) -> LoopState {
        match (self, event) {
            (LoopState::Generating { attempt, .. }, LoopEvent::Generated(query)) => {
                LoopState::Executing { attempt, query }
            }
            (LoopState::Generating { attempt, retry }, LoopEvent::GenerationFailed(message)) => {
                warn!("SQL generation failed on attempt {}: {}", attempt + 1, message);
                LoopState::GaveUp {
                    attempts: attempt + 1,
                    query: retry.map(|r| r.query),
                    reason: GiveUpReason::Generation(message),
                }
            }
            (LoopState::Executing { attempt, query }, LoopEvent::Executed(outcome)) => match outcome {
                ExecutionOutcome::Success(result) => {
                    info!("✅ Execution succeeded on attempt {}", attempt + 1);
                    LoopState::Done {
                        attempts: attempt + 1,
                        query,
                        result,
                    }
                }
                ExecutionOutcome::Failure {
                    category,
                    raw_message,
                } if attempt < max_retries => {
                    info!(
                        "Attempt {} failed ({}), retrying ({} of {} retries)",
                        attempt + 1,
                        category,
                        attempt + 1,
                        max_retries
                    );
                    let feedback = RetryFeedback {
                        category,
                        failed_sql: query.qualified.clone(),
                        raw_message,
                    };
                    LoopState::Generating {
                        attempt: attempt + 1,
                        retry: Some(PendingRetry { query, feedback }),
                    }
                }
                ExecutionOutcome::Failure {
                    category,
                    raw_message,
                } => {
                    warn!("Giving up after {} attempts: {}", attempt + 1, raw_message);
                    LoopState::GaveUp {
                        attempts: attempt + 1,
                        query: Some(query),
                        reason: GiveUpReason::Execution {
                            category,
                            raw_message,
                        },
                    }
                }
            },
            (state, event) => {
                if !state.is_terminal() {
                    warn!("Ignoring event {:?} in state {:?}", event, state);
                }
                state
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(sql: &str) -> GeneratedQuery {
        GeneratedQuery {
            raw: sql.to_string(),
            sanitized: sql.to_string(),
            qualified: sql.to_string(),
        }
    }

    fn failure(msg: &str) -> LoopEvent {
        LoopEvent::Executed(ExecutionOutcome::Failure {
            category: ErrorCategory::Syntax,
            raw_message: msg.to_string(),
        })
    }

    #[test]
    fn test_success_on_first_attempt() {
        let state = LoopState::start()
            .next(LoopEvent::Generated(query("SELECT 1;")), 2)
            .next(LoopEvent::Executed(ExecutionOutcome::Success(TabularResult::empty())), 2);
        match state {
            LoopState::Done { attempts, query, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(query.qualified, "SELECT 1;");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_failure_with_budget_returns_to_generating() {
        let state = LoopState::start()
            .next(LoopEvent::Generated(query("SELEC 1;")), 2)
            .next(failure("syntax error"), 2);
        match state {
            LoopState::Generating { attempt, retry } => {
                assert_eq!(attempt, 1);
                let retry = retry.unwrap();
                assert_eq!(retry.feedback.failed_sql, "SELEC 1;");
                assert_eq!(retry.feedback.raw_message, "syntax error");
                assert_eq!(retry.feedback.category, ErrorCategory::Syntax);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_budget_exhaustion_gives_up_with_last_error() {
        let mut state = LoopState::start();
        let mut generations = 0;
        for i in 0..10 {
            if state.is_terminal() {
                break;
            }
            generations += 1;
            state = state
                .next(LoopEvent::Generated(query("SELEC 1;")), 2)
                .next(failure(&format!("error {}", i)), 2);
        }
        assert_eq!(generations, 3);
        match state {
            LoopState::GaveUp {
                attempts,
                query,
                reason,
            } => {
                assert_eq!(attempts, 3);
                assert!(query.is_some());
                assert_eq!(
                    reason,
                    GiveUpReason::Execution {
                        category: ErrorCategory::Syntax,
                        raw_message: "error 2".to_string()
                    }
                );
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_zero_retries_gives_up_after_one_failure() {
        let state = LoopState::start()
            .next(LoopEvent::Generated(query("x;")), 0)
            .next(failure("boom"), 0);
        assert!(matches!(state, LoopState::GaveUp { attempts: 1, .. }));
    }

    #[test]
    fn test_first_generation_failure_has_no_query() {
        let state = LoopState::start().next(LoopEvent::GenerationFailed("empty".to_string()), 2);
        assert!(matches!(
            state,
            LoopState::GaveUp {
                attempts: 1,
                query: None,
                reason: GiveUpReason::Generation(_)
            }
        ));
    }

    #[test]
    fn test_retry_generation_failure_keeps_previous_query() {
        let state = LoopState::start()
            .next(LoopEvent::Generated(query("SELEC 1;")), 2)
            .next(failure("syntax error"), 2)
            .next(LoopEvent::GenerationFailed("timeout".to_string()), 2);
        match state {
            LoopState::GaveUp { attempts, query, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(query.unwrap().qualified, "SELEC 1;");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_terminal_state_absorbs_events() {
        let done = LoopState::Done {
            attempts: 1,
            query: query("SELECT 1;"),
            result: TabularResult::empty(),
        };
        let after = done.clone().next(LoopEvent::Generated(query("SELECT 2;")), 2);
        assert_eq!(after, done);
    }
}
