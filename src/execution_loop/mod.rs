pub mod controller;
pub mod recovery;
pub mod state;

pub use controller::RetryController;
pub use recovery::{guidance, RetryFeedback};
pub use state::{GiveUpReason, LoopEvent, LoopState, PendingRetry};
