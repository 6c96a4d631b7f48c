//! Request buffering and replay.
//!
//! This module provides:
//! - A bounded, priority-ordered request queue with expiry and retry budgets
//! - The drain pass that replays the queue through the transport

mod drain;
mod queue;

pub use drain::{DrainReport, DrainSkip};
pub use queue::{FailureOutcome, QueueOptions, QueuedRequest, RequestId, RequestQueue};
