//! Dispatch engine: fixed worker pool, bounded retry, exact completion tracking.

pub mod completion;
pub mod dispatcher;
pub mod worker;

pub use completion::{CompletionTracker, Ticket};
pub use dispatcher::Dispatcher;
pub use worker::RetryPolicy;
