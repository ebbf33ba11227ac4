//! Execution dispatcher: routes a call to inline execution or the job queue.

pub mod dispatcher;
pub mod executor;

pub use dispatcher::{DispatchOutcome, Dispatcher, JobHandle};
pub use executor::Executor;
