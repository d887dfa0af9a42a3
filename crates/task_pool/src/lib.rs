//! Bounded worker pool for pgqueue callbacks.
//!
//! Every submission runs in its own spawned task so that a panicking callback
//! only fails its own submission. Failures (panic, callback error, deadline)
//! are joined into one [`RunTaskError`] handed to the result callback.

mod handler;
mod pool;
mod task_result;

pub use handler::{BoxTaskHandler, TaskHandler};
pub use pool::TaskPool;
pub use task_result::{PoolError, RunTaskError, TaskFailure};
