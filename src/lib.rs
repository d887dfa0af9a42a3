//! # pgqueue
//!
//! A durable task queue and periodic ticker scheduler using PostgreSQL as its
//! only coordination medium. Any number of processes can share a database:
//! claiming a task or firing a ticker relies on `FOR UPDATE SKIP LOCKED`, so a
//! row is delivered to at most one caller.
//!
//! - [`Manager`] exposes queue, task and ticker operations for one namespace.
//! - [`Worker`] runs callbacks for retained tasks and fired tickers on a
//!   bounded pool, releasing or failing tasks with exponential backoff.
//!
//! ```no_run
//! use pgqueue::{ManagerOptions, QueueMeta, TaskMeta};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ManagerOptions::default()
//!     .database_url("postgres://localhost/mydb")
//!     .init()
//!     .await?;
//!
//! manager.register_queue(QueueMeta::new("emails")).await?;
//! manager
//!     .create_task("emails", TaskMeta::new(json!({ "to": "a@b.com" })))
//!     .await?;
//!
//! if let Some(task) = manager.retain_task().await? {
//!     manager.release_task(*task.id(), json!({ "sent": true })).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod errors;
pub mod manager;
pub mod notify;
mod sql;
mod ticker_loop;
mod utils;
pub mod worker;

pub use crate::builder::{ManagerBuildError, ManagerOptions};
pub use crate::errors::{PgQueueError, Result};
pub use crate::manager::{Manager, DEFAULT_CLEANUP_INTERVAL};
pub use crate::notify::TaskSignal;
pub use crate::ticker_loop::adjust_delta;
pub use crate::worker::{Worker, WorkerBuildError, WorkerOptions, WorkerRuntimeError};

pub use pgqueue_ctx::{Subject, WorkerContext};
pub use pgqueue_schema::*;
pub use pgqueue_task_pool::{BoxTaskHandler, PoolError, RunTaskError, TaskFailure, TaskHandler, TaskPool};
