//! Persisted entities of the pgqueue task queue.
//!
//! Queues and tickers are identified by a `(namespace, name)` pair, tasks by an
//! increasing id. The status of a task is never stored: it is derived from the
//! task timestamps and retry counters, see [`TaskStatus::derive`].

mod interval;
mod list;
mod names;
mod queue;
mod task;
mod ticker;

use std::time::Duration;

pub use interval::{duration_to_interval, interval_to_duration, IntervalError};
pub use list::{List, ListRequest, QueueList, TaskList, TaskListRequest, TickerList};
pub use names::{normalize_identifier, validate_namespace, NameError};
pub use queue::{Queue, QueueMeta, QueueStatus};
pub use task::{Task, TaskMeta, TaskStatus, UnknownTaskStatus};
pub use ticker::{Ticker, TickerMeta};

/// Default database schema holding the queue, task and ticker tables
pub const SCHEMA_NAME: &str = "pgqueue";

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace holding one cleanup ticker per registered queue
pub const CLEANUP_NAMESPACE: &str = "cleanup";

/// Suffix of the notification channel, the full channel is `{namespace}_queue_insert`
pub const TOPIC_QUEUE_INSERT: &str = "queue_insert";

/// Maximum number of tasks deleted by one cleanup call
pub const CLEAN_BATCH_SIZE: i64 = 100;

/// Default page size of list requests
pub const DEFAULT_LIST_LIMIT: u64 = 100;

/// Initial poll period of the ticker loop
pub const TICKER_PERIOD: Duration = Duration::from_secs(15);

/// Name of the notification channel for task insertions in a namespace
pub fn queue_insert_topic(namespace: &str) -> String {
    format!("{namespace}_{TOPIC_QUEUE_INSERT}")
}
