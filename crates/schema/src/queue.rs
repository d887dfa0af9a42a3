use std::time::Duration;

use getset::Getters;
use serde::{Deserialize, Serialize};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::interval::interval_to_duration;
use crate::TaskStatus;

/// A queue definition, identified by `(ns, queue)`.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Queue {
    /// Namespace the queue belongs to
    ns: String,
    /// Queue name
    queue: String,
    /// Lifetime of a task from its eligible time, `None` means tasks never expire
    ttl: Option<Duration>,
    /// Attempts given to each new task
    retries: i32,
    /// Backoff unit applied on failure
    retry_delay: Duration,
}

impl<'r> FromRow<'r, PgRow> for Queue {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let ttl: Option<PgInterval> = row.try_get("ttl")?;
        let retry_delay: PgInterval = row.try_get("retry_delay")?;

        Ok(Queue {
            ns: row.try_get("ns")?,
            queue: row.try_get("queue")?,
            ttl: ttl.as_ref().map(interval_to_duration),
            retries: row.try_get("retries")?,
            retry_delay: interval_to_duration(&retry_delay),
        })
    }
}

/// Fields used to register or patch a queue. Fields left to `None` keep their
/// current (or default) value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMeta {
    pub queue: String,
    /// `Some(None)` removes the TTL, tasks created afterwards never expire
    pub ttl: Option<Option<Duration>>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl QueueMeta {
    pub fn new(queue: impl Into<String>) -> Self {
        QueueMeta {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn ttl(mut self, value: Duration) -> Self {
        self.ttl = Some(Some(value));
        self
    }

    pub fn no_ttl(mut self) -> Self {
        self.ttl = Some(None);
        self
    }

    pub fn retries(mut self, value: u32) -> Self {
        self.retries = Some(value);
        self
    }

    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = Some(value);
        self
    }

    /// True when no attribute besides the name is set
    pub fn is_empty_patch(&self) -> bool {
        self.ttl.is_none() && self.retries.is_none() && self.retry_delay.is_none()
    }
}

/// Number of tasks of a queue in a given status
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct QueueStatus {
    queue: String,
    #[sqlx(try_from = "String")]
    status: TaskStatus,
    count: i64,
}
