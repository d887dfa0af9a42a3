use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;

/// Status of a task, derived from its timestamps and retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Expired,
    New,
    Failed,
    Retry,
    Retained,
    Released,
    Unknown,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown task status {0:?}")]
pub struct UnknownTaskStatus(pub String);

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Expired,
        TaskStatus::New,
        TaskStatus::Failed,
        TaskStatus::Retry,
        TaskStatus::Retained,
        TaskStatus::Released,
        TaskStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Expired => "expired",
            TaskStatus::New => "new",
            TaskStatus::Failed => "failed",
            TaskStatus::Retry => "retry",
            TaskStatus::Retained => "retained",
            TaskStatus::Released => "released",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Derives the status of a task at instant `now`.
    ///
    /// Expiry takes precedence: a task that would read as new or retry is
    /// expired once `dies_at` has passed.
    pub fn derive(
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        dies_at: Option<DateTime<Utc>>,
        retries: i32,
        initial_retries: i32,
        now: DateTime<Utc>,
    ) -> TaskStatus {
        if dies_at.is_some_and(|dies_at| dies_at < now) {
            return TaskStatus::Expired;
        }
        match (started_at.is_some(), finished_at.is_some()) {
            (false, false) if retries == initial_retries => TaskStatus::New,
            (false, false) if retries == 0 => TaskStatus::Failed,
            (false, false) => TaskStatus::Retry,
            (true, false) => TaskStatus::Retained,
            (true, true) => TaskStatus::Released,
            (false, true) => TaskStatus::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownTaskStatus(s.to_string()))
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = UnknownTaskStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A unit of work stored in a queue.
///
/// `status` is the status derived by the database when the row was read.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Task {
    #[builder(default)]
    id: i64,
    #[builder(default, setter(into))]
    ns: String,
    #[builder(default, setter(into))]
    queue: String,
    #[builder(default = "serde_json::json!({})")]
    payload: Value,
    /// Result of the last release, or failure detail
    #[builder(default)]
    result: Value,
    /// Current or last claimant
    #[builder(default, setter(strip_option, into))]
    worker: Option<String>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    /// Earliest eligible time, `None` means immediately
    #[builder(default, setter(strip_option))]
    delayed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    finished_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    dies_at: Option<DateTime<Utc>>,
    /// Remaining attempts
    #[builder(default = "3")]
    retries: i32,
    /// Attempts given when the task was created
    #[builder(default = "3")]
    initial_retries: i32,
    #[sqlx(try_from = "String")]
    #[builder(default = "TaskStatus::New")]
    status: TaskStatus,
}

impl Task {
    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    /// Derives the status of this task at instant `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> TaskStatus {
        TaskStatus::derive(
            self.started_at,
            self.finished_at,
            self.dies_at,
            self.retries,
            self.initial_retries,
            now,
        )
    }

    /// Time left before the task expires, `None` when it has no expiry
    pub fn time_to_live(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.dies_at
            .map(|dies_at| (dies_at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl TaskBuilder {
    pub fn build(self) -> Task {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

/// Payload and scheduling of a new task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub payload: Value,
    pub delayed_at: Option<DateTime<Utc>>,
}

impl TaskMeta {
    pub fn new(payload: Value) -> Self {
        TaskMeta {
            payload,
            delayed_at: None,
        }
    }

    pub fn delayed_at(mut self, value: DateTime<Utc>) -> Self {
        self.delayed_at = Some(value);
        self
    }
}
