use std::time::Duration;

use getset::Getters;
use pgqueue_schema::{Task, Ticker};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a callback was invoked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Task(Task),
    Ticker(Ticker),
}

/// Context handed to every callback run by the worker pool.
///
/// The cancellation token is cancelled when the caller shuts down or when the
/// deadline elapses, callbacks are expected to return promptly once it fires.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct WorkerContext {
    worker: String,
    subject: Subject,
    cancellation_token: CancellationToken,
    deadline: Option<Instant>,
}

impl WorkerContext {
    pub fn new(
        worker: impl Into<String>,
        subject: Subject,
        cancellation_token: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        WorkerContext {
            worker: worker.into(),
            subject,
            cancellation_token,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match &self.subject {
            Subject::Task(task) => Some(task),
            Subject::Ticker(_) => None,
        }
    }

    pub fn ticker(&self) -> Option<&Ticker> {
        match &self.subject {
            Subject::Ticker(ticker) => Some(ticker),
            Subject::Task(_) => None,
        }
    }

    /// Time left before the deadline, `None` without deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the callback should stop
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }
}
