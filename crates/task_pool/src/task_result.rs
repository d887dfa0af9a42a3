use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// One reason a callback did not complete successfully
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum TaskFailure {
    #[error("PANIC: {0}")]
    Panic(String),
    #[error("{0}")]
    Callback(String),
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Task aborted")]
    Aborted,
}

/// All the failures of one run, never empty.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub struct RunTaskError {
    failures: Vec<TaskFailure>,
}

impl RunTaskError {
    pub(crate) fn from_failures(failures: Vec<TaskFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(RunTaskError { failures })
        }
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn is_panic(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, TaskFailure::Panic(_)))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, TaskFailure::DeadlineExceeded(_)))
    }

    pub fn is_task_error(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, TaskFailure::Callback(_)))
    }
}

impl fmt::Display for RunTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum PoolError {
    #[error("Worker pool is closed")]
    Closed,
    #[error("Submission cancelled while waiting for a free worker")]
    Cancelled,
}
