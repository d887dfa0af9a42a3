use serde::{Deserialize, Serialize};

use crate::{Queue, Task, TaskStatus, Ticker, DEFAULT_LIST_LIMIT};

/// Page of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    pub offset: u64,
    pub limit: u64,
}

impl Default for ListRequest {
    fn default() -> Self {
        ListRequest {
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListRequest {
    pub fn offset(mut self, value: u64) -> Self {
        self.offset = value;
        self
    }

    pub fn limit(mut self, value: u64) -> Self {
        self.limit = value;
        self
    }

    /// Offset and limit as bind parameters, a zero limit falls back to the default
    pub fn bounds(&self) -> (i64, i64) {
        let limit = match self.limit {
            0 => DEFAULT_LIST_LIMIT,
            limit => limit,
        };
        (
            i64::try_from(self.offset).unwrap_or(i64::MAX),
            i64::try_from(limit).unwrap_or(i64::MAX),
        )
    }
}

/// Page of a task listing, optionally restricted to one status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListRequest {
    #[serde(flatten)]
    pub page: ListRequest,
    pub status: Option<TaskStatus>,
}

impl TaskListRequest {
    pub fn status(mut self, value: TaskStatus) -> Self {
        self.status = Some(value);
        self
    }

    pub fn page(mut self, value: ListRequest) -> Self {
        self.page = value;
        self
    }
}

/// A page of results along with the total number of matching rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List<T> {
    pub count: u64,
    pub body: Vec<T>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        List {
            count: 0,
            body: Vec::new(),
        }
    }
}

pub type QueueList = List<Queue>;
pub type TaskList = List<Task>;
pub type TickerList = List<Ticker>;
