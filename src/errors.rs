use pgqueue_schema::{IntervalError, NameError};
use thiserror::Error;

/// Errors returned by the queue, task and ticker operations.
///
/// Absence of work is never an error: operations polling for work return
/// `Ok(None)` instead.
#[derive(Error, Debug)]
pub enum PgQueueError {
    /// The target row does not exist, or is not in a state allowing the operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation would create a row which already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request is invalid (bad name, nothing to patch, date in the past...)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(sqlx::Error),
}

impl PgQueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PgQueueError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PgQueueError::Conflict(_))
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, PgQueueError::BadRequest(_))
    }
}

impl From<sqlx::Error> for PgQueueError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => PgQueueError::NotFound("No matching row".into()),
            sqlx::Error::Database(db_error) => match db_error.code().as_deref() {
                Some("23505") => PgQueueError::Conflict(db_error.message().to_string()),
                Some("23503") => PgQueueError::NotFound(db_error.message().to_string()),
                Some("23514") => PgQueueError::BadRequest(db_error.message().to_string()),
                _ => PgQueueError::SqlError(sqlx::Error::Database(db_error)),
            },
            e => PgQueueError::SqlError(e),
        }
    }
}

impl From<NameError> for PgQueueError {
    fn from(e: NameError) -> Self {
        PgQueueError::BadRequest(e.to_string())
    }
}

impl From<IntervalError> for PgQueueError {
    fn from(e: IntervalError) -> Self {
        PgQueueError::BadRequest(e.to_string())
    }
}

/// A Result type alias for PgQueueError.
pub type Result<T> = core::result::Result<T, PgQueueError>;
