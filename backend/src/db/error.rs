//! Storage error taxonomy
//!
//! Every `sqlx::Error` that leaves the data layer is classified here so the
//! layers above can tell capacity problems, connectivity problems and
//! constraint violations apart without inspecting driver details.

use thiserror::Error;

/// Errors surfaced by the pool and the repositories
#[derive(Error, Debug)]
pub enum DbError {
    /// No lease became available within the acquire timeout
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The database could not be reached or the connection broke mid-use
    #[error("Database connectivity error")]
    Connectivity(#[source] sqlx::Error),

    /// A unique or other integrity constraint rejected the write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Record not found")]
    NotFound,

    #[error("Database query failed")]
    Query(#[source] sqlx::Error),
}

impl DbError {
    /// Failures worth one more attempt on a fresh connection
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Connectivity(_))
    }

    /// Whether the connection that produced this error must be thrown away
    /// instead of going back to the idle set
    pub fn poisons_connection(&self) -> bool {
        matches!(self, DbError::Connectivity(_))
    }
}

/// Errors that can tell whether the connection they came from is still usable
pub trait ConnectionFault {
    fn poisons_connection(&self) -> bool;
}

impl ConnectionFault for DbError {
    fn poisons_connection(&self) -> bool {
        DbError::poisons_connection(self)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connectivity(err),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                DbError::ConstraintViolation(constraint)
            }
            other => DbError::Query(other),
        }
    }
}
