//! Scheduler error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Work table layout mismatch: {field} - attached table says {actual}, this binary expects {expected}")]
    LayoutMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("Work table at {0} is not marked ready by the feeder")]
    TableNotReady(String),

    #[error("Invalid slot state value {0}")]
    InvalidState(u32),

    #[error("Record does not fit its fixed field: {0}")]
    InvalidRecord(String),

    #[error("Scheduler lock for host {hostid} is held by another process")]
    LockConflict { hostid: u64 },

    #[error("Gave up after {attempts} attempts")]
    Timeout { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, SchedError>;
