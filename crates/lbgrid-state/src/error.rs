//! Errors raised by the LbGrid state store.
//!
//! Storage failures carry the underlying redb or serde message.
//! [`StateError::MissingRecord`] is raised when one stored record refers
//! to another that is not there, such as a network whose offering was
//! never stored.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("state table unavailable: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error("{kind} {id} is referenced but not stored")]
    MissingRecord { kind: &'static str, id: u64 },
}
