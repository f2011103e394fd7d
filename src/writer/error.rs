use std::error::Error;
use std::fmt;

use crate::store::StoreError;

/// Failure of a capsule + outbox write.
///
/// Every variant except [`WriteError::RollbackFailed`] means nothing was
/// persisted and the whole operation may be retried.
#[derive(Debug)]
pub enum WriteError {
    /// The outbox payload could not be encoded; no transaction was opened.
    Encode(serde_json::Error),
    /// The transaction could not be opened.
    Begin(StoreError),
    CapsuleInsert(StoreError),
    OutboxInsert(StoreError),
    Commit(StoreError),
    /// Rolling back after `cause` failed too, so the outcome is unknown.
    RollbackFailed {
        cause: Box<WriteError>,
        rollback: StoreError,
    },
}

impl WriteError {
    /// Whether the caller may retry. Retrying after an indeterminate outcome
    /// could create the capsule twice.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WriteError::Encode(_) | WriteError::RollbackFailed { .. })
    }

    /// Whether the transaction may have committed despite the error.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, WriteError::RollbackFailed { .. })
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Encode(err) => write!(f, "failed to encode outbox payload: {}", err),
            WriteError::Begin(err) => write!(f, "failed to begin transaction: {}", err),
            WriteError::CapsuleInsert(err) => write!(f, "failed to create capsule: {}", err),
            WriteError::OutboxInsert(err) => write!(f, "failed to create outbox event: {}", err),
            WriteError::Commit(err) => write!(f, "failed to commit transaction: {}", err),
            WriteError::RollbackFailed { cause, rollback } => write!(
                f,
                "rollback failed ({}) after: {}; outcome unknown",
                rollback, cause
            ),
        }
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteError::Encode(err) => Some(err),
            WriteError::Begin(err)
            | WriteError::CapsuleInsert(err)
            | WriteError::OutboxInsert(err)
            | WriteError::Commit(err) => Some(err),
            WriteError::RollbackFailed { cause, .. } => Some(cause.as_ref()),
        }
    }
}
