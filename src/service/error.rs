use std::error::Error;
use std::fmt;

use crate::blob::BlobError;
use crate::writer::WriteError;

/// Error type for the capsule creation flow.
#[derive(Debug)]
pub enum CreateCapsuleError {
    /// `unlock_at` is not an RFC 3339 timestamp.
    InvalidUnlockTime(String),
    /// No file content was supplied.
    MissingFile,
    /// The blob upload failed; no metadata was written.
    Upload(BlobError),
    /// The capsule + outbox write failed.
    Write(WriteError),
}

impl CreateCapsuleError {
    /// Whether the caller sent a bad request (nothing was attempted).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CreateCapsuleError::InvalidUnlockTime(_) | CreateCapsuleError::MissingFile
        )
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            CreateCapsuleError::InvalidUnlockTime(_) => 400,
            CreateCapsuleError::MissingFile => 400,
            CreateCapsuleError::Upload(_) => 500,
            CreateCapsuleError::Write(_) => 500,
        }
    }
}

impl fmt::Display for CreateCapsuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateCapsuleError::InvalidUnlockTime(value) => {
                write!(f, "invalid date format: {:?}", value)
            }
            CreateCapsuleError::MissingFile => write!(f, "error retrieving file"),
            CreateCapsuleError::Upload(e) => write!(f, "failed to upload file: {}", e),
            CreateCapsuleError::Write(e) => write!(f, "failed to save capsule metadata: {}", e),
        }
    }
}

impl Error for CreateCapsuleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CreateCapsuleError::Upload(e) => Some(e),
            CreateCapsuleError::Write(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BlobError> for CreateCapsuleError {
    fn from(err: BlobError) -> Self {
        CreateCapsuleError::Upload(err)
    }
}

impl From<WriteError> for CreateCapsuleError {
    fn from(err: WriteError) -> Self {
        CreateCapsuleError::Write(err)
    }
}
