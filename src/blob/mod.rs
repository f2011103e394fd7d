//! Blob storage capability.
//!
//! The capsule flow only needs "given bytes and a key, durably store them or
//! fail". Uploads must succeed before the capsule metadata is written.

mod fs;
mod in_memory;

use std::error::Error;
use std::fmt;

pub use fs::FsBlobStore;
pub use in_memory::InMemoryBlobStore;

/// Durable key/value storage for capsule content.
pub trait BlobStore: Send + Sync {
    /// Store `content` under `key`. `Ok` means the content is durable.
    fn put(&self, key: &str, content: &[u8]) -> Result<(), BlobError>;
}

#[derive(Debug)]
pub enum BlobError {
    InvalidKey(String),
    Io(std::io::Error),
    LockPoisoned,
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::InvalidKey(key) => write!(f, "invalid blob key: {:?}", key),
            BlobError::Io(err) => write!(f, "blob io: {}", err),
            BlobError::LockPoisoned => write!(f, "blob store lock poisoned"),
        }
    }
}

impl Error for BlobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BlobError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Io(err)
    }
}

impl<B: BlobStore + ?Sized> BlobStore for std::sync::Arc<B> {
    fn put(&self, key: &str, content: &[u8]) -> Result<(), BlobError> {
        (**self).put(key, content)
    }
}
