use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{BlobError, BlobStore};

/// Blob store kept in process memory. Clones share contents.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let blobs = self.blobs.read().map_err(|_| BlobError::LockPoisoned)?;
        Ok(blobs.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> Result<bool, BlobError> {
        let blobs = self.blobs.read().map_err(|_| BlobError::LockPoisoned)?;
        Ok(blobs.contains_key(key))
    }

    pub fn len(&self) -> Result<usize, BlobError> {
        let blobs = self.blobs.read().map_err(|_| BlobError::LockPoisoned)?;
        Ok(blobs.len())
    }

    pub fn is_empty(&self) -> Result<bool, BlobError> {
        Ok(self.len()? == 0)
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<(), BlobError> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        let mut blobs = self.blobs.write().map_err(|_| BlobError::LockPoisoned)?;
        blobs.insert(key.to_string(), content.to_vec());
        Ok(())
    }
}
