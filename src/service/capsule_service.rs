use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::CreateCapsuleError;
use crate::blob::BlobStore;
use crate::capsule::{Capsule, NewCapsule};
use crate::store::{CapsuleRepository, StoreError, TransactionalStore};
use crate::writer::TransactionalWriter;

/// Raw input for creating a capsule, as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCapsuleRequest {
    pub owner_id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    /// RFC 3339 timestamp.
    pub unlock_at: String,
    pub content: Vec<u8>,
}

/// The capsule creation flow: validate, upload, then write metadata.
///
/// The upload completes before the transactional write starts, so committed
/// metadata always references stored content. A failed upload writes
/// nothing; a failed write may leave an unreferenced blob behind.
pub struct CapsuleService<S, B> {
    writer: TransactionalWriter<S>,
    blobs: B,
}

impl<S, B> CapsuleService<S, B> {
    pub fn new(store: S, blobs: B) -> Self {
        Self {
            writer: TransactionalWriter::new(store),
            blobs,
        }
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn writer(&self) -> &TransactionalWriter<S> {
        &self.writer
    }
}

impl<S, B> CapsuleService<S, B>
where
    S: TransactionalStore + CapsuleRepository,
    B: BlobStore,
{
    /// Create a capsule and return its id.
    pub fn create(&self, request: CreateCapsuleRequest) -> Result<Uuid, CreateCapsuleError> {
        let unlock_at = parse_unlock_at(&request.unlock_at)?;
        if request.content.is_empty() {
            return Err(CreateCapsuleError::MissingFile);
        }

        let storage_key = format!("{}/{}", request.owner_id, Uuid::new_v4());
        self.blobs.put(&storage_key, &request.content)?;
        debug!(storage_key = %storage_key, bytes = request.content.len(), "capsule content stored");

        let mut new = NewCapsule::new(request.owner_id, storage_key.clone(), unlock_at);
        if let Some(title) = request.title {
            new = new.with_title(title);
        }

        self.writer.create(new).map_err(|err| {
            warn!(storage_key = %storage_key, error = %err, "capsule metadata not saved, blob left unreferenced");
            CreateCapsuleError::Write(err)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Capsule>, StoreError> {
        self.store().get_capsule(id)
    }

    pub fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Capsule>, StoreError> {
        self.store().capsules_for_owner(owner_id)
    }
}

/// Parse an RFC 3339 unlock time into UTC.
pub fn parse_unlock_at(value: &str) -> Result<DateTime<Utc>, CreateCapsuleError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| CreateCapsuleError::InvalidUnlockTime(value.to_string()))
}
