use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::WriteError;
use crate::capsule::{Capsule, NewCapsule};
use crate::outbox::OutboxEvent;
use crate::store::{Transaction, TransactionalStore};

/// Writes a capsule row and its `CapsuleCreated` outbox row as one unit.
///
/// Both rows become visible together or not at all. The writer never talks
/// to the message bus; delivery is left to the relay draining the outbox.
///
/// # Example
///
/// ```ignore
/// use time_capsule::{NewCapsule, SqliteStore, TransactionalWriter};
///
/// let writer = TransactionalWriter::new(SqliteStore::open("capsules.db")?);
/// // the file must already be durably stored under this key
/// let id = writer.create(NewCapsule::new(owner_id, "owner/3f1c", unlock_at))?;
/// ```
pub struct TransactionalWriter<S> {
    store: S,
}

impl<S> TransactionalWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: TransactionalStore> TransactionalWriter<S> {
    /// Create a locked capsule and its pending outbox event.
    ///
    /// The content behind `new.storage_key` must already be stored; the
    /// writer does not check the blob store. Past unlock times are accepted.
    pub fn create(&self, new: NewCapsule) -> Result<Uuid, WriteError> {
        let now = Utc::now();
        let capsule = Capsule::create(new, now);
        let event = OutboxEvent::capsule_created(&capsule, now).map_err(WriteError::Encode)?;

        self.write(&capsule, &event)?;
        info!(
            capsule_id = %capsule.id,
            owner_id = %capsule.owner_id,
            outbox_id = %event.id,
            "capsule committed with outbox event"
        );
        Ok(capsule.id)
    }

    fn write(&self, capsule: &Capsule, event: &OutboxEvent) -> Result<(), WriteError> {
        let mut tx = self.store.begin().map_err(WriteError::Begin)?;
        let Err(cause) = stage(&mut tx, capsule, event) else {
            return Ok(());
        };

        match tx.rollback() {
            Ok(()) => {
                warn!(capsule_id = %capsule.id, error = %cause, "capsule write rolled back");
                Err(cause)
            }
            Err(rollback) => {
                error!(
                    capsule_id = %capsule.id,
                    outbox_id = %event.id,
                    storage_key = %capsule.storage_key,
                    error = %cause,
                    rollback_error = %rollback,
                    "capsule write outcome unknown, needs manual reconciliation"
                );
                Err(WriteError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback,
                })
            }
        }
    }
}

fn stage<T: Transaction>(
    tx: &mut T,
    capsule: &Capsule,
    event: &OutboxEvent,
) -> Result<(), WriteError> {
    tx.insert_capsule(capsule)
        .map_err(WriteError::CapsuleInsert)?;
    tx.insert_outbox_event(event)
        .map_err(WriteError::OutboxInsert)?;
    tx.commit().map_err(WriteError::Commit)
}
