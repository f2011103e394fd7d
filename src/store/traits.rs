use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::StoreError;
use crate::capsule::{Capsule, UnlockOutcome};
use crate::outbox::{OutboxEvent, OutboxStatus};

/// One atomic unit of work against a store.
///
/// Writes become visible to other readers together at `commit`, or not at
/// all. Dropping a transaction that was neither committed nor rolled back
/// rolls it back.
pub trait Transaction {
    fn insert_capsule(&mut self, capsule: &Capsule) -> Result<(), StoreError>;

    fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every write in this unit. Succeeds without doing anything if
    /// the store has already abandoned the unit.
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// A store able to open atomic units of work.
pub trait TransactionalStore: Send + Sync {
    type Tx<'a>: Transaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;
}

/// Reads and the single mutation (unlock) the capsule table allows.
pub trait CapsuleRepository: Send + Sync {
    fn get_capsule(&self, id: Uuid) -> Result<Option<Capsule>, StoreError>;

    /// Capsules owned by `owner_id`, oldest first.
    fn capsules_for_owner(&self, owner_id: Uuid) -> Result<Vec<Capsule>, StoreError>;

    /// Locked capsules whose unlock time is at or before `now`, earliest
    /// unlock time first.
    fn due_capsules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Capsule>, StoreError>;

    /// Flip `is_unlocked` to `true` if the capsule is due.
    ///
    /// Idempotent: unlocking an unlocked capsule reports
    /// [`UnlockOutcome::AlreadyUnlocked`] rather than failing.
    fn mark_unlocked(&self, id: Uuid, now: DateTime<Utc>) -> Result<UnlockOutcome, StoreError>;
}

/// Outbox operations used by the relay.
pub trait OutboxRepository: Send + Sync {
    /// Events with the given status, oldest first.
    fn outbox_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Up to `limit` pending events, oldest first.
    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError>;

    fn get_outbox_event(&self, id: Uuid) -> Result<Option<OutboxEvent>, StoreError>;

    /// Move a pending event to `Published`. Returns `false` if the event was
    /// not pending (already published, failed, or unknown).
    fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Record a failed publish attempt against a pending event, moving it to
    /// `Failed` once `max_attempts` is reached.
    ///
    /// Returns the resulting status, or `None` if the event was not pending.
    fn record_publish_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxStatus>, StoreError>;
}
