use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use super::{CapsuleRepository, OutboxRepository, StoreError, Transaction, TransactionalStore};
use crate::capsule::{Capsule, UnlockOutcome};
use crate::outbox::{OutboxEvent, OutboxStatus};

#[derive(Default)]
struct Tables {
    capsules: HashMap<Uuid, Capsule>,
    outbox: Vec<OutboxEvent>,
}

/// Store kept entirely in process memory.
///
/// Cloning creates another handle to the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capsule_count(&self) -> Result<usize, StoreError> {
        Ok(self.read("capsule count")?.capsules.len())
    }

    pub fn outbox_count(&self) -> Result<usize, StoreError> {
        Ok(self.read("outbox count")?.outbox.len())
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn update_outbox<T>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut OutboxEvent) -> T,
    ) -> Result<Option<T>, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        Ok(tables
            .outbox
            .iter_mut()
            .find(|event| event.id == id)
            .map(apply))
    }
}

/// Buffers writes and applies them under one write lock at commit.
///
/// Each insert is checked against the committed tables and the writes
/// already staged, so a constraint violation surfaces at the insert that
/// caused it. `commit` checks everything again, since another unit may have
/// committed in between.
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    capsules: Vec<Capsule>,
    outbox: Vec<OutboxEvent>,
    finished: bool,
}

impl InMemoryTransaction<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::TransactionFinished)
        } else {
            Ok(())
        }
    }

    fn check(&self, tables: &Tables) -> Result<(), StoreError> {
        for (index, capsule) in self.capsules.iter().enumerate() {
            check_capsule(tables, &self.capsules[..index], capsule)?;
        }
        for (index, event) in self.outbox.iter().enumerate() {
            check_outbox_event(tables, &self.capsules, &self.outbox[..index], event)?;
        }
        Ok(())
    }
}

fn check_capsule(tables: &Tables, staged: &[Capsule], capsule: &Capsule) -> Result<(), StoreError> {
    if tables.capsules.contains_key(&capsule.id) || staged.iter().any(|c| c.id == capsule.id) {
        return Err(StoreError::Constraint(format!(
            "duplicate capsule id {}",
            capsule.id
        )));
    }
    let key_taken = tables
        .capsules
        .values()
        .chain(staged)
        .any(|existing| existing.storage_key == capsule.storage_key);
    if key_taken {
        return Err(StoreError::Constraint(format!(
            "duplicate storage key {}",
            capsule.storage_key
        )));
    }
    Ok(())
}

fn check_outbox_event(
    tables: &Tables,
    staged_capsules: &[Capsule],
    staged: &[OutboxEvent],
    event: &OutboxEvent,
) -> Result<(), StoreError> {
    let duplicate = tables
        .outbox
        .iter()
        .chain(staged)
        .any(|existing| existing.id == event.id || existing.capsule_id == event.capsule_id);
    if duplicate {
        return Err(StoreError::Constraint(format!(
            "duplicate outbox event {} for capsule {}",
            event.id, event.capsule_id
        )));
    }
    if !tables.capsules.contains_key(&event.capsule_id)
        && !staged_capsules.iter().any(|c| c.id == event.capsule_id)
    {
        return Err(StoreError::Constraint(format!(
            "outbox event {} references unknown capsule {}",
            event.id, event.capsule_id
        )));
    }
    Ok(())
}

impl Transaction for InMemoryTransaction<'_> {
    fn insert_capsule(&mut self, capsule: &Capsule) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_capsule(&*self.store.read("capsule insert")?, &self.capsules, capsule)?;
        self.capsules.push(capsule.clone());
        Ok(())
    }

    fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_outbox_event(
            &*self.store.read("outbox insert")?,
            &self.capsules,
            &self.outbox,
            event,
        )?;
        self.outbox.push(event.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut tables = self
            .store
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;
        self.check(&tables)?;

        for capsule in self.capsules.drain(..) {
            tables.capsules.insert(capsule.id, capsule);
        }
        tables.outbox.append(&mut self.outbox);
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.capsules.clear();
        self.outbox.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                capsules = self.capsules.len(),
                outbox_events = self.outbox.len(),
                "rolled back unfinished transaction"
            );
        }
    }
}

impl TransactionalStore for InMemoryStore {
    type Tx<'a> = InMemoryTransaction<'a>;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        Ok(InMemoryTransaction {
            store: self,
            capsules: Vec::new(),
            outbox: Vec::new(),
            finished: false,
        })
    }
}

impl CapsuleRepository for InMemoryStore {
    fn get_capsule(&self, id: Uuid) -> Result<Option<Capsule>, StoreError> {
        Ok(self.read("capsule read")?.capsules.get(&id).cloned())
    }

    fn capsules_for_owner(&self, owner_id: Uuid) -> Result<Vec<Capsule>, StoreError> {
        let tables = self.read("capsule read")?;
        let mut capsules: Vec<Capsule> = tables
            .capsules
            .values()
            .filter(|capsule| capsule.owner_id == owner_id)
            .cloned()
            .collect();
        capsules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(capsules)
    }

    fn due_capsules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Capsule>, StoreError> {
        let tables = self.read("capsule read")?;
        let mut due: Vec<Capsule> = tables
            .capsules
            .values()
            .filter(|capsule| !capsule.is_unlocked && capsule.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.unlock_at.cmp(&b.unlock_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    fn mark_unlocked(&self, id: Uuid, now: DateTime<Utc>) -> Result<UnlockOutcome, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("capsule write"))?;
        let Some(capsule) = tables.capsules.get_mut(&id) else {
            return Ok(UnlockOutcome::NotFound);
        };
        if capsule.is_unlocked {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }
        if !capsule.is_due(now) {
            return Ok(UnlockOutcome::NotYetDue {
                unlock_at: capsule.unlock_at,
            });
        }
        capsule.is_unlocked = true;
        Ok(UnlockOutcome::Unlocked)
    }
}

impl OutboxRepository for InMemoryStore {
    fn outbox_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxEvent>, StoreError> {
        let tables = self.read("outbox read")?;
        let mut events: Vec<OutboxEvent> = tables
            .outbox
            .iter()
            .filter(|event| event.status == status)
            .cloned()
            .collect();
        sort_oldest_first(&mut events);
        Ok(events)
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut pending = self.outbox_by_status(OutboxStatus::Pending)?;
        pending.truncate(limit);
        Ok(pending)
    }

    fn get_outbox_event(&self, id: Uuid) -> Result<Option<OutboxEvent>, StoreError> {
        let tables = self.read("outbox read")?;
        Ok(tables.outbox.iter().find(|event| event.id == id).cloned())
    }

    fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .update_outbox(id, |event| event.publish_confirmed(now))?
            .unwrap_or(false))
    }

    fn record_publish_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxStatus>, StoreError> {
        Ok(self
            .update_outbox(id, |event| event.publish_failed(error, max_attempts, now))?
            .flatten())
    }
}

// commit order can differ from creation order under concurrent writers
fn sort_oldest_first(events: &mut [OutboxEvent]) {
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
