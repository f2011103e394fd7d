use time_capsule::{
    CapsuleRepository, InMemoryStore, NewCapsule, OutboxRepository, OutboxStatus, SqliteStore,
    TransactionalStore, TransactionalWriter, WriteError,
};
use uuid::Uuid;

use crate::support::{sqlite_file, unlock_2030, FaultyStore, Faults};

#[test]
fn example_capsule_writes_one_pending_event() {
    let (_dir, store) = sqlite_file();
    let writer = TransactionalWriter::new(store.clone());
    let owner = Uuid::new_v4();

    let id = writer
        .create(NewCapsule::new(owner, "U1/abc", unlock_2030()))
        .unwrap();

    let capsule = store.get_capsule(id).unwrap().unwrap();
    assert_eq!(capsule.owner_id, owner);
    assert_eq!(capsule.storage_key, "U1/abc");
    assert_eq!(capsule.unlock_at, unlock_2030());
    assert!(!capsule.is_unlocked);

    let pending = store.outbox_by_status(OutboxStatus::Pending).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].capsule_id, id);
    assert_eq!(pending[0].event_type, "CapsuleCreated");
    assert_eq!(pending[0].decode().unwrap().capsule_id, id);

    assert_eq!(store.capsule_count().unwrap(), 1);
    assert_eq!(store.outbox_count().unwrap(), 1);
}

#[test]
fn outbox_insert_failure_leaves_no_rows_in_sqlite() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .connection()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_outbox BEFORE INSERT ON outbox_events
             BEGIN SELECT RAISE(ABORT, 'outbox unavailable'); END;",
        )
        .unwrap();
    let writer = TransactionalWriter::new(store.clone());

    let err = writer
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap_err();

    assert!(matches!(err, WriteError::OutboxInsert(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("failed to create outbox event"));
    assert_eq!(store.capsule_count().unwrap(), 0);
    assert_eq!(store.outbox_count().unwrap(), 0);

    // the connection is usable again once the failed unit is gone
    store
        .connection()
        .unwrap()
        .execute_batch("DROP TRIGGER reject_outbox;")
        .unwrap();
    writer
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap();
    assert_eq!(store.capsule_count().unwrap(), 1);
    assert_eq!(store.outbox_count().unwrap(), 1);
}

#[test]
fn outbox_insert_failure_leaves_no_rows_in_memory() {
    let store = FaultyStore::new(
        InMemoryStore::new(),
        Faults {
            outbox_insert: true,
            ..Faults::default()
        },
    );
    let writer = TransactionalWriter::new(store);

    let err = writer
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap_err();

    assert!(matches!(err, WriteError::OutboxInsert(_)));
    let inner = writer.store().inner();
    assert_eq!(inner.capsule_count().unwrap(), 0);
    assert_eq!(inner.outbox_count().unwrap(), 0);
}

#[test]
fn commit_failure_leaves_no_rows() {
    let (_dir, store) = sqlite_file();
    let writer = TransactionalWriter::new(FaultyStore::new(
        store.clone(),
        Faults {
            commit: true,
            ..Faults::default()
        },
    ));

    let err = writer
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap_err();

    assert!(matches!(err, WriteError::Commit(_)));
    assert_eq!(store.capsule_count().unwrap(), 0);
    assert_eq!(store.outbox_count().unwrap(), 0);
}

#[test]
fn failed_rollback_is_reported_as_indeterminate() {
    let writer = TransactionalWriter::new(FaultyStore::new(
        InMemoryStore::new(),
        Faults {
            outbox_insert: true,
            rollback: true,
            ..Faults::default()
        },
    ));

    let err = writer
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap_err();

    match &err {
        WriteError::RollbackFailed { cause, .. } => {
            assert!(matches!(**cause, WriteError::OutboxInsert(_)));
        }
        other => panic!("expected RollbackFailed, got {other:?}"),
    }
    assert!(err.is_indeterminate());
    assert!(!err.is_retryable());
}

#[test]
fn duplicate_storage_key_is_rejected_atomically() {
    let (_dir, sqlite) = sqlite_file();
    assert_duplicate_key_rejected(TransactionalWriter::new(InMemoryStore::new()), |s: &InMemoryStore| {
        (s.capsule_count().unwrap(), s.outbox_count().unwrap())
    });
    assert_duplicate_key_rejected(TransactionalWriter::new(sqlite), |s: &SqliteStore| {
        (s.capsule_count().unwrap(), s.outbox_count().unwrap())
    });
}

fn assert_duplicate_key_rejected<S: TransactionalStore>(
    writer: TransactionalWriter<S>,
    counts: impl Fn(&S) -> (usize, usize),
) {
    writer
        .create(NewCapsule::new(Uuid::new_v4(), "shared/key", unlock_2030()))
        .unwrap();

    let err = writer
        .create(NewCapsule::new(Uuid::new_v4(), "shared/key", unlock_2030()))
        .unwrap_err();

    assert!(matches!(err, WriteError::CapsuleInsert(_)), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(counts(writer.store()), (1, 1));
}
