use chrono::Duration;
use time_capsule::{
    CapsuleRepository, NewCapsule, OutboxRelay, TransactionalWriter, UnlockOutcome, Unlocker,
};
use uuid::Uuid;

use crate::support::{reopen, sqlite_file, unlock_2030, RecordingPublisher};

#[test]
fn double_unlock_is_a_no_op() {
    let (_dir, store) = sqlite_file();
    let id = TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap();
    let at = unlock_2030() + Duration::seconds(1);

    assert_eq!(store.mark_unlocked(id, at).unwrap(), UnlockOutcome::Unlocked);
    let first = store.get_capsule(id).unwrap().unwrap();
    assert_eq!(
        store.mark_unlocked(id, at).unwrap(),
        UnlockOutcome::AlreadyUnlocked
    );
    let second = store.get_capsule(id).unwrap().unwrap();

    assert!(second.is_unlocked);
    assert_eq!(first, second);
}

#[test]
fn unlock_is_refused_before_time_and_for_unknown_ids() {
    let (_dir, store) = sqlite_file();
    let id = TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap();

    assert_eq!(
        store
            .mark_unlocked(id, unlock_2030() - Duration::days(1))
            .unwrap(),
        UnlockOutcome::NotYetDue {
            unlock_at: unlock_2030()
        }
    );
    assert_eq!(
        store.mark_unlocked(Uuid::new_v4(), unlock_2030()).unwrap(),
        UnlockOutcome::NotFound
    );
    assert!(!store.get_capsule(id).unwrap().unwrap().is_unlocked);
}

#[test]
fn unlocked_state_is_durable() {
    let (dir, store) = sqlite_file();
    let id = TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/1", unlock_2030()))
        .unwrap();
    store.mark_unlocked(id, unlock_2030()).unwrap();
    drop(store);

    let store = reopen(&dir);
    assert!(store.get_capsule(id).unwrap().unwrap().is_unlocked);
    assert_eq!(
        store.mark_unlocked(id, unlock_2030()).unwrap(),
        UnlockOutcome::AlreadyUnlocked
    );
}

#[test]
fn relayed_events_drive_the_unlocker() {
    let (_dir, store) = sqlite_file();
    let writer = TransactionalWriter::new(store.clone());
    let owner = Uuid::new_v4();
    let past = writer
        .create(NewCapsule::new(owner, "o/past", unlock_2030() - Duration::days(365)))
        .unwrap();
    let future = writer
        .create(NewCapsule::new(owner, "o/future", unlock_2030()))
        .unwrap();

    let publisher = RecordingPublisher::new();
    OutboxRelay::new(publisher.clone())
        .relay_once(&store)
        .unwrap();

    let unlocker = Unlocker::new(store.clone());
    let now = unlock_2030() - Duration::days(1);
    for event in publisher.delivered.lock().unwrap().iter() {
        unlocker.handle_payload(&event.payload, now).unwrap();
    }

    assert!(store.get_capsule(past).unwrap().unwrap().is_unlocked);
    assert!(!store.get_capsule(future).unwrap().unwrap().is_unlocked);

    // the not-yet-due capsule is picked up by a later sweep
    assert_eq!(unlocker.sweep(unlock_2030(), 10).unwrap(), 1);
    assert!(store.get_capsule(future).unwrap().unwrap().is_unlocked);
}

#[test]
fn sub_millisecond_unlock_time_is_never_early() {
    let (_dir, store) = sqlite_file();
    let requested = unlock_2030() + Duration::microseconds(900);
    let id = TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/precise", requested))
        .unwrap();

    let early = unlock_2030() + Duration::microseconds(400);
    assert!(matches!(
        store.mark_unlocked(id, early).unwrap(),
        UnlockOutcome::NotYetDue { .. }
    ));
    assert!(store.get_capsule(id).unwrap().unwrap().unlock_at >= requested);

    assert_eq!(
        store.mark_unlocked(id, unlock_2030() + Duration::milliseconds(1)).unwrap(),
        UnlockOutcome::Unlocked
    );
}
