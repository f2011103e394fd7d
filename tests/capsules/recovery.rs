use time_capsule::{
    CapsuleRepository, NewCapsule, OutboxPublisher, OutboxRelay, OutboxRepository, OutboxStatus,
    TransactionalWriter, UnlockOutcome, Unlocker,
};
use uuid::Uuid;

use crate::support::{reopen, sqlite_file, unlock_2030, RecordingPublisher};

#[test]
fn committed_event_survives_restart_and_is_relayed() {
    let (dir, store) = sqlite_file();
    let id = TransactionalWriter::new(store)
        .create(NewCapsule::new(Uuid::new_v4(), "U1/abc", unlock_2030()))
        .unwrap();
    // process dies before the relay runs

    let store = reopen(&dir);
    let pending = store.outbox_by_status(OutboxStatus::Pending).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].capsule_id, id);

    let publisher = RecordingPublisher::new();
    let mut relay = OutboxRelay::new(publisher.clone());
    let result = relay.relay_once(&store).unwrap();

    assert_eq!(result.published, 1);
    assert_eq!(publisher.delivered_ids(), vec![id]);
    let event = store.get_outbox_event(pending[0].id).unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Published);
    assert!(event.published_at.is_some());
}

#[test]
fn crash_between_publish_and_mark_redelivers() {
    let (dir, store) = sqlite_file();
    let id = TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/redeliver", unlock_2030()))
        .unwrap();

    // the bus accepts the event, then the relay dies before recording it
    let mut publisher = RecordingPublisher::new();
    let event = store.pending_outbox(1).unwrap().remove(0);
    publisher.publish(&event).unwrap();
    drop(store);

    let store = reopen(&dir);
    assert_eq!(store.pending_outbox(10).unwrap().len(), 1);

    let mut relay = OutboxRelay::new(publisher.clone());
    relay.relay_once(&store).unwrap();

    assert_eq!(publisher.delivered_ids(), vec![id, id]);
    assert!(store.pending_outbox(10).unwrap().is_empty());

    // consumers tolerate the duplicate
    let unlocker = Unlocker::new(store.clone());
    let delivered = publisher.delivered.lock().unwrap().clone();
    let outcomes: Vec<_> = delivered
        .iter()
        .map(|event| unlocker.handle_payload(&event.payload, unlock_2030()).unwrap())
        .collect();
    assert_eq!(
        outcomes,
        vec![UnlockOutcome::Unlocked, UnlockOutcome::AlreadyUnlocked]
    );
    assert!(store.get_capsule(id).unwrap().unwrap().is_unlocked);
}

#[test]
fn failed_attempts_are_remembered_across_restart() {
    let (dir, store) = sqlite_file();
    TransactionalWriter::new(store.clone())
        .create(NewCapsule::new(Uuid::new_v4(), "o/flaky", unlock_2030()))
        .unwrap();

    let mut relay = OutboxRelay::new(RecordingPublisher::failing_first(2)).with_max_attempts(3);
    assert_eq!(relay.relay_once(&store).unwrap().retried, 1);
    assert_eq!(relay.relay_once(&store).unwrap().retried, 1);
    drop(store);

    let store = reopen(&dir);
    let event = store.pending_outbox(1).unwrap().remove(0);
    assert_eq!(event.attempts, 2);
    assert!(event.last_error.unwrap().contains("broker unavailable"));

    assert_eq!(relay.relay_once(&store).unwrap().published, 1);
    assert!(store.outbox_by_status(OutboxStatus::Failed).unwrap().is_empty());
}
