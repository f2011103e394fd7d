use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use time_capsule::{
    CapsuleRepository, InMemoryStore, NewCapsule, OutboxRepository, OutboxStatus,
    TransactionalStore, TransactionalWriter,
};
use uuid::Uuid;

use crate::support::{sqlite_file, unlock_2030};

const WRITERS: usize = 8;
const PER_WRITER: usize = 5;

fn create_concurrently<S>(writer: Arc<TransactionalWriter<S>>, owner: Uuid) -> Vec<Uuid>
where
    S: TransactionalStore + 'static,
{
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                (0..PER_WRITER)
                    .map(|i| {
                        writer
                            .create(NewCapsule::new(
                                owner,
                                format!("{}/{}-{}", owner, w, i),
                                unlock_2030(),
                            ))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect()
}

fn assert_paired<S>(store: &S, owner: Uuid, ids: &[Uuid])
where
    S: CapsuleRepository + OutboxRepository,
{
    let total = WRITERS * PER_WRITER;
    let capsules = store.capsules_for_owner(owner).unwrap();
    let events = store.outbox_by_status(OutboxStatus::Pending).unwrap();
    assert_eq!(capsules.len(), total);
    assert_eq!(events.len(), total);

    let capsule_ids: HashSet<Uuid> = capsules.iter().map(|c| c.id).collect();
    let event_capsules: HashSet<Uuid> = events.iter().map(|e| e.capsule_id).collect();
    let returned: HashSet<Uuid> = ids.iter().copied().collect();
    assert_eq!(capsule_ids.len(), total);
    assert_eq!(capsule_ids, event_capsules);
    assert_eq!(capsule_ids, returned);
}

#[test]
fn concurrent_creations_pair_one_to_one_in_sqlite() {
    let (_dir, store) = sqlite_file();
    let owner = Uuid::new_v4();

    let ids = create_concurrently(Arc::new(TransactionalWriter::new(store.clone())), owner);

    assert_paired(&store, owner, &ids);
}

#[test]
fn concurrent_creations_pair_one_to_one_in_memory() {
    let store = InMemoryStore::new();
    let owner = Uuid::new_v4();

    let ids = create_concurrently(Arc::new(TransactionalWriter::new(store.clone())), owner);

    assert_paired(&store, owner, &ids);
}
