use std::sync::Arc;

use time_capsule::{CapsuleService, CreateCapsuleError, CreateCapsuleRequest, InMemoryStore};
use uuid::Uuid;

use crate::support::{FailingBlobStore, WatchingBlobStore};

fn request() -> CreateCapsuleRequest {
    CreateCapsuleRequest {
        owner_id: Uuid::new_v4(),
        title: None,
        unlock_at: "2030-01-01T00:00:00Z".into(),
        content: b"see you in 2030".to_vec(),
    }
}

#[test]
fn upload_failure_writes_nothing() {
    let store = InMemoryStore::new();
    let service = CapsuleService::new(store.clone(), FailingBlobStore);

    let err = service.create(request()).unwrap_err();

    assert!(matches!(err, CreateCapsuleError::Upload(_)), "{err:?}");
    assert_eq!(err.status_code(), 500);
    assert!(!err.is_validation());
    assert_eq!(store.capsule_count().unwrap(), 0);
    assert_eq!(store.outbox_count().unwrap(), 0);
}

#[test]
fn upload_happens_before_metadata_write() {
    let store = InMemoryStore::new();
    let blobs = WatchingBlobStore::new(store.clone());
    let rows_seen = Arc::clone(&blobs.rows_seen);
    let service = CapsuleService::new(store.clone(), blobs);

    service.create(request()).unwrap();
    service.create(request()).unwrap();

    // each upload saw only the capsules committed before it
    assert_eq!(*rows_seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(store.capsule_count().unwrap(), 2);
    assert_eq!(store.outbox_count().unwrap(), 2);
    assert_eq!(service.blobs().blobs.len().unwrap(), 2);
}
