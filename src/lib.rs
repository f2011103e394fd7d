mod blob;
mod capsule;
mod outbox;
mod service;
mod store;
mod unlock;
mod writer;

#[cfg(test)]
mod test_log;

#[cfg(feature = "http")]
pub mod http;

pub use blob::{BlobError, BlobStore, FsBlobStore, InMemoryBlobStore};
pub use capsule::{Capsule, NewCapsule, UnlockOutcome};
#[cfg(feature = "emitter")]
pub use outbox::LocalEmitterPublisher;
pub use outbox::{
    CapsuleCreated, DrainResult, LogPublisher, OutboxEvent, OutboxPublisher, OutboxRelay,
    OutboxRelayThread, OutboxStatus, ProcessOneResult, RelayStats,
};
pub use service::{parse_unlock_at, CapsuleService, CreateCapsuleError, CreateCapsuleRequest};
pub use store::{
    CapsuleRepository, InMemoryStore, InMemoryTransaction, OutboxRepository, SqliteStore,
    SqliteTransaction, StoreError, Transaction, TransactionalStore,
};
pub use unlock::{UnlockError, Unlocker};
pub use writer::{TransactionalWriter, WriteError};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
