//! Relational storage for capsules and their outbox events.
//!
//! - [`TransactionalStore`] / [`Transaction`] - the atomic unit the writer uses
//! - [`CapsuleRepository`] - capsule reads and the one-way unlock
//! - [`OutboxRepository`] - what the relay needs to drain the outbox
//!
//! Two implementations are provided: [`SqliteStore`] for durable storage and
//! [`InMemoryStore`] for tests and embedding.

mod error;
mod in_memory;
mod sqlite;
mod traits;

pub use error::StoreError;
pub use in_memory::{InMemoryStore, InMemoryTransaction};
pub use sqlite::{SqliteStore, SqliteTransaction};
pub use traits::{CapsuleRepository, OutboxRepository, Transaction, TransactionalStore};
