//! Capsule + outbox integration tests.
//!
//! Covers the write path end to end:
//! - capsule and outbox rows commit together or not at all
//! - concurrent creations stay paired 1:1
//! - committed events survive a restart and are relayed afterwards
//! - unlocking is idempotent under replayed delivery
//! - content is uploaded before any metadata is written

mod atomicity;
mod concurrency;
mod recovery;
mod service;
mod unlock;
