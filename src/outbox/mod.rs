//! Outbox - capsule creation events and their relay to a message bus.
//!
//! The outbox pattern has two distinct phases:
//! 1. **Commit phase** (see `writer`) - the capsule row and its
//!    [`OutboxEvent`] are committed in one transaction
//! 2. **Relay phase** (this module) - [`OutboxRelay`] drains pending events to
//!    an [`OutboxPublisher`], moving each to `Published` or, after repeated
//!    failures, `Failed`
//!
//! ## Example
//!
//! ```ignore
//! use time_capsule::{LogPublisher, OutboxRelay};
//!
//! let mut relay = OutboxRelay::new(LogPublisher::default()).with_max_attempts(5);
//! let result = relay.relay_once(&store)?;
//! println!("published {}", result.published);
//! ```

mod payload;
mod publisher;
mod record;
mod thread;
mod worker;

pub use payload::CapsuleCreated;

// Publishers
#[cfg(feature = "emitter")]
pub use publisher::LocalEmitterPublisher;
pub use publisher::{LogPublisher, OutboxPublisher};

pub use record::{OutboxEvent, OutboxStatus};

// Relay
pub use thread::{OutboxRelayThread, RelayStats};
pub use worker::{DrainResult, OutboxRelay, ProcessOneResult};
