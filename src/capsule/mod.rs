//! Capsule metadata: the business row the outbox announces.

mod model;

pub use model::{Capsule, NewCapsule, UnlockOutcome};
