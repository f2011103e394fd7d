//! Capsule creation flow tying the blob store and the transactional writer
//! together.
//!
//! The HTTP layer (behind the `http` feature) is a thin adapter over
//! [`CapsuleService`]; any other transport can drive it the same way.

mod capsule_service;
mod error;

pub use capsule_service::{parse_unlock_at, CapsuleService, CreateCapsuleRequest};
pub use error::CreateCapsuleError;
