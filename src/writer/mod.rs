//! Transactional writer: capsule row + outbox row in one atomic unit.

mod error;
mod transactional;

pub use error::WriteError;
pub use transactional::TransactionalWriter;
