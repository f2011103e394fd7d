//! Downstream unlock consumer.
//!
//! Consumes `CapsuleCreated` events published by the relay and flips
//! capsules to unlocked once their unlock time has passed. Delivery is
//! at-least-once, so handling the same event twice must be harmless.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::capsule::UnlockOutcome;
use crate::outbox::CapsuleCreated;
use crate::store::{CapsuleRepository, StoreError};

#[derive(Debug)]
pub enum UnlockError {
    Decode(serde_json::Error),
    Store(StoreError),
}

impl fmt::Display for UnlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockError::Decode(e) => write!(f, "undecodable capsule event: {}", e),
            UnlockError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl Error for UnlockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UnlockError::Decode(e) => Some(e),
            UnlockError::Store(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for UnlockError {
    fn from(err: serde_json::Error) -> Self {
        UnlockError::Decode(err)
    }
}

impl From<StoreError> for UnlockError {
    fn from(err: StoreError) -> Self {
        UnlockError::Store(err)
    }
}

/// Idempotent unlocker over a capsule repository.
pub struct Unlocker<R> {
    repo: R,
}

impl<R: CapsuleRepository> Unlocker<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Handle one delivered `CapsuleCreated` payload.
    ///
    /// Returns [`UnlockOutcome::NotYetDue`] for capsules whose time has not
    /// come; the caller reschedules those (or leaves them to [`Self::sweep`]).
    pub fn handle_payload(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<UnlockOutcome, UnlockError> {
        let event = CapsuleCreated::decode(payload)?;
        self.handle(&event, now)
    }

    pub fn handle(
        &self,
        event: &CapsuleCreated,
        now: DateTime<Utc>,
    ) -> Result<UnlockOutcome, UnlockError> {
        let outcome = self.repo.mark_unlocked(event.capsule_id, now)?;
        debug!(capsule_id = %event.capsule_id, ?outcome, "capsule event handled");
        Ok(outcome)
    }

    /// Unlock up to `limit` due capsules. Returns how many were flipped.
    pub fn sweep(&self, now: DateTime<Utc>, limit: usize) -> Result<usize, UnlockError> {
        let mut unlocked = 0;
        for capsule in self.repo.due_capsules(now, limit)? {
            if self.repo.mark_unlocked(capsule.id, now)? == UnlockOutcome::Unlocked {
                unlocked += 1;
            }
        }
        if unlocked > 0 {
            info!(unlocked, "due capsules unlocked");
        }
        Ok(unlocked)
    }
}
