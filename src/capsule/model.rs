use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable metadata for one time capsule.
///
/// Every field except `is_unlocked` is fixed at creation. `is_unlocked`
/// starts `false` and is flipped once by the unlock pipeline through
/// [`CapsuleRepository::mark_unlocked`](crate::CapsuleRepository::mark_unlocked).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Capsule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub storage_key: String,
    pub unlock_at: DateTime<Utc>,
    pub is_unlocked: bool,
    pub created_at: DateTime<Utc>,
}

impl Capsule {
    /// Materialize a locked capsule from validated input.
    ///
    /// Timestamps are kept to milliseconds, the precision the stores keep.
    /// `unlock_at` rounds up so a capsule never opens before the requested time.
    pub(crate) fn create(new: NewCapsule, now: DateTime<Utc>) -> Self {
        Capsule {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title,
            storage_key: new.storage_key,
            unlock_at: ceil_millis(new.unlock_at),
            is_unlocked: false,
            created_at: now.trunc_subsecs(3),
        }
    }

    /// Whether the unlock time has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.unlock_at <= now
    }
}

fn ceil_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at.trunc_subsecs(3);
    if truncated < at {
        truncated + Duration::milliseconds(1)
    } else {
        truncated
    }
}

/// Validated input for the transactional writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCapsule {
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub storage_key: String,
    pub unlock_at: DateTime<Utc>,
}

impl NewCapsule {
    pub fn new(owner_id: Uuid, storage_key: impl Into<String>, unlock_at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            title: None,
            storage_key: storage_key.into(),
            unlock_at,
        }
    }

    /// Set the display title. Blank titles are stored as no title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = if title.trim().is_empty() {
            None
        } else {
            Some(title)
        };
        self
    }
}

/// Result of asking a store to unlock a capsule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The capsule was locked and is now unlocked.
    Unlocked,
    /// The capsule was already unlocked; nothing changed.
    AlreadyUnlocked,
    /// The unlock time has not been reached; nothing changed.
    NotYetDue { unlock_at: DateTime<Utc> },
    NotFound,
}
