use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capsule::Capsule;

/// Payload of a `CapsuleCreated` outbox event.
///
/// Carries everything the unlock pipeline needs, so a consumer never reads
/// the capsule row back to learn what happened.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CapsuleCreated {
    pub capsule_id: Uuid,
    pub owner_id: Uuid,
    pub unlock_at: DateTime<Utc>,
}

impl CapsuleCreated {
    pub const EVENT_TYPE: &'static str = "CapsuleCreated";

    /// JSON bytes, as stored in the outbox `payload` column.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<&Capsule> for CapsuleCreated {
    fn from(capsule: &Capsule) -> Self {
        CapsuleCreated {
            capsule_id: capsule.id,
            owner_id: capsule.owner_id,
            unlock_at: capsule.unlock_at,
        }
    }
}
