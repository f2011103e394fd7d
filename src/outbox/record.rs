use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::CapsuleCreated;
use crate::capsule::Capsule;

/// Delivery state of an outbox event.
///
/// Only the relay moves an event out of `Pending`, and only forward:
/// `Pending -> Published` or `Pending -> Failed`.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {}", other)),
        }
    }
}

/// Durable notification that a capsule was created, drained by the relay.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub capsule_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Build the pending `CapsuleCreated` event for a capsule.
    pub fn capsule_created(
        capsule: &Capsule,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let payload = CapsuleCreated::from(capsule).encode()?;
        Ok(OutboxEvent {
            id: Uuid::new_v4(),
            capsule_id: capsule.id,
            event_type: CapsuleCreated::EVENT_TYPE.to_string(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now.trunc_subsecs(3),
            published_at: None,
            failed_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    /// Decode the payload back into the event it announces.
    pub fn decode(&self) -> Result<CapsuleCreated, serde_json::Error> {
        CapsuleCreated::decode(&self.payload)
    }

    /// Apply a confirmed publish. No-op unless pending.
    pub(crate) fn publish_confirmed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = OutboxStatus::Published;
        self.published_at = Some(now.trunc_subsecs(3));
        self.last_error = None;
        true
    }

    /// Apply a failed publish attempt. Returns the resulting status, or
    /// `None` when the event was not pending.
    pub(crate) fn publish_failed(
        &mut self,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Option<OutboxStatus> {
        if !self.is_pending() {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        if self.attempts >= max_attempts {
            self.status = OutboxStatus::Failed;
            self.failed_at = Some(now.trunc_subsecs(3));
        }
        Some(self.status)
    }
}
