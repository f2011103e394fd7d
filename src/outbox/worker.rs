use chrono::Utc;
use tracing::{debug, warn};

use super::publisher::OutboxPublisher;
use super::record::{OutboxEvent, OutboxStatus};
use crate::store::{OutboxRepository, StoreError};

/// Result of a batch drain operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    /// Pending events read and attempted.
    pub claimed: usize,
    pub published: usize,
    /// Publish failed; the event stays pending for another pass.
    pub retried: usize,
    /// Publish failed for the last allowed time; the event is now failed.
    pub failed: usize,
}

/// Result of relaying a single event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOneResult {
    /// Whether a publish was attempted.
    pub did_work: bool,
    pub published: bool,
    pub retried: bool,
    pub failed: bool,
}

/// Drains pending outbox events to a publisher.
///
/// Delivery is at-least-once: an event is marked published only after the
/// publisher confirms it, so a crash in between leaves the event pending
/// and it is published again on the next pass.
pub struct OutboxRelay<P> {
    publisher: P,
    batch_size: usize,
    max_attempts: u32,
}

impl<P> OutboxRelay<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            batch_size: 100,
            max_attempts: 5,
        }
    }

    /// Set the batch size (max events read per drain).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the number of failed publishes after which an event is failed.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }
}

impl<P: OutboxPublisher> OutboxRelay<P> {
    /// Publish one event and record the outcome in the store.
    ///
    /// Events that are not pending are left alone.
    pub fn relay_event<R>(
        &mut self,
        repo: &R,
        event: &OutboxEvent,
    ) -> Result<ProcessOneResult, StoreError>
    where
        R: OutboxRepository + ?Sized,
    {
        if !event.is_pending() {
            return Ok(ProcessOneResult::default());
        }

        match self.publisher.publish(event) {
            Ok(()) => {
                let published = repo.mark_published(event.id, Utc::now())?;
                debug!(outbox_id = %event.id, capsule_id = %event.capsule_id, published, "outbox event relayed");
                Ok(ProcessOneResult {
                    did_work: true,
                    published,
                    ..Default::default()
                })
            }
            Err(err) => {
                let error_msg = err.to_string();
                let status = repo.record_publish_failure(
                    event.id,
                    &error_msg,
                    self.max_attempts,
                    Utc::now(),
                )?;
                warn!(
                    outbox_id = %event.id,
                    attempt = event.attempts + 1,
                    max_attempts = self.max_attempts,
                    error = %error_msg,
                    "outbox publish failed"
                );
                Ok(ProcessOneResult {
                    did_work: true,
                    retried: status == Some(OutboxStatus::Pending),
                    failed: status == Some(OutboxStatus::Failed),
                    ..Default::default()
                })
            }
        }
    }

    /// Relay up to `batch_size` pending events, oldest first.
    pub fn relay_once<R>(&mut self, repo: &R) -> Result<DrainResult, StoreError>
    where
        R: OutboxRepository + ?Sized,
    {
        let mut result = DrainResult::default();

        for event in repo.pending_outbox(self.batch_size)? {
            let processed = self.relay_event(repo, &event)?;
            if processed.did_work {
                result.claimed += 1;
            }
            if processed.published {
                result.published += 1;
            }
            if processed.retried {
                result.retried += 1;
            }
            if processed.failed {
                result.failed += 1;
            }
        }

        Ok(result)
    }
}
