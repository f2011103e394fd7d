use std::convert::Infallible;
use std::fmt;

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;
use tracing::info;

use super::record::OutboxEvent;

/// Hands outbox events to a message bus.
///
/// `Ok(())` must mean the bus accepted the event; the relay marks the event
/// published only after that confirmation.
pub trait OutboxPublisher {
    type Error: fmt::Display;

    fn publish(&mut self, event: &OutboxEvent) -> Result<(), Self::Error>;
}

/// Publishes by writing each event to the `tracing` log.
///
/// Used by the daemon when no broker is configured. Nothing can refuse the
/// event, so every publish is confirmed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        LogPublisher
    }
}

impl OutboxPublisher for LogPublisher {
    type Error = Infallible;

    fn publish(&mut self, event: &OutboxEvent) -> Result<(), Self::Error> {
        info!(
            outbox_id = %event.id,
            capsule_id = %event.capsule_id,
            event_type = %event.event_type,
            attempt = event.attempts.saturating_add(1),
            payload = %String::from_utf8_lossy(&event.payload),
            "outbox event published"
        );
        Ok(())
    }
}

/// A publisher that emits events via an EventEmitter for in-process subscribers.
#[cfg(feature = "emitter")]
pub struct LocalEmitterPublisher {
    emitter: EventEmitter,
}

#[cfg(feature = "emitter")]
impl LocalEmitterPublisher {
    pub fn new(emitter: EventEmitter) -> Self {
        LocalEmitterPublisher { emitter }
    }
}

#[cfg(feature = "emitter")]
impl OutboxPublisher for LocalEmitterPublisher {
    type Error = Infallible;

    fn publish(&mut self, event: &OutboxEvent) -> Result<(), Self::Error> {
        // payloads are JSON, so the lossy conversion is exact
        let payload = String::from_utf8_lossy(&event.payload).into_owned();
        self.emitter.emit(&event.event_type, payload);
        Ok(())
    }
}
