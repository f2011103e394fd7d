//! Background relay thread for outbox draining.
//!
//! The thread polls the store for pending events on a fixed interval,
//! independent of request handling.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use super::publisher::OutboxPublisher;
use super::worker::OutboxRelay;
use crate::store::OutboxRepository;

/// Statistics from the relay thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    pub polls: usize,
    pub store_errors: usize,
}

/// A background thread that drains the outbox through an [`OutboxRelay`].
///
/// ## Example
///
/// ```ignore
/// use std::time::Duration;
/// use time_capsule::{LogPublisher, OutboxRelay, OutboxRelayThread, SqliteStore};
///
/// let store = SqliteStore::open("capsules.db")?;
/// let relay = OutboxRelay::new(LogPublisher::new()).with_max_attempts(5);
/// let relay_thread = OutboxRelayThread::spawn(store.clone(), relay, Duration::from_secs(1));
///
/// // ... serve requests ...
///
/// let stats = relay_thread.stop();
/// ```
pub struct OutboxRelayThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl OutboxRelayThread {
    /// Spawn the relay loop.
    ///
    /// The store handle must be `Clone`-shared with the writers (both
    /// provided stores share their tables across clones). Store errors are
    /// logged and polling continues.
    pub fn spawn<R, P>(repo: R, mut relay: OutboxRelay<P>, poll_interval: Duration) -> Self
    where
        R: OutboxRepository + 'static,
        P: OutboxPublisher + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();
            info!(
                interval_ms = interval_millis(poll_interval),
                batch_size = relay.batch_size(),
                max_attempts = relay.max_attempts(),
                "outbox relay started"
            );

            loop {
                stats.polls += 1;

                match relay.relay_once(&repo) {
                    Ok(result) => {
                        stats.published += result.published;
                        stats.retried += result.retried;
                        stats.failed += result.failed;
                    }
                    Err(err) => {
                        stats.store_errors += 1;
                        error!(error = %err, "outbox relay pass failed");
                    }
                }

                match stop_rx.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(published = stats.published, polls = stats.polls, "outbox relay stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the relay to stop and wait for it to finish.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            RelayStats::default()
        }
    }

    /// Signal the relay to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

fn interval_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for OutboxRelayThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
