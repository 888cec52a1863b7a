//! Bounded hand-off between backend threads and the single consumer
//!
//! Backend threads block in `deliver` until the consumer takes the event
//! (capacity 1 by default: backpressure instead of unbounded queuing). A
//! blocked hand-off wakes every poll interval to see whether the engine is
//! stopping, so teardown never waits on a consumer that stopped reading.

use crate::error::DeliveryError;
use crate::event::NormalizedEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default interval at which a blocked hand-off re-checks for shutdown
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create a delivery channel with the given capacity
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        EventSender {
            tx,
            poll_interval: DEFAULT_POLL_INTERVAL,
        },
        EventReceiver { rx },
    )
}

/// Producer half, cloned into each listener session
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<NormalizedEvent>,
    poll_interval: Duration,
}

impl EventSender {
    /// Override how often a blocked hand-off re-checks `abort`
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Hand an event to the consumer, blocking while the channel is full
    ///
    /// Gives up with `Aborted` once `abort` is raised, and with
    /// `Disconnected` if the consumer is gone.
    pub fn deliver(&self, event: NormalizedEvent, abort: &AtomicBool) -> Result<(), DeliveryError> {
        let mut pending = event;
        loop {
            match self.tx.send_timeout(pending, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(DeliveryError::Disconnected),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if abort.load(Ordering::Acquire) {
                        return Err(DeliveryError::Aborted);
                    }
                    pending = returned;
                }
            }
        }
    }
}

/// Consumer half
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<NormalizedEvent>,
}

impl EventReceiver {
    /// Block until the next event; `None` once every producer is gone
    pub fn recv(&self) -> Option<NormalizedEvent> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NormalizedEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<NormalizedEvent> {
        self.rx.try_recv().ok()
    }

    /// Collect events until none arrives for `quiet`
    pub fn drain_for(&self, quiet: Duration) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv_timeout(quiet) {
            events.push(event);
        }
        events
    }

    pub fn iter(&self) -> impl Iterator<Item = NormalizedEvent> + '_ {
        self.rx.iter()
    }
}
