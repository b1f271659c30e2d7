//! Event channel built on crossbeam-channel.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::Event;

/// Sends events from the core library.
///
/// Cheap to clone and safe to share between worker threads.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Wrap a raw crossbeam sender
    pub fn new(sender: Sender<Event>) -> Self {
        Self { inner: sender }
    }

    /// Send an event.
    ///
    /// Dropped silently once the receiver is gone, so progress reporting
    /// stays optional.
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Receives events from the core library
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event is received
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Iterate until every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Take every event already queued
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

/// Constructor for sender/receiver pairs
pub struct EventChannel;

impl EventChannel {
    /// Create an unbounded event channel
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }

    /// Create a bounded event channel.
    ///
    /// Senders block when `capacity` events are pending.
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// A sender whose events go nowhere
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}
