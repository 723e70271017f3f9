//! Synchronous message bus built on std::sync::mpsc

use super::error::{MessageBusError, MessageBusResult};
use super::{Event, EventType};
use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Consumer handle for receiving events of a specific type
pub struct Consumer<T: EventType> {
    receiver: Receiver<T>,
}

impl<T: EventType> Consumer<T> {
    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<T, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive every event that is already queued
    pub fn drain(&mut self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

/// Internal registry for managing event subscribers
struct SubscriberRegistry {
    // Key: event type name, Value: type-erased senders
    subscribers: HashMap<&'static str, Vec<Box<dyn Any + Send>>>,
}

impl SubscriberRegistry {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    fn add_subscriber<T: EventType>(&mut self, sender: Sender<T>) {
        self.subscribers
            .entry(T::type_id())
            .or_default()
            .push(Box::new(sender));
    }

    /// Sends to every live subscriber, dropping the ones whose consumer is gone.
    /// Returns (delivered, failed).
    fn send_all<T: EventType>(&mut self, event: &T) -> (usize, usize) {
        let Some(senders) = self.subscribers.get_mut(T::type_id()) else {
            return (0, 0);
        };
        let before = senders.len();
        senders.retain(|boxed| match boxed.downcast_ref::<Sender<T>>() {
            Some(sender) => sender.send(event.clone()).is_ok(),
            None => false,
        });
        (senders.len(), before - senders.len())
    }

    fn count<T: EventType>(&self) -> usize {
        self.subscribers.get(T::type_id()).map_or(0, Vec::len)
    }
}

/// Pub/sub bus shared between a registry and its models
#[derive(Clone)]
pub struct MessageBus {
    registry: Arc<Mutex<SubscriberRegistry>>,
}

impl MessageBus {
    /// Create a new message bus instance
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(SubscriberRegistry::new())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, SubscriberRegistry> {
        // A panic while holding the registry cannot leave it half-updated
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: EventType>(&self) -> Consumer<T> {
        let (sender, receiver) = mpsc::channel();
        self.registry().add_subscriber(sender);
        Consumer { receiver }
    }

    /// Publish an event to all subscribers of that event type
    ///
    /// Subscribers whose consumer was dropped are unregistered; their count
    /// is reported as an error after the live subscribers were served.
    pub fn publish<T: EventType>(&self, event: T) -> MessageBusResult<()> {
        let (delivered, failed) = self.registry().send_all(&event);
        if failed > 0 {
            return Err(MessageBusError::SendFailed {
                reason: format!(
                    "{} of {} subscribers of {} were disconnected",
                    failed,
                    delivered + failed,
                    T::type_id()
                ),
            });
        }
        Ok(())
    }

    /// Convenience method to publish a unified Event
    pub fn publish_event(&self, event: Event) -> MessageBusResult<()> {
        match event {
            Event::ModelUpdated(e) => self.publish(e),
            Event::TableReset(e) => self.publish(e),
            Event::ModelDeleted(e) => self.publish(e),
        }
    }

    /// Get the number of subscribers for a given event type
    pub fn subscriber_count<T: EventType>(&self) -> usize {
        self.registry().count::<T>()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}
