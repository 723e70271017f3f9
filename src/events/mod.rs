//! # In-process event bus
//!
//! Models publish change notifications here instead of scheduling timers.
//! The [`crate::registry::Origraph`] registry consumes [`ModelUpdated`]
//! events on its explicit `flush()` tick, which batches any number of
//! notifications into a single persistence write.
//!
//! ```rust
//! use origraph::events::{MessageBus, ModelUpdated};
//!
//! let bus = MessageBus::new();
//! let mut consumer = bus.subscribe::<ModelUpdated>();
//! bus.publish(ModelUpdated::new("model-1")).unwrap();
//! assert_eq!(consumer.try_recv().unwrap().model_id, "model-1");
//! ```

use serde::{Deserialize, Serialize};

mod bus;
mod error;

pub use bus::{Consumer, MessageBus};
pub use error::{MessageBusError, MessageBusResult};

/// Trait for types that can be used as events in the message bus
pub trait EventType: Clone + Send + 'static {
    /// Get the unique type identifier for this event type
    fn type_id() -> &'static str;
}

/// A model's tables or classes changed structurally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelUpdated {
    pub model_id: String,
}

impl ModelUpdated {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl EventType for ModelUpdated {
    fn type_id() -> &'static str {
        "ModelUpdated"
    }
}

/// A table dropped its cached items, either directly or through a cascade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableReset {
    pub model_id: String,
    pub table_id: String,
}

impl TableReset {
    pub fn new(model_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl EventType for TableReset {
    fn type_id() -> &'static str {
        "TableReset"
    }
}

/// A model was removed from the registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDeleted {
    pub model_id: String,
}

impl ModelDeleted {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl EventType for ModelDeleted {
    fn type_id() -> &'static str {
        "ModelDeleted"
    }
}

/// Unified event enumeration that encompasses all event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    ModelUpdated(ModelUpdated),
    TableReset(TableReset),
    ModelDeleted(ModelDeleted),
}

impl Event {
    /// Get the event type as a string identifier
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ModelUpdated(_) => ModelUpdated::type_id(),
            Event::TableReset(_) => TableReset::type_id(),
            Event::ModelDeleted(_) => ModelDeleted::type_id(),
        }
    }
}
