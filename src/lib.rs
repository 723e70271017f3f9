//! # Origraph
//!
//! A network of lazily evaluated tables with a node/edge graph overlay.
//! Static tables hold raw rows; derived tables (aggregated, expanded,
//! faceted, transposed, connected) compute their rows on demand from their
//! parents. Classes interpret a table's rows as generic items, nodes or
//! edges, and connecting classes derives the tables that join them.
//!
//! ## Core Components
//!
//! * `table` - Table kinds, caches and the shared build driver
//! * `class` - Generic, node and edge classes and their conversions
//! * `model` - A network model: tables, classes, ingestion and snapshots
//! * `traversal` - Item-level walks across class connections
//! * `registry` - Every model of a session, persisted to a key-value store
//! * `events` - Change notifications between models and the registry
//! * `functions` - Named user functions referenced by table configuration
//!
//! ```rust
//! use origraph::model::{NetworkModel, StaticTableOptions};
//! use serde_json::json;
//!
//! let model = NetworkModel::new("example");
//! let class = model
//!     .add_static_table(StaticTableOptions {
//!         name: "rows".to_string(),
//!         data: json!([{"kind": "a"}, {"kind": "b"}]),
//!         attributes: vec![],
//!     })
//!     .unwrap();
//! let by_kind = class.table().unwrap().aggregate("kind").unwrap();
//! assert_eq!(by_kind.type_name().unwrap(), "AggregatedTable");
//! ```

pub mod class;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod functions;
pub mod item;
pub mod model;
pub mod registry;
pub mod store;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing_utils;
pub mod traversal;

// Re-export main types for convenience
pub use class::{ClassHandle, ClassId, ClassKind, Side};
pub use config::OrigraphConfig;
pub use error::{OrigraphError, OrigraphResult};
pub use events::{MessageBus, ModelDeleted, ModelUpdated, TableReset};
pub use functions::FunctionRegistry;
pub use item::WrappedItem;
pub use model::NetworkModel;
pub use registry::Origraph;
pub use store::{KeyValueStore, MemoryStore, SledStore};
pub use table::{IterateOptions, TableHandle, TableId, TableSpec};
pub use traversal::{EdgeTriple, Hyperedge, TraversalOptions};
