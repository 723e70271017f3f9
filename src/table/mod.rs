//! Lazy tables
//!
//! A [`Table`] is a lazily computed, cacheable collection of
//! [`WrappedItem`]s keyed by index. Static tables wrap in-memory data; every
//! other kind derives its rows from one or more parent tables:
//!
//! - [`TableSpec::Aggregated`] groups parent rows by the stringified value of
//!   an attribute, finishing rows only after the parent is fully seen
//! - [`TableSpec::Expanded`] splits an attribute on a delimiter
//! - [`TableSpec::Faceted`] keeps rows whose attribute equals a value
//! - [`TableSpec::Transposed`] turns one parent row's attributes into rows
//! - [`TableSpec::Connected`] joins two or more parents on index
//!
//! Tables live inside a [`crate::model::NetworkModel`] and are used through
//! [`TableHandle`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::watch;

use crate::error::{OrigraphError, OrigraphResult};
use crate::functions::FunctionRegistry;
use crate::item::{value_to_key, WrappedItem};
use log::warn;

mod build;
mod cache;
mod handle;
mod variants;

pub use build::{CancellationToken, IterateOptions};
pub(crate) use build::{PartialBuild, Step};
pub use cache::ItemCache;
pub use handle::{AttributeDetails, CurrentData, IndexDetails, TableHandle};

pub type TableId = String;

/// Structural options of a table; two derived tables with equal specs and
/// equal parents are the same table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TableSpec {
    #[serde(rename = "StaticTable")]
    Static { name: String, data: Vec<Value> },
    #[serde(rename = "StaticDictTable")]
    StaticDict { name: String, data: Map<String, Value> },
    #[serde(rename = "AggregatedTable")]
    Aggregated { attribute: String },
    #[serde(rename = "ExpandedTable")]
    Expanded { attribute: String, delimiter: String },
    #[serde(rename = "FacetedTable")]
    Faceted { attribute: String, value: Value },
    #[serde(rename = "TransposedTable")]
    Transposed { index: String },
    #[serde(rename = "ConnectedTable")]
    Connected,
}

impl TableSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            TableSpec::Static { .. } => "StaticTable",
            TableSpec::StaticDict { .. } => "StaticDictTable",
            TableSpec::Aggregated { .. } => "AggregatedTable",
            TableSpec::Expanded { .. } => "ExpandedTable",
            TableSpec::Faceted { .. } => "FacetedTable",
            TableSpec::Transposed { .. } => "TransposedTable",
            TableSpec::Connected => "ConnectedTable",
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, TableSpec::Static { .. } | TableSpec::StaticDict { .. })
    }

    /// Validate the parent list for this kind at construction time
    pub(crate) fn check_parents(&self, parents: &[TableId]) -> OrigraphResult<()> {
        let (expected, ok) = match self {
            TableSpec::Static { .. } | TableSpec::StaticDict { .. } => (0, parents.is_empty()),
            TableSpec::Connected => (2, parents.len() >= 2),
            _ => (1, parents.len() == 1),
        };
        if ok {
            Ok(())
        } else {
            Err(OrigraphError::ParentCount {
                kind: self.type_name(),
                expected,
                found: parents.len(),
            })
        }
    }

    pub(crate) fn validate(&self) -> OrigraphResult<()> {
        match self {
            TableSpec::Aggregated { attribute }
            | TableSpec::Faceted { attribute, .. }
            | TableSpec::Expanded { attribute, .. }
                if attribute.is_empty() =>
            {
                Err(OrigraphError::InvalidOption(format!(
                    "{} requires an attribute",
                    self.type_name()
                )))
            }
            TableSpec::Expanded { delimiter, .. } if delimiter.is_empty() => Err(
                OrigraphError::InvalidOption("ExpandedTable requires a delimiter".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Attribute bookkeeping and per-table functions, referenced by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub expected_attributes: BTreeSet<String>,
    pub observed_attributes: BTreeSet<String>,
    pub derived_attributes: BTreeMap<String, String>,
    pub suppressed_attributes: BTreeSet<String>,
    pub suppress_index: bool,
    pub index_filter: Option<String>,
    pub attribute_filters: BTreeMap<String, String>,
    /// Aggregated tables only
    pub reduce_attributes: BTreeMap<String, String>,
}

/// One table of a model
pub struct Table {
    pub(crate) table_id: TableId,
    pub(crate) spec: TableSpec,
    pub(crate) parent_table_ids: Vec<TableId>,
    pub(crate) derived_table_ids: BTreeSet<TableId>,
    pub(crate) config: TableConfig,
    pub(crate) annotations: BTreeMap<String, Value>,
    pub(crate) cache: Option<ItemCache>,
    pub(crate) partial: Option<PartialBuild>,
    /// Incremented on every reset, direct or cascaded
    pub(crate) resets: u64,
    pub(crate) builds_started: u64,
    pub(crate) progress: watch::Sender<u64>,
}

impl Table {
    pub(crate) fn new(table_id: TableId, spec: TableSpec, parent_table_ids: Vec<TableId>) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            table_id,
            spec,
            parent_table_ids,
            derived_table_ids: BTreeSet::new(),
            config: TableConfig::default(),
            annotations: BTreeMap::new(),
            cache: None,
            partial: None,
            resets: 0,
            builds_started: 0,
            progress,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn parent_table_ids(&self) -> &[TableId] {
        &self.parent_table_ids
    }

    pub fn derived_table_ids(&self) -> impl Iterator<Item = &TableId> {
        self.derived_table_ids.iter()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Wake everyone following this table's build
    pub(crate) fn notify_progress(&self) {
        self.progress.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Look up an item in the complete cache, then in the in-flight build
    pub(crate) fn lookup(&self, index: &str) -> Option<&WrappedItem> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.get(index))
            .or_else(|| self.partial.as_ref().and_then(|p| p.cache.get(index)))
    }

    pub(crate) fn lookup_mut(&mut self, index: &str) -> Option<&mut WrappedItem> {
        if let Some(cache) = self.cache.as_mut() {
            if cache.contains(index) {
                return cache.get_mut(index);
            }
        }
        self.partial
            .as_mut()
            .and_then(|partial| partial.cache.get_mut(index))
    }

    /// Apply derived attributes, observe attribute names, strip suppressed
    /// attributes and evaluate filters. Returns whether the item is kept.
    pub(crate) fn finish_item(&mut self, item: &mut WrappedItem, functions: &FunctionRegistry) -> bool {
        for (attribute, name) in &self.config.derived_attributes {
            match functions.derive(name) {
                Some(func) => {
                    let value = func(item);
                    item.set(attribute.clone(), value);
                }
                None => warn!(
                    "Table {}: derive function '{}' for '{}' is not registered",
                    self.table_id, name, attribute
                ),
            }
        }
        for attribute in item.attribute_names() {
            self.config.observed_attributes.insert(attribute);
        }
        for attribute in &self.config.suppressed_attributes {
            item.remove(attribute);
        }

        let mut keep = true;
        if let Some(name) = &self.config.index_filter {
            match functions.index_filter(name) {
                Some(func) => keep = func(&item.index),
                None => warn!(
                    "Table {}: index filter '{}' is not registered",
                    self.table_id, name
                ),
            }
        }
        for (attribute, name) in &self.config.attribute_filters {
            if !keep {
                break;
            }
            match functions.attribute_filter(name) {
                Some(func) => keep = func(item.get(attribute)),
                None => warn!(
                    "Table {}: filter '{}' for '{}' is not registered",
                    self.table_id, name, attribute
                ),
            }
        }
        keep
    }

    /// Every attribute name this table knows about
    pub fn attributes(&self) -> BTreeSet<String> {
        let config = &self.config;
        config
            .expected_attributes
            .iter()
            .chain(config.observed_attributes.iter())
            .chain(config.derived_attributes.keys())
            .chain(config.reduce_attributes.keys())
            .cloned()
            .collect()
    }
}

/// Display name for a table kind; `parent_names` are the parents' names
pub(crate) fn table_name(spec: &TableSpec, parent_names: &[String]) -> String {
    match spec {
        TableSpec::Static { name, .. } | TableSpec::StaticDict { name, .. } => name.clone(),
        TableSpec::Aggregated { attribute } => format!("↦{}", attribute),
        TableSpec::Expanded { attribute, .. } => format!("{}↤", attribute),
        TableSpec::Faceted { value, .. } => format!("[{}]", value_to_key(Some(value))),
        TableSpec::Transposed { index } => format!("ᵀ{}", index),
        TableSpec::Connected => parent_names.join("⨯"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parent_checks() {
        let aggregated = TableSpec::Aggregated {
            attribute: "a".to_string(),
        };
        assert!(aggregated.check_parents(&["0".to_string()]).is_ok());
        let err = aggregated.check_parents(&[]).unwrap_err();
        assert!(matches!(err, OrigraphError::ParentCount { found: 0, .. }));
        assert!(aggregated
            .check_parents(&["0".to_string(), "1".to_string()])
            .is_err());

        assert!(TableSpec::Connected.check_parents(&["0".to_string()]).is_err());
        assert!(TableSpec::Connected
            .check_parents(&["0".to_string(), "1".to_string(), "2".to_string()])
            .is_ok());
    }

    #[test]
    fn test_spec_serialization_is_tagged() {
        let spec = TableSpec::Expanded {
            attribute: "tags".to_string(),
            delimiter: ",".to_string(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "ExpandedTable");
        let back: TableSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_validate_rejects_empty_attribute() {
        let spec = TableSpec::Aggregated {
            attribute: String::new(),
        };
        assert!(spec.validate().is_err());
        let spec = TableSpec::Expanded {
            attribute: "tags".to_string(),
            delimiter: String::new(),
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_finish_item_applies_configuration() {
        let functions = FunctionRegistry::new();
        functions.register_derive("double", |item| {
            json!(item.get("v").and_then(Value::as_i64).unwrap_or(0) * 2)
        });
        functions.register_attribute_filter("big", |v| {
            v.and_then(Value::as_i64).is_some_and(|n| n > 4)
        });

        let mut table = Table::new("0".to_string(), TableSpec::Connected, vec![]);
        table
            .config
            .derived_attributes
            .insert("double".to_string(), "double".to_string());
        table.config.suppressed_attributes.insert("secret".to_string());
        table
            .config
            .attribute_filters
            .insert("double".to_string(), "big".to_string());

        let mut kept = WrappedItem::new("0", "0", json!({"v": 3, "secret": 1}));
        assert!(table.finish_item(&mut kept, &functions));
        assert_eq!(kept.row, json!({"v": 3, "double": 6}));
        assert!(table.config.observed_attributes.contains("secret"));

        let mut dropped = WrappedItem::new("0", "1", json!({"v": 1}));
        assert!(!table.finish_item(&mut dropped, &functions));
    }

    #[test]
    fn test_names() {
        assert_eq!(
            table_name(&TableSpec::Aggregated { attribute: "cat".to_string() }, &[]),
            "↦cat"
        );
        assert_eq!(
            table_name(
                &TableSpec::Faceted {
                    attribute: "cat".to_string(),
                    value: json!("a")
                },
                &[]
            ),
            "[a]"
        );
        assert_eq!(
            table_name(&TableSpec::Connected, &["a".to_string(), "b".to_string()]),
            "a⨯b"
        );
    }
}
