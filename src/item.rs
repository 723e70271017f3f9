//! Wrapped items: one row of a table plus its cross-table connections

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::class::ClassId;
use crate::table::TableId;

/// A row of a table, as handed out by iteration.
///
/// `connected_items` maps another table's id to the indexes of the items in
/// that table this row is linked to. Links are always recorded on both sides;
/// the model keeps them symmetric. Items handed to callers are snapshots, so
/// traversals re-read live connections from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedItem {
    pub index: String,
    pub table_id: TableId,
    /// Class attached to the owning table when the item was handed out
    pub class_id: Option<ClassId>,
    pub row: Value,
    pub connected_items: BTreeMap<TableId, Vec<String>>,
}

/// Address of an item inside a model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    pub table_id: TableId,
    pub index: String,
}

impl WrappedItem {
    pub fn new(table_id: impl Into<TableId>, index: impl Into<String>, row: Value) -> Self {
        Self {
            index: index.into(),
            table_id: table_id.into(),
            class_id: None,
            row,
            connected_items: BTreeMap::new(),
        }
    }

    /// `classId_index` when a class is attached, `tableId_index` otherwise
    pub fn instance_id(&self) -> String {
        match &self.class_id {
            Some(class_id) => format!("{}_{}", class_id, self.index),
            None => format!("{}_{}", self.table_id, self.index),
        }
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            table_id: self.table_id.clone(),
            index: self.index.clone(),
        }
    }

    /// Attribute lookup; rows that are not objects have no attributes
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.row.as_object().and_then(|row| row.get(attribute))
    }

    /// Set an attribute. A non-object row is first moved under `value`.
    pub fn set(&mut self, attribute: impl Into<String>, value: Value) {
        if !self.row.is_object() {
            let previous = std::mem::take(&mut self.row);
            let mut row = Map::new();
            if !previous.is_null() {
                row.insert("value".to_string(), previous);
            }
            self.row = Value::Object(row);
        }
        if let Value::Object(row) = &mut self.row {
            row.insert(attribute.into(), value);
        }
    }

    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.row.as_object_mut().and_then(|row| row.remove(attribute))
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.row
            .as_object()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Indexes of the items this one is connected to in `table_id`
    pub fn connected(&self, table_id: &str) -> &[String] {
        self.connected_items
            .get(table_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Record one side of a connection; duplicates are ignored
    pub(crate) fn add_connection(&mut self, table_id: &str, index: &str) {
        let list = self.connected_items.entry(table_id.to_string()).or_default();
        if !list.iter().any(|existing| existing == index) {
            list.push(index.to_string());
        }
    }

    pub(crate) fn remove_connection(&mut self, table_id: &str, index: &str) {
        if let Some(list) = self.connected_items.get_mut(table_id) {
            list.retain(|existing| existing != index);
            if list.is_empty() {
                self.connected_items.remove(table_id);
            }
        }
    }

    pub(crate) fn connection_refs(&self) -> Vec<ItemRef> {
        self.connected_items
            .iter()
            .flat_map(|(table_id, indexes)| {
                indexes.iter().map(move |index| ItemRef {
                    table_id: table_id.clone(),
                    index: index.clone(),
                })
            })
            .collect()
    }
}

/// Stringify a value the way group keys and facet names are formed
///
/// Strings are used verbatim, missing values become `undefined`, and
/// everything else uses its JSON text.
pub fn value_to_key(value: Option<&Value>) -> String {
    match value {
        None => crate::constants::MISSING_VALUE_KEY.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_id_prefers_class() {
        let mut item = WrappedItem::new("3", "7", json!({}));
        assert_eq!(item.instance_id(), "3_7");
        item.class_id = Some("1".to_string());
        assert_eq!(item.instance_id(), "1_7");
    }

    #[test]
    fn test_set_on_primitive_row() {
        let mut item = WrappedItem::new("0", "0", json!(5));
        item.set("double", json!(10));
        assert_eq!(item.row, json!({"value": 5, "double": 10}));
    }

    #[test]
    fn test_connections_are_deduplicated() {
        let mut item = WrappedItem::new("0", "0", json!({}));
        item.add_connection("1", "a");
        item.add_connection("1", "a");
        item.add_connection("2", "b");
        assert_eq!(item.connected("1"), &["a".to_string()]);
        assert_eq!(item.connection_refs().len(), 2);

        item.remove_connection("1", "a");
        assert!(item.connected("1").is_empty());
        assert!(!item.connected_items.contains_key("1"));
    }

    #[test]
    fn test_value_to_key() {
        assert_eq!(value_to_key(Some(&json!("a"))), "a");
        assert_eq!(value_to_key(Some(&json!(3))), "3");
        assert_eq!(value_to_key(Some(&json!(true))), "true");
        assert_eq!(value_to_key(None), "undefined");
    }
}
