//! Row sources of the table kinds
//!
//! Each kind turns its spec and parents into a stream of pending rows. The
//! build driver wraps, connects and finishes them; aggregation is the one
//! kind that needs its own two-pass source.

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

use super::build::Step;
use super::{TableId, TableSpec};
use crate::error::{OrigraphError, OrigraphResult};
use crate::item::{ItemRef, WrappedItem};
use crate::model::{ModelState, NetworkModel, WeakModel};

/// A row produced by a source, not yet wrapped
#[derive(Debug, Clone)]
pub(crate) struct PendingItem {
    pub(crate) index: String,
    pub(crate) row: Value,
    /// Items in other tables this row is derived from
    pub(crate) connect_to: Vec<ItemRef>,
}

impl PendingItem {
    fn new(index: impl Into<String>, row: Value, connect_to: Vec<ItemRef>) -> Self {
        Self {
            index: index.into(),
            row,
            connect_to,
        }
    }
}

type PendingStream = BoxStream<'static, OrigraphResult<Step<PendingItem>>>;

pub(crate) enum BuildSource {
    Rows(PendingStream),
    /// Accumulate every parent row, then finish the groups one by one
    Aggregate {
        parent: BoxStream<'static, OrigraphResult<Step<WrappedItem>>>,
        finishing: Option<usize>,
    },
}

impl BuildSource {
    pub(crate) fn for_table(model: &NetworkModel, state: &ModelState, table_id: &str) -> OrigraphResult<Self> {
        let table = state.table(table_id)?;
        let parents = table.parent_table_ids.clone();
        table.spec.check_parents(&parents)?;
        let first_parent = parents.first().cloned().unwrap_or_default();

        let source = match &table.spec {
            TableSpec::Static { data, .. } => {
                let rows: Vec<OrigraphResult<Step<PendingItem>>> = data
                    .iter()
                    .enumerate()
                    .map(|(position, row)| {
                        Ok(Step::Item(PendingItem::new(position.to_string(), row.clone(), vec![])))
                    })
                    .collect();
                BuildSource::Rows(stream::iter(rows).boxed())
            }
            TableSpec::StaticDict { data, .. } => {
                let rows: Vec<OrigraphResult<Step<PendingItem>>> = data
                    .iter()
                    .map(|(key, row)| Ok(Step::Item(PendingItem::new(key.clone(), row.clone(), vec![]))))
                    .collect();
                BuildSource::Rows(stream::iter(rows).boxed())
            }
            TableSpec::Aggregated { .. } => BuildSource::Aggregate {
                parent: model.parent_steps(&first_parent),
                finishing: None,
            },
            TableSpec::Expanded {
                attribute,
                delimiter,
            } => BuildSource::Rows(expanded_rows(
                model.parent_steps(&first_parent),
                attribute.clone(),
                delimiter.clone(),
            )),
            TableSpec::Faceted { attribute, value } => BuildSource::Rows(faceted_rows(
                model.parent_steps(&first_parent),
                attribute.clone(),
                value.clone(),
            )),
            TableSpec::Transposed { index } => {
                BuildSource::Rows(transposed_rows(model.downgrade(), first_parent, index.clone()))
            }
            TableSpec::Connected => BuildSource::Rows(connected_rows(model.downgrade(), parents)),
        };
        Ok(source)
    }
}

/// Text that an expanded attribute is split on; missing values split to `""`
fn expansion_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn single_attribute_row(attribute: &str, value: &str) -> Value {
    let mut row = serde_json::Map::new();
    row.insert(attribute.to_string(), Value::String(value.to_string()));
    Value::Object(row)
}

fn expanded_rows(
    parent: BoxStream<'static, OrigraphResult<Step<WrappedItem>>>,
    attribute: String,
    delimiter: String,
) -> PendingStream {
    let mut counter = 0usize;
    parent
        .map(move |step| match step {
            Ok(Step::Item(parent_item)) => {
                let text = expansion_text(parent_item.get(&attribute));
                text.split(delimiter.as_str())
                    .map(|piece| {
                        let index = counter.to_string();
                        counter += 1;
                        Ok(Step::Item(PendingItem::new(
                            index,
                            single_attribute_row(&attribute, piece),
                            vec![parent_item.item_ref()],
                        )))
                    })
                    .collect::<Vec<_>>()
            }
            Ok(Step::Interrupted) => vec![Ok(Step::Interrupted)],
            Err(e) => vec![Err(e)],
        })
        .flat_map(stream::iter)
        .boxed()
}

fn faceted_rows(
    parent: BoxStream<'static, OrigraphResult<Step<WrappedItem>>>,
    attribute: String,
    value: Value,
) -> PendingStream {
    parent
        .filter_map(move |step| {
            let pending = match step {
                Ok(Step::Item(parent_item)) => {
                    if parent_item.get(&attribute) == Some(&value) {
                        Some(Ok(Step::Item(PendingItem::new(
                            parent_item.index.clone(),
                            parent_item.row.clone(),
                            vec![parent_item.item_ref()],
                        ))))
                    } else {
                        None
                    }
                }
                Ok(Step::Interrupted) => Some(Ok(Step::Interrupted)),
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(pending)
        })
        .boxed()
}

fn transposed_rows(model: WeakModel, parent_id: TableId, index: String) -> PendingStream {
    stream::once(async move {
        let Some(model) = model.upgrade() else {
            return vec![Ok(Step::Interrupted)];
        };
        match model.build_cache(&parent_id).await {
            Ok(true) => {}
            Ok(false) => return vec![Ok(Step::Interrupted)],
            Err(e) => return vec![Err(e)],
        }
        let parent_item = model.read(|state| {
            Ok(state
                .table(&parent_id)?
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&index))
                .cloned())
        });
        match parent_item {
            Ok(Some(parent_item)) => transpose_row(&parent_item),
            Ok(None) => vec![],
            Err(e) => vec![Err(e)],
        }
    })
    .flat_map(stream::iter)
    .boxed()
}

/// Each attribute of the parent row becomes a row: objects as they are,
/// anything else under `value`
fn transpose_row(parent_item: &WrappedItem) -> Vec<OrigraphResult<Step<PendingItem>>> {
    let Some(row) = parent_item.row.as_object() else {
        return vec![];
    };
    row.iter()
        .map(|(attribute, value)| {
            let row = if value.is_object() {
                value.clone()
            } else {
                json!({ "value": value })
            };
            Ok(Step::Item(PendingItem::new(
                attribute.clone(),
                row,
                vec![parent_item.item_ref()],
            )))
        })
        .collect()
}

fn connected_rows(model: WeakModel, parents: Vec<TableId>) -> PendingStream {
    stream::once(async move {
        let Some(model) = model.upgrade() else {
            return vec![Ok(Step::Interrupted)];
        };
        for parent_id in &parents {
            match model.build_cache(parent_id).await {
                Ok(true) => {}
                Ok(false) => return vec![Ok(Step::Interrupted)],
                Err(e) => return vec![Err(e)],
            }
        }
        match model.read(|state| join_on_index(state, &parents)) {
            Ok(Some(rows)) => rows.into_iter().map(|row| Ok(Step::Item(row))).collect(),
            Ok(None) => vec![Ok(Step::Interrupted)],
            Err(e) => vec![Err(e)],
        }
    })
    .flat_map(stream::iter)
    .boxed()
}

/// Indexes of the first parent present in every parent, in the first
/// parent's order. `None` if a parent lost its cache meanwhile.
fn join_on_index(state: &ModelState, parents: &[TableId]) -> OrigraphResult<Option<Vec<PendingItem>>> {
    let mut caches = Vec::with_capacity(parents.len());
    for parent_id in parents {
        match &state.table(parent_id)?.cache {
            Some(cache) => caches.push(cache),
            None => return Ok(None),
        }
    }
    let Some((first, rest)) = caches.split_first() else {
        return Err(OrigraphError::ParentCount {
            kind: "ConnectedTable",
            expected: 2,
            found: 0,
        });
    };
    let rows = first
        .indexes()
        .iter()
        .filter(|index| rest.iter().all(|cache| cache.contains(index)))
        .map(|index| {
            let connect_to = parents
                .iter()
                .map(|parent_id| ItemRef {
                    table_id: parent_id.clone(),
                    index: index.to_string(),
                })
                .collect();
            PendingItem::new(index.to_string(), json!({}), connect_to)
        })
        .collect();
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_text() {
        assert_eq!(expansion_text(None), "");
        assert_eq!(expansion_text(Some(&json!(null))), "");
        assert_eq!(expansion_text(Some(&json!("x,y"))), "x,y");
        assert_eq!(expansion_text(Some(&json!(12))), "12");
    }

    #[test]
    fn test_transpose_row() {
        let parent = WrappedItem::new("0", "3", json!({"a": 1, "b": {"c": 2}}));
        let rows: Vec<_> = transpose_row(&parent)
            .into_iter()
            .map(|row| match row.unwrap() {
                Step::Item(pending) => pending,
                Step::Interrupted => panic!("unexpected interruption"),
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, "a");
        assert_eq!(rows[0].row, json!({"value": 1}));
        assert_eq!(rows[1].row, json!({"c": 2}));
        assert_eq!(rows[1].connect_to, vec![parent.item_ref()]);
    }
}
