use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{IterateOptions, Table, TableId, TableSpec};
use crate::error::{OrigraphError, OrigraphResult};
use crate::item::{value_to_key, WrappedItem};
use crate::model::{sorted_ids, NetworkModel};

/// Cheap reference to one table of a model
#[derive(Clone, Debug)]
pub struct TableHandle {
    model: NetworkModel,
    table_id: TableId,
}

/// Whatever a table holds right now, complete or not
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentData {
    pub data: Vec<WrappedItem>,
    /// index -> position in `data`
    pub lookup: HashMap<String, usize>,
    pub complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDetails {
    pub name: String,
    pub expected: bool,
    pub observed: bool,
    pub derived: bool,
    pub suppressed: bool,
    pub filtered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDetails {
    pub suppressed: bool,
    pub filtered: bool,
}

impl TableHandle {
    pub(crate) fn new(model: NetworkModel, table_id: TableId) -> Self {
        Self { model, table_id }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn model(&self) -> &NetworkModel {
        &self.model
    }

    pub fn name(&self) -> OrigraphResult<String> {
        self.model.read(|state| state.table_name(&self.table_id))
    }

    pub fn spec(&self) -> OrigraphResult<TableSpec> {
        self.model
            .read(|state| Ok(state.table(&self.table_id)?.spec.clone()))
    }

    pub fn type_name(&self) -> OrigraphResult<&'static str> {
        self.model
            .read(|state| Ok(state.table(&self.table_id)?.spec.type_name()))
    }

    pub fn parent_tables(&self) -> OrigraphResult<Vec<TableHandle>> {
        let parents = self
            .model
            .read(|state| Ok(state.table(&self.table_id)?.parent_table_ids.clone()))?;
        Ok(self.handles(parents))
    }

    pub fn derived_tables(&self) -> OrigraphResult<Vec<TableHandle>> {
        let derived = self
            .model
            .read(|state| Ok(sorted_ids(&state.table(&self.table_id)?.derived_table_ids)))?;
        Ok(self.handles(derived))
    }

    fn handles(&self, table_ids: Vec<TableId>) -> Vec<TableHandle> {
        table_ids
            .into_iter()
            .map(|table_id| TableHandle::new(self.model.clone(), table_id))
            .collect()
    }

    /// True while derived tables or classes reference this table
    pub fn in_use(&self) -> OrigraphResult<bool> {
        Ok(self
            .model
            .read(|state| state.table_in_use(&self.table_id))?
            .is_some())
    }

    pub fn iterate(&self, options: IterateOptions) -> BoxStream<'static, OrigraphResult<WrappedItem>> {
        self.model.iterate(&self.table_id, options)
    }

    /// Wait for a complete cache; `false` if a reset interrupted the build
    pub async fn build_cache(&self) -> OrigraphResult<bool> {
        self.model.build_cache(&self.table_id).await
    }

    pub fn has_cache(&self) -> OrigraphResult<bool> {
        self.model
            .read(|state| Ok(state.table(&self.table_id)?.has_cache()))
    }

    pub async fn count_rows(&self) -> OrigraphResult<usize> {
        self.build_cache().await?;
        self.model.read(|state| {
            Ok(state
                .table(&self.table_id)?
                .cache
                .as_ref()
                .map_or(0, |cache| cache.len()))
        })
    }

    /// Find an item, iterating only as far as needed
    pub async fn get_item(&self, index: &str) -> OrigraphResult<Option<WrappedItem>> {
        let known = self.model.read(|state| {
            let table = state.table(&self.table_id)?;
            Ok(table.lookup(index).map(|item| state.expose(item)))
        })?;
        if known.is_some() {
            return Ok(known);
        }
        let mut items = self.iterate(IterateOptions::default());
        while let Some(item) = items.next().await {
            let item = item?;
            if item.index == index {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    pub fn current_data(&self) -> OrigraphResult<CurrentData> {
        self.model.read(|state| {
            let table = state.table(&self.table_id)?;
            let (cache, complete) = match (&table.cache, &table.partial) {
                (Some(cache), _) => (Some(cache), true),
                (None, Some(partial)) => (Some(&partial.cache), false),
                (None, None) => (None, false),
            };
            let mut current = CurrentData {
                complete,
                ..CurrentData::default()
            };
            for item in cache.into_iter().flat_map(|cache| cache.iter()) {
                current.lookup.insert(item.index.clone(), current.data.len());
                current.data.push(state.expose(item));
            }
            Ok(current)
        })
    }

    pub fn attributes(&self) -> OrigraphResult<Vec<String>> {
        self.model
            .read(|state| Ok(state.table(&self.table_id)?.attributes().into_iter().collect()))
    }

    pub fn get_attribute_details(&self) -> OrigraphResult<BTreeMap<String, AttributeDetails>> {
        self.model.read(|state| {
            let config = &state.table(&self.table_id)?.config;
            let mut details: BTreeMap<String, AttributeDetails> = BTreeMap::new();
            for name in &config.expected_attributes {
                attribute_entry(&mut details, name).expected = true;
            }
            for name in &config.observed_attributes {
                attribute_entry(&mut details, name).observed = true;
            }
            for name in config.derived_attributes.keys().chain(config.reduce_attributes.keys()) {
                attribute_entry(&mut details, name).derived = true;
            }
            for name in &config.suppressed_attributes {
                attribute_entry(&mut details, name).suppressed = true;
            }
            for name in config.attribute_filters.keys() {
                attribute_entry(&mut details, name).filtered = true;
            }
            Ok(details)
        })
    }

    pub fn get_index_details(&self) -> OrigraphResult<IndexDetails> {
        self.model.read(|state| {
            let config = &state.table(&self.table_id)?.config;
            Ok(IndexDetails {
                suppressed: config.suppress_index,
                filtered: config.index_filter.is_some(),
            })
        })
    }

    pub fn annotations(&self) -> OrigraphResult<BTreeMap<String, Value>> {
        self.model
            .read(|state| Ok(state.table(&self.table_id)?.annotations.clone()))
    }

    pub fn set_annotation(&self, key: impl Into<String>, value: Value) -> OrigraphResult<()> {
        let key = key.into();
        self.model.mutate(|state| {
            state.table_mut(&self.table_id)?.annotations.insert(key, value);
            state.touch();
            Ok(())
        })
    }

    /// Drop this table's caches and those of every derived table
    pub fn reset(&self) -> OrigraphResult<()> {
        self.model.reset_table(&self.table_id)
    }

    pub fn delete(&self) -> OrigraphResult<()> {
        self.model.delete_table(&self.table_id)
    }

    fn derive(&self, spec: TableSpec, extra_parents: &[TableId]) -> OrigraphResult<TableHandle> {
        let mut parents = vec![self.table_id.clone()];
        parents.extend(extra_parents.iter().cloned());
        let table_id = self.model.mutate(|state| state.derive_table(spec, parents))?;
        Ok(TableHandle::new(self.model.clone(), table_id))
    }

    /// One row per distinct value of `attribute`
    pub fn aggregate(&self, attribute: &str) -> OrigraphResult<TableHandle> {
        self.derive(
            TableSpec::Aggregated {
                attribute: attribute.to_string(),
            },
            &[],
        )
    }

    pub fn expand(&self, attribute: &str, delimiter: &str) -> OrigraphResult<TableHandle> {
        self.derive(
            TableSpec::Expanded {
                attribute: attribute.to_string(),
                delimiter: delimiter.to_string(),
            },
            &[],
        )
    }

    /// One faceted table per listed value
    pub fn closed_facet(&self, attribute: &str, values: &[Value]) -> OrigraphResult<Vec<TableHandle>> {
        values
            .iter()
            .map(|value| {
                self.derive(
                    TableSpec::Faceted {
                        attribute: attribute.to_string(),
                        value: value.clone(),
                    },
                    &[],
                )
            })
            .collect()
    }

    /// Faceted tables for the values found while iterating (up to `limit`
    /// parent rows). Rows missing the attribute produce no facet.
    pub fn open_facet(&self, attribute: &str, limit: Option<usize>) -> BoxStream<'static, OrigraphResult<TableHandle>> {
        let handle = self.clone();
        let attribute = attribute.to_string();
        let mut seen = HashSet::new();
        self.iterate(IterateOptions {
            reset: false,
            limit,
        })
        .filter_map(move |item| {
            let facet = match item {
                Ok(item) => match item.get(&attribute) {
                    Some(value) if seen.insert(value_to_key(Some(value))) => Some(handle.derive(
                        TableSpec::Faceted {
                            attribute: attribute.clone(),
                            value: value.clone(),
                        },
                        &[],
                    )),
                    _ => None,
                },
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(facet)
        })
        .boxed()
    }

    pub fn closed_transpose(&self, indexes: &[String]) -> OrigraphResult<Vec<TableHandle>> {
        indexes
            .iter()
            .map(|index| self.derive(TableSpec::Transposed { index: index.clone() }, &[]))
            .collect()
    }

    /// Transposed tables for the indexes found while iterating
    pub fn open_transpose(&self, limit: Option<usize>) -> BoxStream<'static, OrigraphResult<TableHandle>> {
        let handle = self.clone();
        self.iterate(IterateOptions {
            reset: false,
            limit,
        })
        .map(move |item| {
            item.and_then(|item| handle.derive(TableSpec::Transposed { index: item.index }, &[]))
        })
        .boxed()
    }

    /// Join this table with others on index
    pub fn connect(&self, others: &[TableHandle]) -> OrigraphResult<TableHandle> {
        let others: Vec<TableId> = others.iter().map(|other| other.table_id.clone()).collect();
        self.derive(TableSpec::Connected, &others)
    }

    /// Apply a configuration change, then reset
    fn configure(&self, change: impl FnOnce(&mut Table) -> OrigraphResult<()>) -> OrigraphResult<()> {
        self.model.mutate(|state| {
            change(state.table_mut(&self.table_id)?)?;
            state.touch();
            state.reset_cascade(&self.table_id)
        })
    }

    fn function_name(&self, attribute: &str) -> String {
        format!("{}:{}:{}", self.model.model_id(), self.table_id, attribute)
    }

    /// Compute `attribute` for every row with a closure
    pub fn derive_attribute<F>(&self, attribute: &str, func: F) -> OrigraphResult<()>
    where
        F: Fn(&WrappedItem) -> Value + Send + Sync + 'static,
    {
        let name = self.function_name(attribute);
        self.model.functions().register_derive(name.clone(), func);
        self.derive_attribute_named(attribute, &name)
    }

    /// Compute `attribute` with a function registered under `name`
    pub fn derive_attribute_named(&self, attribute: &str, name: &str) -> OrigraphResult<()> {
        self.configure(|table| {
            table
                .config
                .derived_attributes
                .insert(attribute.to_string(), name.to_string());
            Ok(())
        })
    }

    /// Hide an attribute from finished rows; `None` hides the index
    pub fn suppress_attribute(&self, attribute: Option<&str>) -> OrigraphResult<()> {
        self.configure(|table| {
            match attribute {
                Some(attribute) => {
                    table.config.suppressed_attributes.insert(attribute.to_string());
                }
                None => table.config.suppress_index = true,
            }
            Ok(())
        })
    }

    pub fn unsuppress_all_attributes(&self) -> OrigraphResult<()> {
        self.configure(|table| {
            table.config.suppressed_attributes.clear();
            table.config.suppress_index = false;
            Ok(())
        })
    }

    /// Keep only rows whose `attribute` passes `func`
    pub fn add_filter<F>(&self, attribute: &str, func: F) -> OrigraphResult<()>
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        let name = self.function_name(attribute);
        self.model.functions().register_attribute_filter(name.clone(), func);
        self.add_filter_named(attribute, &name)
    }

    pub fn add_filter_named(&self, attribute: &str, name: &str) -> OrigraphResult<()> {
        self.configure(|table| {
            table
                .config
                .attribute_filters
                .insert(attribute.to_string(), name.to_string());
            Ok(())
        })
    }

    /// Keep only rows whose index passes `func`
    pub fn add_index_filter<F>(&self, func: F) -> OrigraphResult<()>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let name = self.function_name("@index");
        self.model.functions().register_index_filter(name.clone(), func);
        self.add_index_filter_named(&name)
    }

    pub fn add_index_filter_named(&self, name: &str) -> OrigraphResult<()> {
        self.configure(|table| {
            table.config.index_filter = Some(name.to_string());
            Ok(())
        })
    }

    /// Aggregated tables only: fold every grouped parent row into
    /// `attribute` with `func(aggregate, parent)`
    pub fn derive_reduced_attribute<F>(&self, attribute: &str, func: F) -> OrigraphResult<()>
    where
        F: Fn(&WrappedItem, &WrappedItem) -> Value + Send + Sync + 'static,
    {
        let name = format!("{}:reduce", self.function_name(attribute));
        self.model.functions().register_reducer(name.clone(), func);
        self.derive_reduced_attribute_named(attribute, &name)
    }

    pub fn derive_reduced_attribute_named(&self, attribute: &str, name: &str) -> OrigraphResult<()> {
        self.configure(|table| {
            if !matches!(table.spec, TableSpec::Aggregated { .. }) {
                return Err(OrigraphError::InvalidOption(format!(
                    "Table {} is a {}; reduced attributes need an AggregatedTable",
                    table.table_id,
                    table.spec.type_name()
                )));
            }
            table
                .config
                .reduce_attributes
                .insert(attribute.to_string(), name.to_string());
            Ok(())
        })
    }
}

fn attribute_entry<'a>(
    details: &'a mut BTreeMap<String, AttributeDetails>,
    name: &str,
) -> &'a mut AttributeDetails {
    details
        .entry(name.to_string())
        .or_insert_with(|| AttributeDetails {
            name: name.to_string(),
            ..AttributeDetails::default()
        })
}
