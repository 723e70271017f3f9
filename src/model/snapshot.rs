//! Serializable model snapshots
//!
//! Only structure is persisted: table specs, configuration, classes and
//! annotations. Caches are rebuilt lazily after a restore, and functions are
//! referenced by name, so the host has to register them again.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::{sorted_ids, ModelState, NetworkModel};
use crate::class::{Class, ClassId};
use crate::config::OrigraphConfig;
use crate::error::{OrigraphError, OrigraphResult};
use crate::events::MessageBus;
use crate::functions::FunctionRegistry;
use crate::table::{Table, TableConfig, TableId, TableSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table_id: TableId,
    pub spec: TableSpec,
    #[serde(default)]
    pub parent_table_ids: Vec<TableId>,
    #[serde(default)]
    pub derived_table_ids: BTreeSet<TableId>,
    #[serde(default)]
    pub config: TableConfig,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
}

pub type ClassSnapshot = Class;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    pub tables: BTreeMap<TableId, TableSnapshot>,
    pub classes: BTreeMap<ClassId, ClassSnapshot>,
}

impl TableSnapshot {
    pub(crate) fn of(table: &Table) -> Self {
        Self {
            table_id: table.table_id.clone(),
            spec: table.spec.clone(),
            parent_table_ids: table.parent_table_ids.clone(),
            derived_table_ids: table.derived_table_ids.clone(),
            config: table.config.clone(),
            annotations: table.annotations.clone(),
        }
    }

    fn into_table(self) -> Table {
        let mut table = Table::new(self.table_id, self.spec, self.parent_table_ids);
        table.derived_table_ids = self.derived_table_ids;
        table.config = self.config;
        table.annotations = self.annotations;
        table
    }

    /// Function names this table refers to
    fn function_names(&self) -> impl Iterator<Item = &String> {
        let config = &self.config;
        config
            .derived_attributes
            .values()
            .chain(config.attribute_filters.values())
            .chain(config.reduce_attributes.values())
            .chain(config.index_filter.iter())
    }
}

impl ModelState {
    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            model_id: self.model_id.clone(),
            name: self.name.clone(),
            annotations: self.annotations.clone(),
            tables: self
                .tables
                .iter()
                .map(|(table_id, table)| (table_id.clone(), TableSnapshot::of(table)))
                .collect(),
            classes: self
                .classes
                .iter()
                .map(|(class_id, class)| (class_id.clone(), class.clone()))
                .collect(),
        }
    }
}

fn check_references(snapshot: &ModelSnapshot) -> OrigraphResult<()> {
    for table in snapshot.tables.values() {
        table.spec.check_parents(&table.parent_table_ids)?;
        if let Some(missing) = table
            .parent_table_ids
            .iter()
            .find(|parent| !snapshot.tables.contains_key(*parent))
        {
            return Err(OrigraphError::Parse(format!(
                "table {} refers to missing parent {}",
                table.table_id, missing
            )));
        }
    }
    for class in snapshot.classes.values() {
        let mut tables = vec![&class.table_id];
        if let Some(links) = class.edge_links() {
            tables.extend(links.source_table_ids.iter().chain(links.target_table_ids.iter()));
        }
        if let Some(missing) = tables.into_iter().find(|t| !snapshot.tables.contains_key(*t)) {
            return Err(OrigraphError::Parse(format!(
                "class {} refers to missing table {}",
                class.class_id, missing
            )));
        }
    }
    Ok(())
}

impl NetworkModel {
    /// Structure of the model as plain data
    pub fn to_snapshot(&self) -> OrigraphResult<ModelSnapshot> {
        self.read(|state| Ok(state.snapshot()))
    }

    /// Standalone model rebuilt from a snapshot
    pub fn restore(snapshot: ModelSnapshot) -> OrigraphResult<NetworkModel> {
        Self::from_snapshot(
            snapshot,
            FunctionRegistry::new(),
            MessageBus::new(),
            OrigraphConfig::default(),
        )
    }

    pub(crate) fn from_snapshot(
        snapshot: ModelSnapshot,
        functions: FunctionRegistry,
        bus: MessageBus,
        config: OrigraphConfig,
    ) -> OrigraphResult<NetworkModel> {
        check_references(&snapshot)?;
        for table in snapshot.tables.values() {
            for name in table.function_names() {
                if functions.derive(name).is_none()
                    && functions.attribute_filter(name).is_none()
                    && functions.index_filter(name).is_none()
                    && functions.reducer(name).is_none()
                {
                    warn!(
                        "Model {}: table {} uses function '{}', which is not registered",
                        snapshot.model_id, table.table_id, name
                    );
                }
            }
        }

        let ModelSnapshot {
            model_id,
            name,
            annotations,
            tables,
            classes,
        } = snapshot;
        let model = NetworkModel::with_parts(model_id, name, functions, bus, config);
        model.mutate(|state| {
            state.annotations = annotations;
            for table_id in sorted_ids(tables.keys()) {
                if let Some(table) = tables.get(&table_id) {
                    state.insert_table_with_id(table.clone().into_table());
                }
            }
            for class in classes.into_values() {
                if let Ok(numeric) = class.class_id.parse::<u64>() {
                    state.next_class_id = state.next_class_id.max(numeric + 1);
                }
                state.classes.insert(class.class_id.clone(), class);
            }
            state.take_events();
            debug!(
                "Model {}: restored {} table(s) and {} class(es)",
                state.model_id,
                state.tables.len(),
                state.classes.len()
            );
            Ok(())
        })?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::IterateOptions;
    use crate::testing_utils::{people_and_places, scenario_model};
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let fixture = people_and_places();
        fixture
            .people
            .connect_to_node_class(&fixture.places, Some("home"), None)
            .unwrap();
        fixture.model.set_annotation("note", serde_json::json!("kept")).unwrap();

        let snapshot = fixture.model.to_snapshot().unwrap();
        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: ModelSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, snapshot);

        let restored = NetworkModel::restore(parsed).unwrap();
        assert_eq!(restored.model_id(), fixture.model.model_id());
        assert_eq!(restored.table_ids().unwrap(), fixture.model.table_ids().unwrap());
        assert_eq!(restored.class_ids().unwrap(), fixture.model.class_ids().unwrap());
        assert_eq!(restored.to_snapshot().unwrap(), snapshot);

        let edge = restored.classes().unwrap().into_iter().find(|c| c.is_edge().unwrap()).unwrap();
        let rows: Vec<_> = edge
            .table()
            .unwrap()
            .iterate(IterateOptions::default())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_restored_ids_do_not_collide() {
        let (model, table) = scenario_model();
        table.aggregate("cat").unwrap();
        let restored = NetworkModel::restore(model.to_snapshot().unwrap()).unwrap();
        let fresh = restored
            .table(table.table_id())
            .unwrap()
            .expand("cat", ",")
            .unwrap();
        assert_eq!(fresh.table_id(), "2");
    }

    #[test]
    fn test_dangling_references_are_rejected() {
        let (model, table) = scenario_model();
        let aggregated = table.aggregate("cat").unwrap();
        let mut snapshot = model.to_snapshot().unwrap();
        snapshot.tables.remove(table.table_id());
        let err = NetworkModel::restore(snapshot).unwrap_err();
        assert!(err.to_string().contains(aggregated.table_id()));
    }
}
