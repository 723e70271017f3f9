//! Network models
//!
//! A [`NetworkModel`] owns the tables and classes of one model. All state
//! sits behind one mutex in [`ModelState`]; handles ([`TableHandle`],
//! [`ClassHandle`]) only carry ids and a cheap clone of the model. Structural
//! mutations queue events while the lock is held and publish them on the
//! model's [`MessageBus`] once it is released.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

use crate::class::{Class, ClassHandle, ClassId, ClassKind};
use crate::config::OrigraphConfig;
use crate::error::{OrigraphError, OrigraphResult};
use crate::events::{Event, MessageBus, ModelUpdated, TableReset};
use crate::functions::FunctionRegistry;
use crate::item::{ItemRef, WrappedItem};
use crate::table::{table_name, ItemCache, Table, TableHandle, TableId, TableSpec};

mod ingest;
mod sample_graph;
mod schema_graph;
mod snapshot;

pub use ingest::{FileReader, MimeLookup, StaticTableOptions, StringTableOptions, FileTableOptions, TokioFileReader, ExtensionMimeLookup};
pub use sample_graph::{SampleGraph, SampleGraphOptions, SampleLink};
pub use schema_graph::{ClassConnection, NetworkModelGraph, SchemaGraph, SchemaLink, SchemaNode, TableDependencyGraph, TableLink};
pub use snapshot::{ClassSnapshot, ModelSnapshot, TableSnapshot};

/// Sort ids the way they were handed out: shorter first, then lexically
pub(crate) fn sorted_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.into_iter().cloned().collect();
    ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    ids
}

/// Everything a model knows, guarded by the model's mutex
pub(crate) struct ModelState {
    pub(crate) model_id: String,
    pub(crate) name: String,
    pub(crate) annotations: BTreeMap<String, Value>,
    pub(crate) tables: HashMap<TableId, Table>,
    pub(crate) classes: HashMap<ClassId, Class>,
    pub(crate) functions: FunctionRegistry,
    next_table_id: u64,
    next_class_id: u64,
    pending_events: Vec<Event>,
}

impl ModelState {
    fn new(model_id: String, name: String, functions: FunctionRegistry) -> Self {
        Self {
            model_id,
            name,
            annotations: BTreeMap::new(),
            tables: HashMap::new(),
            classes: HashMap::new(),
            functions,
            next_table_id: 0,
            next_class_id: 0,
            pending_events: Vec::new(),
        }
    }

    pub(crate) fn table(&self, table_id: &str) -> OrigraphResult<&Table> {
        self.tables
            .get(table_id)
            .ok_or_else(|| OrigraphError::TableNotFound(table_id.to_string()))
    }

    pub(crate) fn table_mut(&mut self, table_id: &str) -> OrigraphResult<&mut Table> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| OrigraphError::TableNotFound(table_id.to_string()))
    }

    pub(crate) fn class(&self, class_id: &str) -> OrigraphResult<&Class> {
        self.classes
            .get(class_id)
            .ok_or_else(|| OrigraphError::ClassNotFound(class_id.to_string()))
    }

    pub(crate) fn class_mut(&mut self, class_id: &str) -> OrigraphResult<&mut Class> {
        self.classes
            .get_mut(class_id)
            .ok_or_else(|| OrigraphError::ClassNotFound(class_id.to_string()))
    }

    /// Queue a change notification, at most one per mutation
    pub(crate) fn touch(&mut self) {
        let already_queued = self
            .pending_events
            .iter()
            .any(|event| matches!(event, Event::ModelUpdated(_)));
        if !already_queued {
            self.pending_events
                .push(Event::ModelUpdated(ModelUpdated::new(&self.model_id)));
        }
    }

    fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    pub(crate) fn table_name(&self, table_id: &str) -> OrigraphResult<String> {
        let table = self.table(table_id)?;
        let parent_names = match table.spec {
            TableSpec::Connected => table
                .parent_table_ids
                .iter()
                .map(|parent| self.table_name(parent))
                .collect::<OrigraphResult<Vec<_>>>()?,
            _ => Vec::new(),
        };
        Ok(table_name(&table.spec, &parent_names))
    }

    fn fresh_table_id(&mut self) -> TableId {
        loop {
            let candidate = self.next_table_id.to_string();
            self.next_table_id += 1;
            if !self.tables.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn fresh_class_id(&mut self) -> ClassId {
        loop {
            let candidate = self.next_class_id.to_string();
            self.next_class_id += 1;
            if !self.classes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Register a new table under a fresh id
    pub(crate) fn insert_table(&mut self, spec: TableSpec, parents: Vec<TableId>) -> OrigraphResult<TableId> {
        spec.validate()?;
        spec.check_parents(&parents)?;
        for parent in &parents {
            self.table(parent)?;
        }
        let table_id = self.fresh_table_id();
        self.insert_table_with_id(Table::new(table_id.clone(), spec, parents));
        Ok(table_id)
    }

    /// Register an already built table, linking it into its parents
    pub(crate) fn insert_table_with_id(&mut self, table: Table) {
        let table_id = table.table_id.clone();
        for parent in &table.parent_table_ids {
            if let Some(parent) = self.tables.get_mut(parent) {
                parent.derived_table_ids.insert(table_id.clone());
            }
        }
        if let Ok(numeric) = table_id.parse::<u64>() {
            self.next_table_id = self.next_table_id.max(numeric + 1);
        }
        debug!(
            "Model {}: created {} {}",
            self.model_id,
            table.spec.type_name(),
            table_id
        );
        self.tables.insert(table_id, table);
        self.touch();
    }

    /// Reuse a derived table with the same spec and parents, or create it
    pub(crate) fn derive_table(&mut self, spec: TableSpec, parents: Vec<TableId>) -> OrigraphResult<TableId> {
        let first = parents
            .first()
            .ok_or(OrigraphError::ParentCount {
                kind: spec.type_name(),
                expected: 1,
                found: 0,
            })?
            .clone();
        let existing = self
            .table(&first)?
            .derived_table_ids
            .iter()
            .find(|derived_id| {
                self.tables.get(*derived_id).is_some_and(|derived| {
                    derived.spec == spec && derived.parent_table_ids == parents
                })
            })
            .cloned();
        match existing {
            Some(table_id) => Ok(table_id),
            None => self.insert_table(spec, parents),
        }
    }

    /// Register a class under a fresh id
    pub(crate) fn insert_class(&mut self, table_id: &str, kind: ClassKind) -> OrigraphResult<ClassId> {
        self.table(table_id)?;
        let class_id = self.fresh_class_id();
        self.put_class(Class::new(class_id.clone(), table_id.to_string(), kind));
        Ok(class_id)
    }

    /// Insert or replace a class, keeping node back-references in sync
    pub(crate) fn put_class(&mut self, class: Class) {
        if let ClassKind::Edge(links) = &class.kind {
            for node_id in [&links.source_class_id, &links.target_class_id].into_iter().flatten() {
                if let Some(node) = self.classes.get_mut(node_id) {
                    if let ClassKind::Node { edge_class_ids } = &mut node.kind {
                        edge_class_ids.insert(class.class_id.clone());
                    }
                }
            }
        }
        if let Ok(numeric) = class.class_id.parse::<u64>() {
            self.next_class_id = self.next_class_id.max(numeric + 1);
        }
        debug!(
            "Model {}: {} {} on table {}",
            self.model_id,
            class.kind.type_name(),
            class.class_id,
            class.table_id
        );
        self.classes.insert(class.class_id.clone(), class);
        self.touch();
    }

    /// First class (by id) attached to a table
    pub(crate) fn class_for_table(&self, table_id: &str) -> Option<ClassId> {
        let attached = self
            .classes
            .values()
            .filter(|class| class.table_id == table_id)
            .map(|class| &class.class_id);
        sorted_ids(attached).into_iter().next()
    }

    /// Snapshot of an item for handing out, tagged with its table's class
    pub(crate) fn expose(&self, item: &WrappedItem) -> WrappedItem {
        let mut exposed = item.clone();
        exposed.class_id = self.class_for_table(&item.table_id);
        exposed
    }

    pub(crate) fn lookup_item(&self, item: &ItemRef) -> Option<&WrappedItem> {
        self.tables
            .get(&item.table_id)
            .and_then(|table| table.lookup(&item.index))
    }

    pub(crate) fn lookup_item_mut(&mut self, table_id: &str, index: &str) -> Option<&mut WrappedItem> {
        self.tables
            .get_mut(table_id)
            .and_then(|table| table.lookup_mut(index))
    }

    /// Connect a not yet stored item with a live one, on both sides
    pub(crate) fn link(&mut self, item: &mut WrappedItem, other: &ItemRef) {
        if let Some(partner) = self.lookup_item_mut(&other.table_id, &other.index) {
            partner.add_connection(&item.table_id, &item.index);
            item.add_connection(&other.table_id, &other.index);
        }
    }

    /// Remove an item from all of its partners' connection lists
    pub(crate) fn disconnect_item(&mut self, item: &WrappedItem) {
        for partner in item.connection_refs() {
            if let Some(partner) = self.lookup_item_mut(&partner.table_id, &partner.index) {
                partner.remove_connection(&item.table_id, &item.index);
            }
        }
    }

    pub(crate) fn is_current_build(&self, table_id: &str, build_id: u64) -> bool {
        self.tables
            .get(table_id)
            .and_then(|table| table.partial.as_ref())
            .is_some_and(|partial| partial.build_id == build_id && !partial.token.is_cancelled())
    }

    /// Drop the caches of a table and everything derived from it
    pub(crate) fn reset_cascade(&mut self, table_id: &str) -> OrigraphResult<()> {
        self.table(table_id)?;
        let mut visited = BTreeSet::new();
        let mut pending = vec![table_id.to_string()];
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(table) = self.tables.get_mut(&current) else {
                continue;
            };
            let cache = table.cache.take();
            let partial = table.partial.take();
            table.resets += 1;
            table.notify_progress();
            pending.extend(table.derived_table_ids.iter().cloned());

            let mut removed = cache.map(ItemCache::into_items).unwrap_or_default();
            if let Some(partial) = partial {
                partial.cancel();
                debug!("Table {}: build {} cancelled by reset", current, partial.build_id);
                removed.extend(partial.cache.into_items());
            }
            for item in &removed {
                self.disconnect_item(item);
            }
            self.pending_events
                .push(Event::TableReset(TableReset::new(&self.model_id, &current)));
        }
        debug!("Model {}: reset {} table(s) from {}", self.model_id, visited.len(), table_id);
        Ok(())
    }

    /// Why a table can't be deleted, if anything still references it
    pub(crate) fn table_in_use(&self, table_id: &str) -> OrigraphResult<Option<String>> {
        let table = self.table(table_id)?;
        if let Some(derived) = table.derived_table_ids.iter().next() {
            return Ok(Some(format!("derived table {} depends on it", derived)));
        }
        for class_id in sorted_ids(self.classes.keys()) {
            let Some(class) = self.classes.get(&class_id) else {
                continue;
            };
            if class.table_id == table_id {
                return Ok(Some(format!("class {} is attached to it", class_id)));
            }
            if class.path_uses_table(table_id) {
                return Ok(Some(format!("edge class {} traverses it", class_id)));
            }
        }
        Ok(None)
    }

    pub(crate) fn remove_table(&mut self, table_id: &str) -> OrigraphResult<()> {
        if let Some(reason) = self.table_in_use(table_id)? {
            return Err(OrigraphError::in_use("table", table_id, reason));
        }
        self.reset_cascade(table_id)?;
        let table = self
            .tables
            .remove(table_id)
            .ok_or_else(|| OrigraphError::TableNotFound(table_id.to_string()))?;
        for parent in &table.parent_table_ids {
            if let Some(parent) = self.tables.get_mut(parent) {
                parent.derived_table_ids.remove(table_id);
            }
        }
        info!("Model {}: deleted table {}", self.model_id, table_id);
        self.touch();
        Ok(())
    }

    /// Delete derived tables that no class reaches anymore
    pub(crate) fn optimize_tables(&mut self) -> usize {
        let mut in_use: BTreeSet<TableId> = BTreeSet::new();
        let mut pending: Vec<TableId> = Vec::new();
        for class in self.classes.values() {
            pending.push(class.table_id.clone());
            if let ClassKind::Edge(links) = &class.kind {
                pending.extend(links.source_table_ids.iter().cloned());
                pending.extend(links.target_table_ids.iter().cloned());
            }
        }
        while let Some(table_id) = pending.pop() {
            if in_use.insert(table_id.clone()) {
                if let Some(table) = self.tables.get(&table_id) {
                    pending.extend(table.parent_table_ids.iter().cloned());
                }
            }
        }

        let mut removed = 0;
        loop {
            let unused: Vec<TableId> = self
                .tables
                .values()
                .filter(|table| {
                    !table.spec.is_static()
                        && !in_use.contains(&table.table_id)
                        && table.derived_table_ids.is_empty()
                })
                .map(|table| table.table_id.clone())
                .collect();
            if unused.is_empty() {
                break;
            }
            for table_id in sorted_ids(&unused) {
                match self.remove_table(&table_id) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!("Model {}: could not optimize away table {}: {}", self.model_id, table_id, e);
                        return removed;
                    }
                }
            }
        }
        if removed > 0 {
            info!("Model {}: removed {} unused table(s)", self.model_id, removed);
        }
        removed
    }
}

pub(crate) struct ModelInner {
    model_id: String,
    state: Mutex<ModelState>,
    functions: FunctionRegistry,
    bus: MessageBus,
    config: OrigraphConfig,
}

/// A network of lazily derived tables with a node/edge class overlay.
///
/// Cloning is cheap; clones share the same model.
#[derive(Clone)]
pub struct NetworkModel {
    inner: Arc<ModelInner>,
}

/// Non-owning reference used by in-flight builds, so a parked build does
/// not keep its model alive
#[derive(Clone)]
pub(crate) struct WeakModel(Weak<ModelInner>);

impl WeakModel {
    pub(crate) fn upgrade(&self) -> Option<NetworkModel> {
        self.0.upgrade().map(|inner| NetworkModel { inner })
    }
}

pub(crate) enum ModelRef {
    Strong(NetworkModel),
    Weak(WeakModel),
}

impl ModelRef {
    pub(crate) fn get(&self) -> Option<NetworkModel> {
        match self {
            ModelRef::Strong(model) => Some(model.clone()),
            ModelRef::Weak(model) => model.upgrade(),
        }
    }
}

impl NetworkModel {
    /// Standalone model with its own function registry and event bus
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parts(
            Uuid::new_v4().to_string(),
            name.into(),
            FunctionRegistry::new(),
            MessageBus::new(),
            OrigraphConfig::default(),
        )
    }

    pub(crate) fn with_parts(
        model_id: String,
        name: String,
        functions: FunctionRegistry,
        bus: MessageBus,
        config: OrigraphConfig,
    ) -> Self {
        let state = ModelState::new(model_id.clone(), name, functions.clone());
        Self {
            inner: Arc::new(ModelInner {
                model_id,
                state: Mutex::new(state),
                functions,
                bus,
                config,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakModel {
        WeakModel(Arc::downgrade(&self.inner))
    }

    pub(crate) fn lock(&self) -> OrigraphResult<MutexGuard<'_, ModelState>> {
        self.inner
            .state
            .lock()
            .map_err(|e| OrigraphError::Lock(format!("model {}: {}", self.inner.model_id, e)))
    }

    /// Run a read-only closure against the model state
    pub(crate) fn read<R>(&self, f: impl FnOnce(&ModelState) -> OrigraphResult<R>) -> OrigraphResult<R> {
        let state = self.lock()?;
        f(&state)
    }

    /// Run a mutation, then publish the events it queued
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut ModelState) -> OrigraphResult<R>) -> OrigraphResult<R> {
        let (result, events) = {
            let mut state = self.lock()?;
            let result = f(&mut state);
            (result, state.take_events())
        };
        for event in events {
            let event_type = event.event_type();
            if let Err(e) = self.inner.bus.publish_event(event) {
                warn!("Model {}: failed to publish {}: {}", self.inner.model_id, event_type, e);
            }
        }
        result
    }

    pub fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &OrigraphConfig {
        &self.inner.config
    }

    pub fn name(&self) -> OrigraphResult<String> {
        self.read(|state| Ok(state.name.clone()))
    }

    pub fn rename(&self, name: impl Into<String>) -> OrigraphResult<()> {
        let name = name.into();
        self.mutate(|state| {
            state.name = name;
            state.touch();
            Ok(())
        })
    }

    pub fn annotations(&self) -> OrigraphResult<BTreeMap<String, Value>> {
        self.read(|state| Ok(state.annotations.clone()))
    }

    pub fn set_annotation(&self, key: impl Into<String>, value: Value) -> OrigraphResult<()> {
        let key = key.into();
        self.mutate(|state| {
            state.annotations.insert(key, value);
            state.touch();
            Ok(())
        })
    }

    pub fn table(&self, table_id: &str) -> OrigraphResult<TableHandle> {
        self.read(|state| state.table(table_id).map(|_| ()))?;
        Ok(TableHandle::new(self.clone(), table_id.to_string()))
    }

    pub fn class(&self, class_id: &str) -> OrigraphResult<ClassHandle> {
        self.read(|state| state.class(class_id).map(|_| ()))?;
        Ok(ClassHandle::new(self.clone(), class_id.to_string()))
    }

    pub fn table_ids(&self) -> OrigraphResult<Vec<TableId>> {
        self.read(|state| Ok(sorted_ids(state.tables.keys())))
    }

    pub fn class_ids(&self) -> OrigraphResult<Vec<ClassId>> {
        self.read(|state| Ok(sorted_ids(state.classes.keys())))
    }

    pub fn tables(&self) -> OrigraphResult<Vec<TableHandle>> {
        Ok(self
            .table_ids()?
            .into_iter()
            .map(|table_id| TableHandle::new(self.clone(), table_id))
            .collect())
    }

    pub fn classes(&self) -> OrigraphResult<Vec<ClassHandle>> {
        Ok(self
            .class_ids()?
            .into_iter()
            .map(|class_id| ClassHandle::new(self.clone(), class_id))
            .collect())
    }

    /// Create a table; derived kinds need their parents to exist
    pub fn create_table(&self, spec: TableSpec, parents: Vec<TableId>) -> OrigraphResult<TableHandle> {
        let table_id = self.mutate(|state| state.insert_table(spec, parents))?;
        Ok(TableHandle::new(self.clone(), table_id))
    }

    /// Attach a new class to a table
    pub fn create_class(&self, table_id: &str, kind: ClassKind) -> OrigraphResult<ClassHandle> {
        let class_id = self.mutate(|state| state.insert_class(table_id, kind))?;
        Ok(ClassHandle::new(self.clone(), class_id))
    }

    pub fn find_class_for_table(&self, table_id: &str) -> OrigraphResult<Option<ClassHandle>> {
        let class_id = self.read(|state| Ok(state.class_for_table(table_id)))?;
        Ok(class_id.map(|class_id| ClassHandle::new(self.clone(), class_id)))
    }

    /// Reset a table and everything derived from it
    pub fn reset_table(&self, table_id: &str) -> OrigraphResult<()> {
        self.mutate(|state| state.reset_cascade(table_id))
    }

    /// Delete a table; fails with an in-use error while anything references it
    pub fn delete_table(&self, table_id: &str) -> OrigraphResult<()> {
        self.mutate(|state| state.remove_table(table_id))
    }

    pub fn delete_class(&self, class_id: &str) -> OrigraphResult<()> {
        ClassHandle::new(self.clone(), class_id.to_string()).delete()
    }

    /// Garbage-collect derived tables that no class depends on
    pub fn optimize_tables(&self) -> OrigraphResult<usize> {
        self.mutate(|state| Ok(state.optimize_tables()))
    }
}

impl std::fmt::Debug for NetworkModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkModel")
            .field("model_id", &self.inner.model_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_utils::scenario_model;
    use serde_json::json;

    #[test]
    fn test_sorted_ids_are_numeric() {
        let ids = ["10".to_string(), "2".to_string(), "1".to_string()];
        assert_eq!(sorted_ids(&ids), vec!["1", "2", "10"]);
    }

    #[test]
    fn test_ids_are_sequential() {
        let model = NetworkModel::new("ids");
        let a = model
            .create_table(
                TableSpec::Static {
                    name: "a".to_string(),
                    data: vec![],
                },
                vec![],
            )
            .unwrap();
        let b = model
            .create_table(
                TableSpec::Static {
                    name: "b".to_string(),
                    data: vec![],
                },
                vec![],
            )
            .unwrap();
        assert_eq!(a.table_id(), "0");
        assert_eq!(b.table_id(), "1");
    }

    #[test]
    fn test_derived_tables_are_memoized() {
        let (model, table) = scenario_model();
        let first = table.aggregate("cat").unwrap();
        let second = table.aggregate("cat").unwrap();
        assert_eq!(first.table_id(), second.table_id());
        let other = table.aggregate("v").unwrap();
        assert_ne!(first.table_id(), other.table_id());
        assert_eq!(model.table_ids().unwrap().len(), 3);
    }

    #[test]
    fn test_mutations_publish_updates() {
        let model = NetworkModel::new("events");
        let mut updates = model.bus().subscribe::<ModelUpdated>();
        model.rename("renamed").unwrap();
        model.set_annotation("note", json!("x")).unwrap();
        assert_eq!(updates.drain().len(), 2);
        assert_eq!(model.name().unwrap(), "renamed");
    }

    #[test]
    fn test_unknown_ids() {
        let model = NetworkModel::new("missing");
        assert!(matches!(model.table("9"), Err(OrigraphError::TableNotFound(_))));
        assert!(matches!(model.class("9"), Err(OrigraphError::ClassNotFound(_))));
    }
}
