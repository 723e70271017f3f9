use futures::stream::{BoxStream, StreamExt};
use log::info;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Class, ClassId, ClassKind, EdgeLinks};
use crate::error::{OrigraphError, OrigraphResult};
use crate::model::{ModelState, NetworkModel};
use crate::table::{TableHandle, TableId};

/// Cheap reference to one class of a model.
///
/// Node- and edge-specific operations check the class kind when called and
/// fail with [`OrigraphError::InvalidClassKind`] on the wrong kind.
#[derive(Clone, Debug)]
pub struct ClassHandle {
    pub(super) model: NetworkModel,
    pub(super) class_id: ClassId,
}

impl ClassHandle {
    pub(crate) fn new(model: NetworkModel, class_id: ClassId) -> Self {
        Self { model, class_id }
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn model(&self) -> &NetworkModel {
        &self.model
    }

    /// Copy of the class as currently stored
    pub fn snapshot(&self) -> OrigraphResult<Class> {
        self.model.read(|state| Ok(state.class(&self.class_id)?.clone()))
    }

    pub fn kind(&self) -> OrigraphResult<ClassKind> {
        Ok(self.snapshot()?.kind)
    }

    pub fn is_node(&self) -> OrigraphResult<bool> {
        Ok(matches!(self.kind()?, ClassKind::Node { .. }))
    }

    pub fn is_edge(&self) -> OrigraphResult<bool> {
        Ok(matches!(self.kind()?, ClassKind::Edge(_)))
    }

    pub fn table_id(&self) -> OrigraphResult<TableId> {
        self.model
            .read(|state| Ok(state.class(&self.class_id)?.table_id.clone()))
    }

    pub fn table(&self) -> OrigraphResult<TableHandle> {
        self.model.table(&self.table_id()?)
    }

    /// The custom name, or the table's name
    pub fn class_name(&self) -> OrigraphResult<String> {
        self.model.read(|state| {
            let class = state.class(&self.class_id)?;
            match &class.class_name {
                Some(name) => Ok(name.clone()),
                None => state.table_name(&class.table_id),
            }
        })
    }

    pub fn set_class_name(&self, name: Option<String>) -> OrigraphResult<()> {
        self.model.mutate(|state| {
            state.class_mut(&self.class_id)?.class_name = name;
            state.touch();
            Ok(())
        })
    }

    pub fn annotations(&self) -> OrigraphResult<BTreeMap<String, Value>> {
        self.model
            .read(|state| Ok(state.class(&self.class_id)?.annotations.clone()))
    }

    pub fn set_annotation(&self, key: impl Into<String>, value: Value) -> OrigraphResult<()> {
        let key = key.into();
        self.model.mutate(|state| {
            state.class_mut(&self.class_id)?.annotations.insert(key, value);
            state.touch();
            Ok(())
        })
    }

    /// Edge endpoints; fails on non-edge classes
    pub fn edge_links(&self) -> OrigraphResult<EdgeLinks> {
        self.model
            .read(|state| state.edge_links(&self.class_id).cloned())
    }

    /// Remove the class. Nodes drop all of their edge connections first and
    /// edges detach from both ends; unreferenced derived tables are cleaned up.
    pub fn delete(&self) -> OrigraphResult<()> {
        self.model.mutate(|state| state.remove_class(&self.class_id))
    }

    /// Drop any node or edge role, keeping the same class id
    pub fn interpret_as_generic(&self) -> OrigraphResult<ClassHandle> {
        self.model.mutate(|state| {
            state.detach_class(&self.class_id)?;
            state.replace_kind(&self.class_id, ClassKind::Generic)
        })?;
        Ok(self.clone())
    }

    fn sibling(&self, table: OrigraphResult<TableHandle>) -> OrigraphResult<ClassHandle> {
        let table = table?;
        let kind = self.kind()?.blank();
        self.model.create_class(table.table_id(), kind)
    }

    /// New class of the same kind over `table.aggregate(attribute)`
    pub fn aggregate(&self, attribute: &str) -> OrigraphResult<ClassHandle> {
        self.sibling(self.table()?.aggregate(attribute))
    }

    pub fn expand(&self, attribute: &str, delimiter: &str) -> OrigraphResult<ClassHandle> {
        self.sibling(self.table()?.expand(attribute, delimiter))
    }

    pub fn closed_facet(&self, attribute: &str, values: &[Value]) -> OrigraphResult<Vec<ClassHandle>> {
        self.table()?
            .closed_facet(attribute, values)?
            .into_iter()
            .map(|table| self.sibling(Ok(table)))
            .collect()
    }

    pub fn open_facet(&self, attribute: &str, limit: Option<usize>) -> OrigraphResult<BoxStream<'static, OrigraphResult<ClassHandle>>> {
        let class = self.clone();
        Ok(self
            .table()?
            .open_facet(attribute, limit)
            .map(move |table| class.sibling(table))
            .boxed())
    }

    pub fn closed_transpose(&self, indexes: &[String]) -> OrigraphResult<Vec<ClassHandle>> {
        self.table()?
            .closed_transpose(indexes)?
            .into_iter()
            .map(|table| self.sibling(Ok(table)))
            .collect()
    }

    pub fn open_transpose(&self, limit: Option<usize>) -> OrigraphResult<BoxStream<'static, OrigraphResult<ClassHandle>>> {
        let class = self.clone();
        Ok(self
            .table()?
            .open_transpose(limit)
            .map(move |table| class.sibling(table))
            .boxed())
    }
}

impl ModelState {
    pub(crate) fn edge_links(&self, class_id: &str) -> OrigraphResult<&EdgeLinks> {
        self.class(class_id)?.edge_links().ok_or_else(|| {
            OrigraphError::InvalidClassKind(format!("class {} is not an edge class", class_id))
        })
    }

    pub(crate) fn edge_links_mut(&mut self, class_id: &str) -> OrigraphResult<&mut EdgeLinks> {
        match &mut self.class_mut(class_id)?.kind {
            ClassKind::Edge(links) => Ok(links),
            _ => Err(OrigraphError::InvalidClassKind(format!(
                "class {} is not an edge class",
                class_id
            ))),
        }
    }

    pub(crate) fn node_edge_ids(&self, class_id: &str) -> OrigraphResult<Vec<ClassId>> {
        match self.class(class_id)?.edge_class_ids() {
            Some(edge_class_ids) => Ok(edge_class_ids.iter().cloned().collect()),
            None => Err(OrigraphError::InvalidClassKind(format!(
                "class {} is not a node class",
                class_id
            ))),
        }
    }

    /// Swap a class's kind in place, keeping id, table, name and annotations
    pub(crate) fn replace_kind(&mut self, class_id: &str, kind: ClassKind) -> OrigraphResult<()> {
        let mut class = self.class(class_id)?.clone();
        info!(
            "Model {}: class {} {} -> {}",
            self.model_id,
            class_id,
            class.kind.type_name(),
            kind.type_name()
        );
        class.kind = kind;
        self.put_class(class);
        Ok(())
    }

    /// Sever every node/edge connection of a class
    pub(crate) fn detach_class(&mut self, class_id: &str) -> OrigraphResult<()> {
        match &self.class(class_id)?.kind {
            ClassKind::Generic => Ok(()),
            ClassKind::Node { .. } => self.disconnect_all_edges(class_id),
            ClassKind::Edge(_) => {
                self.disconnect_edge_side(class_id, super::Side::Source)?;
                self.disconnect_edge_side(class_id, super::Side::Target)
            }
        }
    }

    pub(crate) fn remove_class(&mut self, class_id: &str) -> OrigraphResult<()> {
        self.detach_class(class_id)?;
        self.classes.remove(class_id);
        info!("Model {}: deleted class {}", self.model_id, class_id);
        self.optimize_tables();
        self.touch();
        Ok(())
    }
}
