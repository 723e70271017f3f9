use log::debug;

use super::{ClassHandle, ClassId, ClassKind, EdgeLinks, Side};
use crate::error::{OrigraphError, OrigraphResult};
use crate::model::ModelState;
use crate::table::TableSpec;

impl ClassHandle {
    /// Edge classes touching this node class
    pub fn edge_classes(&self) -> OrigraphResult<Vec<ClassHandle>> {
        let edge_ids = self.model.read(|state| state.node_edge_ids(&self.class_id))?;
        Ok(edge_ids
            .into_iter()
            .map(|edge_id| ClassHandle::new(self.model.clone(), edge_id))
            .collect())
    }

    /// Create an edge class between this node class and `other`.
    ///
    /// Without attributes rows are matched on index; with an attribute the
    /// node table is first aggregated on it and matched on its values.
    pub fn connect_to_node_class(
        &self,
        other: &ClassHandle,
        attribute: Option<&str>,
        other_attribute: Option<&str>,
    ) -> OrigraphResult<ClassHandle> {
        self.same_model(other)?;
        let edge_id = self.model.mutate(|state| {
            state.connect_nodes(&self.class_id, &other.class_id, attribute, other_attribute)
        })?;
        Ok(ClassHandle::new(self.model.clone(), edge_id))
    }

    /// Attach this node class on one side of `edge`
    pub fn connect_to_edge_class(
        &self,
        edge: &ClassHandle,
        side: Side,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> OrigraphResult<()> {
        edge.connect_node_side(self, side, node_attribute, edge_attribute)
    }

    pub fn disconnect_all_edges(&self) -> OrigraphResult<()> {
        self.model
            .mutate(|state| state.disconnect_all_edges(&self.class_id))
    }
}

impl ModelState {
    fn node_table(&self, class_id: &str) -> OrigraphResult<String> {
        let class = self.class(class_id)?;
        match class.kind {
            ClassKind::Node { .. } => Ok(class.table_id.clone()),
            _ => Err(OrigraphError::InvalidClassKind(format!(
                "class {} is a {}, expected a NodeClass",
                class_id,
                class.kind.type_name()
            ))),
        }
    }

    pub(crate) fn connect_nodes(
        &mut self,
        node_id: &str,
        other_id: &str,
        attribute: Option<&str>,
        other_attribute: Option<&str>,
    ) -> OrigraphResult<ClassId> {
        let this_table = self.node_table(node_id)?;
        let other_table = self.node_table(other_id)?;

        let this_hash = self.hash_table(&this_table, attribute)?;
        let other_hash = self.hash_table(&other_table, other_attribute)?;
        let source_table_ids = match attribute {
            Some(_) => vec![this_hash.clone()],
            None => Vec::new(),
        };
        let target_table_ids = match other_attribute {
            Some(_) => vec![other_hash.clone()],
            None => Vec::new(),
        };
        let connected = self.derive_table(TableSpec::Connected, vec![this_hash, other_hash])?;

        let links = EdgeLinks {
            source_class_id: Some(node_id.to_string()),
            target_class_id: Some(other_id.to_string()),
            source_table_ids,
            target_table_ids,
            directed: false,
        };
        let edge_id = self.insert_class(&connected, ClassKind::Edge(links))?;
        debug!(
            "Model {}: connected node {} to node {} through edge {}",
            self.model_id, node_id, other_id, edge_id
        );
        Ok(edge_id)
    }

    pub(crate) fn disconnect_all_edges(&mut self, node_id: &str) -> OrigraphResult<()> {
        for edge_id in self.node_edge_ids(node_id)? {
            let sides = match self.edge_links(&edge_id) {
                Ok(links) => links.sides_of(node_id),
                Err(_) => continue,
            };
            for side in sides {
                self.disconnect_edge_side(&edge_id, side)?;
            }
        }
        if let ClassKind::Node { edge_class_ids } = &mut self.class_mut(node_id)?.kind {
            edge_class_ids.clear();
        }
        self.touch();
        Ok(())
    }
}
