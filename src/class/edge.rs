use log::debug;

use super::{ClassHandle, ClassId, ClassKind, Side};
use crate::error::{OrigraphError, OrigraphResult};
use crate::model::ModelState;
use crate::table::{TableId, TableSpec};

impl ClassHandle {
    pub(super) fn same_model(&self, other: &ClassHandle) -> OrigraphResult<()> {
        if self.model.model_id() == other.model.model_id() {
            Ok(())
        } else {
            Err(OrigraphError::InvalidOption(format!(
                "class {} belongs to another model",
                other.class_id
            )))
        }
    }

    /// Attach `node` as this edge's source. With an attribute on either
    /// side, rows are matched on that attribute's value instead of on index.
    pub fn connect_source(
        &self,
        node: &ClassHandle,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> OrigraphResult<()> {
        self.connect_node_side(node, Side::Source, node_attribute, edge_attribute)
    }

    pub fn connect_target(
        &self,
        node: &ClassHandle,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> OrigraphResult<()> {
        self.connect_node_side(node, Side::Target, node_attribute, edge_attribute)
    }

    /// Attach `node` on one side of this edge class
    pub fn connect_node_side(
        &self,
        node: &ClassHandle,
        side: Side,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> OrigraphResult<()> {
        self.same_model(node)?;
        self.model.mutate(|state| {
            state.connect_edge_side(&self.class_id, side, &node.class_id, node_attribute, edge_attribute)
        })
    }

    pub fn disconnect_source(&self) -> OrigraphResult<()> {
        self.model
            .mutate(|state| state.disconnect_edge_side(&self.class_id, Side::Source))
    }

    pub fn disconnect_target(&self) -> OrigraphResult<()> {
        self.model
            .mutate(|state| state.disconnect_edge_side(&self.class_id, Side::Target))
    }

    /// Make the edge undirected (`None`) or directed away from
    /// `source_class_id`, swapping the stored sides when needed
    pub fn toggle_direction(&self, source_class_id: Option<&str>) -> OrigraphResult<()> {
        self.model
            .mutate(|state| state.toggle_direction(&self.class_id, source_class_id))
    }

    pub fn source_class(&self) -> OrigraphResult<Option<ClassHandle>> {
        self.side_class(Side::Source)
    }

    pub fn target_class(&self) -> OrigraphResult<Option<ClassHandle>> {
        self.side_class(Side::Target)
    }

    fn side_class(&self, side: Side) -> OrigraphResult<Option<ClassHandle>> {
        let class_id = self.edge_links()?.class_id(side).cloned();
        Ok(class_id.map(|class_id| ClassHandle::new(self.model.clone(), class_id)))
    }
}

impl ModelState {
    /// `table_id` itself, or its aggregation on `attribute`
    pub(crate) fn hash_table(&mut self, table_id: &str, attribute: Option<&str>) -> OrigraphResult<TableId> {
        match attribute {
            None => Ok(table_id.to_string()),
            Some(attribute) => self.derive_table(
                TableSpec::Aggregated {
                    attribute: attribute.to_string(),
                },
                vec![table_id.to_string()],
            ),
        }
    }

    pub(crate) fn connect_edge_side(
        &mut self,
        edge_id: &str,
        side: Side,
        node_id: &str,
        node_attribute: Option<&str>,
        edge_attribute: Option<&str>,
    ) -> OrigraphResult<()> {
        let node_table = match &self.class(node_id)?.kind {
            ClassKind::Node { .. } => self.class(node_id)?.table_id.clone(),
            other => {
                return Err(OrigraphError::InvalidClassKind(format!(
                    "class {} is a {}, edges connect to node classes",
                    node_id,
                    other.type_name()
                )))
            }
        };
        if self.edge_links(edge_id)?.class_id(side).is_some() {
            self.disconnect_edge_side(edge_id, side)?;
        }
        let edge_table = self.class(edge_id)?.table_id.clone();

        let edge_hash = self.hash_table(&edge_table, edge_attribute)?;
        let node_hash = self.hash_table(&node_table, node_attribute)?;
        let connected = self.derive_table(TableSpec::Connected, vec![edge_hash.clone(), node_hash.clone()])?;
        let mut path = vec![connected];
        if edge_attribute.is_some() {
            path.insert(0, edge_hash);
        }
        if node_attribute.is_some() {
            path.push(node_hash);
        }

        debug!(
            "Model {}: edge {} {} -> node {} via {:?}",
            self.model_id, edge_id, side, node_id, path
        );
        self.edge_links_mut(edge_id)?
            .set_side(side, Some(node_id.to_string()), path);
        self.add_node_edge(node_id, edge_id);
        self.touch();
        Ok(())
    }

    pub(crate) fn add_node_edge(&mut self, node_id: &str, edge_id: &str) {
        if let Some(node) = self.classes.get_mut(node_id) {
            if let ClassKind::Node { edge_class_ids } = &mut node.kind {
                edge_class_ids.insert(edge_id.to_string());
            }
        }
    }

    fn remove_node_edge(&mut self, node_id: &str, edge_id: &str) {
        if let Some(node) = self.classes.get_mut(node_id) {
            if let ClassKind::Node { edge_class_ids } = &mut node.kind {
                edge_class_ids.remove(edge_id);
            }
        }
    }

    pub(crate) fn disconnect_edge_side(&mut self, edge_id: &str, side: Side) -> OrigraphResult<()> {
        let links = self.edge_links_mut(edge_id)?;
        let previous: Option<ClassId> = links.class_id(side).cloned();
        links.set_side(side, None, Vec::new());
        let still_attached = previous
            .as_ref()
            .is_some_and(|node_id| links.class_id(side.opposite()) == Some(node_id));
        if let Some(node_id) = previous {
            if !still_attached {
                self.remove_node_edge(&node_id, edge_id);
            }
        }
        self.touch();
        Ok(())
    }

    pub(crate) fn toggle_direction(&mut self, edge_id: &str, source_class_id: Option<&str>) -> OrigraphResult<()> {
        let links = self.edge_links_mut(edge_id)?;
        match source_class_id {
            None => links.directed = false,
            Some(source) => {
                if links.source_class_id.as_deref() != Some(source) {
                    if links.target_class_id.as_deref() != Some(source) {
                        return Err(OrigraphError::InvalidOption(format!(
                            "Can't swap edge {} to unconnected class {}",
                            edge_id, source
                        )));
                    }
                    std::mem::swap(&mut links.source_class_id, &mut links.target_class_id);
                    std::mem::swap(&mut links.source_table_ids, &mut links.target_table_ids);
                }
                links.directed = true;
            }
        }
        self.touch();
        Ok(())
    }
}
