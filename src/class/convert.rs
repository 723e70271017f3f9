//! Reinterpreting node classes as edge classes and back

use log::info;

use super::{ClassHandle, ClassId, ClassKind, EdgeLinks, Side};
use crate::error::{OrigraphError, OrigraphResult};
use crate::model::ModelState;
use crate::table::{TableId, TableSpec};

/// The other end of an edge class, seen from one of its nodes
struct FarEnd {
    class_id: Option<ClassId>,
    /// Tables from the node's table to the far node's table, both excluded
    path: Vec<TableId>,
    /// Side the near node occupies on the edge
    side: Side,
    directed: bool,
}

impl ClassHandle {
    /// Turn this class into a node class. An edge class keeps its id and
    /// gets a fresh intermediary edge class toward each former endpoint.
    pub fn interpret_as_nodes(&self) -> OrigraphResult<ClassHandle> {
        self.model
            .mutate(|state| state.interpret_as_nodes(&self.class_id))?;
        Ok(self.clone())
    }

    /// Turn this class into an edge class.
    ///
    /// With `autoconnect`, a node class with one edge class becomes a
    /// self-loop and one with two edge classes becomes an edge between the
    /// two neighbors, absorbing the old edge classes. Otherwise (or with
    /// more edges) all connections are dropped and the edge floats.
    pub fn interpret_as_edges(&self, autoconnect: bool) -> OrigraphResult<ClassHandle> {
        self.model
            .mutate(|state| state.interpret_as_edges(&self.class_id, autoconnect))?;
        Ok(self.clone())
    }
}

impl ModelState {
    pub(crate) fn interpret_as_nodes(&mut self, class_id: &str) -> OrigraphResult<()> {
        match self.class(class_id)?.kind.clone() {
            ClassKind::Node { .. } => Ok(()),
            ClassKind::Generic => self.replace_kind(class_id, ClassKind::node()),
            ClassKind::Edge(links) => self.edge_to_nodes(class_id, links),
        }
    }

    pub(crate) fn interpret_as_edges(&mut self, class_id: &str, autoconnect: bool) -> OrigraphResult<()> {
        match self.class(class_id)?.kind.clone() {
            ClassKind::Edge(_) => Ok(()),
            ClassKind::Generic => self.replace_kind(class_id, ClassKind::edge()),
            ClassKind::Node { edge_class_ids } => {
                let edge_ids: Vec<ClassId> = edge_class_ids.into_iter().collect();
                self.node_to_edges(class_id, &edge_ids, autoconnect)
            }
        }
    }

    fn edge_to_nodes(&mut self, class_id: &str, links: EdgeLinks) -> OrigraphResult<()> {
        let table_id = self.class(class_id)?.table_id.clone();
        self.detach_class(class_id)?;
        self.replace_kind(class_id, ClassKind::node())?;

        if let Some(source) = &links.source_class_id {
            self.split_edge_path(class_id, &table_id, source, &links.source_table_ids, Side::Source, links.directed)?;
        }
        if let Some(target) = &links.target_class_id {
            if links.source_class_id.as_ref() != Some(target) {
                self.split_edge_path(class_id, &table_id, target, &links.target_table_ids, Side::Target, links.directed)?;
            }
        }
        self.reset_cascade(&table_id)?;
        info!("Model {}: edge class {} reinterpreted as nodes", self.model_id, class_id);
        Ok(())
    }

    /// Create an edge class between `node_id` (a former edge) and `far_id`,
    /// which sat on `far_side` of the old edge, using a table from the middle
    /// of the old path
    fn split_edge_path(
        &mut self,
        node_id: &str,
        node_table: &str,
        far_id: &str,
        path: &[TableId],
        far_side: Side,
        directed: bool,
    ) -> OrigraphResult<ClassId> {
        let (edge_table, toward_node, toward_far) = if path.is_empty() {
            let far_table = self.class(far_id)?.table_id.clone();
            let connected = self.derive_table(TableSpec::Connected, vec![node_table.to_string(), far_table])?;
            (connected, Vec::new(), Vec::new())
        } else {
            let middle = self.middle_table(path);
            let toward_node: Vec<TableId> = path[..middle].iter().rev().cloned().collect();
            let toward_far = path[middle + 1..].to_vec();
            (path[middle].clone(), toward_node, toward_far)
        };

        let mut links = EdgeLinks {
            directed,
            ..EdgeLinks::default()
        };
        links.set_side(far_side, Some(far_id.to_string()), toward_far);
        links.set_side(far_side.opposite(), Some(node_id.to_string()), toward_node);
        self.insert_class(&edge_table, ClassKind::Edge(links))
    }

    /// Position of the table closest to the middle of a path, preferring
    /// static tables, which never need to be re-derived
    fn middle_table(&self, path: &[TableId]) -> usize {
        let is_static = |table_id: &TableId| {
            self.tables
                .get(table_id)
                .is_some_and(|table| table.spec.is_static())
        };
        let any_static = path.iter().any(|table_id| is_static(table_id));
        let len = path.len() as i64;
        (0..path.len())
            .filter(|&i| !any_static || is_static(&path[i]))
            .min_by_key(|&i| (len - 2 * i as i64).abs())
            .unwrap_or(0)
    }

    fn far_end(&self, edge_id: &str, node_id: &str) -> OrigraphResult<FarEnd> {
        let edge_table = self.class(edge_id)?.table_id.clone();
        let links = self.edge_links(edge_id)?;
        let side = match links.sides_of(node_id).first() {
            Some(side) => *side,
            None => {
                return Err(OrigraphError::InvalidOption(format!(
                    "edge class {} is not connected to class {}",
                    edge_id, node_id
                )))
            }
        };
        let class_id = links.class_id(side.opposite()).cloned();
        let path = match class_id {
            Some(_) => {
                let mut path: Vec<TableId> = links.table_ids(side).iter().rev().cloned().collect();
                path.push(edge_table);
                path.extend(links.table_ids(side.opposite()).iter().cloned());
                path
            }
            None => Vec::new(),
        };
        Ok(FarEnd {
            class_id,
            path,
            side,
            directed: links.directed,
        })
    }

    /// Remove an edge class absorbed into a new edge
    fn absorb_edge_class(&mut self, edge_id: &str) -> OrigraphResult<()> {
        self.detach_class(edge_id)?;
        self.classes.remove(edge_id);
        Ok(())
    }

    fn node_to_edges(&mut self, class_id: &str, edge_ids: &[ClassId], autoconnect: bool) -> OrigraphResult<()> {
        let table_id = self.class(class_id)?.table_id.clone();
        let links = match edge_ids {
            [edge_id] if autoconnect => {
                let far = self.far_end(edge_id, class_id)?;
                self.absorb_edge_class(edge_id)?;
                EdgeLinks {
                    source_class_id: far.class_id.clone(),
                    target_class_id: far.class_id,
                    source_table_ids: far.path.clone(),
                    target_table_ids: far.path,
                    directed: far.directed,
                }
            }
            [first_id, second_id] if autoconnect => {
                let first = self.far_end(first_id, class_id)?;
                let second = self.far_end(second_id, class_id)?;
                // Directed only if the flow passes through this node
                let directed = first.directed && second.directed && first.side != second.side;
                let (source, target) = if directed && first.side == Side::Source {
                    (second, first)
                } else {
                    (first, second)
                };
                self.absorb_edge_class(first_id)?;
                self.absorb_edge_class(second_id)?;
                EdgeLinks {
                    source_class_id: source.class_id,
                    target_class_id: target.class_id,
                    source_table_ids: source.path,
                    target_table_ids: target.path,
                    directed,
                }
            }
            _ => {
                self.disconnect_all_edges(class_id)?;
                EdgeLinks::default()
            }
        };
        self.replace_kind(class_id, ClassKind::Edge(links))?;
        self.reset_cascade(&table_id)?;
        info!(
            "Model {}: node class {} reinterpreted as edges ({} edge class(es) absorbed)",
            self.model_id,
            class_id,
            if autoconnect && edge_ids.len() <= 2 { edge_ids.len() } else { 0 }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::class::ClassKind;
    use crate::testing_utils::people_and_places;

    #[test]
    fn test_generic_conversions() {
        let fixture = people_and_places();
        let visits = fixture.visits.interpret_as_nodes().unwrap();
        assert!(visits.is_node().unwrap());
        let visits = visits.interpret_as_edges(true).unwrap();
        assert!(visits.is_edge().unwrap());
        let links = visits.edge_links().unwrap();
        assert!(links.source_class_id.is_none() && links.target_class_id.is_none());
        let visits = visits.interpret_as_generic().unwrap();
        assert_eq!(visits.kind().unwrap(), ClassKind::Generic);
    }

    #[test]
    fn test_single_edge_becomes_self_loop() {
        let fixture = people_and_places();
        fixture
            .people
            .connect_to_node_class(&fixture.places, Some("home"), None)
            .unwrap();
        let people = fixture.people.interpret_as_edges(true).unwrap();
        let links = people.edge_links().unwrap();
        assert_eq!(links.source_class_id.as_deref(), Some(fixture.places.class_id()));
        assert_eq!(links.target_class_id, links.source_class_id);
        assert_eq!(links.source_table_ids, links.target_table_ids);
        // home aggregation, then the join table
        assert_eq!(links.source_table_ids.len(), 2);
        let place_edges = fixture.places.edge_classes().unwrap();
        assert_eq!(place_edges.len(), 1);
        assert_eq!(place_edges[0].class_id(), people.class_id());
    }

    #[test]
    fn test_too_many_edges_float() {
        let fixture = people_and_places();
        for attribute in ["home", "work", "school"] {
            fixture
                .people
                .connect_to_node_class(&fixture.places, Some(attribute), None)
                .unwrap();
        }
        let people = fixture.people.interpret_as_edges(true).unwrap();
        let links = people.edge_links().unwrap();
        assert!(links.source_class_id.is_none());
        assert!(links.target_class_id.is_none());
        // the three edge classes still exist, detached from the old node
        assert_eq!(fixture.model.classes().unwrap().len(), 6);
    }
}
