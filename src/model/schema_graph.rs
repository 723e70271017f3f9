//! Schema introspection
//!
//! Exports the class overlay and the table dependency DAG as plain data, and
//! can load that export back as a model of its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::snapshot::{ClassSnapshot, TableSnapshot};
use super::{sorted_ids, ModelState, NetworkModel, StaticTableOptions};
use crate::class::{ClassId, ClassKind, Side};
use crate::error::OrigraphResult;
use crate::table::TableId;

/// Link between an edge class and one of its node classes, by position in
/// [`NetworkModelGraph::classes`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConnection {
    pub id: String,
    pub source: usize,
    pub target: usize,
    pub directed: bool,
    /// `source`, `target`, or `node` for a dummy hanging off a node class
    pub location: String,
    pub dummy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkModelGraph {
    /// `None` entries are dummy endpoints standing in for missing classes
    pub classes: Vec<Option<ClassSnapshot>>,
    pub class_lookup: HashMap<ClassId, usize>,
    pub class_connections: Vec<ClassConnection>,
}

/// Parent to derived table, by position in [`TableDependencyGraph::tables`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLink {
    pub source: usize,
    pub target: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDependencyGraph {
    pub tables: Vec<TableSnapshot>,
    pub table_lookup: HashMap<TableId, usize>,
    pub table_links: Vec<TableLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// `Class` or `Table`
    #[serde(rename = "type")]
    pub node_type: String,
    pub id: String,
    pub name: String,
    /// Class or table kind, such as `NodeClass` or `AggregatedTable`
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaLink {
    pub source: usize,
    pub target: usize,
    /// `ClassConnection`, `TableDependency` or `ClassTable`
    #[serde(rename = "type")]
    pub link_type: String,
    pub directed: bool,
}

/// Classes and tables in one node list, every relation in one link list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaGraph {
    pub nodes: Vec<SchemaNode>,
    pub links: Vec<SchemaLink>,
}

impl ModelState {
    fn network_model_graph(&self, include_dummies: bool) -> NetworkModelGraph {
        let mut graph = NetworkModelGraph::default();
        let mut edge_ids = Vec::new();
        for class_id in sorted_ids(self.classes.keys()) {
            let Some(class) = self.classes.get(&class_id) else {
                continue;
            };
            let position = graph.classes.len();
            graph.class_lookup.insert(class_id.clone(), position);
            graph.classes.push(Some(class.clone()));
            match class.kind {
                ClassKind::Edge(_) => edge_ids.push(class_id),
                ClassKind::Node { .. } if include_dummies => {
                    graph.class_connections.push(ClassConnection {
                        id: format!("{}>dummy", class_id),
                        source: position,
                        target: graph.classes.len(),
                        directed: false,
                        location: "node".to_string(),
                        dummy: true,
                    });
                    graph.classes.push(None);
                }
                _ => {}
            }
        }

        for edge_id in edge_ids {
            let Some(links) = self.classes.get(&edge_id).and_then(|class| class.edge_links()) else {
                continue;
            };
            let edge_position = graph.class_lookup[&edge_id];
            for side in [Side::Source, Side::Target] {
                let node_position = match links.class_id(side) {
                    Some(node_id) => match graph.class_lookup.get(node_id) {
                        Some(position) => *position,
                        None => continue,
                    },
                    None if include_dummies => {
                        graph.classes.push(None);
                        graph.classes.len() - 1
                    }
                    None => continue,
                };
                let node_label = links.class_id(side).cloned().unwrap_or_else(|| "dummy".to_string());
                let (id, source, target) = match side {
                    Side::Source => (format!("{}>{}", node_label, edge_id), node_position, edge_position),
                    Side::Target => (format!("{}>{}", edge_id, node_label), edge_position, node_position),
                };
                graph.class_connections.push(ClassConnection {
                    id,
                    source,
                    target,
                    directed: links.directed,
                    location: side.to_string(),
                    dummy: links.class_id(side).is_none(),
                });
            }
        }
        graph
    }

    fn table_dependency_graph(&self) -> TableDependencyGraph {
        let mut graph = TableDependencyGraph::default();
        let table_ids = sorted_ids(self.tables.keys());
        for table_id in &table_ids {
            if let Some(table) = self.tables.get(table_id) {
                graph.table_lookup.insert(table_id.clone(), graph.tables.len());
                graph.tables.push(TableSnapshot::of(table));
            }
        }
        for table_id in &table_ids {
            let Some(table) = self.tables.get(table_id) else {
                continue;
            };
            for derived_id in &table.derived_table_ids {
                if let Some(target) = graph.table_lookup.get(derived_id) {
                    graph.table_links.push(TableLink {
                        source: graph.table_lookup[table_id],
                        target: *target,
                    });
                }
            }
        }
        graph
    }

    fn full_schema_graph(&self) -> OrigraphResult<SchemaGraph> {
        let classes = self.network_model_graph(false);
        let tables = self.table_dependency_graph();
        let offset = classes.classes.len();
        let mut graph = SchemaGraph::default();

        for class in classes.classes.iter().flatten() {
            let name = match &class.class_name {
                Some(name) => name.clone(),
                None => self.table_name(&class.table_id)?,
            };
            graph.nodes.push(SchemaNode {
                node_type: "Class".to_string(),
                id: class.class_id.clone(),
                name,
                kind: class.kind.type_name().to_string(),
            });
        }
        for table in &tables.tables {
            graph.nodes.push(SchemaNode {
                node_type: "Table".to_string(),
                id: table.table_id.clone(),
                name: self.table_name(&table.table_id)?,
                kind: table.spec.type_name().to_string(),
            });
        }

        for connection in &classes.class_connections {
            graph.links.push(SchemaLink {
                source: connection.source,
                target: connection.target,
                link_type: "ClassConnection".to_string(),
                directed: connection.directed,
            });
        }
        for link in &tables.table_links {
            graph.links.push(SchemaLink {
                source: offset + link.source,
                target: offset + link.target,
                link_type: "TableDependency".to_string(),
                directed: true,
            });
        }
        for (position, class) in classes.classes.iter().enumerate() {
            let Some(class) = class else {
                continue;
            };
            if let Some(table_position) = tables.table_lookup.get(&class.table_id) {
                graph.links.push(SchemaLink {
                    source: position,
                    target: offset + table_position,
                    link_type: "ClassTable".to_string(),
                    directed: true,
                });
            }
        }
        Ok(graph)
    }
}

impl NetworkModel {
    pub fn get_network_model_graph(&self, include_dummies: bool) -> OrigraphResult<NetworkModelGraph> {
        self.read(|state| Ok(state.network_model_graph(include_dummies)))
    }

    pub fn get_table_dependency_graph(&self) -> OrigraphResult<TableDependencyGraph> {
        self.read(|state| Ok(state.table_dependency_graph()))
    }

    pub fn get_full_schema_graph(&self) -> OrigraphResult<SchemaGraph> {
        self.read(|state| state.full_schema_graph())
    }

    /// New model whose nodes are this model's classes and tables and whose
    /// edges are the relations between them. It shares this model's function
    /// registry, bus and configuration.
    pub fn create_schema_model(&self) -> OrigraphResult<NetworkModel> {
        let graph = self.get_full_schema_graph()?;
        let schema = NetworkModel::with_parts(
            Uuid::new_v4().to_string(),
            format!("{}_schema", self.name()?),
            self.functions().clone(),
            self.bus().clone(),
            self.config().clone(),
        );

        let nodes = schema
            .add_static_table(StaticTableOptions {
                name: "Core Tables".to_string(),
                data: serde_json::to_value(&graph.nodes)?,
                attributes: vec!["type".to_string(), "id".to_string(), "name".to_string(), "kind".to_string()],
            })?
            .interpret_as_nodes()?;
        let links = schema
            .add_static_table(StaticTableOptions {
                name: "Core Links".to_string(),
                data: serde_json::to_value(&graph.links)?,
                attributes: vec!["source".to_string(), "target".to_string(), "type".to_string()],
            })?
            .interpret_as_edges(false)?;
        links.connect_source(&nodes, None, Some("source"))?;
        links.connect_target(&nodes, None, Some("target"))?;
        links.toggle_direction(Some(nodes.class_id()))?;
        Ok(schema)
    }
}
