//! Bounded sample of the item-level graph

use futures::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::NetworkModel;
use crate::class::{ClassId, ClassKind};
use crate::config::SampleGraphConfig;
use crate::error::OrigraphResult;
use crate::item::WrappedItem;
use crate::table::IterateOptions;
use crate::traversal::{EdgeTriple, TraversalOptions};

/// Bounds of a sample; `None` is unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleGraphOptions {
    /// Start from this class only instead of every class
    pub root_class: Option<ClassId>,
    /// Triples followed from any one item
    pub branch_limit: Option<usize>,
    pub node_limit: Option<usize>,
    pub edge_limit: Option<usize>,
    pub triple_limit: Option<usize>,
}

impl SampleGraphOptions {
    pub fn from_config(config: &SampleGraphConfig) -> Self {
        Self {
            root_class: None,
            branch_limit: config.branch_limit,
            node_limit: config.node_limit,
            edge_limit: config.edge_limit,
            triple_limit: config.triple_limit,
        }
    }
}

/// Positions into [`SampleGraph::nodes`] and [`SampleGraph::edges`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleLink {
    pub source: usize,
    pub target: usize,
    pub edge: usize,
}

/// Nodes and edges deduplicated by instance id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleGraph {
    pub nodes: Vec<WrappedItem>,
    pub node_lookup: HashMap<String, usize>,
    pub edges: Vec<WrappedItem>,
    pub edge_lookup: HashMap<String, usize>,
    pub links: Vec<SampleLink>,
    #[serde(skip)]
    seen_links: HashSet<SampleLink>,
}

fn within(count: usize, limit: Option<usize>) -> bool {
    limit.map_or(true, |limit| count <= limit)
}

impl SampleGraph {
    fn add_node(&mut self, node: &WrappedItem, options: &SampleGraphOptions) -> bool {
        let id = node.instance_id();
        if self.node_lookup.contains_key(&id) {
            return true;
        }
        if !within(self.nodes.len() + 1, options.node_limit) {
            return false;
        }
        self.node_lookup.insert(id, self.nodes.len());
        self.nodes.push(node.clone());
        true
    }

    fn add_edge(&mut self, edge: &WrappedItem, options: &SampleGraphOptions) -> bool {
        let id = edge.instance_id();
        if self.edge_lookup.contains_key(&id) {
            return true;
        }
        if !within(self.edges.len() + 1, options.edge_limit) {
            return false;
        }
        self.edge_lookup.insert(id, self.edges.len());
        self.edges.push(edge.clone());
        true
    }

    /// Add a triple only if every limit still holds afterwards
    fn add_triple(&mut self, triple: &EdgeTriple, options: &SampleGraphOptions) -> bool {
        let source_id = triple.source.instance_id();
        let target_id = triple.target.instance_id();
        let mut new_nodes = HashSet::new();
        for id in [&source_id, &target_id] {
            if !self.node_lookup.contains_key(id) {
                new_nodes.insert(id);
            }
        }
        let new_edge = !self.edge_lookup.contains_key(&triple.edge.instance_id());
        if !within(self.nodes.len() + new_nodes.len(), options.node_limit)
            || !within(self.edges.len() + usize::from(new_edge), options.edge_limit)
            || !within(self.links.len() + 1, options.triple_limit)
        {
            return false;
        }

        self.add_node(&triple.source, options);
        self.add_node(&triple.target, options);
        self.add_edge(&triple.edge, options);
        let link = SampleLink {
            source: self.node_lookup[&source_id],
            target: self.node_lookup[&target_id],
            edge: self.edge_lookup[&triple.edge.instance_id()],
        };
        if self.seen_links.insert(link) {
            self.links.push(link);
        }
        true
    }
}

impl NetworkModel {
    /// Default sample bounds from this model's configuration
    pub fn sample_graph_options(&self) -> SampleGraphOptions {
        SampleGraphOptions::from_config(&self.config().sample_graph)
    }

    /// Walk node and edge classes, collecting items and the triples around
    /// them, and stop as soon as the next addition would break a limit
    pub async fn get_sample_graph(&self, options: SampleGraphOptions) -> OrigraphResult<SampleGraph> {
        let mut graph = SampleGraph::default();
        let class_ids = match &options.root_class {
            Some(class_id) => vec![self.class(class_id)?.class_id().to_string()],
            None => self.class_ids()?,
        };
        let branch = TraversalOptions {
            limit: options.branch_limit,
            class_ids: None,
        };

        for class_id in class_ids {
            let class = self.class(&class_id)?;
            let table_id = class.table_id()?;
            match class.kind()? {
                ClassKind::Node { .. } => {
                    let mut nodes = self.iterate(&table_id, IterateOptions::default());
                    while let Some(node) = nodes.next().await {
                        let node = node?;
                        if !graph.add_node(&node, &options) {
                            return Ok(graph);
                        }
                        let mut triples = self.pairwise_neighborhood(&node, branch.clone());
                        while let Some(triple) = triples.next().await {
                            if !graph.add_triple(&triple?, &options) {
                                return Ok(graph);
                            }
                        }
                    }
                }
                ClassKind::Edge(_) => {
                    let mut edges = self.iterate(&table_id, IterateOptions::default());
                    while let Some(edge) = edges.next().await {
                        let edge = edge?;
                        if !graph.add_edge(&edge, &options) {
                            return Ok(graph);
                        }
                        let mut triples = self.pairwise_edges(&edge, branch.clone());
                        while let Some(triple) = triples.next().await {
                            if !graph.add_triple(&triple?, &options) {
                                return Ok(graph);
                            }
                        }
                    }
                }
                ClassKind::Generic => {}
            }
        }
        debug!(
            "Model {}: sampled {} node(s), {} edge(s), {} link(s)",
            self.model_id(),
            graph.nodes.len(),
            graph.edges.len(),
            graph.links.len()
        );
        Ok(graph)
    }
}
