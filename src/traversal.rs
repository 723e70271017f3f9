//! Item-level graph traversal
//!
//! Items are linked across tables through `connected_items`. A node reaches
//! its edges, and an edge its endpoint nodes, by walking those links along
//! the table paths recorded on the edge classes. Every table on a path gets
//! a complete cache before the walk starts.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::class::{ClassId, ClassKind, Side};
use crate::error::{OrigraphError, OrigraphResult};
use crate::item::WrappedItem;
use crate::model::{ModelState, NetworkModel};
use crate::table::TableId;

pub type ItemStream = BoxStream<'static, OrigraphResult<WrappedItem>>;

/// Bounds and class filter for a traversal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalOptions {
    pub limit: Option<usize>,
    /// Only follow these classes (edge classes from a node, node classes
    /// from an edge)
    pub class_ids: Option<Vec<ClassId>>,
}

impl TraversalOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            class_ids: None,
        }
    }

    fn allows(&self, class_id: &str) -> bool {
        self.class_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == class_id))
    }

    fn without_filter(&self) -> Self {
        Self {
            limit: self.limit,
            class_ids: None,
        }
    }
}

/// One (source, edge, target) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTriple {
    pub source: WrappedItem,
    pub edge: WrappedItem,
    pub target: WrappedItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperedge {
    pub edge: WrappedItem,
    pub sources: Vec<WrappedItem>,
    pub targets: Vec<WrappedItem>,
}

fn error_stream<T: Send + 'static>(e: OrigraphError) -> BoxStream<'static, OrigraphResult<T>> {
    stream::iter(vec![Err(e)]).boxed()
}

fn limited<T: Send + 'static>(
    items: impl futures::Stream<Item = OrigraphResult<T>> + Send + 'static,
    limit: Option<usize>,
) -> BoxStream<'static, OrigraphResult<T>> {
    match limit {
        Some(limit) => items.take(limit).boxed(),
        None => items.boxed(),
    }
}

impl ModelState {
    fn class_of(&self, item: &WrappedItem) -> Option<ClassId> {
        item.class_id
            .clone()
            .or_else(|| self.class_for_table(&item.table_id))
    }

    /// Paths from a node item's table to the tables of its edge classes
    fn node_edge_paths(&self, node: &WrappedItem, options: &TraversalOptions) -> OrigraphResult<Vec<Vec<TableId>>> {
        let class_id = self.class_of(node).unwrap_or_default();
        let mut paths = Vec::new();
        for edge_id in self.node_edge_ids(&class_id)? {
            if !options.allows(&edge_id) {
                continue;
            }
            let edge_table = self.class(&edge_id)?.table_id.clone();
            let links = self.edge_links(&edge_id)?;
            for side in links.sides_of(&class_id) {
                let mut path: Vec<TableId> = links.table_ids(side).iter().rev().cloned().collect();
                path.push(edge_table.clone());
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Paths from an edge item's table to its endpoint node tables
    fn edge_node_paths(&self, edge: &WrappedItem, sides: &[Side], options: &TraversalOptions) -> OrigraphResult<Vec<Vec<TableId>>> {
        let class_id = self.class_of(edge).unwrap_or_default();
        let links = self.edge_links(&class_id)?;
        let mut paths = Vec::new();
        for side in sides {
            let Some(node_id) = links.class_id(*side) else {
                continue;
            };
            if !options.allows(node_id) {
                continue;
            }
            let mut path = links.table_ids(*side).to_vec();
            path.push(self.class(node_id)?.table_id.clone());
            paths.push(path);
        }
        Ok(paths)
    }

    /// Depth-first walk of `connected_items` along `table_ids`
    fn walk_connections(&self, start: &WrappedItem, table_ids: &[TableId], limit: usize) -> Vec<WrappedItem> {
        let live = self.lookup_item(&start.item_ref()).unwrap_or(start);
        let mut found = Vec::new();
        self.walk(live, table_ids, limit, &mut found);
        found
    }

    fn walk(&self, item: &WrappedItem, table_ids: &[TableId], limit: usize, found: &mut Vec<WrappedItem>) {
        let Some((next, rest)) = table_ids.split_first() else {
            return;
        };
        let Some(table) = self.tables.get(next) else {
            return;
        };
        for index in item.connected(next) {
            if found.len() >= limit {
                return;
            }
            let Some(partner) = table.lookup(index) else {
                continue;
            };
            if rest.is_empty() {
                found.push(self.expose(partner));
            } else {
                self.walk(partner, rest, limit, found);
            }
        }
    }
}

impl NetworkModel {
    /// Items reached from `item` by following connections through each
    /// table of `table_ids` in turn
    pub fn iterate_across_connections(&self, item: &WrappedItem, table_ids: Vec<TableId>, limit: Option<usize>) -> ItemStream {
        let model = self.clone();
        let start = item.clone();
        stream::once(async move {
            match model.connections_along(&start, &table_ids, limit).await {
                Ok(items) => items.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn connections_along(&self, start: &WrappedItem, table_ids: &[TableId], limit: Option<usize>) -> OrigraphResult<Vec<WrappedItem>> {
        if table_ids.is_empty() {
            return Ok(Vec::new());
        }
        for table_id in table_ids {
            if !self.build_cache(table_id).await? {
                return Ok(Vec::new());
            }
        }
        self.read(|state| Ok(state.walk_connections(start, table_ids, limit.unwrap_or(usize::MAX))))
    }

    fn along_paths(&self, item: &WrappedItem, paths: Vec<Vec<TableId>>, limit: Option<usize>) -> ItemStream {
        let model = self.clone();
        let item = item.clone();
        let items = stream::iter(paths)
            .map(move |path| model.iterate_across_connections(&item, path, None))
            .flatten();
        limited(items, limit)
    }

    /// Edge items connected to a node item, over every edge class of its class
    pub fn edges(&self, node: &WrappedItem, options: TraversalOptions) -> ItemStream {
        match self.read(|state| state.node_edge_paths(node, &options)) {
            Ok(paths) => self.along_paths(node, paths, options.limit),
            Err(e) => error_stream(e),
        }
    }

    pub fn source_nodes(&self, edge: &WrappedItem, options: TraversalOptions) -> ItemStream {
        self.edge_nodes(edge, &[Side::Source], options)
    }

    pub fn target_nodes(&self, edge: &WrappedItem, options: TraversalOptions) -> ItemStream {
        self.edge_nodes(edge, &[Side::Target], options)
    }

    /// Source nodes followed by target nodes
    pub fn nodes(&self, edge: &WrappedItem, options: TraversalOptions) -> ItemStream {
        self.edge_nodes(edge, &[Side::Source, Side::Target], options)
    }

    fn edge_nodes(&self, edge: &WrappedItem, sides: &[Side], options: TraversalOptions) -> ItemStream {
        match self.read(|state| state.edge_node_paths(edge, sides, &options)) {
            Ok(paths) => self.along_paths(edge, paths, options.limit),
            Err(e) => error_stream(e),
        }
    }

    /// Every (source, edge, target) combination of an edge item
    pub fn pairwise_edges(&self, edge: &WrappedItem, options: TraversalOptions) -> BoxStream<'static, OrigraphResult<EdgeTriple>> {
        let model = self.clone();
        let edge = edge.clone();
        let target_options = options.clone();
        self.source_nodes(&edge, options)
            .then(move |source| {
                let model = model.clone();
                let edge = edge.clone();
                let options = target_options.clone();
                async move {
                    let source = source?;
                    let targets: Vec<WrappedItem> = model.target_nodes(&edge, options).try_collect().await?;
                    Ok(targets
                        .into_iter()
                        .map(|target| EdgeTriple {
                            source: source.clone(),
                            edge: edge.clone(),
                            target,
                        })
                        .collect::<Vec<_>>())
                }
            })
            .flat_map(|triples: OrigraphResult<Vec<EdgeTriple>>| {
                stream::iter(match triples {
                    Ok(triples) => triples.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                })
            })
            .boxed()
    }

    /// Triples of every edge touching a node item
    pub fn pairwise_neighborhood(&self, node: &WrappedItem, options: TraversalOptions) -> BoxStream<'static, OrigraphResult<EdgeTriple>> {
        let model = self.clone();
        let edge_options = options.without_filter();
        self.edges(node, options)
            .map(move |edge| match edge {
                Ok(edge) => model.pairwise_edges(&edge, edge_options.clone()),
                Err(e) => error_stream(e),
            })
            .flatten()
            .boxed()
    }

    /// Sources and targets of an edge item gathered at once
    pub async fn hyperedge(&self, edge: &WrappedItem, options: TraversalOptions) -> OrigraphResult<Hyperedge> {
        let sources = self.source_nodes(edge, options.clone()).try_collect().await?;
        let targets = self.target_nodes(edge, options).try_collect().await?;
        Ok(Hyperedge {
            edge: edge.clone(),
            sources,
            targets,
        })
    }

    /// Whether an item's class is a node class
    pub fn is_node_item(&self, item: &WrappedItem) -> OrigraphResult<bool> {
        self.read(|state| {
            Ok(state
                .class_of(item)
                .and_then(|class_id| state.classes.get(&class_id))
                .is_some_and(|class| matches!(class.kind, ClassKind::Node { .. })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::IterateOptions;
    use crate::testing_utils::people_and_places;

    #[tokio::test]
    async fn test_node_reaches_neighbors_through_edge() {
        let fixture = people_and_places();
        fixture
            .people
            .connect_to_node_class(&fixture.places, Some("home"), None)
            .unwrap();

        let alice = fixture
            .people
            .table()
            .unwrap()
            .get_item("alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.class_id.as_deref(), Some(fixture.people.class_id()));
        assert!(fixture.model.is_node_item(&alice).unwrap());

        let triples: Vec<EdgeTriple> = fixture
            .model
            .pairwise_neighborhood(&alice, TraversalOptions::default())
            .try_collect()
            .await
            .unwrap();
        // alice and carol both live north
        assert_eq!(triples.len(), 2);
        assert!(triples.iter().all(|triple| triple.target.index == "north"));
        assert!(triples.iter().any(|triple| triple.source.index == "alice"));
        assert!(triples.iter().any(|triple| triple.source.index == "carol"));
    }

    #[tokio::test]
    async fn test_edge_endpoints_and_limits() {
        let fixture = people_and_places();
        let lives = fixture
            .people
            .connect_to_node_class(&fixture.places, Some("home"), None)
            .unwrap();
        let edge_items: Vec<WrappedItem> = lives
            .table()
            .unwrap()
            .iterate(IterateOptions::default())
            .try_collect()
            .await
            .unwrap();
        // alice and carol live north, bob south
        assert_eq!(edge_items.len(), 2);
        let north = edge_items.iter().find(|item| item.index == "north").unwrap();

        let hyperedge = fixture
            .model
            .hyperedge(north, TraversalOptions::default())
            .await
            .unwrap();
        assert_eq!(hyperedge.sources.len(), 2);
        assert_eq!(hyperedge.targets.len(), 1);

        let limited: Vec<WrappedItem> = fixture
            .model
            .nodes(north, TraversalOptions::with_limit(1))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let filtered: Vec<WrappedItem> = fixture
            .model
            .nodes(
                north,
                TraversalOptions {
                    limit: None,
                    class_ids: Some(vec![fixture.places.class_id().to_string()]),
                },
            )
            .try_collect()
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].index, "north");
    }

    #[tokio::test]
    async fn test_wrong_kind_is_reported() {
        let fixture = people_and_places();
        let visit = WrappedItem::new(fixture.visits.table_id().unwrap(), "0", serde_json::json!({}));
        let result: OrigraphResult<Vec<WrappedItem>> = fixture
            .model
            .edges(&visit, TraversalOptions::default())
            .try_collect()
            .await;
        assert!(matches!(result, Err(OrigraphError::InvalidClassKind(_))));
    }
}
