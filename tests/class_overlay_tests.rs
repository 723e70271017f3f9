use futures::TryStreamExt;
use origraph::model::{SampleGraphOptions, StaticTableOptions};
use origraph::{ClassHandle, ClassKind, EdgeTriple, NetworkModel, TraversalOptions, WrappedItem};
use serde_json::json;

mod common;
use common::{init_logger, library, node_class};

/// People and places as nodes, with visits as a node class between them
fn visits_between(model: &NetworkModel) -> (ClassHandle, ClassHandle, ClassHandle) {
    let people = node_class(model, "people", json!({"alice": {}, "bob": {}}));
    let places = node_class(model, "places", json!({"north": {}, "south": {}}));
    let visits = model
        .add_static_table(StaticTableOptions {
            name: "visits".to_string(),
            data: json!([
                {"person": "alice", "place": "north"},
                {"person": "bob", "place": "south"},
                {"person": "alice", "place": "south"},
            ]),
            attributes: vec![],
        })
        .and_then(|class| class.interpret_as_nodes())
        .unwrap();
    visits
        .connect_to_node_class(&people, Some("person"), None)
        .unwrap();
    visits
        .connect_to_node_class(&places, Some("place"), None)
        .unwrap();
    (people, places, visits)
}

async fn first_item(class: &ClassHandle, index: &str) -> WrappedItem {
    class
        .table()
        .unwrap()
        .get_item(index)
        .await
        .unwrap()
        .expect("item should exist")
}

#[tokio::test]
async fn test_node_with_two_edges_becomes_one_edge() {
    init_logger();
    let model = NetworkModel::new("round trip");
    let (people, places, visits) = visits_between(&model);
    assert_eq!(visits.edge_classes().unwrap().len(), 2);

    let visits = visits.interpret_as_edges(true).unwrap();
    let links = visits.edge_links().unwrap();
    assert_eq!(links.source_class_id.as_deref(), Some(people.class_id()));
    assert_eq!(links.target_class_id.as_deref(), Some(places.class_id()));
    // the two old edge classes were absorbed
    assert_eq!(model.classes().unwrap().len(), 3);

    let visit = first_item(&visits, "0").await;
    let triples: Vec<EdgeTriple> = model
        .pairwise_edges(&visit, TraversalOptions::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].source.index, "alice");
    assert_eq!(triples[0].target.index, "north");
}

#[tokio::test]
async fn test_edge_back_to_nodes_splits_the_path() {
    init_logger();
    let model = NetworkModel::new("round trip");
    let (people, _places, visits) = visits_between(&model);
    let visits = visits
        .interpret_as_edges(true)
        .and_then(|visits| visits.interpret_as_nodes())
        .unwrap();
    assert!(matches!(visits.kind().unwrap(), ClassKind::Node { .. }));

    let edges = visits.edge_classes().unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(model.classes().unwrap().len(), 5);

    // people are the source of the edge toward them, visits the target
    let toward_people = edges
        .iter()
        .find(|edge| edge.edge_links().unwrap().source_class_id.as_deref() == Some(people.class_id()))
        .unwrap();
    let alice_edge = first_item(toward_people, "alice").await;
    let alice: Vec<WrappedItem> = model
        .source_nodes(&alice_edge, TraversalOptions::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].index, "alice");
    let her_visits: Vec<WrappedItem> = model
        .target_nodes(&alice_edge, TraversalOptions::default())
        .try_collect()
        .await
        .unwrap();
    let mut indexes: Vec<&str> = her_visits.iter().map(|item| item.index.as_str()).collect();
    indexes.sort();
    assert_eq!(indexes, vec!["0", "2"]);
}

#[tokio::test]
async fn test_conversions_are_idempotent() {
    let model = NetworkModel::new("idempotent");
    let (authors, books) = library(&model);
    let written = books
        .connect_to_node_class(&authors, Some("written_by"), None)
        .unwrap();
    let before = model.to_snapshot().unwrap();

    authors.interpret_as_nodes().unwrap();
    written.interpret_as_edges(true).unwrap();
    assert_eq!(model.to_snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_library_neighborhood() {
    init_logger();
    let model = NetworkModel::new("library");
    let (authors, books) = library(&model);
    books
        .connect_to_node_class(&authors, Some("written_by"), None)
        .unwrap();

    let grace = first_item(&authors, "grace").await;
    let edges: Vec<WrappedItem> = model
        .edges(&grace, TraversalOptions::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    let hyperedge = model
        .hyperedge(&edges[0], TraversalOptions::default())
        .await
        .unwrap();
    let mut titles: Vec<&str> = hyperedge.sources.iter().map(|item| item.index.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["cobol", "compilers"]);
    assert_eq!(hyperedge.targets[0].index, "grace");
}

#[tokio::test]
async fn test_sample_graph_respects_limits() {
    init_logger();
    let model = NetworkModel::new("sample");
    let (authors, books) = library(&model);
    books
        .connect_to_node_class(&authors, Some("written_by"), None)
        .unwrap();

    let full = model
        .get_sample_graph(SampleGraphOptions::default())
        .await
        .unwrap();
    assert_eq!(full.nodes.len(), 5);
    assert_eq!(full.links.len(), 3);

    let bounded = model
        .get_sample_graph(SampleGraphOptions {
            edge_limit: Some(1),
            ..SampleGraphOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(bounded.edges.len(), 1);
    assert!(bounded.links.iter().all(|link| link.edge == 0));
}
