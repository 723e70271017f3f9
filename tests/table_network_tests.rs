use futures::{StreamExt, TryStreamExt};
use origraph::{IterateOptions, NetworkModel, TableReset, WrappedItem};
use serde_json::{json, Value};

mod common;
use common::{init_logger, scores, static_table};

async fn collect(table: &origraph::TableHandle) -> Vec<WrappedItem> {
    table
        .iterate(IterateOptions::default())
        .try_collect()
        .await
        .expect("iteration failed")
}

#[tokio::test]
async fn test_aggregate_with_reducer() {
    init_logger();
    let model = NetworkModel::new("aggregate");
    let scores = scores(&model);
    let by_cat = scores.aggregate("cat").unwrap();
    by_cat
        .derive_reduced_attribute("sum", |aggregate, parent| {
            let so_far = aggregate.get("sum").and_then(Value::as_i64).unwrap_or(0);
            let v = parent.get("v").and_then(Value::as_i64).unwrap_or(0);
            json!(so_far + v)
        })
        .unwrap();

    let rows = collect(&by_cat).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].index, "a");
    assert_eq!(rows[0].get("sum"), Some(&json!(4)));
    assert_eq!(rows[1].index, "b");
    assert_eq!(rows[1].get("sum"), Some(&json!(5)));

    // every source row points at its group
    let first = scores.get_item("0").await.unwrap().unwrap();
    assert!(first.connected(by_cat.table_id()).contains(&"a".to_string()));
}

#[tokio::test]
async fn test_expand_splits_values() {
    init_logger();
    let model = NetworkModel::new("expand");
    let tagged = static_table(&model, "tagged", json!([{"tags": "x,y,z"}]));
    let expanded = tagged.expand("tags", ",").unwrap();
    let tags: Vec<Value> = collect(&expanded)
        .await
        .into_iter()
        .filter_map(|item| item.get("tags").cloned())
        .collect();
    assert_eq!(tags, vec![json!("x"), json!("y"), json!("z")]);
}

#[tokio::test]
async fn test_facets_and_transpose() {
    let model = NetworkModel::new("facets");
    let scores = scores(&model);
    let facets = scores.closed_facet("cat", &[json!("a"), json!("c")]).unwrap();
    assert_eq!(facets[0].count_rows().await.unwrap(), 2);
    assert_eq!(facets[1].count_rows().await.unwrap(), 0);

    let transposed = scores.closed_transpose(&["2".to_string()]).unwrap();
    let rows = collect(&transposed[0]).await;
    let indexes: Vec<&str> = rows.iter().map(|item| item.index.as_str()).collect();
    assert_eq!(indexes, vec!["cat", "v"]);
    assert_eq!(rows[1].row, json!({"value": 5}));
}

#[tokio::test]
async fn test_connect_joins_on_index() {
    init_logger();
    let model = NetworkModel::new("join");
    let left = static_table(
        &model,
        "left",
        json!({"a": {"l": 1}, "b": {"l": 2}, "c": {"l": 3}}),
    );
    let right = static_table(&model, "right", json!({"c": {"r": 3}, "a": {"r": 1}}));
    let joined = left.connect(&[right.clone()]).unwrap();

    let rows = collect(&joined).await;
    let indexes: Vec<&str> = rows.iter().map(|item| item.index.as_str()).collect();
    assert_eq!(indexes, vec!["a", "c"]);
    assert!(rows[0].connected(left.table_id()).contains(&"a".to_string()));
    assert!(rows[0].connected(right.table_id()).contains(&"a".to_string()));
}

#[tokio::test]
async fn test_reset_cascades_to_descendants_only() {
    init_logger();
    let model = NetworkModel::new("reset");
    let scores = scores(&model);
    let by_cat = scores.aggregate("cat").unwrap();
    let by_v = scores.aggregate("v").unwrap();
    let facet = by_cat.closed_facet("cat", &[json!("a")]).unwrap().remove(0);
    for table in [&by_cat, &by_v, &facet] {
        assert!(table.build_cache().await.unwrap());
    }

    let mut resets = model.bus().subscribe::<TableReset>();
    by_cat.reset().unwrap();
    assert!(!by_cat.has_cache().unwrap());
    assert!(!facet.has_cache().unwrap());
    assert!(by_v.has_cache().unwrap());
    assert!(scores.has_cache().unwrap());

    let reset_ids: Vec<String> = resets.drain().into_iter().map(|e| e.table_id).collect();
    assert_eq!(reset_ids.len(), 2);
    assert!(reset_ids.contains(&by_cat.table_id().to_string()));
    assert!(reset_ids.contains(&facet.table_id().to_string()));
}

#[tokio::test]
async fn test_reset_ends_an_iteration_in_flight() {
    let model = NetworkModel::new("interrupt");
    let scores = scores(&model);
    let mut stream = scores.iterate(IterateOptions::default());
    assert!(stream.next().await.unwrap().is_ok());
    scores.reset().unwrap();
    assert!(stream.next().await.is_none());

    // a fresh read rebuilds from scratch
    assert_eq!(collect(&scores).await.len(), 3);
}

#[tokio::test]
async fn test_limited_reads_are_never_promoted() {
    init_logger();
    let model = NetworkModel::new("limits");
    let scores = scores(&model);
    let first: Vec<WrappedItem> = scores
        .iterate(IterateOptions::with_limit(1))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(!scores.has_cache().unwrap());
    assert!(!scores.current_data().unwrap().complete);

    // the parked build is resumed, not restarted
    assert_eq!(collect(&scores).await.len(), 3);
    assert!(scores.has_cache().unwrap());
}

#[tokio::test]
async fn test_rereading_is_idempotent() {
    let model = NetworkModel::new("idempotent");
    let scores = scores(&model);
    let by_cat = scores.aggregate("cat").unwrap();
    assert_eq!(scores.aggregate("cat").unwrap().table_id(), by_cat.table_id());

    let before = collect(&by_cat).await;
    let again = collect(&by_cat).await;
    let rebuilt: Vec<WrappedItem> = by_cat
        .iterate(IterateOptions::with_reset())
        .try_collect()
        .await
        .unwrap();
    let indexes = |items: &[WrappedItem]| items.iter().map(|i| i.index.clone()).collect::<Vec<_>>();
    assert_eq!(indexes(&before), indexes(&again));
    assert_eq!(indexes(&before), indexes(&rebuilt));
}

#[tokio::test]
async fn test_delete_guard() {
    init_logger();
    let model = NetworkModel::new("guard");
    let scores = scores(&model);
    let by_cat = scores.aggregate("cat").unwrap();
    assert!(scores.in_use().unwrap());

    let err = scores.delete().unwrap_err();
    assert!(err.is_in_use());

    by_cat.delete().unwrap();
    assert!(model.table(by_cat.table_id()).is_err());
    // still attached to the class created with it
    assert!(scores.delete().unwrap_err().is_in_use());
}

#[tokio::test]
async fn test_filters_and_derived_attributes() {
    let model = NetworkModel::new("filters");
    let scores = scores(&model);
    scores
        .derive_attribute("double", |item| {
            json!(item.get("v").and_then(Value::as_i64).unwrap_or(0) * 2)
        })
        .unwrap();
    scores
        .add_filter("double", |value| value.and_then(Value::as_i64).is_some_and(|n| n > 2))
        .unwrap();
    scores.add_index_filter(|index| index != "2").unwrap();

    let rows = collect(&scores).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].index, "1");
    assert_eq!(rows[0].get("double"), Some(&json!(6)));
}
