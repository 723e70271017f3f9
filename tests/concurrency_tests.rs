use futures::TryStreamExt;
use origraph::{IterateOptions, NetworkModel, TableHandle, WrappedItem};
use serde_json::json;

mod common;
use common::{init_logger, static_table};

fn wide_table(model: &NetworkModel) -> TableHandle {
    let rows: Vec<_> = (0..500)
        .map(|i| json!({"group": format!("g{}", i % 7), "n": i}))
        .collect();
    static_table(model, "wide", json!(rows))
}

async fn read_all(table: TableHandle, options: IterateOptions) -> Vec<String> {
    let items: Vec<WrappedItem> = table.iterate(options).try_collect().await.unwrap();
    items.into_iter().map(|item| item.index).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_share_one_build() {
    init_logger();
    let model = NetworkModel::new("concurrent");
    let wide = wide_table(&model);
    let groups = wide.aggregate("group").unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| tokio::spawn(read_all(groups.clone(), IterateOptions::default())))
        .collect();
    let mut results = Vec::new();
    for reader in readers {
        results.push(reader.await.unwrap());
    }
    assert_eq!(results[0].len(), 7);
    assert!(results.iter().all(|result| result == &results[0]));
    assert!(groups.has_cache().unwrap());
    assert!(wide.has_cache().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_limited_and_full_readers_together() {
    init_logger();
    let model = NetworkModel::new("mixed");
    let wide = wide_table(&model);

    let limited = tokio::spawn(read_all(wide.clone(), IterateOptions::with_limit(10)));
    let full = tokio::spawn(read_all(wide.clone(), IterateOptions::default()));
    let limited = limited.await.unwrap();
    let full = full.await.unwrap();

    assert_eq!(limited.len(), 10);
    assert_eq!(full.len(), 500);
    assert_eq!(&full[..10], &limited[..]);
    assert!(wide.has_cache().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_while_reading_never_mixes_builds() {
    init_logger();
    let model = NetworkModel::new("reset race");
    let wide = wide_table(&model);
    let expanded = wide.expand("group", "g").unwrap();

    let reader = tokio::spawn(read_all(expanded.clone(), IterateOptions::default()));
    expanded.reset().unwrap();
    let partial = reader.await.unwrap();
    // an interrupted read stops early; a finished one saw the whole table
    assert!(partial.len() <= 1000);

    let fresh = read_all(expanded.clone(), IterateOptions::default()).await;
    assert_eq!(fresh.len(), 1000);
    let unique: std::collections::HashSet<_> = fresh.iter().collect();
    assert_eq!(unique.len(), 1000);
}
