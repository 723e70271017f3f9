use futures::TryStreamExt;
use origraph::model::{StaticTableOptions, StringTableOptions};
use origraph::{
    FunctionRegistry, IterateOptions, KeyValueStore, Origraph, OrigraphConfig, SledStore,
    WrappedItem,
};
use serde_json::{json, Value};
use std::sync::Arc;

mod common;
use common::init_logger;

fn functions() -> FunctionRegistry {
    let functions = FunctionRegistry::new();
    functions.register_derive("label", |item| {
        json!(format!("{}!", item.get("name").and_then(Value::as_str).unwrap_or("")))
    });
    functions
}

fn open(path: &std::path::Path) -> Origraph {
    let store = SledStore::open(path).expect("Failed to open sled store");
    Origraph::with_functions(Arc::new(store), OrigraphConfig::default(), functions())
        .expect("Failed to open registry")
}

#[tokio::test]
async fn test_models_survive_reopen() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let model_id = {
        let origraph = open(dir.path());
        let model = origraph.create_model(Some("crew")).unwrap();
        let crew = model
            .add_string_as_static_table(StringTableOptions {
                name: "crew.csv".to_string(),
                extension: "csv".to_string(),
                text: "name,role\nada,pilot\ngrace,engineer\n".to_string(),
            })
            .unwrap();
        crew.table()
            .unwrap()
            .derive_attribute_named("label", "label")
            .unwrap();
        let roles = crew.aggregate("role").unwrap();
        roles.set_class_name(Some("Roles".to_string())).unwrap();
        assert!(origraph.flush().unwrap());
        model.model_id().to_string()
    };

    let origraph = open(dir.path());
    let model = origraph.model(&model_id).unwrap();
    assert_eq!(model.name().unwrap(), "crew");
    assert_eq!(model.class_ids().unwrap().len(), 2);
    let roles = model
        .classes()
        .unwrap()
        .into_iter()
        .find(|class| class.class_name().unwrap() == "Roles")
        .unwrap();
    assert_eq!(roles.table().unwrap().count_rows().await.unwrap(), 2);

    let crew = model.table("0").unwrap();
    let rows: Vec<WrappedItem> = crew
        .iterate(IterateOptions::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows[0].get("label"), Some(&json!("ada!")));
}

#[test]
fn test_flush_writes_only_after_changes() {
    init_logger();
    let store = Arc::new(SledStore::temporary().unwrap());
    let origraph = Origraph::new(store.clone(), OrigraphConfig::default()).unwrap();
    assert!(!origraph.flush().unwrap());
    assert!(store.get(&origraph.config().storage_key).unwrap().is_none());

    let model = origraph.create_model(None).unwrap();
    model
        .add_static_table(StaticTableOptions {
            name: "empty".to_string(),
            data: json!([]),
            attributes: vec![],
        })
        .unwrap();
    assert!(origraph.flush().unwrap());
    let stored = store.get(&origraph.config().storage_key).unwrap().unwrap();
    assert_eq!(stored[model.model_id()]["name"], "Untitled Model");
    assert!(!origraph.flush().unwrap());
}

#[test]
fn test_configuration_from_toml() {
    let config = OrigraphConfig::from_toml_str(
        r#"
        storage_key = "graphs"
        [sample_graph]
        node_limit = 50
        "#,
    )
    .unwrap();
    assert_eq!(config.storage_key, "graphs");
    assert_eq!(config.sample_graph.node_limit, Some(50));

    let origraph = Origraph::new(Arc::new(SledStore::temporary().unwrap()), config).unwrap();
    let model = origraph.create_model(Some("limited")).unwrap();
    assert_eq!(model.sample_graph_options().node_limit, Some(50));
    assert!(OrigraphConfig::from_toml_str("max_file_size_mb = 0").is_err());
}

#[test]
fn test_schema_models_are_registered() {
    let origraph = Origraph::new(
        Arc::new(origraph::MemoryStore::new()),
        OrigraphConfig::default(),
    )
    .unwrap();
    let model = origraph.create_model(Some("base")).unwrap();
    model
        .add_static_table(StaticTableOptions {
            name: "rows".to_string(),
            data: json!([{"a": 1}]),
            attributes: vec![],
        })
        .unwrap();
    let schema = origraph.create_schema_model(model.model_id()).unwrap();
    assert_eq!(schema.name().unwrap(), "base_schema");
    assert_eq!(
        origraph.current_model().unwrap().unwrap().model_id(),
        schema.model_id()
    );
    assert_eq!(origraph.models().unwrap().len(), 2);
}
