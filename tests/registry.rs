use std::sync::Arc;

use serde_json::json;
use soundings::backend::Backend;
use soundings::config::Settings;
use soundings::persist::{PersistenceMode, Persistor};
use soundings::registry::{self, DatasetRegistry};
use soundings::sample::Sample;
use soundings::store::SampleStore;

#[test]
fn collection_naming() {
    assert_eq!(registry::collection_name("events", None), "datasets/events");
    assert_eq!(registry::collection_name("events", Some("eu")), "datasets/events/eu");
    assert_eq!(registry::collection_for_table("events/eu"), "datasets/events/eu");
    assert_eq!(registry::table_name("datasets/events/eu"), Some("events/eu"));
    assert_eq!(registry::table_name("snapshots.datasets/events"), Some("events"));
    assert_eq!(registry::table_name("system.indexes"), None);
}

#[tokio::test]
async fn list_drop_and_stats() {
    let store: Arc<dyn SampleStore> =
        Arc::new(Persistor::new(PersistenceMode::InMemory, 1 << 20).expect("store"));
    let doc = Sample::new().with_integer("time", 1).to_document();
    store.insert("datasets/events", vec![doc.clone(), doc.clone()]).await.expect("insert");
    store.insert("datasets/events/eu", vec![doc.clone()]).await.expect("insert");
    store.insert("scratch", vec![doc]).await.expect("insert");

    let registry = DatasetRegistry::new(Arc::clone(&store));
    let tables: Vec<String> = registry
        .list()
        .await
        .expect("list")
        .into_iter()
        .map(|dataset| dataset.table_name)
        .collect();
    assert_eq!(tables, vec!["events", "events/eu"]);

    let stats = registry.stats("events").await.expect("stats");
    assert_eq!(stats.ns, "datasets/events");
    assert_eq!(stats.count, 2);
    assert!(stats.capped);
    assert_eq!(stats.max_size, 1 << 20);
    assert_eq!(stats.avg_obj_size, stats.size / 2);

    assert_eq!(registry.drop("events").await.expect("drop"), "events");
    let tables = registry.list().await.expect("list");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_name, "events/eu");

    // dropping again is harmless
    registry.drop("events").await.expect("drop");
    let stats = registry.stats("events").await.expect("stats");
    assert_eq!(stats.count, 0);
    assert!(!stats.capped);
}

#[tokio::test]
async fn dropping_through_the_backend_forgets_columns() {
    let backend = Backend::open(Settings::default()).expect("backend");
    backend
        .add_sample("events", None, json!({ "integer": { "time": 1, "latency": 5 } }))
        .await;
    let columns = backend.get_columns("events").await.expect("columns");
    assert_eq!(columns.columns().len(), 2);
    assert!(backend.schema().cached("events").expect("lock").is_some());

    assert_eq!(backend.drop("events").await.expect("drop"), "events");
    assert!(backend.schema().cached("events").expect("lock").is_none());
    assert!(backend.tables().await.expect("tables").is_empty());
}
