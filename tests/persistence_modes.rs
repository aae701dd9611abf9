use serde_json::json;
use soundings::backend::Backend;
use soundings::config::{Settings, StorageSettings};
use soundings::persist::{PersistenceMode, Persistor};
use soundings::pipeline::{Op, PipelineStage, Predicate};
use soundings::query::QueryOptions;
use soundings::sample::Sample;
use soundings::store::SampleStore;

#[tokio::test]
async fn in_memory_mode_allows_basic_operations() {
    let store = Persistor::new(PersistenceMode::InMemory, 1 << 20).expect("store");
    let doc = Sample::new().with_integer("time", 5).with_string("host", "a").to_document();
    let inserted = store.insert("datasets/events", vec![doc]).await.expect("insert");
    assert_eq!(inserted[0]["_id"], json!(1));

    let rows = store
        .aggregate("datasets/events", &[PipelineStage::Limit(10)])
        .await
        .expect("aggregate");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["string"]["host"], json!("a"));

    let none = store.aggregate("datasets/missing", &[]).await.expect("aggregate");
    assert!(none.is_empty());
}

#[tokio::test]
async fn file_mode_persists_across_reopen() {
    // Use a temp path; reuse the same file to check the data survives
    let path = std::env::temp_dir()
        .join("test_soundings_temp.db")
        .to_string_lossy()
        .into_owned();
    // Ensure clean start
    let _ = std::fs::remove_file(&path);
    let settings = Settings {
        storage: StorageSettings { path: Some(path.clone()), ..StorageSettings::default() },
        ..Settings::default()
    };
    assert_eq!(settings.storage.mode(), PersistenceMode::File(path.clone()));

    {
        let backend = Backend::open(settings.clone()).expect("backend");
        let samples = (0..10)
            .map(|i| Sample::new().with_integer("time", i).with_integer("latency", i).to_document())
            .collect();
        let report = backend.add_samples("events", None, samples).await;
        assert_eq!(report.inserted.len(), 10);
    }

    let backend = Backend::open(settings).expect("reopen");
    let tables = backend.tables().await.expect("tables");
    assert_eq!(tables.len(), 1);
    let rows = backend
        .query_table("events", &QueryOptions::new().cols(&["latency"]))
        .await
        .expect("query ok");
    assert_eq!(rows[0]["count"], json!(10));
    // identities keep counting after a reopen
    let report = backend
        .add_sample("events", None, json!({ "integer": { "time": 11 } }))
        .await;
    assert_eq!(report.inserted[0]["_id"], json!(11));
    drop(backend);
    // Clean up
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn capped_collections_evict_oldest() {
    let doc = |time: i64| Sample::new().with_integer("time", time).to_document();
    let size = serde_json::to_string(&doc(0)).expect("json").len() as u64;
    // room for exactly three documents of this size
    let store = Persistor::new(PersistenceMode::InMemory, size * 3).expect("store");

    let inserted = store
        .insert("datasets/capped", (0..5).map(doc).collect())
        .await
        .expect("insert");
    let stats = store.collection_stats("datasets/capped").await.expect("stats");
    assert_eq!(stats.count, 3);
    // only the documents that survived eviction are reported
    assert_eq!(inserted.len(), 3);
    assert_eq!(inserted[0]["integer"]["time"], json!(2));
    assert!(stats.size <= stats.max_size);

    let oldest = Predicate::field("integer.time").with(Op::Lt, 2);
    let rows = store
        .aggregate("datasets/capped", &[PipelineStage::Match(oldest)])
        .await
        .expect("aggregate");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn oversized_document_is_not_reported() {
    let backend = Backend::open(Settings {
        storage: StorageSettings { max_dataset_bytes: 16, ..StorageSettings::default() },
        ..Settings::default()
    })
    .expect("backend");
    let big = Sample::new().with_integer("time", 1).with_string("host", &"a".repeat(64)).to_document();
    let report = backend.add_sample("events", None, big).await;
    assert!(report.is_complete());
    assert!(report.inserted.is_empty());
    assert_eq!(backend.stats("events").await.expect("stats").count, 0);
}

#[tokio::test]
async fn drop_removes_collection() {
    let store = Persistor::new(PersistenceMode::InMemory, 1 << 20).expect("store");
    store
        .insert("datasets/a", vec![Sample::new().with_integer("time", 1).to_document()])
        .await
        .expect("insert");
    store.drop_collection("datasets/a").await.expect("drop");
    assert!(store.list_collection_names().await.expect("names").is_empty());
    store.drop_collection("datasets/a").await.expect("drop twice");
}
