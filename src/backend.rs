//! The query layer as one handle: store, schema cache, executor, batcher and
//! registry wired together from [`Settings`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::Result;
use crate::executor::{QueryExecutor, QueryKind, SampleGrid};
use crate::ingestion::{IngestReport, IngestionBatcher};
use crate::persist::Persistor;
use crate::pipeline::PipelineStage;
use crate::query::QueryOptions;
use crate::registry::{Dataset, DatasetRegistry};
use crate::schema::{ColumnMeta, Columns, SchemaCache};
use crate::store::{CollectionStats, SampleStore};

pub struct Backend {
    store: Arc<dyn SampleStore>,
    schema: SchemaCache,
    executor: QueryExecutor,
    batcher: IngestionBatcher,
    registry: DatasetRegistry,
    settings: Settings,
}

impl Backend {
    pub fn new(store: Arc<dyn SampleStore>, settings: Settings) -> Self {
        Self {
            schema: SchemaCache::from_settings(&settings.schema),
            executor: QueryExecutor::new(Arc::clone(&store)),
            batcher: IngestionBatcher::new(Arc::clone(&store), settings.ingest.chunk_size),
            registry: DatasetRegistry::new(Arc::clone(&store)),
            store,
            settings,
        }
    }

    /// Opens the bundled SQLite store the settings point at.
    pub fn open(settings: Settings) -> Result<Self> {
        let persistor = Persistor::new(settings.storage.mode(), settings.storage.max_dataset_bytes)?;
        Ok(Self::new(Arc::new(persistor), settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn store(&self) -> &Arc<dyn SampleStore> {
        &self.store
    }
    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    // ------------- Schema -------------
    pub async fn get_columns(&self, table: &str) -> Result<Columns> {
        self.schema.get_columns(&self.store, table).await
    }

    pub fn clear_cache(&self, table: &str) -> Result<()> {
        self.schema.clear(table)
    }

    // ------------- Queries -------------
    fn with_defaults(&self, kind: QueryKind, options: &QueryOptions, columns: &[ColumnMeta]) -> QueryOptions {
        let defaults = &self.settings.query;
        let mut options = options.clone();
        match kind {
            QueryKind::TimeSeries => {
                options.time_bucket = options.time_bucket.filter(|size| *size > 0);
                options.time_bucket.get_or_insert(defaults.time_bucket);
            }
            QueryKind::Histogram => {
                options.hist_bucket = options.hist_bucket.filter(|size| *size > 0);
                // an inferred range decides the bucket before the configured default does
                let target = options.col.as_ref().or_else(|| options.cols.first());
                let has_range = target
                    .and_then(|col| columns.iter().find(|meta| &meta.name == col))
                    .is_some_and(|meta| meta.min_value.is_some() && meta.max_value.is_some());
                if !has_range {
                    options.hist_bucket.get_or_insert(defaults.hist_bucket);
                }
            }
            QueryKind::Samples => {
                options.limit.get_or_insert(defaults.sample_limit);
            }
            QueryKind::Table => {}
        }
        options
    }

    /// Runs a query of `kind` on `table`. Column metadata is taken from the
    /// schema cache as it is; a stale entry is used without waiting for its
    /// refresh.
    pub async fn query(&self, kind: QueryKind, table: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        let columns = if kind == QueryKind::Histogram || options.full_samples {
            let columns = self.get_columns(table).await?;
            if columns.is_stale() {
                debug!(table, "querying with stale columns");
            }
            columns.columns().to_vec()
        } else {
            Vec::new()
        };
        let options = self.with_defaults(kind, options, &columns);
        self.executor.execute(kind, table, &options, &columns).await
    }

    pub async fn query_table(&self, table: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        self.query(QueryKind::Table, table, options).await
    }
    pub async fn query_time_series(&self, table: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        self.query(QueryKind::TimeSeries, table, options).await
    }
    pub async fn query_hist(&self, table: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        self.query(QueryKind::Histogram, table, options).await
    }
    pub async fn query_samples(&self, table: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        self.query(QueryKind::Samples, table, options).await
    }

    pub async fn samples_grid(&self, table: &str, options: &QueryOptions) -> Result<SampleGrid> {
        let samples = self.query_samples(table, options).await?;
        Ok(SampleGrid::from_samples(&samples))
    }

    /// Runs a hand-built pipeline.
    pub async fn run(&self, table: &str, pipeline: &[PipelineStage], unweight: bool) -> Result<Vec<Value>> {
        self.executor.run_pipeline(table, pipeline, unweight).await
    }

    // ------------- Ingestion -------------
    pub async fn add_samples(&self, dataset: &str, subset: Option<&str>, samples: Vec<Value>) -> IngestReport {
        self.batcher.add_samples(dataset, subset, samples).await
    }
    pub async fn add_sample(&self, dataset: &str, subset: Option<&str>, sample: Value) -> IngestReport {
        self.batcher.add_sample(dataset, subset, sample).await
    }

    // ------------- Datasets -------------
    pub async fn tables(&self) -> Result<Vec<Dataset>> {
        self.registry.list().await
    }

    /// Drops the dataset and forgets its cached columns.
    pub async fn drop(&self, table: &str) -> Result<String> {
        let dropped = self.registry.drop(table).await?;
        self.schema.clear(table)?;
        info!(table, "dataset and cached columns removed");
        Ok(dropped)
    }

    pub async fn stats(&self, table: &str) -> Result<CollectionStats> {
        self.registry.stats(table).await
    }
}
