//! Batched ingestion of raw samples into a dataset.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SoundingsError};
use crate::registry;
use crate::sample::Sample;
use crate::store::SampleStore;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Number of chunks `len` samples are split into.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}

#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub error: SoundingsError,
}

/// What became of one call to [`IngestionBatcher::add_samples`].
#[derive(Debug, Default)]
pub struct IngestReport {
    pub chunks: usize,
    /// Samples left out because their integer namespace was not an object.
    pub dropped: usize,
    /// Stored documents of every chunk that went in, with their `_id`.
    pub inserted: Vec<Value>,
    pub failures: Vec<ChunkFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first chunk error, if any chunk failed.
    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.inserted),
        }
    }
}

pub struct IngestionBatcher {
    store: Arc<dyn SampleStore>,
    chunk_size: usize,
}

impl IngestionBatcher {
    pub fn new(store: Arc<dyn SampleStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Validates `samples`, splits them into chunks and inserts every chunk at
    /// once. Resolves after the last chunk has reported.
    ///
    /// Chunks are cut from the samples as given, so a chunk whose samples were
    /// all dropped still counts and reports no rows.
    pub async fn add_samples(
        &self,
        dataset: &str,
        subset: Option<&str>,
        samples: Vec<Value>,
    ) -> IngestReport {
        let collection = registry::collection_name(dataset, subset);
        let mut report = IngestReport {
            chunks: chunk_count(samples.len(), self.chunk_size),
            ..Default::default()
        };

        let mut batches = Vec::with_capacity(report.chunks);
        for chunk in samples.chunks(self.chunk_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for raw in chunk {
                match Sample::from_value(raw) {
                    Some(sample) => batch.push(sample.to_document()),
                    None => report.dropped += 1,
                }
            }
            batches.push(batch);
        }

        let inserts = batches.into_iter().enumerate().map(|(chunk, batch)| {
            let store = &self.store;
            let collection = collection.as_str();
            async move {
                if batch.is_empty() {
                    return (chunk, Ok(Vec::new()));
                }
                debug!(collection, chunk, samples = batch.len(), "inserting chunk");
                (chunk, store.insert(collection, batch).await)
            }
        });

        for (chunk, outcome) in join_all(inserts).await {
            match outcome {
                Ok(mut rows) => report.inserted.append(&mut rows),
                Err(error) => {
                    warn!(collection = %collection, chunk, error = %error, "chunk insert failed");
                    report.failures.push(ChunkFailure { chunk, error });
                }
            }
        }

        info!(
            collection = %collection,
            chunks = report.chunks,
            inserted = report.inserted.len(),
            dropped = report.dropped,
            failed = report.failures.len(),
            "ingested samples"
        );
        report
    }

    pub async fn add_sample(&self, dataset: &str, subset: Option<&str>, sample: Value) -> IngestReport {
        self.add_samples(dataset, subset, vec![sample]).await
    }
}
