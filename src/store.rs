//! The contract of the document store that executes our pipelines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::pipeline::PipelineStage;

#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Runs `pipeline` over `collection`. A collection that does not exist
    /// aggregates to no rows.
    async fn aggregate(&self, collection: &str, pipeline: &[PipelineStage]) -> Result<Vec<Value>>;
    /// Inserts documents, creating the collection on first use. Returns the
    /// stored documents including the `_id` they were given.
    async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<Vec<Value>>;
    async fn list_collection_names(&self) -> Result<Vec<String>>;
    async fn drop_collection(&self, collection: &str) -> Result<()>;
    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub ns: String,
    pub count: u64,
    /// Total size of the stored documents in bytes.
    pub size: u64,
    pub avg_obj_size: u64,
    pub capped: bool,
    pub max_size: u64,
}
