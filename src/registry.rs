//! Logical datasets on top of backing collections.
//!
//! A dataset `name`, optionally split into a `subset`, lives in the backing
//! collection `datasets/<name>` or `datasets/<name>/<subset>`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::store::{CollectionStats, SampleStore};

pub const DATASET_PREFIX: &str = "datasets/";

pub fn collection_name(dataset: &str, subset: Option<&str>) -> String {
    match subset {
        Some(subset) => format!("{DATASET_PREFIX}{dataset}/{subset}"),
        None => format!("{DATASET_PREFIX}{dataset}"),
    }
}

/// Collection of a table name as listed by the registry (`name` or `name/subset`).
pub fn collection_for_table(table: &str) -> String {
    format!("{DATASET_PREFIX}{table}")
}

/// Table name of a backing collection, if it follows the dataset convention.
/// The prefix may be preceded by a database qualifier such as `snapshots.`.
pub fn table_name(collection: &str) -> Option<&str> {
    collection
        .find(DATASET_PREFIX)
        .map(|idx| &collection[idx + DATASET_PREFIX.len()..])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub table_name: String,
}

pub struct DatasetRegistry {
    store: Arc<dyn SampleStore>,
}

impl DatasetRegistry {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<Dataset>> {
        let collections = self.store.list_collection_names().await?;
        Ok(collections
            .iter()
            .filter_map(|collection| table_name(collection))
            .map(|table_name| Dataset { table_name: table_name.to_owned() })
            .collect())
    }

    /// Drops the collection behind `table` and hands the table name back.
    pub async fn drop(&self, table: &str) -> Result<String> {
        self.store.drop_collection(&collection_for_table(table)).await?;
        info!(table, "dropped dataset");
        Ok(table.to_owned())
    }

    pub async fn stats(&self, table: &str) -> Result<CollectionStats> {
        self.store.collection_stats(&collection_for_table(table)).await
    }
}
