//! Settings, layered from built-in defaults, an optional settings file and
//! `SOUNDINGS__*` environment variables (later layers win).
//!
//! ```text
//! SOUNDINGS__STORAGE__PATH=soundings.db
//! SOUNDINGS__SCHEMA__TTL_SECS=60
//! ```

use serde::{Deserialize, Serialize};

use crate::builders::{DEFAULT_HIST_BUCKET, DEFAULT_SAMPLE_LIMIT, DEFAULT_TIME_BUCKET};
use crate::error::Result;
use crate::persist::PersistenceMode;

pub const ENV_PREFIX: &str = "SOUNDINGS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub schema: SchemaSettings,
    pub ingest: IngestSettings,
    pub query: QuerySettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file; the store lives in memory when absent.
    pub path: Option<String>,
    /// Size every dataset collection is capped at.
    pub max_dataset_bytes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_dataset_bytes: 100 * 1024 * 1024,
        }
    }
}

impl StorageSettings {
    pub fn mode(&self) -> PersistenceMode {
        match &self.path {
            Some(path) => PersistenceMode::File(path.clone()),
            None => PersistenceMode::InMemory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Number of most recent samples inspected per inference.
    pub sample_size: usize,
    /// Age after which a cached schema is served stale and refreshed.
    pub ttl_secs: u64,
    /// Integer observations needed before a column gets a range.
    pub min_observations: usize,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            sample_size: 500,
            ttl_secs: 600,
            min_observations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub chunk_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { chunk_size: 1000 }
    }
}

/// Defaults for options a query leaves unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub time_bucket: i64,
    pub hist_bucket: i64,
    pub sample_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            time_bucket: DEFAULT_TIME_BUCKET,
            hist_bucket: DEFAULT_HIST_BUCKET,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_owned() }
    }
}

impl Settings {
    /// Loads settings, reading `path` (any format the `config` crate knows by
    /// extension) when given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
