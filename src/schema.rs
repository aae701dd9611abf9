//! Schema inference over a live sample, and the cache in front of it.
//!
//! The schema of a dataset is never declared. It is estimated from the most
//! recent samples: each field is typed by the namespace it shows up in most
//! often, and integer fields with enough observations get a windsorized range
//! (the values at the 2.5th and 97.5th percentile) used to size histogram
//! buckets and to trim outliers.
//!
//! The [`SchemaCache`] serves entries stale-while-revalidate. A request for an
//! entry older than the time to live is answered with the cached entry right
//! away, tagged [`Columns::Stale`], together with a [`Refresh`] handle that
//! resolves once the recomputed entry is in the cache. Two refreshes of the
//! same table may race; whichever finishes last wins, as long as it was not
//! sampled earlier than the entry it replaces.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::builders;
use crate::config::SchemaSettings;
use crate::error::{Result, SoundingsError};
use crate::registry;
use crate::sample::{Namespace, coerce_integer};
use crate::store::SampleStore;

/// Encoding artifact that shows up as a field name in some stores.
pub const BSON_TYPE_MARKER: &str = "_bsontype";

pub type NameHasher = BuildHasherDefault<SeaHasher>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub inferred_type: Namespace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCacheEntry {
    pub table_name: String,
    pub columns: Vec<ColumnMeta>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tally {
    votes: [usize; 3],
    integers: Vec<i64>,
}

/// Infers one column per field name observed in `samples`.
///
/// Exact ties between namespaces go to the namespace listed first in
/// [`Namespace::ALL`]. Columns come back ordered by name.
pub fn infer_columns(samples: &[Value], min_observations: usize) -> Vec<ColumnMeta> {
    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();

    for sample in samples {
        let Some(record) = sample.as_object() else { continue };
        for (key, fields) in record {
            let Some(namespace) = Namespace::parse(key) else { continue };
            let Some(fields) = fields.as_object() else { continue };
            for (field, value) in fields {
                if field == BSON_TYPE_MARKER {
                    continue;
                }
                let tally = tallies.entry(field.as_str()).or_default();
                tally.votes[namespace.index()] += 1;
                if namespace == Namespace::Integer {
                    if let Some(int) = coerce_integer(value) {
                        tally.integers.push(int);
                    }
                }
            }
        }
    }

    let mut columns = Vec::with_capacity(tallies.len());
    for (name, mut tally) in tallies {
        let mut inferred_type = Namespace::Integer;
        let mut most = 0;
        for namespace in Namespace::ALL {
            let votes = tally.votes[namespace.index()];
            if votes > most {
                most = votes;
                inferred_type = namespace;
            }
        }

        let range = match inferred_type {
            Namespace::Integer => windsorize(&mut tally.integers, min_observations),
            _ => None,
        };
        columns.push(ColumnMeta {
            name: name.to_owned(),
            inferred_type,
            min_value: range.map(|(min, _)| min),
            max_value: range.map(|(_, max)| max),
        });
    }
    columns
}

/// Sorts `values` and returns the values at `floor(0.025 n)` and
/// `floor(0.975 n)`, or nothing unless there are more than
/// `min_observations` of them.
pub fn windsorize(values: &mut [i64], min_observations: usize) -> Option<(i64, i64)> {
    let n = values.len();
    if n <= min_observations || n == 0 {
        return None;
    }
    values.sort_unstable();
    let low = ((0.025 * n as f64) as usize).min(n - 1);
    let high = ((0.975 * n as f64) as usize).min(n - 1);
    Some((values[low], values[high]))
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Columns {
    Fresh(Arc<SchemaCacheEntry>),
    Stale {
        entry: Arc<SchemaCacheEntry>,
        refresh: Refresh,
    },
}

impl Columns {
    pub fn entry(&self) -> &Arc<SchemaCacheEntry> {
        match self {
            Columns::Fresh(entry) => entry,
            Columns::Stale { entry, .. } => entry,
        }
    }
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.entry().columns
    }
    pub fn is_stale(&self) -> bool {
        matches!(self, Columns::Stale { .. })
    }
}

/// Resolves to the recomputed entry of a stale lookup.
#[derive(Debug)]
pub struct Refresh {
    receiver: oneshot::Receiver<Result<Arc<SchemaCacheEntry>>>,
}

impl Refresh {
    pub async fn fresh(self) -> Result<Arc<SchemaCacheEntry>> {
        self.receiver
            .await
            .map_err(|_| SoundingsError::Execution("schema refresh was abandoned".into()))?
    }
}

type Entries = Mutex<HashMap<String, Arc<SchemaCacheEntry>, NameHasher>>;

pub struct SchemaCache {
    entries: Arc<Entries>,
    ttl: Duration,
    sample_size: usize,
    min_observations: usize,
}

impl SchemaCache {
    pub fn new(ttl: Duration, sample_size: usize, min_observations: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::default())),
            ttl,
            sample_size,
            min_observations,
        }
    }
    pub fn from_settings(settings: &SchemaSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.ttl_secs),
            settings.sample_size,
            settings.min_observations,
        )
    }

    pub fn cached(&self, table: &str) -> Result<Option<Arc<SchemaCacheEntry>>> {
        Ok(self.entries.lock()?.get(table).cloned())
    }

    pub fn clear(&self, table: &str) -> Result<()> {
        if self.entries.lock()?.remove(table).is_some() {
            debug!(table, "cleared cached columns");
        }
        Ok(())
    }

    pub async fn get_columns(&self, store: &Arc<dyn SampleStore>, table: &str) -> Result<Columns> {
        let Some(entry) = self.cached(table)? else {
            info!(table, "computing columns");
            let entry = Self::compute(store.as_ref(), table, self.sample_size, self.min_observations).await?;
            return Ok(Columns::Fresh(Self::remember(&self.entries, entry)?));
        };

        let age = (Utc::now() - entry.computed_at).to_std().unwrap_or_default();
        if age < self.ttl {
            debug!(table, age_secs = age.as_secs(), "using cached columns");
            return Ok(Columns::Fresh(entry));
        }

        info!(table, age_secs = age.as_secs(), "refreshing stale columns");
        let (sender, receiver) = oneshot::channel();
        let store = Arc::clone(store);
        let entries = Arc::clone(&self.entries);
        let table = table.to_owned();
        let (sample_size, min_observations) = (self.sample_size, self.min_observations);
        tokio::spawn(async move {
            let outcome = match Self::compute(store.as_ref(), &table, sample_size, min_observations).await {
                Ok(fresh) => Self::remember(&entries, fresh),
                Err(e) => {
                    warn!(table = %table, error = %e, "column refresh failed");
                    Err(e)
                }
            };
            // nobody may be waiting for the refresh any more
            let _ = sender.send(outcome);
        });
        Ok(Columns::Stale { entry, refresh: Refresh { receiver } })
    }

    async fn compute(
        store: &dyn SampleStore,
        table: &str,
        sample_size: usize,
        min_observations: usize,
    ) -> Result<SchemaCacheEntry> {
        let computed_at = Utc::now();
        let pipeline = builders::query_samples(Some(sample_size));
        let samples = store
            .aggregate(&registry::collection_for_table(table), &pipeline)
            .await?;
        let columns = infer_columns(&samples, min_observations);
        debug!(table, samples = samples.len(), columns = columns.len(), "inferred columns");
        Ok(SchemaCacheEntry { table_name: table.to_owned(), columns, computed_at })
    }

    // An entry never replaces one that was sampled later.
    fn remember(entries: &Entries, entry: SchemaCacheEntry) -> Result<Arc<SchemaCacheEntry>> {
        let mut entries = entries.lock()?;
        if let Some(existing) = entries.get(&entry.table_name) {
            if existing.computed_at > entry.computed_at {
                return Ok(Arc::clone(existing));
            }
        }
        let entry = Arc::new(entry);
        entries.insert(entry.table_name.clone(), Arc::clone(&entry));
        Ok(entry)
    }
}
