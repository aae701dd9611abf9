//! Turns a query intent into one pipeline, runs it against the store and
//! undoes weighting on the way out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::builders::{self, COUNT, WEIGHTED_COUNT};
use crate::error::Result;
use crate::pipeline::{PipelineStage, render};
use crate::query::QueryOptions;
use crate::registry;
use crate::sample::Namespace;
use crate::schema::ColumnMeta;
use crate::store::SampleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Table,
    #[serde(alias = "time")]
    TimeSeries,
    #[serde(alias = "hist")]
    Histogram,
    Samples,
}

impl QueryKind {
    /// Whether rows of this kind come back grouped, and so carry counts.
    pub fn is_grouped(&self) -> bool {
        !matches!(self, QueryKind::Samples)
    }
}

// time range, then filters
fn restrictions(options: &QueryOptions) -> Vec<PipelineStage> {
    let mut pipeline = Vec::new();
    if options.start.is_some() || options.end.is_some() {
        pipeline.extend(builders::time_range(options.start, options.end));
    }
    pipeline.extend(builders::add_filters(&options.filters));
    pipeline
}

/// Assembles the full pipeline for a query of `kind`.
///
/// Grouped kinds run restrictions, the casting projection, the outlier trim and
/// then their own stages. Raw samples are picked first and restricted after,
/// so a filter narrows the page rather than the page being refilled.
pub fn build_pipeline(
    kind: QueryKind,
    options: &QueryOptions,
    columns: &[ColumnMeta],
) -> Vec<PipelineStage> {
    let stages = match kind {
        QueryKind::Samples => {
            let mut pipeline = builders::query_samples(options.limit);
            pipeline.extend(restrictions(options));
            return pipeline;
        }
        QueryKind::Table => builders::query_table(options),
        QueryKind::TimeSeries => builders::query_time_series(options),
        QueryKind::Histogram => builders::query_hist(options, columns),
    };

    let mut pipeline = restrictions(options);
    if !options.casts.is_empty() {
        let mut cols = options.cols.clone();
        if let Some(col) = options.col.as_ref().filter(|col| !cols.contains(col)) {
            cols.push(col.clone());
        }
        pipeline.extend(builders::cast_columns(
            &options.casts,
            &cols,
            options.weight_col.as_deref(),
            &options.dims,
        ));
    }
    if options.full_samples {
        pipeline.extend(builders::full_samples(&options.cols, columns));
    }
    pipeline.extend(stages);
    pipeline
}

/// Rescales every value of a weighted row by `count / weighted_count`.
///
/// `count`, `weighted_count` and `_id` are left alone, as is anything that is
/// not a number. A row without a usable `weighted_count` is scaled by one.
pub fn deweight(rows: &mut [Value]) {
    for row in rows {
        let Some(fields) = row.as_object_mut() else { continue };
        let Some(count) = fields.get(COUNT).and_then(Value::as_f64) else { continue };
        let weighted_count = fields
            .get(WEIGHTED_COUNT)
            .and_then(Value::as_f64)
            .filter(|weighted_count| *weighted_count != 0.0)
            .unwrap_or(count);
        if weighted_count == 0.0 {
            continue;
        }

        for (key, value) in fields.iter_mut() {
            if key == COUNT || key == WEIGHTED_COUNT || key == "_id" {
                continue;
            }
            if let Some(number) = value.as_f64() {
                *value = Value::from(number * count / weighted_count);
            }
        }
    }
}

pub struct QueryExecutor {
    store: Arc<dyn SampleStore>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Runs an already assembled pipeline against the collection of `table`.
    pub async fn run_pipeline(
        &self,
        table: &str,
        pipeline: &[PipelineStage],
        unweight: bool,
    ) -> Result<Vec<Value>> {
        debug!(table, unweight, pipeline = %render(pipeline), "running pipeline");
        let mut rows = self
            .store
            .aggregate(&registry::collection_for_table(table), pipeline)
            .await?;
        if unweight {
            deweight(&mut rows);
        }
        Ok(rows)
    }

    pub async fn execute(
        &self,
        kind: QueryKind,
        table: &str,
        options: &QueryOptions,
        columns: &[ColumnMeta],
    ) -> Result<Vec<Value>> {
        let pipeline = build_pipeline(kind, options, columns);
        let unweight = kind.is_grouped() && options.is_weighted();
        let rows = self.run_pipeline(table, &pipeline, unweight).await?;
        debug!(table, ?kind, rows = rows.len(), "query finished");
        Ok(rows)
    }
}

/// Raw samples laid out as a table: string fields first, then integer, then
/// set fields, each group sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleGrid {
    pub fn from_samples(samples: &[Value]) -> Self {
        // a field seen in several namespaces is read from the last one seen
        let mut lookup: BTreeMap<&str, Namespace> = BTreeMap::new();
        let mut fields: [BTreeSet<&str>; 3] = Default::default();
        for sample in samples {
            for namespace in [Namespace::Integer, Namespace::Set, Namespace::String] {
                let Some(values) = sample.get(namespace.as_str()).and_then(Value::as_object) else {
                    continue;
                };
                for field in values.keys() {
                    fields[namespace.index()].insert(field.as_str());
                    lookup.insert(field.as_str(), namespace);
                }
            }
        }

        let headers: Vec<&str> = [Namespace::String, Namespace::Integer, Namespace::Set]
            .iter()
            .flat_map(|namespace| fields[namespace.index()].iter().copied())
            .collect();

        let rows = samples
            .iter()
            .map(|sample| {
                headers
                    .iter()
                    .map(|field| {
                        lookup
                            .get(field)
                            .and_then(|namespace| sample.get(namespace.as_str()))
                            .and_then(|values| values.get(*field))
                            .map(cell)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        Self {
            headers: headers.into_iter().map(str::to_owned).collect(),
            rows,
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(members) => members.iter().map(cell).collect::<Vec<_>>().join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
