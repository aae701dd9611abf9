//! Soundings – an analytics query layer over a store of namespaced samples.
//!
//! A *sample* is one observation split into three namespaces:
//! * `integer` – numeric values, always including the unix `time` of the sample.
//! * `string` – categorical values, used as grouping dimensions.
//! * `set` – multi-valued tags.
//!
//! Samples are appended to *datasets*, and a dataset is never given a schema.
//! Instead the columns of a dataset are inferred from its most recent samples
//! and cached for a while (see [`schema`]).
//!
//! ## Modules
//! * [`pipeline`] – Typed aggregation stages and their document-store rendering.
//! * [`builders`] – Pure functions turning query options into stages.
//! * [`executor`] – Composes builders per query kind, runs and de-weights.
//! * [`schema`] – Column inference and the stale-while-revalidate cache.
//! * [`ingestion`] – Validation, coercion and chunked concurrent inserts.
//! * [`registry`] – Dataset naming on top of backing collections.
//! * [`persist`] – The bundled SQLite store behind the [`store::SampleStore`] trait.
//! * [`backend`] – Everything above wired together from [`config::Settings`].
//!
//! ## Weighting
//! A sample may stand for several observations, in which case an integer
//! column carries its weight. Weighted queries multiply values by the weight
//! before aggregating and divide the result by `weighted_count / count`
//! afterwards, so averages come out weighted while counts stay raw.
//!
//! ## Quick Start
//! ```
//! use serde_json::json;
//! use soundings::{backend::Backend, config::Settings, query::QueryOptions};
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = Backend::open(Settings::default()).unwrap();
//! let samples = vec![
//!     json!({"integer": {"time": 1, "latency": 40}, "string": {"region": "eu"}}),
//!     json!({"integer": {"time": 2, "latency": 60}, "string": {"region": "eu"}}),
//! ];
//! backend.add_samples("web", None, samples).await;
//! let options = QueryOptions::new().dims(&["region"]).cols(&["latency"]);
//! let rows = backend.query_table("web", &options).await.unwrap();
//! assert_eq!(rows[0]["latency"], json!(50.0));
//! # });
//! ```

pub mod backend;
pub mod builders;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod executor;
pub mod ingestion;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod sample;
pub mod schema;
pub mod store;
