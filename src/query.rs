//! Query intents: what a caller asks for before it becomes a pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::{AccumulatorOp, Op};
use crate::sample::Namespace;

/// Aggregate operator requested for the value columns of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[serde(alias = "$sum")]
    Sum,
    #[default]
    #[serde(alias = "$avg")]
    Avg,
    #[serde(alias = "$min")]
    Min,
    #[serde(alias = "$max")]
    Max,
    /// Counts rows; the column's values are never looked at.
    #[serde(alias = "$count")]
    Count,
}

impl Aggregate {
    /// The accumulator that implements this aggregate. `Count` has none of
    /// its own and is expressed as a sum over a constant.
    pub fn accumulator(&self) -> AccumulatorOp {
        match self {
            Aggregate::Sum | Aggregate::Count => AccumulatorOp::Sum,
            Aggregate::Avg => AccumulatorOp::Avg,
            Aggregate::Min => AccumulatorOp::Min,
            Aggregate::Max => AccumulatorOp::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: Op,
    pub value: Value,
}

impl Condition {
    pub fn new(op: Op, value: impl Into<Value>) -> Self {
        Self { op, value: value.into() }
    }
}

/// Conditions on a single document path, e.g. `string.region`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new(column: &str) -> Self {
        Self { column: Some(column.to_owned()), conditions: Vec::new() }
    }
    pub fn with(mut self, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::new(op, value));
        self
    }
}

/// Reads `from_type.from_name` and exposes it as `to_type.to_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCast {
    pub from_type: Namespace,
    pub from_name: String,
    pub to_type: Namespace,
    pub to_name: String,
}

impl ColumnCast {
    pub fn new(from_type: Namespace, from_name: &str, to_type: Namespace, to_name: &str) -> Self {
        Self {
            from_type,
            from_name: from_name.to_owned(),
            to_type,
            to_name: to_name.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Grouping keys, read from the string namespace.
    pub dims: Vec<String>,
    /// Value columns, read from the integer namespace.
    pub cols: Vec<String>,
    pub agg: Aggregate,
    pub weight_col: Option<String>,
    /// Seconds per time-series bucket.
    pub time_bucket: Option<i64>,
    pub hist_bucket: Option<i64>,
    /// Histogram target; falls back to the first of `cols`.
    pub col: Option<String>,
    pub limit: Option<usize>,
    pub filters: Vec<Filter>,
    /// Exclusive lower bound on `integer.time`.
    pub start: Option<i64>,
    /// Exclusive upper bound on `integer.time`.
    pub end: Option<i64>,
    pub casts: Vec<ColumnCast>,
    /// Trim rows whose value columns fall outside the inferred ranges.
    pub full_samples: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn dims(mut self, dims: &[&str]) -> Self {
        self.dims = dims.iter().map(|d| d.to_string()).collect();
        self
    }
    pub fn cols(mut self, cols: &[&str]) -> Self {
        self.cols = cols.iter().map(|c| c.to_string()).collect();
        self
    }
    pub fn agg(mut self, agg: Aggregate) -> Self {
        self.agg = agg;
        self
    }
    pub fn weight(mut self, weight_col: &str) -> Self {
        self.weight_col = Some(weight_col.to_owned());
        self
    }
    pub fn time_bucket(mut self, seconds: i64) -> Self {
        self.time_bucket = Some(seconds);
        self
    }
    pub fn hist_bucket(mut self, size: i64) -> Self {
        self.hist_bucket = Some(size);
        self
    }
    pub fn col(mut self, col: &str) -> Self {
        self.col = Some(col.to_owned());
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
    pub fn between(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
    pub fn cast(mut self, cast: ColumnCast) -> Self {
        self.casts.push(cast);
        self
    }
    pub fn full_samples(mut self, enabled: bool) -> Self {
        self.full_samples = enabled;
        self
    }
    pub fn is_weighted(&self) -> bool {
        self.weight_col.is_some()
    }
}
