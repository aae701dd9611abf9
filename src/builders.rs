//! Stage builders.
//!
//! Every function here is pure: it turns query options (and, where a range is
//! needed, inferred column metadata) into an ordered list of pipeline stages.
//! Nothing is executed and nothing is read from the store.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::pipeline::{
    Accumulator, Expr, FieldPath, Group, Op, Operand, PipelineStage, Predicate, Projection,
    SortDirection,
};
use crate::query::{Aggregate, ColumnCast, Filter, QueryOptions};
use crate::sample::{Namespace, TIME_FIELD};
use crate::schema::ColumnMeta;

pub const DEFAULT_TIME_BUCKET: i64 = 60 * 60 * 6;
pub const DEFAULT_HIST_BUCKET: i64 = 100;
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

pub const COUNT: &str = "count";
pub const WEIGHTED_COUNT: &str = "weighted_count";
pub const TIME_BUCKET: &str = "time_bucket";
pub const BUCKET: &str = "bucket";

/// `floor(value / size) * size` for a positive `size`. `None` when that floor
/// lies below `i64::MIN`.
pub fn bucket(value: i64, size: i64) -> Option<i64> {
    value.div_euclid(size).checked_mul(size)
}

/// [`bucket`] over floats, for values that are not integers or whose integer
/// bucket does not fit.
pub fn bucket_float(value: f64, size: i64) -> f64 {
    let size = size as f64;
    (value / size).floor() * size
}

// Zero or negative sizes count as unset.
fn positive(size: Option<i64>) -> Option<i64> {
    size.filter(|size| *size > 0)
}

fn integer(field: &str) -> FieldPath {
    Namespace::Integer.path(field)
}

fn string(field: &str) -> FieldPath {
    Namespace::String.path(field)
}

fn time() -> FieldPath {
    integer(TIME_FIELD)
}

/// Multiplies every value column by the weight column and exposes the weight
/// itself as `weighted_count`. Grouping dimensions and the time field are
/// carried through unchanged.
pub fn weight_columns(cols: &[String], weight_col: &str, dims: &[String]) -> Vec<PipelineStage> {
    let mut projection = BTreeMap::new();
    for col in cols {
        if col == weight_col {
            projection.insert(integer(col), Projection::Include);
            continue;
        }
        let weighted = Expr::Multiply(vec![Expr::field(integer(col)), Expr::field(integer(weight_col))]);
        projection.insert(integer(col), Projection::Computed(weighted));
    }
    projection.insert(
        WEIGHTED_COUNT.to_owned(),
        Projection::Computed(Expr::field(integer(weight_col))),
    );
    for dim in dims {
        projection.insert(string(dim), Projection::Include);
    }
    projection.insert(time(), Projection::Include);

    if projection.is_empty() {
        return Vec::new();
    }
    vec![PipelineStage::Project(projection)]
}

/// Projects explicit namespace translations, passing every other requested
/// column and dimension through under its own namespace.
pub fn cast_columns(
    casts: &[ColumnCast],
    cols: &[String],
    weight_col: Option<&str>,
    dims: &[String],
) -> Vec<PipelineStage> {
    let mut projection = BTreeMap::new();
    for cast in casts {
        let target = cast.to_type.path(&cast.to_name);
        let source = cast.from_type.path(&cast.from_name);
        projection.insert(target, Projection::Computed(Expr::Field(source)));
    }

    for col in cols {
        projection.entry(integer(col)).or_insert(Projection::Include);
    }
    if let Some(weight_col) = weight_col {
        projection.entry(integer(weight_col)).or_insert(Projection::Include);
    }
    for dim in dims {
        projection.entry(string(dim)).or_insert(Projection::Include);
    }
    projection.entry(time()).or_insert(Projection::Include);

    if projection.is_empty() {
        return Vec::new();
    }
    vec![PipelineStage::Project(projection)]
}

fn dimension_keys(dims: &[String]) -> BTreeMap<String, Expr> {
    dims.iter()
        .map(|dim| (dim.clone(), Expr::field(string(dim))))
        .collect()
}

fn aggregate_group(options: &QueryOptions, id: BTreeMap<String, Expr>) -> Group {
    let mut fields = BTreeMap::new();
    fields.insert(COUNT.to_owned(), Accumulator::sum(Expr::Literal(Value::from(1))));

    for col in &options.cols {
        let input = match options.agg {
            Aggregate::Count => Expr::Literal(Value::from(1)),
            _ => Expr::field(integer(col)),
        };
        fields.insert(col.clone(), Accumulator::new(options.agg.accumulator(), input));
    }

    if options.is_weighted() {
        fields.insert(WEIGHTED_COUNT.to_owned(), Accumulator::sum(Expr::field(WEIGHTED_COUNT)));
    }
    Group { id, fields }
}

fn weighting(options: &QueryOptions) -> Vec<PipelineStage> {
    match &options.weight_col {
        Some(weight_col) => weight_columns(&options.cols, weight_col, &options.dims),
        None => Vec::new(),
    }
}

/// Groups by the cross product of the requested dimensions.
pub fn query_table(options: &QueryOptions) -> Vec<PipelineStage> {
    let mut pipeline = weighting(options);
    let group = aggregate_group(options, dimension_keys(&options.dims));
    pipeline.push(PipelineStage::Group(group));
    pipeline
}

/// Like [`query_table`] with a bucketed time value added to the grouping key.
pub fn query_time_series(options: &QueryOptions) -> Vec<PipelineStage> {
    let bucket_size = positive(options.time_bucket).unwrap_or(DEFAULT_TIME_BUCKET);
    let mut pipeline = weighting(options);

    let mut id = dimension_keys(&options.dims);
    id.insert(TIME_BUCKET.to_owned(), Expr::bucket(Expr::field(time()), bucket_size));

    pipeline.push(PipelineStage::Group(aggregate_group(options, id)));
    pipeline
}

/// Bucket size inferred from a column's windsorized range, if it has one.
pub fn infer_hist_bucket(meta: Option<&ColumnMeta>) -> i64 {
    match meta.and_then(|meta| meta.min_value.zip(meta.max_value)) {
        Some((min, max)) => {
            let size = max.abs_diff(min) / 100 + 1;
            i64::try_from(size).unwrap_or(i64::MAX)
        }
        None => DEFAULT_HIST_BUCKET,
    }
}

/// Distribution of a single integer column.
pub fn query_hist(options: &QueryOptions, columns: &[ColumnMeta]) -> Vec<PipelineStage> {
    let col = options.col.clone().or_else(|| options.cols.first().cloned());
    let col = match col {
        Some(col) => col,
        None => {
            warn!("no column to build a histogram for");
            String::new()
        }
    };

    let bucket_size = match positive(options.hist_bucket) {
        Some(size) => size,
        None => {
            let size = infer_hist_bucket(columns.iter().find(|meta| meta.name == col));
            debug!(column = %col, bucket_size = size, "inferred histogram bucket size");
            size
        }
    };

    // An unresolved column leaves an empty path behind, which the store rejects.
    let source = if col.is_empty() { FieldPath::new() } else { integer(&col) };

    let mut projection = BTreeMap::new();
    projection.insert(
        BUCKET.to_owned(),
        Projection::Computed(Expr::bucket(Expr::Field(source), bucket_size)),
    );
    if let Some(weight_col) = &options.weight_col {
        projection.insert(integer(weight_col), Projection::Include);
    }

    let mut id = BTreeMap::new();
    id.insert(col, Expr::field(BUCKET));
    let mut fields = BTreeMap::new();
    fields.insert(COUNT.to_owned(), Accumulator::sum(Expr::Literal(Value::from(1))));
    if let Some(weight_col) = &options.weight_col {
        fields.insert(WEIGHTED_COUNT.to_owned(), Accumulator::sum(Expr::field(integer(weight_col))));
    }

    vec![
        PipelineStage::Project(projection),
        PipelineStage::Group(Group { id, fields }),
    ]
}

/// Most recent samples first.
pub fn query_samples(limit: Option<usize>) -> Vec<PipelineStage> {
    vec![
        PipelineStage::Sort(vec![(time(), SortDirection::Descending)]),
        PipelineStage::Limit(limit.unwrap_or(DEFAULT_SAMPLE_LIMIT)),
    ]
}

/// One match stage per filter. Conditions on a filter are merged by operator,
/// so a repeated operator keeps only its last value.
pub fn add_filters(filters: &[Filter]) -> Vec<PipelineStage> {
    let mut pipeline = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = match &filter.column {
            Some(column) => column.clone(),
            None => {
                warn!(?filter, "missing column for filter");
                FieldPath::new()
            }
        };
        let mut predicate = Predicate::field(column);
        for condition in &filter.conditions {
            predicate.set(condition.op, condition.value.clone());
        }
        pipeline.push(PipelineStage::Match(predicate));
    }
    pipeline
}

/// A single filter on the time field with optional exclusive bounds.
pub fn time_range(start: Option<i64>, end: Option<i64>) -> Vec<PipelineStage> {
    let mut filter = Filter::new(&time());
    if let Some(start) = start {
        filter = filter.with(Op::Gt, start);
    }
    if let Some(end) = end {
        filter = filter.with(Op::Lt, end);
    }
    add_filters(&[filter])
}

/// Matches rows whose value columns are present and inside their inferred
/// range.
///
/// The two bounds of a column are OR'd together, and NaN is excluded with a
/// `$ne` comparison. Both are kept exactly as the trim has always been
/// expressed: the OR admits anything satisfying either bound, and `$ne: NaN`
/// is not a reliable NaN test in most stores.
pub fn full_samples(cols: &[String], columns: &[ColumnMeta]) -> Vec<PipelineStage> {
    if cols.is_empty() {
        return Vec::new();
    }

    let mut conditions = Vec::with_capacity(cols.len());
    for col in cols {
        let path = integer(col);
        let meta = columns.iter().find(|meta| &meta.name == col);

        let lower = meta.and_then(|meta| meta.min_value).unwrap_or(0);
        let lower = Predicate::field(path.clone())
            .with(Op::Gte, lower)
            .with(Op::Ne, Operand::NaN);

        let mut upper = Predicate::field(path);
        if let Some(max) = meta.and_then(|meta| meta.max_value) {
            upper.set(Op::Lt, max);
        }
        upper.set(Op::Ne, Operand::NaN);

        conditions.push(Predicate::Or(vec![lower, upper]));
    }

    vec![PipelineStage::Match(Predicate::And(conditions))]
}
