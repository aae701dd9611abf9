//! Typed aggregation pipeline stages.
//!
//! A pipeline is an ordered `Vec<PipelineStage>` that the backing store runs
//! in sequence. Stages can be rendered to the document-store JSON dialect
//! (`$match`, `$project`, `$group`, `$sort`, `$limit`) with [`render`], which
//! is what gets logged and what a store speaking that dialect would receive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A dotted document path such as `integer.time`. An empty path stands for a
/// column that could not be resolved when the stage was built.
pub type FieldPath = String;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Match(Predicate),
    Project(BTreeMap<FieldPath, Projection>),
    Group(Group),
    Sort(Vec<(FieldPath, SortDirection)>),
    Limit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include,
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldPath),
    Literal(Value),
    Multiply(Vec<Expr>),
    /// `floor(value / size) * size`
    Bucket { value: Box<Expr>, size: i64 },
}

impl Expr {
    pub fn field(path: impl Into<FieldPath>) -> Self {
        Expr::Field(path.into())
    }
    pub fn bucket(value: Expr, size: i64) -> Self {
        Expr::Bucket { value: Box::new(value), size }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: BTreeMap<String, Expr>,
    pub fields: BTreeMap<String, Accumulator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub op: AccumulatorOp,
    pub input: Expr,
}

impl Accumulator {
    pub fn new(op: AccumulatorOp, input: Expr) -> Self {
        Self { op, input }
    }
    pub fn sum(input: Expr) -> Self {
        Self::new(AccumulatorOp::Sum, input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
}

impl AccumulatorOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
            AccumulatorOp::First => "$first",
            AccumulatorOp::Last => "$last",
        }
    }
}

/// Comparison operators usable in filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    #[serde(alias = "$gt")]
    Gt,
    #[serde(alias = "$gte")]
    Gte,
    #[serde(alias = "$lt")]
    Lt,
    #[serde(alias = "$lte")]
    Lte,
    #[serde(alias = "$eq")]
    Eq,
    #[serde(alias = "$ne")]
    Ne,
    #[serde(alias = "$in")]
    In,
    #[serde(alias = "$nin")]
    Nin,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::In => "$in",
            Op::Nin => "$nin",
        }
    }
}

/// Right-hand side of a condition. JSON has no NaN, so it gets its own variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    NaN,
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}
impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Value(Value::from(value))
    }
}
impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        if value.is_nan() { Operand::NaN } else { Operand::Value(Value::from(value)) }
    }
}

impl Operand {
    pub fn to_json(&self) -> Value {
        match self {
            Operand::Value(value) => value.clone(),
            Operand::NaN => json!({ "$numberDouble": "NaN" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every condition must hold for the value found at `path`.
    Field { path: FieldPath, conditions: Vec<(Op, Operand)> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn field(path: impl Into<FieldPath>) -> Self {
        Predicate::Field { path: path.into(), conditions: Vec::new() }
    }

    /// Sets the condition for `op`. A condition already present for the same
    /// operator is overwritten in place (last write wins).
    pub fn set(&mut self, op: Op, operand: impl Into<Operand>) {
        if let Predicate::Field { conditions, .. } = self {
            let operand = operand.into();
            match conditions.iter_mut().find(|(existing, _)| *existing == op) {
                Some(slot) => slot.1 = operand,
                None => conditions.push((op, operand)),
            }
        }
    }

    pub fn with(mut self, op: Op, operand: impl Into<Operand>) -> Self {
        self.set(op, operand);
        self
    }

    pub fn to_json(&self) -> Value {
        match self {
            Predicate::Field { path, conditions } => {
                let mut body = Map::new();
                for (op, operand) in conditions {
                    body.insert(op.as_str().to_owned(), operand.to_json());
                }
                let mut outer = Map::new();
                outer.insert(path.clone(), Value::Object(body));
                Value::Object(outer)
            }
            Predicate::And(parts) => {
                json!({ "$and": parts.iter().map(Predicate::to_json).collect::<Vec<_>>() })
            }
            Predicate::Or(parts) => {
                json!({ "$or": parts.iter().map(Predicate::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

impl Expr {
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Field(path) => Value::from(format!("${path}")),
            Expr::Literal(value) => value.clone(),
            Expr::Multiply(factors) => {
                json!({ "$multiply": factors.iter().map(Expr::to_json).collect::<Vec<_>>() })
            }
            Expr::Bucket { value, size } => json!({
                "$multiply": [
                    { "$floor": { "$divide": [value.to_json(), size] } },
                    size
                ]
            }),
        }
    }
}

impl PipelineStage {
    pub fn to_json(&self) -> Value {
        match self {
            PipelineStage::Match(predicate) => json!({ "$match": predicate.to_json() }),
            PipelineStage::Project(fields) => {
                let body: Map<String, Value> = fields
                    .iter()
                    .map(|(path, projection)| {
                        let rendered = match projection {
                            Projection::Include => Value::from(1),
                            Projection::Computed(expr) => expr.to_json(),
                        };
                        (path.clone(), rendered)
                    })
                    .collect();
                json!({ "$project": body })
            }
            PipelineStage::Group(group) => {
                let id: Map<String, Value> = group
                    .id
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect();
                let mut body = Map::new();
                body.insert("_id".to_owned(), Value::Object(id));
                for (name, accumulator) in &group.fields {
                    body.insert(
                        name.clone(),
                        json!({ accumulator.op.as_str(): accumulator.input.to_json() }),
                    );
                }
                json!({ "$group": body })
            }
            PipelineStage::Sort(keys) => {
                let body: Map<String, Value> = keys
                    .iter()
                    .map(|(path, direction)| {
                        let direction = match direction {
                            SortDirection::Ascending => 1,
                            SortDirection::Descending => -1,
                        };
                        (path.clone(), Value::from(direction))
                    })
                    .collect();
                json!({ "$sort": body })
            }
            PipelineStage::Limit(limit) => json!({ "$limit": limit }),
        }
    }
}

/// Renders a whole pipeline to its JSON dialect form.
pub fn render(pipeline: &[PipelineStage]) -> Value {
    Value::Array(pipeline.iter().map(PipelineStage::to_json).collect())
}
