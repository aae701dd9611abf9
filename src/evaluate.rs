//! Executes typed pipelines over JSON documents.
//!
//! Semantics follow the document-store dialect the stages render to: a match
//! on a missing field only succeeds for `$ne`/`$nin` (and `$eq: null`),
//! `$sum` and `$avg` skip non-numeric input, a product with a missing factor
//! is null, and group keys that do not resolve become null.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::builders::{bucket, bucket_float};
use crate::error::{Result, SoundingsError};
use crate::pipeline::{
    AccumulatorOp, Expr, Group, Op, Operand, PipelineStage, Predicate, Projection, SortDirection,
};
use crate::schema::NameHasher;

pub fn run(documents: Vec<Value>, pipeline: &[PipelineStage]) -> Result<Vec<Value>> {
    let mut documents = documents;
    for (index, stage) in pipeline.iter().enumerate() {
        documents = execute_stage(index, stage, documents)?;
    }
    Ok(documents)
}

fn execute_stage(index: usize, stage: &PipelineStage, documents: Vec<Value>) -> Result<Vec<Value>> {
    match stage {
        PipelineStage::Match(predicate) => Ok(documents
            .into_iter()
            .filter(|document| matches(predicate, document))
            .collect()),
        PipelineStage::Project(fields) => {
            let mut projected = Vec::with_capacity(documents.len());
            for document in &documents {
                projected.push(project(index, fields, document)?);
            }
            Ok(projected)
        }
        PipelineStage::Group(group) => group_documents(index, group, &documents),
        PipelineStage::Sort(keys) => {
            let mut documents = documents;
            documents.sort_by(|a, b| compare_documents(keys, a, b));
            Ok(documents)
        }
        PipelineStage::Limit(limit) => {
            let mut documents = documents;
            documents.truncate(*limit);
            Ok(documents)
        }
    }
}

/// Value at a dotted path, if every segment resolves.
pub fn resolve<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.')
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

fn check_path(index: usize, path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(SoundingsError::invalid_pipeline(
            format!("field path '{path}' has an empty segment"),
            Some(index),
        ));
    }
    Ok(())
}

/// Evaluates an expression; `None` means the value is missing altogether.
fn eval(index: usize, expr: &Expr, document: &Value) -> Result<Option<Value>> {
    match expr {
        Expr::Field(path) => {
            check_path(index, path)?;
            Ok(resolve(document, path).cloned())
        }
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Multiply(factors) => {
            let mut exact = Some(1i64);
            let mut product = 1f64;
            for factor in factors {
                match eval(index, factor, document)? {
                    Some(Value::Number(number)) => {
                        product *= number.as_f64().unwrap_or(f64::NAN);
                        exact = exact.zip(number.as_i64()).and_then(|(p, i)| p.checked_mul(i));
                    }
                    _ => return Ok(Some(Value::Null)),
                }
            }
            Ok(Some(match exact {
                Some(product) => Value::from(product),
                None => Value::from(product),
            }))
        }
        Expr::Bucket { value, size } => {
            if *size <= 0 {
                return Err(SoundingsError::invalid_pipeline(
                    format!("bucket size must be positive, got {size}"),
                    Some(index),
                ));
            }
            let bucketed = match eval(index, value, document)? {
                Some(Value::Number(number)) => match number.as_i64().and_then(|int| bucket(int, *size)) {
                    Some(int) => Value::from(int),
                    None => Value::from(bucket_float(number.as_f64().unwrap_or(f64::NAN), *size)),
                },
                _ => Value::Null,
            };
            Ok(Some(bucketed))
        }
    }
}

pub fn matches(predicate: &Predicate, document: &Value) -> bool {
    match predicate {
        Predicate::Field { path, conditions } => {
            let actual = resolve(document, path);
            conditions
                .iter()
                .all(|(op, operand)| condition_holds(*op, actual, operand))
        }
        Predicate::And(parts) => parts.iter().all(|part| matches(part, document)),
        Predicate::Or(parts) => parts.iter().any(|part| matches(part, document)),
    }
}

fn condition_holds(op: Op, actual: Option<&Value>, operand: &Operand) -> bool {
    // documents are JSON, so nothing stored ever equals NaN
    let expected = match operand {
        Operand::NaN => return matches!(op, Op::Ne | Op::Nin),
        Operand::Value(value) => value,
    };
    let is_in = || {
        expected
            .as_array()
            .is_some_and(|options| options.iter().any(|option| equals(actual, option)))
    };
    match op {
        Op::Eq => equals(actual, expected),
        Op::Ne => !equals(actual, expected),
        Op::In => is_in(),
        Op::Nin => !is_in(),
        Op::Gt => ordered(actual, expected) == Some(Ordering::Greater),
        Op::Gte => matches!(ordered(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        Op::Lt => ordered(actual, expected) == Some(Ordering::Less),
        Op::Lte => matches!(ordered(actual, expected), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Number(a)) => match expected {
            Value::Number(b) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        Some(value) => value == expected,
    }
}

// Only numbers compare with numbers and strings with strings.
fn ordered(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn project(
    index: usize,
    fields: &BTreeMap<String, Projection>,
    document: &Value,
) -> Result<Value> {
    let mut projected = Map::new();
    if !fields.contains_key("_id") {
        if let Some(id) = document.get("_id") {
            projected.insert("_id".to_owned(), id.clone());
        }
    }
    for (path, projection) in fields {
        let value = match projection {
            Projection::Include => resolve(document, path).cloned(),
            Projection::Computed(expr) => eval(index, expr, document)?,
        };
        if let Some(value) = value {
            set_path(&mut projected, path, value);
        }
    }
    Ok(Value::Object(projected))
}

fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

enum State {
    Sum { exact: i64, total: f64, integral: bool },
    Avg { total: f64, count: usize },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
}

impl State {
    fn new(op: AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::Sum => State::Sum { exact: 0, total: 0.0, integral: true },
            AccumulatorOp::Avg => State::Avg { total: 0.0, count: 0 },
            AccumulatorOp::Min => State::Min(None),
            AccumulatorOp::Max => State::Max(None),
            AccumulatorOp::First => State::First(None),
            AccumulatorOp::Last => State::Last(None),
        }
    }

    fn add(&mut self, value: Option<Value>) {
        match self {
            State::Sum { exact, total, integral } => {
                if let Some(Value::Number(number)) = &value {
                    *total += number.as_f64().unwrap_or(0.0);
                    if *integral {
                        match number.as_i64().and_then(|int| exact.checked_add(int)) {
                            Some(sum) => *exact = sum,
                            None => *integral = false,
                        }
                    }
                }
            }
            State::Avg { total, count } => {
                if let Some(Value::Number(number)) = &value {
                    *total += number.as_f64().unwrap_or(0.0);
                    *count += 1;
                }
            }
            State::Min(current) => keep_extreme(current, value, Ordering::Less),
            State::Max(current) => keep_extreme(current, value, Ordering::Greater),
            State::First(current) => {
                if current.is_none() {
                    *current = Some(value.unwrap_or(Value::Null));
                }
            }
            State::Last(current) => *current = Some(value.unwrap_or(Value::Null)),
        }
    }

    fn finish(self) -> Value {
        match self {
            State::Sum { exact, total, integral } => {
                if integral { Value::from(exact) } else { Value::from(total) }
            }
            State::Avg { total, count } => {
                if count == 0 { Value::Null } else { Value::from(total / count as f64) }
            }
            State::Min(value) | State::Max(value) | State::First(value) | State::Last(value) => {
                value.unwrap_or(Value::Null)
            }
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Option<Value>, wanted: Ordering) {
    let Some(candidate) = candidate.filter(|value| !value.is_null()) else { return };
    let replace = match current {
        None => true,
        Some(existing) => ordered(Some(&candidate), existing) == Some(wanted),
    };
    if replace {
        *current = Some(candidate);
    }
}

fn group_documents(index: usize, group: &Group, documents: &[Value]) -> Result<Vec<Value>> {
    let mut groups: Vec<(Map<String, Value>, Vec<State>)> = Vec::new();
    let mut positions: HashMap<String, usize, NameHasher> = HashMap::default();

    for document in documents {
        let mut key = Map::new();
        for (name, expr) in &group.id {
            key.insert(name.clone(), eval(index, expr, document)?.unwrap_or(Value::Null));
        }
        let fingerprint = Value::Object(key.clone()).to_string();
        let position = match positions.get(&fingerprint) {
            Some(position) => *position,
            None => {
                let states = group.fields.values().map(|acc| State::new(acc.op)).collect();
                groups.push((key, states));
                positions.insert(fingerprint, groups.len() - 1);
                groups.len() - 1
            }
        };
        let states = &mut groups[position].1;
        for (state, accumulator) in states.iter_mut().zip(group.fields.values()) {
            state.add(eval(index, &accumulator.input, document)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut row = Map::new();
            row.insert("_id".to_owned(), Value::Object(key));
            for (name, state) in group.fields.keys().zip(states) {
                row.insert(name.clone(), state.finish());
            }
            Value::Object(row)
        })
        .collect())
}

fn sort_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_documents(keys: &[(String, SortDirection)], a: &Value, b: &Value) -> Ordering {
    for (path, direction) in keys {
        let (left, right) = (resolve(a, path), resolve(b, path));
        let ordering = sort_rank(left)
            .cmp(&sort_rank(right))
            .then_with(|| match (left, right) {
                (Some(l), Some(r)) => ordered(Some(l), r).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
