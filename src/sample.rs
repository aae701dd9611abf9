//! Samples and the three namespaces their fields live in.
//!
//! A sample is a record made of three disjoint maps: `integer`, `string` and
//! `set`. The same field name may show up in more than one namespace, in which
//! case the occurrences are distinct columns. Every sample is expected to carry
//! an `integer.time` field, used for ordering and time bucketing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the integer field every sample is ordered and bucketed by.
pub const TIME_FIELD: &str = "time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Integer,
    String,
    Set,
}

impl Namespace {
    /// All namespaces, in the order used to break type-vote ties.
    pub const ALL: [Namespace; 3] = [Namespace::Integer, Namespace::String, Namespace::Set];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Integer => "integer",
            Namespace::String => "string",
            Namespace::Set => "set",
        }
    }
    pub fn parse(name: &str) -> Option<Namespace> {
        match name {
            "integer" => Some(Namespace::Integer),
            "string" => Some(Namespace::String),
            "set" => Some(Namespace::Set),
            _ => None,
        }
    }
    pub fn index(&self) -> usize {
        match self {
            Namespace::Integer => 0,
            Namespace::String => 1,
            Namespace::Set => 2,
        }
    }
    /// Dotted document path of `field` within this namespace, e.g. `integer.time`.
    pub fn path(&self, field: &str) -> String {
        format!("{}.{}", self.as_str(), field)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub integer: BTreeMap<String, i64>,
    #[serde(default)]
    pub string: BTreeMap<String, String>,
    #[serde(default)]
    pub set: BTreeMap<String, BTreeSet<String>>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_integer(mut self, field: &str, value: i64) -> Self {
        self.integer.insert(field.to_owned(), value);
        self
    }
    pub fn with_string(mut self, field: &str, value: &str) -> Self {
        self.string.insert(field.to_owned(), value.to_owned());
        self
    }
    pub fn with_set<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set
            .insert(field.to_owned(), values.into_iter().map(Into::into).collect());
        self
    }
    pub fn time(&self) -> Option<i64> {
        self.integer.get(TIME_FIELD).copied()
    }

    /// Validates and coerces a raw incoming sample.
    ///
    /// Returns `None` when the sample is not an object or its `integer`
    /// namespace is not an object; such samples are dropped by ingestion.
    /// Integer values are coerced the way `parseInt` would read them and
    /// values that cannot be read as an integer are left out. Non-object
    /// `string` or `set` namespaces are treated as empty.
    pub fn from_value(raw: &Value) -> Option<Sample> {
        let record = raw.as_object()?;
        let integers = record.get(Namespace::Integer.as_str())?.as_object()?;

        let mut sample = Sample::new();
        for (field, value) in integers {
            if let Some(coerced) = coerce_integer(value) {
                sample.integer.insert(field.clone(), coerced);
            }
        }
        if let Some(strings) = record.get(Namespace::String.as_str()).and_then(Value::as_object) {
            for (field, value) in strings {
                if let Some(text) = scalar_text(value) {
                    sample.string.insert(field.clone(), text);
                }
            }
        }
        if let Some(sets) = record.get(Namespace::Set.as_str()).and_then(Value::as_object) {
            for (field, value) in sets {
                if let Some(members) = value.as_array() {
                    let members: BTreeSet<String> = members.iter().filter_map(scalar_text).collect();
                    sample.set.insert(field.clone(), members);
                }
            }
        }
        Some(sample)
    }

    /// The stored document form: `{"integer": {..}, "string": {..}, "set": {..}}`.
    pub fn to_document(&self) -> Value {
        let integer: Map<String, Value> = self
            .integer
            .iter()
            .map(|(field, value)| (field.clone(), Value::from(*value)))
            .collect();
        let string: Map<String, Value> = self
            .string
            .iter()
            .map(|(field, value)| (field.clone(), Value::from(value.as_str())))
            .collect();
        let set: Map<String, Value> = self
            .set
            .iter()
            .map(|(field, members)| {
                let members: Vec<Value> = members.iter().map(|m| Value::from(m.as_str())).collect();
                (field.clone(), Value::Array(members))
            })
            .collect();

        let mut document = Map::new();
        document.insert(Namespace::Integer.as_str().to_owned(), Value::Object(integer));
        document.insert(Namespace::String.as_str().to_owned(), Value::Object(string));
        document.insert(Namespace::Set.as_str().to_owned(), Value::Object(set));
        Value::Object(document)
    }
}

/// Reads a JSON value as an integer the way `parseInt(value, 10)` does:
/// numbers are truncated, strings contribute their leading (optionally
/// signed) run of digits. Anything else has no integer reading.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int);
            }
            let float = number.as_f64()?;
            float.is_finite().then(|| float.trunc() as i64)
        }
        Value::String(text) => parse_leading_integer(text),
        _ => None,
    }
}

fn parse_leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
