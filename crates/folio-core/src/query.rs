//! In-memory query engine
//!
//! Filters, sorts, truncates and projects an already materialized
//! collection. Everything is a full O(n) scan; there are no indexes and
//! nothing is pushed down to disk.
//!
//! A `where` clause is a JSON object mapping field names to either a plain
//! value (equality) or an operator object:
//!
//! ```text
//! {"status": "published", "views": {"$gte": 10, "$lt": 100}}
//! ```
//!
//! Operators may be written with or without the `$` prefix. An object whose
//! keys are not all operators is compared by strict equality instead. A
//! recognized operator with an unusable operand, such as a non-array `$in`,
//! is a validation error.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::{EngineError, EngineResult, FieldError};

/// Anything the query engine can read fields from
pub trait Queryable {
    /// Value at a dotted field path
    fn field(&self, path: &str) -> Option<Cow<'_, Value>>;

    /// Full JSON rendering, used for projection
    fn to_json(&self) -> Value;
}

impl Queryable for Value {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        lookup_path(self, path).map(Cow::Borrowed)
    }

    fn to_json(&self) -> Value {
        self.clone()
    }
}

impl Queryable for Document {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (self.fields.get(head), rest) {
            (Some(value), None) => Some(Cow::Borrowed(value)),
            (Some(value), Some(rest)) => lookup_path(value, rest).map(Cow::Borrowed),
            (None, None) => self.get(head).map(Cow::Owned),
            (None, Some(_)) => None,
        }
    }

    fn to_json(&self) -> Value {
        self.to_value()
    }
}

/// Walk a dotted path through nested objects
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

/// A single comparison operator
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Contains(Value),
}

impl Op {
    /// `None` when `key` names no operator
    fn parse(key: &str, operand: &Value) -> Option<Result<Self, String>> {
        let name = key.strip_prefix('$').unwrap_or(key);
        let op = match name {
            "eq" => Op::Eq(operand.clone()),
            "ne" => Op::Ne(operand.clone()),
            "gt" => Op::Gt(operand.clone()),
            "gte" => Op::Gte(operand.clone()),
            "lt" => Op::Lt(operand.clone()),
            "lte" => Op::Lte(operand.clone()),
            "in" => match operand {
                Value::Array(options) => Op::In(options.clone()),
                _ => return Some(Err(format!("{key} expects an array, got {operand}"))),
            },
            "contains" => Op::Contains(operand.clone()),
            _ => return None,
        };
        Some(Ok(op))
    }

    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Op::Eq(expected) => actual == Some(expected),
            Op::Ne(expected) => actual != Some(expected),
            Op::Gt(bound) => ordered(actual, bound, |o| o == Ordering::Greater),
            Op::Gte(bound) => ordered(actual, bound, |o| o != Ordering::Less),
            Op::Lt(bound) => ordered(actual, bound, |o| o == Ordering::Less),
            Op::Lte(bound) => ordered(actual, bound, |o| o != Ordering::Greater),
            Op::In(options) => actual.is_some_and(|v| options.contains(v)),
            Op::Contains(needle) => match (actual, needle) {
                (Some(Value::String(hay)), Value::String(needle)) => hay.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
        }
    }
}

fn ordered(actual: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|value| compare_same_kind(value, bound))
        .is_some_and(accept)
}

/// How one field is matched
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Strict equality with a value
    Equals(Value),
    /// Every operator must hold
    All(Vec<Op>),
}

impl Predicate {
    fn from_value(field: &str, value: &Value) -> Result<Self, Vec<FieldError>> {
        if let Value::Object(map) = value {
            if !map.is_empty() {
                let parsed: Option<Vec<_>> = map.iter().map(|(k, v)| Op::parse(k, v)).collect();
                if let Some(parsed) = parsed {
                    let mut ops = Vec::with_capacity(parsed.len());
                    let mut errors = Vec::new();
                    for result in parsed {
                        match result {
                            Ok(op) => ops.push(op),
                            Err(message) => errors.push(FieldError::new(field, message)),
                        }
                    }
                    return if errors.is_empty() {
                        Ok(Predicate::All(ops))
                    } else {
                        Err(errors)
                    };
                }
            }
        }
        Ok(Predicate::Equals(value.clone()))
    }

    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Predicate::Equals(expected) => actual == Some(expected),
            Predicate::All(ops) => ops.iter().all(|op| op.matches(actual)),
        }
    }
}

/// A parsed `where` clause; every field predicate must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Predicate)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON `where` object
    ///
    /// Anything other than an object yields an empty filter that matches
    /// every document. Fails with every malformed operand when an operator
    /// cannot be built.
    pub fn parse(where_clause: &Value) -> EngineResult<Self> {
        let Value::Object(map) = where_clause else {
            return Ok(Self::default());
        };

        let mut clauses = Vec::with_capacity(map.len());
        let mut errors = Vec::new();
        for (field, value) in map {
            match Predicate::from_value(field, value) {
                Ok(predicate) => clauses.push((field.clone(), predicate)),
                Err(mut field_errors) => errors.append(&mut field_errors),
            }
        }

        if errors.is_empty() {
            Ok(Self { clauses })
        } else {
            Err(EngineError::Validation {
                entity: "where".to_string(),
                errors,
            })
        }
    }

    /// Require `field` to equal `value`
    pub fn equals(mut self, field: impl Into<String>, value: Value) -> Self {
        self.clauses.push((field.into(), Predicate::Equals(value)));
        self
    }

    /// Require `op` to hold for `field`
    pub fn op(mut self, field: impl Into<String>, op: Op) -> Self {
        self.clauses.push((field.into(), Predicate::All(vec![op])));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches<T: Queryable>(&self, doc: &T) -> bool {
        self.clauses.iter().all(|(field, predicate)| {
            let actual = doc.field(field);
            predicate.matches(actual.as_deref())
        })
    }
}

/// Keep the documents matching `filter`, preserving their order
pub fn filter<T: Queryable>(documents: Vec<T>, filter: &Filter) -> Vec<T> {
    if filter.is_empty() {
        return documents;
    }
    documents.into_iter().filter(|d| filter.matches(d)).collect()
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Single-field sort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Post-filter options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
}

/// Sort documents in place
///
/// Missing and null values sort after present ones when ascending. Values
/// of different kinds are ordered by kind. Ties keep their input order in
/// this implementation, but callers must not depend on tie order.
pub fn sort<T: Queryable>(documents: &mut [T], spec: &SortSpec) {
    documents.sort_by(|a, b| {
        let ordering = compare_for_sort(a.field(&spec.field).as_deref(), b.field(&spec.field).as_deref());
        match spec.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// Project a document onto the named fields
///
/// Fields missing from the document are left out rather than set to null.
pub fn project<T: Queryable>(doc: &T, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = doc.field(field) {
            out.insert(field.clone(), value.into_owned());
        }
    }
    Value::Object(out)
}

/// Apply sort, limit and projection, in that order
pub fn apply_options<T: Queryable>(mut documents: Vec<T>, options: &QueryOptions) -> Vec<Value> {
    if let Some(spec) = &options.sort {
        sort(&mut documents, spec);
    }
    if let Some(limit) = options.limit {
        documents.truncate(limit);
    }
    match &options.select {
        Some(fields) => documents.iter().map(|d| project(d, fields)).collect(),
        None => documents.iter().map(|d| d.to_json()).collect(),
    }
}

/// A filter bundled with its options
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Filter,
    pub options: QueryOptions,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.options.sort = Some(spec);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Filter then apply options
    pub fn run<T: Queryable>(&self, documents: Vec<T>) -> Vec<Value> {
        apply_options(filter(documents, &self.filter), &self.options)
    }
}

/// Compare two values of the same kind; `None` when they are not ordered
pub fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(Value::Null)) | (Some(Value::Null), None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_same_kind(a, b)
            .unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b))),
    }
}
