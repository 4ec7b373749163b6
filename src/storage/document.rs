//! Document model and the small query language understood by the store:
//! filters, projections, updates and sort orders over JSON objects.

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::{StoreError, StoreResult};

pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "_id";

pub fn doc_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(|v| v.as_str())
}

/// Serialize a typed record into a document. The record must serialize to a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Codec(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            kind_name(&other)
        )))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Exists(String),
    Missing(String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }
    pub fn exists(field: impl Into<String>) -> Self { Filter::Exists(field.into()) }
    pub fn missing(field: impl Into<String>) -> Self { Filter::Missing(field.into()) }
    pub fn id(id: impl Into<String>) -> Self { Filter::Eq(ID_FIELD.to_string(), Value::String(id.into())) }

    /// Conjunction, flattening nested `And`s so conjunct lookups stay shallow.
    pub fn and(self, other: Filter) -> Self {
        let mut parts = match self {
            Filter::All => Vec::new(),
            Filter::And(v) => v,
            f => vec![f],
        };
        match other {
            Filter::All => {}
            Filter::And(v) => parts.extend(v),
            f => parts.push(f),
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            // A null field counts as absent, mirroring how optional fields are skipped on write.
            Filter::Exists(field) => doc.get(field).map(|v| !v.is_null()).unwrap_or(false),
            Filter::Missing(field) => doc.get(field).map(|v| v.is_null()).unwrap_or(true),
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
        }
    }

    pub(crate) fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::All => Vec::new(),
            Filter::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
            f => vec![f],
        }
    }

    /// True when every conjunct of `other` is also a conjunct of `self`, so any
    /// document matching `self` is guaranteed to match `other`.
    pub(crate) fn implies(&self, other: &Filter) -> bool {
        let mine = self.conjuncts();
        other.conjuncts().iter().all(|c| mine.contains(c))
    }

    /// Value this filter pins `field` to, if any conjunct is an equality on it.
    pub(crate) fn pinned(&self, field: &str) -> Option<&Value> {
        self.conjuncts().into_iter().find_map(|c| match c {
            Filter::Eq(f, v) if f == field => Some(v),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Fields(Vec<String>),
}

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Fields(fields.into_iter().map(Into::into).collect())
    }

    /// `_id` is always retained.
    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Projection::All => doc.clone(),
            Projection::Fields(fields) => {
                let mut out = Document::new();
                if let Some(id) = doc.get(ID_FIELD) { out.insert(ID_FIELD.to_string(), id.clone()); }
                for f in fields {
                    if let Some(v) = doc.get(f) { out.insert(f.clone(), v.clone()); }
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
}

/// Closed set of field operations applied to every matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self { Self::default() }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    pub fn ops(&self) -> &[UpdateOp] { &self.ops }

    pub(crate) fn apply(&self, doc: &mut Document) {
        for op in &self.ops {
            match op {
                UpdateOp::Set(f, v) if f != ID_FIELD => { doc.insert(f.clone(), v.clone()); }
                UpdateOp::Unset(f) if f != ID_FIELD => { doc.remove(f); }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self { Self { field: field.into(), direction: Direction::Ascending } }
    pub fn desc(field: impl Into<String>) -> Self { Self { field: field.into(), direction: Direction::Descending } }

    /// Orders by the sort field, then by `_id` in the same direction.
    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = compare_values(a.get(&self.field), b.get(&self.field))
            .then_with(|| compare_values(a.get(ID_FIELD), b.get(ID_FIELD)));
        match self.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Projection,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn projection(mut self, projection: Projection) -> Self { self.projection = projection; self }
    pub fn sort(mut self, sort: Sort) -> Self { self.sort = Some(sort); self }
    pub fn limit(mut self, limit: usize) -> Self { self.limit = Some(limit); self }
}

fn rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order across JSON values: missing/null < bool < number < string; arrays and
/// objects compare by their serialized text.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => x.as_f64().unwrap_or(0.0).total_cmp(&y.as_f64().unwrap_or(0.0)),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ Value::Array(_)), Some(y @ Value::Array(_)))
        | (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
