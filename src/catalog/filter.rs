//! Structured filters over metadata documents.
//!
//! Field paths are dotted (`run.run_number`). When a path crosses an array,
//! every element is visited, and a filter on an array-valued field matches
//! when any element matches.

use std::cmp::Ordering;
use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Number, Value};

use super::entry::Document;
use super::query::QueryError;

/// Ordering comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "$gt" => Some(CmpOp::Gt),
            "$gte" => Some(CmpOp::Gte),
            "$lt" => Some(CmpOp::Lt),
            "$lte" => Some(CmpOp::Lte),
            _ => None,
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            CmpOp::Gt => "$gt",
            CmpOp::Gte => "$gte",
            CmpOp::Lt => "$lt",
            CmpOp::Lte => "$lte",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Gte => ordering != Ordering::Less,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A predicate over documents.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Every sub-filter matches.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Cmp { field: String, op: CmpOp, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, exists: bool },
    Regex { field: String, regex: Regex },
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        use Filter::*;
        match (self, other) {
            (All, All) => true,
            (And(a), And(b)) | (Or(a), Or(b)) => a == b,
            (Eq { field: f1, value: v1 }, Eq { field: f2, value: v2 })
            | (Ne { field: f1, value: v1 }, Ne { field: f2, value: v2 }) => f1 == f2 && v1 == v2,
            (
                Cmp { field: f1, op: o1, value: v1 },
                Cmp { field: f2, op: o2, value: v2 },
            ) => f1 == f2 && o1 == o2 && v1 == v2,
            (In { field: f1, values: v1 }, In { field: f2, values: v2 })
            | (Nin { field: f1, values: v1 }, Nin { field: f2, values: v2 }) => {
                f1 == f2 && v1 == v2
            }
            (Exists { field: f1, exists: e1 }, Exists { field: f2, exists: e2 }) => {
                f1 == f2 && e1 == e2
            }
            (Regex { field: f1, regex: r1 }, Regex { field: f2, regex: r2 }) => {
                f1 == f2 && r1.as_str() == r2.as_str()
            }
            _ => false,
        }
    }
}

impl Filter {
    /// Field equals value.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Ordering comparison against a value.
    pub fn cmp(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// String field matches a regular expression.
    pub fn regex(field: impl Into<String>, regex: Regex) -> Self {
        Filter::Regex {
            field: field.into(),
            regex,
        }
    }

    /// Conjunction of filters. Nested conjunctions are flattened and
    /// `All` is dropped.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut flat = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                Filter::All => {}
                Filter::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Filter::All,
            1 => flat.remove(0),
            _ => Filter::And(flat),
        }
    }

    /// Check whether a document satisfies the filter.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
            Filter::Eq { field, value } => any_scalar(document, field, |v| json_eq(v, value)),
            Filter::Ne { field, value } => !any_scalar(document, field, |v| json_eq(v, value)),
            Filter::Cmp { field, op, value } => any_scalar(document, field, |v| {
                compare(v, value).is_some_and(|ordering| op.accepts(ordering))
            }),
            Filter::In { field, values } => {
                any_scalar(document, field, |v| values.iter().any(|x| json_eq(v, x)))
            }
            Filter::Nin { field, values } => {
                !any_scalar(document, field, |v| values.iter().any(|x| json_eq(v, x)))
            }
            Filter::Exists { field, exists } => !lookup(document, field).is_empty() == *exists,
            Filter::Regex { field, regex } => {
                any_scalar(document, field, |v| v.as_str().is_some_and(|s| regex.is_match(s)))
            }
        }
    }

    /// Parse a filter from its JSON query form.
    ///
    /// Supports `$and`, `$or` and the field operators `$eq`, `$ne`, `$gt`,
    /// `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists` and `$regex` (with
    /// optional `$options`). A bare value means equality.
    pub fn from_json(query: &Value) -> Result<Self, QueryError> {
        let object = query
            .as_object()
            .ok_or_else(|| QueryError::MalformedQuery("query must be a JSON object".to_string()))?;

        let mut filters = Vec::with_capacity(object.len());
        for (key, value) in object {
            match key.as_str() {
                "$and" | "$or" => {
                    let items = value.as_array().filter(|a| !a.is_empty()).ok_or_else(|| {
                        QueryError::MalformedQuery(format!("{key} takes a non-empty array"))
                    })?;
                    let parsed = items
                        .iter()
                        .map(Filter::from_json)
                        .collect::<Result<Vec<_>, _>>()?;
                    filters.push(if key == "$and" {
                        Filter::and(parsed)
                    } else {
                        Filter::Or(parsed)
                    });
                }
                op if op.starts_with('$') => {
                    return Err(QueryError::MalformedQuery(format!(
                        "unknown top-level operator {op}"
                    )))
                }
                field => filters.push(parse_field(field, value)?),
            }
        }
        Ok(Filter::and(filters))
    }

    /// Render the filter in its JSON query form.
    pub fn to_json(&self) -> Value {
        fn field_op(field: &str, op: &str, value: Value) -> Value {
            let mut inner = Map::new();
            inner.insert(op.to_string(), value);
            let mut outer = Map::new();
            outer.insert(field.to_string(), Value::Object(inner));
            Value::Object(outer)
        }

        match self {
            Filter::All => Value::Object(Map::new()),
            Filter::And(filters) => {
                serde_json::json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(filters) => {
                serde_json::json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Eq { field, value } => field_op(field, "$eq", value.clone()),
            Filter::Ne { field, value } => field_op(field, "$ne", value.clone()),
            Filter::Cmp { field, op, value } => field_op(field, op.operator(), value.clone()),
            Filter::In { field, values } => field_op(field, "$in", Value::Array(values.clone())),
            Filter::Nin { field, values } => field_op(field, "$nin", Value::Array(values.clone())),
            Filter::Exists { field, exists } => field_op(field, "$exists", Value::Bool(*exists)),
            Filter::Regex { field, regex } => {
                field_op(field, "$regex", Value::String(regex.as_str().to_string()))
            }
        }
    }

    /// Top-level equality constraint on a field, if the filter carries one.
    pub fn equality_on(&self, field: &str) -> Option<&Value> {
        match self {
            Filter::Eq { field: f, value } if f == field => Some(value),
            Filter::And(filters) => filters.iter().find_map(|f| f.equality_on(field)),
            _ => None,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_field(field: &str, value: &Value) -> Result<Filter, QueryError> {
    let operators = match value.as_object() {
        Some(map) if map.keys().any(|k| k.starts_with('$')) => map,
        _ => return Ok(Filter::eq(field, value.clone())),
    };

    let options = match operators.get("$options") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(QueryError::MalformedQuery(
                "$options must be a string".to_string(),
            ))
        }
        None => None,
    };

    let mut filters = Vec::with_capacity(operators.len());
    for (op, operand) in operators {
        let filter = match op.as_str() {
            "$eq" => Filter::eq(field, operand.clone()),
            "$ne" => Filter::Ne {
                field: field.to_string(),
                value: operand.clone(),
            },
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let cmp = CmpOp::from_operator(op).ok_or_else(|| {
                    QueryError::MalformedQuery(format!("unknown operator {op}"))
                })?;
                Filter::cmp(field, cmp, operand.clone())
            }
            "$in" | "$nin" => {
                let values = operand.as_array().cloned().ok_or_else(|| {
                    QueryError::MalformedQuery(format!("{op} on {field} takes an array"))
                })?;
                if op == "$in" {
                    Filter::In {
                        field: field.to_string(),
                        values,
                    }
                } else {
                    Filter::Nin {
                        field: field.to_string(),
                        values,
                    }
                }
            }
            "$exists" => Filter::Exists {
                field: field.to_string(),
                exists: operand.as_bool().ok_or_else(|| {
                    QueryError::MalformedQuery(format!("$exists on {field} takes a boolean"))
                })?,
            },
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    QueryError::MalformedQuery(format!("$regex on {field} takes a string"))
                })?;
                Filter::regex(field, build_regex(pattern, options)?)
            }
            "$options" => continue,
            other => {
                return Err(QueryError::MalformedQuery(format!(
                    "unknown operator {other} on {field}"
                )))
            }
        };
        filters.push(filter);
    }
    if options.is_some() && !operators.contains_key("$regex") {
        return Err(QueryError::MalformedQuery(
            "$options requires $regex".to_string(),
        ));
    }
    Ok(Filter::and(filters))
}

fn build_regex(pattern: &str, options: Option<&str>) -> Result<Regex, QueryError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.unwrap_or_default().chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(QueryError::MalformedQuery(format!(
                    "unsupported regex option {other}"
                )))
            }
        };
    }
    builder.build().map_err(|e| QueryError::InvalidRegex {
        param: "query".to_string(),
        reason: e.to_string(),
    })
}

/// All values reachable along a dotted path.
fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let mut current: Vec<&Value> = match segments.next().and_then(|s| document.get(s)) {
        Some(value) => vec![value],
        None => return Vec::new(),
    };
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => next.extend(
                    items
                        .iter()
                        .filter_map(|item| item.as_object().and_then(|m| m.get(segment))),
                ),
                _ => {}
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

/// Whether any value at `path`, or any element of an array value there,
/// satisfies the predicate.
fn any_scalar(document: &Document, path: &str, predicate: impl Fn(&Value) -> bool) -> bool {
    lookup(document, path).into_iter().any(|value| {
        predicate(value)
            || value
                .as_array()
                .is_some_and(|items| items.iter().any(&predicate))
    })
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Integers compare exactly; anything involving a float goes through `f64`.
fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    match (as_integer(x), as_integer(y)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
