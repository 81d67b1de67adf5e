//! Query translation.
//!
//! Turns the REST shortcut parameters of `GET /api/files` into a single
//! [`Filter`], a result window and a key projection.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::IntoParams;

use super::entry::Document;
use super::filter::{CmpOp, Filter};

/// A query parameter could not be translated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid value for `{param}`: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("invalid regular expression in `{param}`: {reason}")]
    InvalidRegex { param: String, reason: String },

    #[error("`{first}` and `{second}` cannot be used together")]
    MutuallyExclusive { first: String, second: String },

    #[error("malformed query: {0}")]
    MalformedQuery(String),
}

impl QueryError {
    fn invalid(param: &str, reason: impl Into<String>) -> Self {
        QueryError::InvalidParameter {
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    /// The parameter(s) at fault.
    pub fn params(&self) -> Vec<&str> {
        match self {
            QueryError::InvalidParameter { param, .. } | QueryError::InvalidRegex { param, .. } => {
                vec![param.as_str()]
            }
            QueryError::MutuallyExclusive { first, second } => {
                vec![first.as_str(), second.as_str()]
            }
            QueryError::MalformedQuery(_) => vec!["query"],
        }
    }
}

/// Query string of `GET /api/files` and `GET /api/files/count`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileQueryParams {
    /// Regular expression on `logical_name`. Takes precedence over every
    /// other path shortcut.
    #[serde(rename = "path-regex")]
    pub path_regex: Option<String>,
    /// Exact `logical_name`.
    pub path: Option<String>,
    /// Exact `logical_name`; alternative spelling of `path`.
    pub logical_name: Option<String>,
    /// Directory prefix of `logical_name`.
    pub directory: Option<String>,
    /// File name suffix of `logical_name`.
    pub filename: Option<String>,
    /// `run.run_number`.
    pub run_number: Option<String>,
    /// `iceprod.dataset`.
    pub dataset: Option<String>,
    /// Event inside `[run.first_event, run.last_event]`.
    pub event_id: Option<String>,
    /// `processing_level`.
    pub processing_level: Option<String>,
    /// `offline_processing_metadata.season`.
    pub season: Option<String>,
    /// Raw JSON filter.
    pub query: Option<String>,
    /// Offset of the first result.
    pub start: Option<String>,
    /// Maximum number of results.
    pub limit: Option<String>,
    /// `|`-separated list of keys to return.
    pub keys: Option<String>,
    /// Return whole documents.
    #[serde(rename = "all-keys")]
    pub all_keys: Option<String>,
}

/// Result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub limit: usize,
}

/// Which keys of each matching document are returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `uuid` and `logical_name`.
    Default,
    /// The listed (possibly dotted) keys.
    Keys(Vec<String>),
    /// Everything.
    All,
}

impl Projection {
    const DEFAULT_KEYS: [&'static str; 2] = ["uuid", "logical_name"];

    /// Apply the projection to a document.
    pub fn apply(&self, document: Document) -> Document {
        match self {
            Projection::All => document,
            Projection::Default => project(&document, Self::DEFAULT_KEYS.iter().copied()),
            Projection::Keys(keys) => project(&document, keys.iter().map(String::as_str)),
        }
    }
}

fn project<'a>(document: &Document, keys: impl Iterator<Item = &'a str>) -> Document {
    let mut out = Document::new();
    for key in keys {
        copy_path(document, &mut out, key);
    }
    out
}

fn copy_path(source: &Document, target: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = source.get(path) {
                target.insert(path.to_string(), value.clone());
            }
        }
        Some((head, rest)) => {
            let Some(Value::Object(inner)) = source.get(head) else {
                return;
            };
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            let emptied = match slot {
                Value::Object(slot) => {
                    copy_path(inner, slot, rest);
                    slot.is_empty()
                }
                _ => false,
            };
            if emptied {
                target.remove(head);
            }
        }
    }
}

/// A fully translated collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct FileQuery {
    pub filter: Filter,
    pub window: Window,
    pub projection: Projection,
}

/// Translates query parameters into store filters.
#[derive(Debug, Clone, Copy)]
pub struct QueryTranslator {
    default_limit: usize,
    max_limit: usize,
}

impl QueryTranslator {
    /// Create a translator. `limit` defaults to `default_limit` and is
    /// clamped to `max_limit`.
    pub fn new(default_limit: usize, max_limit: usize) -> Self {
        Self {
            default_limit,
            max_limit,
        }
    }

    /// Translate a collection listing.
    pub fn translate(&self, params: &FileQueryParams) -> Result<FileQuery, QueryError> {
        let filter = self.translate_filter(params)?;
        let window = Window {
            start: match non_empty("start", params.start.as_deref())? {
                Some(raw) => parse_start(raw)?,
                None => 0,
            },
            limit: match non_empty("limit", params.limit.as_deref())? {
                Some(raw) => parse_limit(raw)?.min(self.max_limit),
                None => self.default_limit,
            },
        };
        let projection = translate_projection(params)?;
        Ok(FileQuery {
            filter,
            window,
            projection,
        })
    }

    /// Translate only the filtering parameters.
    pub fn translate_filter(&self, params: &FileQueryParams) -> Result<Filter, QueryError> {
        let mut clauses = Vec::new();

        let path = non_empty("path", params.path.as_deref())?;
        let logical_name = non_empty("logical_name", params.logical_name.as_deref())?;
        if path.is_some() && logical_name.is_some() {
            return Err(QueryError::MutuallyExclusive {
                first: "path".to_string(),
                second: "logical_name".to_string(),
            });
        }

        if let Some(pattern) = non_empty("path-regex", params.path_regex.as_deref())? {
            let regex = Regex::new(pattern).map_err(|e| QueryError::InvalidRegex {
                param: "path-regex".to_string(),
                reason: e.to_string(),
            })?;
            clauses.push(Filter::regex("logical_name", regex));
        } else if let Some(name) = path.or(logical_name) {
            clauses.push(Filter::eq("logical_name", name));
        } else {
            let directory = non_empty("directory", params.directory.as_deref())?;
            let filename = non_empty("filename", params.filename.as_deref())?;
            if let Some(pattern) = directory_pattern(directory, filename) {
                let regex = Regex::new(&pattern).map_err(|e| QueryError::InvalidRegex {
                    param: if directory.is_some() { "directory" } else { "filename" }.to_string(),
                    reason: e.to_string(),
                })?;
                clauses.push(Filter::regex("logical_name", regex));
            }
        }

        if let Some(raw) = non_empty("run_number", params.run_number.as_deref())? {
            clauses.push(Filter::eq("run.run_number", parse_integer("run_number", raw)?));
        }
        if let Some(raw) = non_empty("dataset", params.dataset.as_deref())? {
            clauses.push(Filter::eq("iceprod.dataset", parse_integer("dataset", raw)?));
        }
        if let Some(raw) = non_empty("event_id", params.event_id.as_deref())? {
            let event_id = parse_integer("event_id", raw)?;
            clauses.push(Filter::cmp("run.first_event", CmpOp::Lte, event_id));
            clauses.push(Filter::cmp("run.last_event", CmpOp::Gte, event_id));
        }
        if let Some(level) = non_empty("processing_level", params.processing_level.as_deref())? {
            clauses.push(Filter::eq("processing_level", level));
        }
        if let Some(raw) = non_empty("season", params.season.as_deref())? {
            clauses.push(Filter::eq(
                "offline_processing_metadata.season",
                parse_integer("season", raw)?,
            ));
        }

        if let Some(raw) = non_empty("query", params.query.as_deref())? {
            let value: Value = serde_json::from_str(raw)
                .map_err(|e| QueryError::MalformedQuery(format!("not valid JSON: {e}")))?;
            clauses.push(Filter::from_json(&value)?);
        }

        let filter = Filter::and(clauses);
        tracing::debug!(filter = %filter, "translated file query");
        Ok(filter)
    }
}

fn translate_projection(params: &FileQueryParams) -> Result<Projection, QueryError> {
    let keys = non_empty("keys", params.keys.as_deref())?;
    let all_keys = match non_empty("all-keys", params.all_keys.as_deref())? {
        Some(raw) => parse_bool("all-keys", raw)?,
        None => false,
    };
    match (keys, all_keys) {
        (Some(_), true) => Err(QueryError::MutuallyExclusive {
            first: "keys".to_string(),
            second: "all-keys".to_string(),
        }),
        (Some(keys), false) => {
            let keys: Vec<String> = keys
                .split('|')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                return Err(QueryError::invalid("keys", "no keys given"));
            }
            Ok(Projection::Keys(keys))
        }
        (None, true) => Ok(Projection::All),
        (None, false) => Ok(Projection::Default),
    }
}

fn directory_pattern(directory: Option<&str>, filename: Option<&str>) -> Option<String> {
    let directory = directory.map(|d| regex::escape(d.trim_end_matches('/')));
    let filename = filename.map(|f| regex::escape(f.trim_start_matches('/')));
    match (directory, filename) {
        (Some(dir), Some(file)) => Some(format!("^{dir}(/.*)?/{file}$")),
        (Some(dir), None) => Some(format!("^{dir}/")),
        (None, Some(file)) => Some(format!("/{file}$")),
        (None, None) => None,
    }
}

fn non_empty<'a>(param: &str, value: Option<&'a str>) -> Result<Option<&'a str>, QueryError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(QueryError::invalid(param, "must not be empty")),
        other => Ok(other),
    }
}

fn parse_integer(param: &str, raw: &str) -> Result<i64, QueryError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| QueryError::invalid(param, format!("`{raw}` is not an integer")))
}

fn parse_start(raw: &str) -> Result<usize, QueryError> {
    let start = parse_integer("start", raw)?;
    usize::try_from(start).map_err(|_| QueryError::invalid("start", "must not be negative"))
}

fn parse_limit(raw: &str) -> Result<usize, QueryError> {
    let limit = parse_integer("limit", raw)?;
    if limit <= 0 {
        return Err(QueryError::invalid("limit", "must be positive"));
    }
    usize::try_from(limit).map_err(|_| QueryError::invalid("limit", "out of range"))
}

fn parse_bool(param: &str, raw: &str) -> Result<bool, QueryError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(QueryError::invalid(param, format!("`{raw}` is not a boolean"))),
    }
}
