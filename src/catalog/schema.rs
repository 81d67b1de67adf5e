//! Metadata schema validation.
//!
//! The schema is a table of [`FieldRule`]s keyed by dotted field path. New
//! domain attributes are added by appending to [`FIELD_RULES`]; fields that
//! no rule mentions pass through unvalidated.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::entry::{Document, FileEntry};

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any string.
    String,
    /// A string with at least one non-whitespace character.
    NonEmptyString,
    /// A signed integer.
    Integer,
    /// An unsigned integer.
    NonNegativeInteger,
    /// A nested object.
    Object,
    /// An object whose values are all strings.
    StringMap,
    /// A non-empty list of distinct, non-empty location strings.
    LocationList,
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "must be a string",
            FieldKind::NonEmptyString => "must be a non-empty string",
            FieldKind::Integer => "must be an integer",
            FieldKind::NonNegativeInteger => "must be a non-negative integer",
            FieldKind::Object => "must be an object",
            FieldKind::StringMap => "must be an object of strings",
            FieldKind::LocationList => "must be a non-empty list of non-empty strings",
        }
    }
}

/// Whether a field has to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Present on every stored entry.
    Required,
    /// May be absent.
    Optional,
    /// Assigned by the server on creation, required afterwards.
    ServerAssigned,
}

/// One row of the schema table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    /// Dotted path of the field (`checksum.sha512`).
    pub path: &'static str,
    /// Expected type.
    pub kind: FieldKind,
    /// Presence requirement.
    pub presence: Presence,
}

impl FieldRule {
    /// Create a new rule.
    pub const fn new(path: &'static str, kind: FieldKind, presence: Presence) -> Self {
        Self {
            path,
            kind,
            presence,
        }
    }

    fn is_mandatory(&self) -> bool {
        !matches!(self.presence, Presence::Optional)
    }
}

/// The file entry schema.
pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule::new("uuid", FieldKind::NonEmptyString, Presence::ServerAssigned),
    FieldRule::new("logical_name", FieldKind::NonEmptyString, Presence::Required),
    FieldRule::new("locations", FieldKind::LocationList, Presence::Required),
    FieldRule::new("file_size", FieldKind::NonNegativeInteger, Presence::Required),
    FieldRule::new("checksum", FieldKind::StringMap, Presence::Required),
    FieldRule::new("checksum.sha512", FieldKind::NonEmptyString, Presence::Required),
    FieldRule::new("create_date", FieldKind::String, Presence::Optional),
    FieldRule::new("meta_modify_date", FieldKind::String, Presence::Optional),
    FieldRule::new("data_type", FieldKind::String, Presence::Optional),
    FieldRule::new("content_status", FieldKind::String, Presence::Optional),
    FieldRule::new("processing_level", FieldKind::String, Presence::Optional),
    FieldRule::new("run", FieldKind::Object, Presence::Optional),
    FieldRule::new("run.run_number", FieldKind::Integer, Presence::Optional),
    FieldRule::new("run.first_event", FieldKind::Integer, Presence::Optional),
    FieldRule::new("run.last_event", FieldKind::Integer, Presence::Optional),
    FieldRule::new("iceprod", FieldKind::Object, Presence::Optional),
    FieldRule::new("iceprod.dataset", FieldKind::Integer, Presence::Optional),
    FieldRule::new("offline_processing_metadata", FieldKind::Object, Presence::Optional),
    FieldRule::new(
        "offline_processing_metadata.season",
        FieldKind::Integer,
        Presence::Optional,
    ),
];

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Every field a candidate document violates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Create an empty error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error for a single field.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.push(field, message);
        err
    }

    /// Record a violation.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Check if nothing was violated.
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// All recorded violations, in discovery order.
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// Names of the violated fields.
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    /// Violations grouped by field.
    pub fn details(&self) -> HashMap<String, Vec<String>> {
        let mut details: HashMap<String, Vec<String>> = HashMap::new();
        for v in &self.violations {
            details
                .entry(v.field.clone())
                .or_default()
                .push(v.message.clone());
        }
        details
    }

    fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid metadata")?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}`{}` {}", sep, v.field, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// What the candidate document is about to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode<'a> {
    /// A new entry; `uuid` must not be supplied.
    Create,
    /// A full document for the entry with the given uuid.
    Update(&'a str),
    /// A partial document for the entry with the given uuid. Only the
    /// supplied fields are checked; `null` marks a field for removal.
    Patch(&'a str),
}

/// A document that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDocument(Document);

impl ValidatedDocument {
    /// Borrow the document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Take the document.
    pub fn into_inner(self) -> Document {
        self.0
    }

    /// Convert a full document into a typed entry.
    pub fn into_entry(self) -> Result<FileEntry, ValidationError> {
        FileEntry::from_document(self.0)
            .map_err(|e| ValidationError::single("$", format!("not a file entry: {e}")))
    }
}

enum Resolved<'a> {
    Missing,
    /// An ancestor exists but is not an object; the ancestor's own rule reports it.
    Blocked,
    Found(&'a Value),
}

fn resolve<'a>(document: &'a Document, path: &str) -> Resolved<'a> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Resolved::Missing;
    };
    let Some(mut current) = document.get(first) else {
        return Resolved::Missing;
    };
    for segment in segments {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Resolved::Missing,
            },
            _ => return Resolved::Blocked,
        }
    }
    Resolved::Found(current)
}

/// Validates candidate documents against a rule table.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    rules: &'static [FieldRule],
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(FIELD_RULES)
    }
}

impl SchemaValidator {
    /// Create a validator over the given rules.
    pub fn new(rules: &'static [FieldRule]) -> Self {
        Self { rules }
    }

    /// Validate a candidate document.
    ///
    /// Collects every violation before returning.
    pub fn validate(
        &self,
        candidate: Value,
        mode: Mode<'_>,
    ) -> Result<ValidatedDocument, ValidationError> {
        let document = match candidate {
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::single(
                    "$",
                    format!("document must be a JSON object, not {}", json_type(&other)),
                ))
            }
        };

        let mut errors = ValidationError::new();
        for rule in self.rules {
            self.check_rule(rule, &document, mode, &mut errors);
        }
        errors.into_result(ValidatedDocument(document))
    }

    fn check_rule(
        &self,
        rule: &FieldRule,
        document: &Document,
        mode: Mode<'_>,
        errors: &mut ValidationError,
    ) {
        let value = match resolve(document, rule.path) {
            Resolved::Blocked => return,
            Resolved::Missing => {
                let required = match (mode, rule.presence) {
                    (Mode::Patch(_), _) => false,
                    (Mode::Create, Presence::ServerAssigned) => false,
                    (_, Presence::Optional) => false,
                    _ => true,
                };
                if required {
                    errors.push(rule.path, "is required");
                }
                return;
            }
            Resolved::Found(value) => value,
        };

        if rule.presence == Presence::ServerAssigned {
            match mode {
                Mode::Create => {
                    errors.push(rule.path, "is assigned by the server and must not be supplied");
                    return;
                }
                Mode::Update(uuid) | Mode::Patch(uuid) => {
                    if !value.is_null() && value.as_str() != Some(uuid) {
                        errors.push(rule.path, "cannot be modified");
                        return;
                    }
                }
            }
        }

        if value.is_null() {
            match mode {
                Mode::Patch(_) if rule.is_mandatory() => {
                    errors.push(rule.path, "is mandatory and cannot be removed")
                }
                Mode::Patch(_) => {}
                _ => errors.push(rule.path, "must not be null"),
            }
            return;
        }

        self.check_kind(rule, value, mode, errors);
    }

    fn has_rule(&self, path: &str) -> bool {
        self.rules.iter().any(|r| r.path == path)
    }

    fn check_kind(
        &self,
        rule: &FieldRule,
        value: &Value,
        mode: Mode<'_>,
        errors: &mut ValidationError,
    ) {
        let ok = match rule.kind {
            FieldKind::String => value.is_string(),
            FieldKind::NonEmptyString => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::NonNegativeInteger => value.is_u64(),
            FieldKind::Object => value.is_object(),
            FieldKind::StringMap => match value.as_object() {
                Some(map) => {
                    for (key, item) in map {
                        let path = format!("{}.{}", rule.path, key);
                        // keys with their own rule are checked by that rule
                        if self.has_rule(&path) || (item.is_null() && matches!(mode, Mode::Patch(_))) {
                            continue;
                        }
                        if !item.is_string() {
                            errors.push(path, "must be a string");
                        }
                    }
                    true
                }
                None => false,
            },
            FieldKind::LocationList => match value.as_array() {
                Some(items) if !items.is_empty() => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.as_str().is_some_and(|s| !s.trim().is_empty()) {
                            errors.push(
                                format!("{}[{}]", rule.path, i),
                                "must be a non-empty string",
                            );
                        } else if let Some(first) = items[..i].iter().position(|seen| seen == item) {
                            errors.push(
                                format!("{}[{}]", rule.path, i),
                                format!("repeats {}[{}]", rule.path, first),
                            );
                        }
                    }
                    true
                }
                _ => false,
            },
        };

        if !ok {
            errors.push(
                rule.path,
                format!("{} (got {})", rule.kind.describe(), json_type(value)),
            );
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
