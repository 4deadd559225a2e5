//! Typed metadata fields and the per-page value container.
//!
//! A [`FieldDef`] declares one named attribute: its value type, whether it
//! is inherited from the parent index page, whether it is write-once, and a
//! default. Field declarations are grouped in a [`FieldTable`]; page types
//! compose their own table on top of the well-known fields of the metadata
//! registry.
//!
//! [`Meta`] holds the values of one page. Assignments go through the table:
//! values are cleaned to the declared type on the way in (a date string
//! becomes a normalized RFC 3339 timestamp, a bare string becomes a
//! one-element list, and so on), and a second assignment of a
//! [`FieldKind::Const`] field is refused.
//!
//! Inheritance is resolved by the graph, which knows where the parent index
//! page is; `Meta` itself only answers for its own values and defaults.

use crate::front_matter::MetaMap;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field '{0}' is write-once and is already set")]
    ConstReassigned(String),
    #[error("invalid value for field '{name}': {reason}")]
    InvalidValue { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unset means the declared default.
    Plain,
    /// Unset means the value of the parent index page.
    Inherited,
    /// May be assigned exactly once.
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Any,
    String,
    Bool,
    Integer,
    Date,
    StringList,
}

/// Declaration of a single metadata field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub ty: FieldType,
    pub default: Option<Value>,
    /// The value is a compound (list or object) rather than a scalar.
    pub structured: bool,
    /// Excluded from metadata dumps.
    pub internal: bool,
    pub doc: String,
}

impl FieldDef {
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Plain,
            ty,
            default: None,
            structured: matches!(ty, FieldType::StringList),
            internal: false,
            doc: String::new(),
        }
    }

    pub fn inherited(mut self) -> Self {
        self.kind = FieldKind::Inherited;
        self
    }

    pub fn constant(mut self) -> Self {
        self.kind = FieldKind::Const;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    pub fn is_inherited(&self) -> bool {
        self.kind == FieldKind::Inherited
    }

    /// Coerce a raw value to this field's type.
    pub fn clean(&self, value: Value) -> Result<Value, FieldError> {
        let invalid = |reason: &str| FieldError::InvalidValue {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        match self.ty {
            FieldType::Any => Ok(value),
            FieldType::String => match value {
                Value::String(_) => Ok(value),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(invalid("expected a string")),
            },
            FieldType::Bool => Ok(Value::Bool(truthy(&value))),
            FieldType::Integer => match &value {
                Value::Number(n) if n.is_i64() => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid("expected an integer")),
                _ => Err(invalid("expected an integer")),
            },
            FieldType::Date => match &value {
                Value::String(s) => parse_date(s)
                    .map(|dt| Value::String(format_date(&dt)))
                    .ok_or_else(|| invalid(&format!("unparsable date {s:?}"))),
                _ => Err(invalid("expected a date string")),
            },
            FieldType::StringList => match value {
                Value::String(s) => Ok(Value::Array(vec![Value::String(s)])),
                Value::Array(items) => Ok(Value::Array(
                    items
                        .into_iter()
                        .map(|v| match v {
                            Value::String(_) => v,
                            other => Value::String(other.to_string()),
                        })
                        .collect(),
                )),
                Value::Null => Ok(Value::Array(Vec::new())),
                _ => Err(invalid("expected a string or a list of strings")),
            },
        }
    }
}

/// Interpret a metadata value as a boolean.
///
/// Strings `yes`, `true`, `on` and `1` (any case) are true; everything else
/// that is not a true bool or a non-zero number is false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "true" | "on" | "1"
        ),
        _ => false,
    }
}

/// Parse RFC 3339 or `YYYY-MM-DD[ HH:MM[:SS]]`. Naive values are taken as UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical textual form of a date stored in metadata.
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A set of field declarations keyed by name.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: BTreeMap<String, Arc<FieldDef>>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration, replacing any previous one with the same name.
    pub fn add(&mut self, def: FieldDef) {
        self.fields.insert(def.name.clone(), Arc::new(def));
    }

    pub fn with(mut self, def: FieldDef) -> Self {
        self.add(def);
        self
    }

    /// A new table holding this table's fields plus (overriding) `other`'s.
    pub fn composed(&self, other: &FieldTable) -> FieldTable {
        let mut fields = self.fields.clone();
        for (name, def) in &other.fields {
            fields.insert(name.clone(), Arc::clone(def));
        }
        FieldTable { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name).map(|d| d.as_ref())
    }

    pub fn is_inherited(&self, name: &str) -> bool {
        self.get(name).is_some_and(FieldDef::is_inherited)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Metadata values of one page, checked against a field table.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    fields: Arc<FieldTable>,
    values: BTreeMap<String, Value>,
}

impl Meta {
    pub fn new(fields: Arc<FieldTable>) -> Self {
        Self {
            fields,
            values: BTreeMap::new(),
        }
    }

    /// Build from raw values, cleaning each through the table.
    pub fn from_map(fields: Arc<FieldTable>, raw: MetaMap) -> Result<Self, FieldError> {
        let mut meta = Self::new(fields);
        for (name, value) in raw {
            meta.set(&name, value)?;
        }
        Ok(meta)
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    /// Assign a value. Unknown names are stored unchecked.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let value = match self.fields.get(name) {
            Some(def) => {
                if def.kind == FieldKind::Const && self.values.contains_key(name) {
                    return Err(FieldError::ConstReassigned(name.to_string()));
                }
                def.clean(value)?
            }
            None => value,
        };
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// The value set on this page, ignoring defaults and inheritance.
    pub fn get_own(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value set on this page, or the declared default.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .get(name)
            .or_else(|| self.fields.get(name).and_then(|d| d.default.as_ref()))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn bool(&self, name: &str) -> bool {
        self.get(name).is_some_and(truthy)
    }

    pub fn date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.str(name).and_then(parse_date)
    }

    pub fn string_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Own values, minus internal fields.
    pub fn public_map(&self) -> MetaMap {
        self.values
            .iter()
            .filter(|(name, _)| !self.fields.get(name).is_some_and(|d| d.internal))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Arc<FieldTable> {
        Arc::new(
            FieldTable::new()
                .with(FieldDef::new("title", FieldType::String))
                .with(FieldDef::new("author", FieldType::String).inherited())
                .with(FieldDef::new("date", FieldType::Date))
                .with(FieldDef::new("draft", FieldType::Bool).with_default(json!(false)))
                .with(FieldDef::new("tags", FieldType::StringList))
                .with(FieldDef::new("weight", FieldType::Integer))
                .with(
                    FieldDef::new("build_path", FieldType::String)
                        .constant()
                        .internal(),
                ),
        )
    }

    // =========================================================================
    // Cleaning
    // =========================================================================

    #[test]
    fn date_string_is_normalized() {
        let mut meta = Meta::new(table());
        meta.set("date", json!("2024-05-01 10:30")).unwrap();
        assert_eq!(meta.str("date"), Some("2024-05-01T10:30:00Z"));
    }

    #[test]
    fn unparsable_date_is_an_error() {
        let mut meta = Meta::new(table());
        let err = meta.set("date", json!("next tuesday")).unwrap_err();
        assert!(matches!(err, FieldError::InvalidValue { .. }));
    }

    #[test]
    fn bool_coerces_strings() {
        let mut meta = Meta::new(table());
        meta.set("draft", json!("yes")).unwrap();
        assert!(meta.bool("draft"));
        meta.set("draft", json!("no")).unwrap();
        assert!(!meta.bool("draft"));
    }

    #[test]
    fn bare_string_becomes_list() {
        let mut meta = Meta::new(table());
        meta.set("tags", json!("rust")).unwrap();
        assert_eq!(meta.string_list("tags"), vec!["rust"]);
    }

    #[test]
    fn integer_from_string() {
        let mut meta = Meta::new(table());
        meta.set("weight", json!(" 12 ")).unwrap();
        assert_eq!(meta.get("weight"), Some(&json!(12)));
    }

    #[test]
    fn unknown_fields_are_stored_unchecked() {
        let mut meta = Meta::new(table());
        meta.set("custom", json!({"a": 1})).unwrap();
        assert_eq!(meta.get("custom"), Some(&json!({"a": 1})));
    }

    // =========================================================================
    // Kinds
    // =========================================================================

    #[test]
    fn const_field_is_write_once() {
        let mut meta = Meta::new(table());
        meta.set("build_path", json!("a/index.html")).unwrap();
        let err = meta.set("build_path", json!("b/index.html")).unwrap_err();
        assert_eq!(err, FieldError::ConstReassigned("build_path".into()));
        assert_eq!(meta.str("build_path"), Some("a/index.html"));
    }

    #[test]
    fn unset_plain_field_returns_default() {
        let meta = Meta::new(table());
        assert_eq!(meta.get("draft"), Some(&json!(false)));
        assert_eq!(meta.get_own("draft"), None);
    }

    #[test]
    fn public_map_skips_internal_fields() {
        let mut meta = Meta::new(table());
        meta.set("title", json!("T")).unwrap();
        meta.set("build_path", json!("index.html")).unwrap();
        let public = meta.public_map();
        assert!(public.contains_key("title"));
        assert!(!public.contains_key("build_path"));
    }

    #[test]
    fn composed_table_overrides() {
        let base = FieldTable::new().with(FieldDef::new("x", FieldType::String));
        let extra = FieldTable::new().with(FieldDef::new("x", FieldType::Bool));
        let table = base.composed(&extra);
        assert_eq!(table.get("x").unwrap().ty, FieldType::Bool);
        assert_eq!(table.len(), 1);
    }

    // =========================================================================
    // Dates
    // =========================================================================

    #[test]
    fn parse_date_variants() {
        assert!(parse_date("2024-01-02").is_some());
        assert!(parse_date("2024-01-02 03:04:05").is_some());
        assert!(parse_date("2024-01-02T03:04:05+02:00").is_some());
        assert!(parse_date("2024-01-02 03:04:05 +0200").is_some());
        assert!(parse_date("02/01/2024").is_none());
    }

    #[test]
    fn offset_dates_convert_to_utc() {
        let dt = parse_date("2024-01-02T03:00:00+02:00").unwrap();
        assert_eq!(format_date(&dt), "2024-01-02T01:00:00Z");
    }
}
