//! Front matter parsing for directory config files and content files.
//!
//! Three formats are recognized, selected by the first characters of the
//! text:
//!
//! | Leading text | Format |
//! |--------------|--------|
//! | `{`          | JSON object |
//! | `+++`        | TOML, closed by another `+++` line |
//! | `---`        | YAML, closed by another `---` (or `...`) line |
//!
//! A whole file (directory config) may also be bare YAML with no delimiter.
//! Values are always converted to `serde_json::Value` so the rest of the
//! pipeline handles a single representation.

use serde_json::Value;
use thiserror::Error;

/// Metadata as parsed from a config file or front matter block.
pub type MetaMap = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("front matter is not a mapping")]
    NotAMapping,
    #[error("unterminated {0} front matter block")]
    Unterminated(Format),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Format::Json => "JSON",
            Format::Yaml => "YAML",
            Format::Toml => "TOML",
        };
        f.write_str(name)
    }
}

/// Parse a whole file as metadata.
pub fn read_whole(text: &str) -> Result<(Format, MetaMap), FrontMatterError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)?;
        return Ok((Format::Json, into_map(value)?));
    }
    if trimmed.starts_with("+++") {
        let (meta, _) = split_block(trimmed, "+++", Format::Toml)?;
        return Ok((Format::Toml, parse_toml(meta)?));
    }
    Ok((Format::Yaml, parse_yaml(trimmed)?))
}

/// Split a content file into its front matter and body.
///
/// Returns `None` as format when the text carries no front matter, in which
/// case the body is the whole text.
pub fn read_partial(text: &str) -> Result<(Option<Format>, MetaMap, &str), FrontMatterError> {
    if text.starts_with('{') {
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
        let value = match stream.next() {
            Some(value) => value?,
            None => return Ok((None, MetaMap::new(), text)),
        };
        let body = &text[stream.byte_offset()..];
        return Ok((Some(Format::Json), into_map(value)?, skip_newline(body)));
    }

    match first_line(text) {
        "+++" => {
            let (meta, body) = split_block(text, "+++", Format::Toml)?;
            Ok((Some(Format::Toml), parse_toml(meta)?, body))
        }
        "---" => {
            let (meta, body) = split_block(text, "---", Format::Yaml)?;
            Ok((Some(Format::Yaml), parse_yaml(meta)?, body))
        }
        _ => Ok((None, MetaMap::new(), text)),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim_end()
}

fn skip_newline(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

/// Split `delim\n...\ndelim\nbody` into the enclosed block and the body.
fn split_block<'a>(
    text: &'a str,
    delim: &str,
    format: Format,
) -> Result<(&'a str, &'a str), FrontMatterError> {
    let mut offset = 0;
    let mut start = None;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end();
        match start {
            None => start = Some(offset + line.len()),
            Some(begin) => {
                let closes = content == delim || (format == Format::Yaml && content == "...");
                if closes {
                    return Ok((&text[begin..offset], &text[offset + line.len()..]));
                }
            }
        }
        offset += line.len();
    }
    Err(FrontMatterError::Unterminated(format))
}

fn parse_yaml(text: &str) -> Result<MetaMap, FrontMatterError> {
    if text.trim().is_empty() {
        return Ok(MetaMap::new());
    }
    let value: Value = serde_yaml::from_str(text)?;
    into_map(value)
}

fn parse_toml(text: &str) -> Result<MetaMap, FrontMatterError> {
    let value: toml::Value = toml::from_str(text)?;
    into_map(toml_to_json(value))
}

fn into_map(value: Value) -> Result<MetaMap, FrontMatterError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(MetaMap::new()),
        _ => Err(FrontMatterError::NotAMapping),
    }
}

/// Convert a TOML value to JSON, rendering datetimes as strings.
pub fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
