//! Metadata block extraction and decoding for command files.
//!
//! A command file starts with a `---` line, followed by a YAML block, a
//! closing `---` line and the body text. Extraction and decoding are kept
//! apart so any structured-text parser can stand in for YAML through
//! [`MetadataDecoder`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_yaml::Value;
use thiserror::Error;

/// Lines in front of the metadata block (the opening delimiter).
pub const METADATA_LINE_OFFSET: usize = 1;

const DELIMITER: &str = "---";

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<MetadataValue>),
    Mapping(Metadata),
}

impl MetadataValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Boolean flag. Besides real booleans this accepts the YAML 1.1 words
    /// (`yes`/`no`, `on`/`off` and their capitalized forms) that the YAML 1.2
    /// parser leaves as strings.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::String(value) => match value.as_str() {
                "yes" | "Yes" | "YES" | "on" | "On" | "ON" => Some(true),
                "no" | "No" | "NO" | "off" | "Off" | "OFF" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[MetadataValue]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Metadata> {
        match self {
            Self::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// Text form of a scalar. Null, sequences and mappings have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::String(_) => {
                Some(self.to_string())
            }
            Self::Null | Self::Sequence(_) | Self::Mapping(_) => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Sequence(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Mapping(mapping) => {
                f.write_str("{")?;
                for (index, (key, value)) in mapping.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Raw split of a command file. `metadata` keeps its line structure; `body`
/// is trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub metadata: Option<&'a str>,
    pub body: &'a str,
}

/// Split `content` into its metadata block and body.
///
/// The opening delimiter must be the very first line. The first later line
/// that is a bare `---` closes the block. Without both delimiters the whole
/// input is body and `metadata` is `None`.
pub fn extract(content: &str) -> Extracted<'_> {
    let no_block = Extracted {
        metadata: None,
        body: content.trim(),
    };

    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return no_block;
    };
    if !first.ends_with('\n') || !is_delimiter(first) {
        return no_block;
    }

    let block_start = first.len();
    let mut cursor = block_start;
    for line in lines {
        if is_delimiter(line) {
            let block = &content[block_start..cursor];
            let block = block
                .strip_suffix('\n')
                .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
                .unwrap_or(block);
            return Extracted {
                metadata: Some(block),
                body: content[cursor + line.len()..].trim(),
            };
        }
        cursor += line.len();
    }
    no_block
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == DELIMITER
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .line.map(|line| format!(" (line {line})")).unwrap_or_default())]
pub struct DecodeError {
    pub message: String,
    pub line: Option<usize>,
}

impl DecodeError {
    pub fn new(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    fn shifted(self, offset: usize) -> Self {
        Self {
            message: self.message,
            line: self.line.map(|line| line + offset),
        }
    }
}

/// Structured-text parser for metadata blocks.
///
/// Implementations report 1-based line numbers relative to the block text;
/// [`decode_block`] moves them onto file lines.
pub trait MetadataDecoder {
    fn decode(&self, text: &str) -> Result<Metadata, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDecoder;

impl MetadataDecoder for YamlDecoder {
    fn decode(&self, text: &str) -> Result<Metadata, DecodeError> {
        if text.trim().is_empty() {
            return Ok(Metadata::new());
        }
        let value: Value = serde_yaml::from_str(text).map_err(|err| {
            DecodeError::new(
                format!("invalid YAML syntax: {err}"),
                err.location().map(|location| location.line()),
            )
        })?;
        match value {
            Value::Null => Ok(Metadata::new()),
            Value::Mapping(mapping) => convert_mapping(mapping),
            Value::Tagged(tagged) => match tagged.value {
                Value::Mapping(mapping) => convert_mapping(mapping),
                other => Err(not_a_mapping(&other)),
            },
            other => Err(not_a_mapping(&other)),
        }
    }
}

fn not_a_mapping(value: &Value) -> DecodeError {
    let found = match value {
        Value::Sequence(_) => "a sequence",
        Value::String(_) | Value::Number(_) | Value::Bool(_) => "a scalar",
        _ => "an unsupported value",
    };
    DecodeError::new(
        format!("metadata block must be a key/value mapping, found {found}"),
        Some(1),
    )
}

fn convert_mapping(mapping: serde_yaml::Mapping) -> Result<Metadata, DecodeError> {
    let mut out = Metadata::new();
    for (key, value) in mapping {
        out.insert(convert_key(key)?, convert_value(value)?);
    }
    Ok(out)
}

fn convert_key(key: Value) -> Result<String, DecodeError> {
    match key {
        Value::String(key) => Ok(key),
        Value::Bool(key) => Ok(key.to_string()),
        Value::Number(key) => Ok(key.to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Tagged(tagged) => convert_key(tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => Err(DecodeError::new(
            "metadata keys must be scalars",
            None,
        )),
    }
}

fn convert_value(value: Value) -> Result<MetadataValue, DecodeError> {
    Ok(match value {
        Value::Null => MetadataValue::Null,
        Value::Bool(value) => MetadataValue::Bool(value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => MetadataValue::Integer(value),
            None => MetadataValue::Float(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(value) => MetadataValue::String(value),
        Value::Sequence(items) => MetadataValue::Sequence(
            items
                .into_iter()
                .map(convert_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Mapping(mapping) => MetadataValue::Mapping(convert_mapping(mapping)?),
        Value::Tagged(tagged) => convert_value(tagged.value)?,
    })
}

/// Decode an extracted block, reporting line numbers against the whole file.
pub fn decode_block<D>(decoder: &D, block: &str) -> Result<Metadata, DecodeError>
where
    D: MetadataDecoder + ?Sized,
{
    decoder
        .decode(block)
        .map_err(|err| err.shifted(METADATA_LINE_OFFSET))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub metadata: Metadata,
    pub body: String,
}

/// Extract and decode in one step. `Ok(None)` means the file has no
/// metadata block at all.
pub fn parse_document<D>(decoder: &D, content: &str) -> Result<Option<Document>, DecodeError>
where
    D: MetadataDecoder + ?Sized,
{
    let extracted = extract(content);
    let Some(block) = extracted.metadata else {
        return Ok(None);
    };
    let metadata = decode_block(decoder, block)?;
    Ok(Some(Document {
        metadata,
        body: extracted.body.to_string(),
    }))
}
