//! Schema and duplicate-name checks over parsed commands.
//!
//! Every pass returns its own [`ValidationResult`]; callers combine them with
//! [`ValidationResult::merge`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::command::{Command, Scope, is_plain_name};
use crate::filesystem::{ScanReport, display_path};
use crate::frontmatter::{Metadata, MetadataValue, YamlDecoder, decode_block, extract};

const REQUIRED_FIELDS: [&str; 2] = ["name", "description"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub message: String,
    pub field: Option<String>,
    pub line_number: Option<usize>,
    pub severity: Severity,
}

impl ValidationError {
    pub fn error(message: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            message: message.into(),
            field: field.map(str::to_string),
            line_number: None,
            severity: Severity::Error,
        }
    }

    pub fn at_line(mut self, line_number: Option<usize>) -> Self {
        self.line_number = line_number;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.severity.as_str().to_uppercase())?;
        if let Some(field) = &self.field {
            write!(f, " field '{field}'")?;
        }
        if let Some(line) = self.line_number {
            write!(f, " at line {line}")?;
        }
        write!(f, " - {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, message: impl Into<String>, field: Option<&str>) {
        self.errors.push(ValidationError::error(message, field));
    }

    pub fn add_warning(&mut self, message: impl Into<String>, field: Option<&str>) {
        self.warnings.push(ValidationError {
            severity: Severity::Warning,
            ..ValidationError::error(message, field)
        });
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn format_errors(&self) -> String {
        if self.errors.is_empty() {
            return "No errors".to_string();
        }
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Check a built command: required text fields, scope, and the type rules
/// over its raw metadata.
pub fn validate(command: &Command) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (field, value) in [("name", &command.name), ("description", &command.description)] {
        match command.raw_metadata.get(field) {
            Some(raw) if raw.as_sequence().is_some() || raw.as_mapping().is_some() => {
                result.add_error(not_a_string_message(field, raw), Some(field));
            }
            _ if value.trim().is_empty() => result.add_error(
                format!("Required field '{field}' is missing or empty"),
                Some(field),
            ),
            _ => {}
        }
    }
    check_name_is_plain(&command.name, &mut result);
    if command.scope_kind().is_none() {
        result.add_error(invalid_scope_message(&command.scope), Some("scope"));
    }
    check_field_types(&command.raw_metadata, &mut result);

    result
}

/// Check a decoded metadata mapping before any command is built.
pub fn validate_metadata(metadata: &Metadata) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in REQUIRED_FIELDS {
        match metadata.get(field) {
            None | Some(MetadataValue::Null) => {
                result.add_error(format!("Required field '{field}' is missing"), Some(field));
            }
            Some(value) => match value.as_text() {
                Some(text) if text.trim().is_empty() => {
                    result.add_error(format!("Required field '{field}' is empty"), Some(field));
                }
                Some(text) if field == "name" => check_name_is_plain(&text, &mut result),
                Some(_) => {}
                None => result.add_error(not_a_string_message(field, value), Some(field)),
            },
        }
    }

    if let Some(scope) = metadata.get("scope") {
        let known = scope.as_str().and_then(Scope::parse).is_some();
        if !known {
            result.add_error(invalid_scope_message(&scope.to_string()), Some("scope"));
        }
    }
    check_field_types(metadata, &mut result);

    result
}

fn not_a_string_message(field: &str, value: &MetadataValue) -> String {
    format!("Field '{field}' must be a string, found {}", value.kind())
}

/// Names become file names in agent directories.
fn check_name_is_plain(name: &str, result: &mut ValidationResult) {
    if !name.trim().is_empty() && !is_plain_name(name) {
        result.add_error(
            format!("Command name '{name}' must not contain path separators or be '.' or '..'"),
            Some("name"),
        );
    }
}

fn invalid_scope_message(scope: &str) -> String {
    format!(
        "Invalid scope value '{scope}'. Must be one of: {}",
        Scope::valid_values().join(", ")
    )
}

fn check_field_types(metadata: &Metadata, result: &mut ValidationResult) {
    if let Some(arguments) = metadata.get("arguments") {
        match arguments.as_sequence() {
            None => result.add_error("Field 'arguments' must be a list", Some("arguments")),
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    match item.as_mapping() {
                        None => result.add_error(
                            format!("Argument at index {index} must be a mapping"),
                            Some("arguments"),
                        ),
                        Some(argument) if !argument.contains_key("name") => result.add_error(
                            format!("Argument at index {index} is missing 'name' field"),
                            Some("arguments"),
                        ),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    if let Some(shell_execution) = metadata.get("shell_execution")
        && shell_execution.as_flag().is_none()
    {
        result.add_error(
            "Field 'shell_execution' must be a boolean",
            Some("shell_execution"),
        );
    }

    if let Some(tags) = metadata.get("tags")
        && tags.as_sequence().is_none()
    {
        result.add_error("Field 'tags' must be a list", Some("tags"));
    }
}

/// Report names shared by more than one command in the same namespace.
///
/// One error per duplicated name, listing the source paths in input order.
pub fn check_duplicates(commands: &[Command]) -> ValidationResult {
    let mut groups: BTreeMap<(&str, &str), Vec<&Command>> = BTreeMap::new();
    for command in commands {
        groups
            .entry((command.namespace.as_str(), command.name.as_str()))
            .or_default()
            .push(command);
    }

    let mut result = ValidationResult::default();
    for ((namespace, name), members) in groups {
        if members.len() < 2 {
            continue;
        }
        let paths = members
            .iter()
            .map(|command| display_path(&command.source_path))
            .collect::<Vec<_>>()
            .join(", ");
        let scope = if namespace.is_empty() {
            "root namespace".to_string()
        } else {
            format!("namespace '{namespace}'")
        };
        result.add_error(
            format!("Duplicate command name '{name}' found in {scope}: {paths}"),
            Some("name"),
        );
    }
    result
}

/// Syntax check of a whole command file: a metadata block must exist and
/// decode. Line numbers refer to the file.
pub fn validate_frontmatter(content: &str) -> ValidationResult {
    let mut result = ValidationResult::default();
    let Some(block) = extract(content).metadata else {
        result
            .errors
            .push(ValidationError::error("No valid YAML frontmatter found", None).at_line(Some(1)));
        return result;
    };
    if let Err(error) = decode_block(&YamlDecoder, block) {
        result.errors.push(
            ValidationError::error(error.message.clone(), None).at_line(error.line),
        );
    }
    result
}

/// Full report for a scanned repository. Files the scanner skipped are
/// warnings; per-command schema errors (prefixed with the source path) and
/// duplicate names are errors.
pub fn validate_repository(report: &ScanReport) -> ValidationResult {
    let mut result = ValidationResult::default();

    for failure in &report.failures {
        result.warnings.push(ValidationError {
            severity: Severity::Warning,
            ..ValidationError::error(failure.message.clone(), None).at_line(failure.line)
        });
    }
    for warning in &report.warnings {
        result.add_warning(warning.clone(), None);
    }

    for command in &report.commands {
        let path = display_path(&command.source_path);
        let mut schema = validate(command);
        for error in schema.errors.iter_mut().chain(schema.warnings.iter_mut()) {
            error.message = format!("{path}: {}", error.message);
        }
        result.merge(schema);
    }

    result.merge(check_duplicates(&report.commands));
    result
}
