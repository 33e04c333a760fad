//! Parsing and validation pipeline for a central repository of agent command
//! files (markdown with a YAML metadata block).

pub mod command;
pub mod config;
pub mod filesystem;
pub mod frontmatter;
pub mod runtime;
pub mod sync;
pub mod validation;

pub use command::{Command, CommandArgument, Scope};
pub use filesystem::{ParseError, parse_one, scan};
pub use validation::{
    ValidationError, ValidationResult, check_duplicates, validate, validate_metadata,
};
