//! Canonical command model and the builder that maps decoded metadata onto it.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::frontmatter::{Metadata, MetadataValue};

pub const COMMANDS_DIR: &str = "commands";
pub const DEFAULT_SCOPE: &str = "user";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    User,
    Project,
    All,
}

impl Scope {
    pub const VALUES: [Scope; 3] = [Scope::User, Scope::Project, Scope::All];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::VALUES
            .into_iter()
            .find(|scope| scope.as_str() == value)
    }

    /// Valid scope names in sorted order, for diagnostics.
    pub fn valid_values() -> Vec<&'static str> {
        let mut values: Vec<&'static str> = Self::VALUES.iter().map(|scope| scope.as_str()).collect();
        values.sort_unstable();
        values
    }

    /// Whether a command or request with this scope reaches deployment `level`.
    pub fn includes(self, level: Scope) -> bool {
        self == Scope::All || level == Scope::All || self == level
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value.trim()).ok_or_else(|| {
            format!(
                "invalid scope '{value}'; expected one of: {}",
                Self::valid_values().join(", ")
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandArgument {
    pub name: String,
    pub required: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub name: String,
    pub description: String,
    /// Declared scope as written. Unrecognized values are kept so validation
    /// can report them; see [`Command::scope_kind`].
    pub scope: String,
    pub body: String,
    pub source_path: PathBuf,
    pub namespace: String,
    pub arguments: Option<Vec<CommandArgument>>,
    pub shell_execution: bool,
    pub tags: Option<Vec<String>>,
    pub modified_at: SystemTime,
    pub content_hash: String,
    pub raw_metadata: Metadata,
}

impl Command {
    pub fn scope_kind(&self) -> Option<Scope> {
        Scope::parse(&self.scope)
    }

    /// `namespace/name`, or just `name` in the root namespace.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

/// File facts captured when the source was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub modified_at: SystemTime,
    pub content_hash: String,
}

impl FileStamp {
    pub fn unknown() -> Self {
        Self {
            modified_at: UNIX_EPOCH,
            content_hash: String::new(),
        }
    }
}

/// Map decoded metadata onto a [`Command`] without judging field values.
///
/// Missing or non-scalar `name`/`description` become empty strings and a
/// missing `scope` becomes `user`. `arguments` and `tags` stay `None` unless declared as
/// sequences; the full mapping is kept in `raw_metadata` either way.
pub fn build_command(
    metadata: Metadata,
    body: impl Into<String>,
    source_path: &Path,
    repo_root: Option<&Path>,
    stamp: FileStamp,
) -> Command {
    let scope = match metadata.get("scope") {
        None | Some(MetadataValue::Null) => DEFAULT_SCOPE.to_string(),
        Some(value) => value.to_string(),
    };

    Command {
        name: text_field(&metadata, "name"),
        description: text_field(&metadata, "description"),
        scope,
        body: body.into(),
        source_path: source_path.to_path_buf(),
        namespace: derive_namespace(source_path, repo_root),
        arguments: arguments_field(&metadata),
        shell_execution: metadata
            .get("shell_execution")
            .and_then(MetadataValue::as_flag)
            .unwrap_or(false),
        tags: tags_field(&metadata),
        modified_at: stamp.modified_at,
        content_hash: stamp.content_hash,
        raw_metadata: metadata,
    }
}

fn text_field(metadata: &Metadata, key: &str) -> String {
    metadata
        .get(key)
        .and_then(MetadataValue::as_text)
        .unwrap_or_default()
}

fn arguments_field(metadata: &Metadata) -> Option<Vec<CommandArgument>> {
    let items = metadata.get("arguments")?.as_sequence()?;
    Some(
        items
            .iter()
            .filter_map(MetadataValue::as_mapping)
            .map(|argument| CommandArgument {
                name: text_field(argument, "name"),
                required: argument.get("required").and_then(MetadataValue::as_bool),
                description: argument
                    .get("description")
                    .and_then(MetadataValue::as_text),
            })
            .collect(),
    )
}

fn tags_field(metadata: &Metadata) -> Option<Vec<String>> {
    let items = metadata.get("tags")?.as_sequence()?;
    Some(items.iter().filter_map(MetadataValue::as_text).collect())
}

/// Whether `name` can be used as a file name inside an agent directory.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Namespace of a command file: the directories between `commands/` and the
/// file, joined with `/`.
///
/// With a repository root the path is taken relative to `<root>/commands`;
/// a file outside it has the root namespace. Without a root, the first
/// `commands` segment of the path marks the start.
pub fn derive_namespace(source_path: &Path, repo_root: Option<&Path>) -> String {
    match repo_root {
        Some(root) => match source_path.strip_prefix(root.join(COMMANDS_DIR)) {
            Ok(relative) => {
                let segments = normal_segments(relative);
                join_parent_segments(&segments)
            }
            Err(_) => String::new(),
        },
        None => {
            let segments = normal_segments(source_path);
            match segments.iter().position(|segment| segment == COMMANDS_DIR) {
                Some(index) => join_parent_segments(&segments[index + 1..]),
                None => String::new(),
            }
        }
    }
}

fn normal_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn join_parent_segments(segments: &[String]) -> String {
    match segments.split_last() {
        Some((_, parents)) => parents.join("/"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{
        CommandArgument, FileStamp, Scope, build_command, derive_namespace, is_plain_name,
    };
    use crate::frontmatter::{MetadataDecoder, YamlDecoder};

    #[test]
    fn namespace_from_nested_directories() {
        let root = Path::new("/repo");
        assert_eq!(
            derive_namespace(Path::new("/repo/commands/docker/compose/up.md"), Some(root)),
            "docker/compose"
        );
        assert_eq!(
            derive_namespace(Path::new("/repo/commands/test.md"), Some(root)),
            ""
        );
    }

    #[test]
    fn namespace_outside_commands_dir_is_root() {
        assert_eq!(
            derive_namespace(Path::new("/elsewhere/git/commit.md"), Some(Path::new("/repo"))),
            ""
        );
    }

    #[test]
    fn namespace_without_root_uses_commands_segment() {
        assert_eq!(
            derive_namespace(Path::new("/tmp/x/commands/git/commit.md"), None),
            "git"
        );
        assert_eq!(derive_namespace(Path::new("/tmp/x/commands/commit.md"), None), "");
        assert_eq!(derive_namespace(Path::new("/tmp/x/git/commit.md"), None), "");
    }

    #[test]
    fn builder_applies_defaults() {
        let metadata = YamlDecoder
            .decode("name: X\ndescription: Y\n")
            .expect("decode");
        let command = build_command(
            metadata,
            "body",
            Path::new("/repo/commands/x.md"),
            Some(Path::new("/repo")),
            FileStamp::unknown(),
        );
        assert_eq!(command.name, "X");
        assert_eq!(command.description, "Y");
        assert_eq!(command.scope, "user");
        assert_eq!(command.scope_kind(), Some(Scope::User));
        assert!(!command.shell_execution);
        assert!(command.arguments.is_none());
        assert!(command.tags.is_none());
        assert_eq!(command.qualified_name(), "X");
    }

    #[test]
    fn builder_maps_all_fields() {
        let metadata = YamlDecoder
            .decode(
                "name: build\ndescription: Build a docker image\nscope: project\narguments:\n  - name: tag\n    required: true\n    description: Image tag\nshell_execution: true\ntags: [docker, build]\nowner: infra\n",
            )
            .expect("decode");
        let command = build_command(
            metadata,
            "Build docker image",
            Path::new("/repo/commands/docker/build.md"),
            Some(Path::new("/repo")),
            FileStamp::unknown(),
        );
        assert_eq!(command.namespace, "docker");
        assert_eq!(command.qualified_name(), "docker/build");
        assert_eq!(command.scope_kind(), Some(Scope::Project));
        assert!(command.shell_execution);
        assert_eq!(
            command.arguments,
            Some(vec![CommandArgument {
                name: "tag".to_string(),
                required: Some(true),
                description: Some("Image tag".to_string()),
            }])
        );
        assert_eq!(
            command.tags,
            Some(vec!["docker".to_string(), "build".to_string()])
        );
        assert!(command.raw_metadata.contains_key("owner"));
        assert_eq!(command.source_path, PathBuf::from("/repo/commands/docker/build.md"));
    }

    #[test]
    fn builder_keeps_unrecognized_scope() {
        let metadata = YamlDecoder.decode("scope: galaxy\n").expect("decode");
        let command = build_command(
            metadata,
            "",
            Path::new("/repo/commands/x.md"),
            None,
            FileStamp::unknown(),
        );
        assert_eq!(command.scope, "galaxy");
        assert_eq!(command.scope_kind(), None);
        assert_eq!(command.name, "");
    }

    #[test]
    fn scope_parsing_and_inclusion() {
        assert_eq!("project".parse::<Scope>(), Ok(Scope::Project));
        let error = "galaxy".parse::<Scope>().expect_err("must fail");
        assert!(error.contains("all, project, user"));
        assert!(Scope::All.includes(Scope::Project));
        assert!(Scope::User.includes(Scope::All));
        assert!(!Scope::User.includes(Scope::Project));
        assert_eq!(Scope::default(), Scope::User);
    }

    #[test]
    fn builder_blanks_structured_text_fields() {
        let metadata = YamlDecoder
            .decode("name: [a, b]\ndescription: {x: 1}\nshell_execution: yes\n")
            .expect("decode");
        let command = build_command(
            metadata,
            "",
            Path::new("/repo/commands/x.md"),
            None,
            FileStamp::unknown(),
        );
        assert_eq!(command.name, "");
        assert_eq!(command.description, "");
        assert!(command.shell_execution);
    }

    #[test]
    fn plain_names_stay_inside_a_directory() {
        assert!(is_plain_name("commit"));
        assert!(is_plain_name("v1.2"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("../escape"));
        assert!(!is_plain_name("git/commit"));
        assert!(!is_plain_name("a\\b"));
    }
}
