use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::command::{COMMANDS_DIR, Command, FileStamp, build_command};
use crate::frontmatter::{DecodeError, MetadataDecoder, YamlDecoder, parse_document};
use crate::runtime::{CONFIG_DIR, SYNCIGNORE_FILENAME};

pub const COMMAND_FILE_EXTENSION: &str = "md";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub respect_syncignore: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            respect_syncignore: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid metadata in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFailureKind {
    Io,
    Decode,
    MissingFrontmatter,
}

impl ScanFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Decode => "decode",
            Self::MissingFrontmatter => "missing_frontmatter",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub kind: ScanFailureKind,
    pub message: String,
    pub line: Option<usize>,
}

impl From<ParseError> for ScanFailure {
    fn from(error: ParseError) -> Self {
        let message = error.to_string();
        match error {
            ParseError::Io { path, .. } => Self {
                path,
                kind: ScanFailureKind::Io,
                message,
                line: None,
            },
            ParseError::Decode { path, source } => Self {
                path,
                kind: ScanFailureKind::Decode,
                message,
                line: source.line,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub commands: Vec<Command>,
    pub failures: Vec<ScanFailure>,
    pub ignored: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStats {
    pub total_commands: usize,
    pub failures: usize,
    pub ignored: usize,
    pub by_namespace: BTreeMap<String, usize>,
}

/// Parse one command file with the YAML decoder.
///
/// `Ok(None)` means the file has no metadata block. `repo_root` anchors
/// namespace detection; without it the path itself is searched for a
/// `commands` directory.
pub fn parse_one(path: &Path, repo_root: Option<&Path>) -> Result<Option<Command>, ParseError> {
    parse_one_with(&YamlDecoder, path, repo_root)
}

pub fn parse_one_with<D>(
    decoder: &D,
    path: &Path,
    repo_root: Option<&Path>,
) -> Result<Option<Command>, ParseError>
where
    D: MetadataDecoder + ?Sized,
{
    let io_error = |source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = fs::read_to_string(path).map_err(io_error)?;
    let modified_at = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(io_error)?;

    let document = parse_document(decoder, &content).map_err(|source| ParseError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(document) = document else {
        return Ok(None);
    };

    Ok(Some(build_command(
        document.metadata,
        document.body,
        path,
        repo_root,
        FileStamp {
            modified_at,
            content_hash: compute_hash(&content),
        },
    )))
}

/// Every successfully parsed command under `<repo_root>/commands`.
/// Per-file failures are logged and dropped; use [`scan_repository`] to see them.
pub fn scan(repo_root: &Path) -> Vec<Command> {
    scan_repository(repo_root, &ScanOptions::default()).commands
}

pub fn scan_repository(repo_root: &Path, options: &ScanOptions) -> ScanReport {
    scan_repository_with(&YamlDecoder, repo_root, options)
}

/// Walk `<repo_root>/commands` and parse every command file.
///
/// A missing commands directory yields an empty report. No single file can
/// fail the scan: unreadable files, decode errors and files without a
/// metadata block land in `failures`.
pub fn scan_repository_with<D>(decoder: &D, repo_root: &Path, options: &ScanOptions) -> ScanReport
where
    D: MetadataDecoder + ?Sized,
{
    let mut report = ScanReport::default();
    let commands_dir = repo_root.join(COMMANDS_DIR);
    if !commands_dir.is_dir() {
        debug!(path = %commands_dir.display(), "commands directory missing; nothing to scan");
        return report;
    }

    let rules = if options.respect_syncignore {
        let (rules, warnings) =
            IgnoreRules::load(&repo_root.join(CONFIG_DIR).join(SYNCIGNORE_FILENAME));
        report.warnings.extend(warnings);
        rules
    } else {
        IgnoreRules::default()
    };

    let mut ignored = Vec::new();
    let walker = WalkDir::new(&commands_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Ok(relative) = entry.path().strip_prefix(&commands_dir) else {
                return true;
            };
            if rules.is_ignored(relative, entry.file_type().is_dir()) {
                debug!(path = %entry.path().display(), "skipping ignored path");
                ignored.push(entry.path().to_path_buf());
                return false;
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| commands_dir.clone());
                warn!(path = %path.display(), error = %err, "failed to walk command directory");
                report.failures.push(ScanFailure {
                    message: format!("failed to walk {}: {err}", path.display()),
                    path,
                    kind: ScanFailureKind::Io,
                    line: None,
                });
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(COMMAND_FILE_EXTENSION) {
            continue;
        }
        // Linked files count; a dangling link surfaces as an io failure.
        let is_candidate = entry.file_type().is_file()
            || (entry.path_is_symlink() && !path.is_dir());
        if !is_candidate {
            continue;
        }

        match parse_one_with(decoder, path, Some(repo_root)) {
            Ok(Some(command)) => {
                debug!(
                    path = %path.display(),
                    command = %command.qualified_name(),
                    "parsed command"
                );
                report.commands.push(command);
            }
            Ok(None) => {
                warn!(path = %path.display(), "skipping file without metadata block");
                report.failures.push(ScanFailure {
                    path: path.to_path_buf(),
                    kind: ScanFailureKind::MissingFrontmatter,
                    message: format!("no metadata block found in {}", path.display()),
                    line: Some(1),
                });
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unparsable command file");
                report.failures.push(ScanFailure::from(error));
            }
        }
    }

    report.ignored = ignored;
    report
        .commands
        .sort_by(|left, right| left.source_path.cmp(&right.source_path));
    report
}

pub fn scan_stats(report: &ScanReport) -> ScanStats {
    let mut by_namespace: BTreeMap<String, usize> = BTreeMap::new();
    for command in &report.commands {
        *by_namespace.entry(command.namespace.clone()).or_insert(0) += 1;
    }
    ScanStats {
        total_commands: report.commands.len(),
        failures: report.failures.len(),
        ignored: report.ignored.len(),
        by_namespace,
    }
}

/// Exclusion patterns from `_config/.syncignore`, a subset of gitignore.
///
/// A pattern without `/` matches any single path component; a pattern with
/// `/` matches the path relative to `commands/`; a trailing `/` limits the
/// pattern to directories.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: Pattern,
    directory_only: bool,
    anchored: bool,
}

impl IgnoreRules {
    /// Missing file means no rules. Read failures become warnings.
    pub fn load(path: &Path) -> (Self, Vec<String>) {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (Self::default(), Vec::new()),
            Err(err) => (
                Self::default(),
                vec![format!("failed to read {}: {err}", path.display())],
            ),
        }
    }

    pub fn parse(content: &str) -> (Self, Vec<String>) {
        let mut rules = Vec::new();
        let mut warnings = Vec::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                warnings.push(format!(
                    "{SYNCIGNORE_FILENAME}:{}: negated patterns are not supported: {line}",
                    index + 1
                ));
                continue;
            }

            let directory_only = line.ends_with('/');
            let body = line.trim_end_matches('/');
            let body = body.strip_prefix('/').unwrap_or(body);
            if body.is_empty() {
                continue;
            }
            match Pattern::new(body) {
                Ok(pattern) => rules.push(IgnoreRule {
                    pattern,
                    directory_only,
                    anchored: body.contains('/') || line.starts_with('/'),
                }),
                Err(err) => {
                    warn!(pattern = line, error = %err, "ignoring invalid syncignore pattern");
                    warnings.push(format!(
                        "{SYNCIGNORE_FILENAME}:{}: invalid pattern `{line}`: {err}",
                        index + 1
                    ));
                }
            }
        }

        (Self { rules }, warnings)
    }

    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        let relative_text = display_path(relative);
        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative_text.clone());
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        self.rules.iter().any(|rule| {
            if rule.directory_only && !is_dir {
                return false;
            }
            if rule.anchored {
                rule.pattern.matches_with(&relative_text, options)
            } else {
                rule.pattern.matches_with(&name, options)
            }
        })
    }
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Path text with `/` separators on every platform.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        IgnoreRules, ScanFailureKind, ScanOptions, parse_one, scan, scan_repository, scan_stats,
    };

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, content).expect("write command file");
    }

    #[test]
    fn scan_without_commands_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let report = scan_repository(temp.path(), &ScanOptions::default());
        assert!(report.commands.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn scan_finds_commands_across_namespaces() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "commands/git/commit.md", "---\nname: commit\n---\nBody");
        write(root, "commands/git/push.md", "---\nname: push\n---\nBody");
        write(root, "commands/docker/build.md", "---\nname: build\n---\nBody");
        write(root, "commands/notes.txt", "---\nname: ignored\n---\n");

        let commands = scan(root);
        let mut names: Vec<&str> = commands.iter().map(|command| command.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["build", "commit", "push"]);
        let build = commands
            .iter()
            .find(|command| command.name == "build")
            .expect("build command");
        assert_eq!(build.namespace, "docker");
    }

    #[test]
    fn scan_reports_per_file_failures_without_aborting() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(
            root,
            "commands/git/commit.md",
            "---\nname: commit\ndescription: Create a git commit\n---\nBody",
        );
        write(root, "commands/broken.md", "---\nname: \"test\n---\nBody");
        write(root, "commands/plain.md", "Just text, no metadata.");
        write(root, "commands/empty.md", "---\n---\nOnly body");

        let report = scan_repository(root, &ScanOptions::default());
        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.failures.len(), 2);

        let decode = report
            .failures
            .iter()
            .find(|failure| failure.kind == ScanFailureKind::Decode)
            .expect("decode failure");
        assert!(decode.path.ends_with("broken.md"));
        assert!(decode.line.is_some_and(|line| line >= 1));

        let missing = report
            .failures
            .iter()
            .find(|failure| failure.kind == ScanFailureKind::MissingFrontmatter)
            .expect("missing frontmatter failure");
        assert!(missing.path.ends_with("plain.md"));

        let empty = report
            .commands
            .iter()
            .find(|command| command.body == "Only body")
            .expect("empty metadata command");
        assert_eq!(empty.name, "");
        assert_eq!(empty.description, "");
        assert_eq!(empty.scope, "user");
    }

    #[test]
    fn scan_is_repeatable() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "commands/b.md", "---\nname: b\ndescription: B\n---\nbee");
        write(root, "commands/a/x.md", "---\nname: x\ndescription: X\n---\nex");
        write(root, "commands/a/y.md", "---\nname: y\ndescription: Y\n---\nwhy");

        let summarize = || {
            scan(root)
                .into_iter()
                .map(|command| (command.namespace, command.name, command.body))
                .collect::<Vec<_>>()
        };
        assert_eq!(summarize(), summarize());
    }

    #[test]
    fn scan_honors_syncignore() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(
            root,
            "_config/.syncignore",
            "# comment\n.*\n*.bak.md\ndrafts/\ngit/wip.md\n",
        );
        write(root, "commands/git/commit.md", "---\nname: commit\n---\n");
        write(root, "commands/git/wip.md", "---\nname: wip\n---\n");
        write(root, "commands/.hidden.md", "---\nname: hidden\n---\n");
        write(root, "commands/old.bak.md", "---\nname: old\n---\n");
        write(root, "commands/drafts/idea.md", "---\nname: idea\n---\n");

        let report = scan_repository(root, &ScanOptions::default());
        let names: Vec<&str> = report
            .commands
            .iter()
            .map(|command| command.name.as_str())
            .collect();
        assert_eq!(names, vec!["commit"]);
        assert_eq!(report.ignored.len(), 4);

        let unfiltered = scan_repository(
            root,
            &ScanOptions {
                respect_syncignore: false,
            },
        );
        assert_eq!(unfiltered.commands.len(), 5);
    }

    #[test]
    fn ignore_rules_warn_on_unsupported_patterns() {
        let (rules, warnings) = IgnoreRules::parse("!keep.md\n[\n*.tmp\n");
        assert_eq!(warnings.len(), 2);
        assert!(rules.is_ignored(Path::new("a/b.tmp"), false));
        assert!(!rules.is_ignored(Path::new("a/b.md"), false));
    }

    #[test]
    fn directory_only_rule_skips_files() {
        let (rules, _) = IgnoreRules::parse("scratch/\n");
        assert!(rules.is_ignored(Path::new("git/scratch"), true));
        assert!(!rules.is_ignored(Path::new("git/scratch"), false));
    }

    #[test]
    fn parse_one_outside_repository_uses_path_segments() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("commands").join("git").join("commit.md");
        write(
            temp.path(),
            "commands/git/commit.md",
            "---\nname: commit\ndescription: Commit\n---\n\n# Commit\n\nbody\n",
        );

        let command = parse_one(&path, None).expect("parse").expect("command");
        assert_eq!(command.namespace, "git");
        assert_eq!(command.source_path, path);
        assert_eq!(command.body, "# Commit\n\nbody");
        assert_eq!(command.content_hash.len(), 64);
    }

    #[test]
    fn parse_one_captures_modification_time() {
        let temp = tempdir().expect("tempdir");
        write(temp.path(), "test.md", "---\nname: test\ndescription: Test\n---\n\nBody\n");
        let path = temp.path().join("test.md");

        let command = parse_one(&path, None).expect("parse").expect("command");
        let on_disk = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .expect("mtime");
        assert_eq!(command.modified_at, on_disk);
        assert_eq!(command.namespace, "");
    }

    #[test]
    fn parse_one_missing_file_is_io_error() {
        let temp = tempdir().expect("tempdir");
        let error = parse_one(&temp.path().join("nope.md"), None).expect_err("must fail");
        assert!(error.to_string().contains("failed to read"));
    }

    #[test]
    fn stats_group_by_namespace() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "commands/git/commit.md", "---\nname: commit\n---\n");
        write(root, "commands/git/push.md", "---\nname: push\n---\n");
        write(root, "commands/top.md", "---\nname: top\n---\n");
        write(root, "commands/bad.md", "no metadata");

        let report = scan_repository(root, &ScanOptions::default());
        let stats = scan_stats(&report);
        assert_eq!(stats.total_commands, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(
            stats.by_namespace,
            BTreeMap::from([(String::new(), 1), ("git".to_string(), 2)])
        );
    }

    #[cfg(unix)]
    #[test]
    fn scan_follows_linked_command_files() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        write(
            root,
            "shared/commit.md",
            "---\nname: commit\ndescription: Commit\n---\nBody",
        );
        fs::create_dir_all(root.join("commands/git")).expect("create namespace");
        symlink(
            root.join("shared/commit.md"),
            root.join("commands/git/commit.md"),
        )
        .expect("link command");
        symlink(
            root.join("shared/missing.md"),
            root.join("commands/git/dangling.md"),
        )
        .expect("link dangling");

        let report = scan_repository(root, &ScanOptions::default());
        assert_eq!(report.commands.len(), 1);
        assert_eq!(report.commands[0].name, "commit");
        assert_eq!(report.commands[0].namespace, "git");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ScanFailureKind::Io);
        assert!(report.failures[0].path.ends_with("dangling.md"));
    }
}
