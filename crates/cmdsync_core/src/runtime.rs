use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::command::COMMANDS_DIR;
use crate::filesystem::display_path;

pub const CONFIG_DIR: &str = "_config";
pub const FRAMEWORKS_DIR: &str = "_frameworks";
pub const SYNC_CONFIG_FILENAME: &str = "sync-config.yaml";
pub const SYNCIGNORE_FILENAME: &str = ".syncignore";

pub const REPO_ROOT_ENV: &str = "CMDSYNC_REPO_ROOT";
pub const CONFIG_ENV: &str = "CMDSYNC_CONFIG";

pub const DEFAULT_SYNC_CONFIG: &str = r#"# Sync Engine Configuration
# Agent target paths and the default deployment scope.

agents:
  claudecode:
    enabled: true
    user_path: "~/.claude/commands"
    project_path: "./.claude/commands"

  codex:
    enabled: true
    user_path: "~/.codex/prompts"
    # Codex only supports user-level commands

  gemini:
    enabled: true
    user_path: "~/.gemini/commands"
    project_path: "./.gemini/commands"

# Default deployment scope: user, project, or all
default_scope: "all"
"#;

pub const DEFAULT_SYNCIGNORE: &str = r#"# Sync Engine Ignore Patterns
# Glob patterns, similar to .gitignore. Paths are relative to commands/.

# Hidden files
.*

# Backup files
*.bak
*.tmp
*~

# OS-specific files
.DS_Store
Thumbs.db

# Editor files
*.swp
*.swo
.vscode/
.idea/
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub repo_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub repo_root: PathBuf,
    pub commands_dir: PathBuf,
    pub config_dir: PathBuf,
    pub frameworks_dir: PathBuf,
    pub sync_config_path: PathBuf,
    pub syncignore_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Layout for a known root, with the default config location.
    pub fn for_root(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let config_dir = repo_root.join(CONFIG_DIR);
        Self {
            commands_dir: repo_root.join(COMMANDS_DIR),
            frameworks_dir: repo_root.join(FRAMEWORKS_DIR),
            sync_config_path: config_dir.join(SYNC_CONFIG_FILENAME),
            syncignore_path: config_dir.join(SYNCIGNORE_FILENAME),
            config_dir,
            repo_root,
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "repo_root={} ({})\ncommands_dir={}\nconfig_dir={}\nframeworks_dir={}\nsync_config_path={} ({})\nsyncignore_path={}",
            display_path(&self.repo_root),
            self.root_source.as_str(),
            display_path(&self.commands_dir),
            display_path(&self.config_dir),
            display_path(&self.frameworks_dir),
            display_path(&self.sync_config_path),
            self.config_source.as_str(),
            display_path(&self.syncignore_path),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryStatus {
    pub repo_root_exists: bool,
    pub commands_exists: bool,
    pub config_dir_exists: bool,
    pub frameworks_exists: bool,
    pub sync_config_exists: bool,
    pub syncignore_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_repository(paths: &ResolvedPaths) -> RepositoryStatus {
    let repo_root_exists = paths.repo_root.is_dir();
    let commands_exists = paths.commands_dir.is_dir();
    let config_dir_exists = paths.config_dir.is_dir();
    let frameworks_exists = paths.frameworks_dir.is_dir();
    let sync_config_exists = paths.sync_config_path.is_file();
    let syncignore_exists = paths.syncignore_path.is_file();

    let mut warnings = Vec::new();
    if !commands_exists {
        warnings.push("commands/ is missing; run `cmdsync init` to create the layout".to_string());
    }
    if !sync_config_exists {
        warnings.push(format!(
            "{SYNC_CONFIG_FILENAME} is missing; built-in agent defaults apply"
        ));
    }
    if !syncignore_exists {
        warnings.push(format!(
            "{CONFIG_DIR}/{SYNCIGNORE_FILENAME} is missing; no files are excluded from scans"
        ));
    }

    RepositoryStatus {
        repo_root_exists,
        commands_exists,
        config_dir_exists,
        frameworks_exists,
        sync_config_exists,
        syncignore_exists,
        warnings,
    }
}

pub fn ensure_repository_ready(paths: &ResolvedPaths, status: &RepositoryStatus) -> Result<()> {
    if !status.commands_exists {
        bail!(
            "Command repository is not initialized.\nMissing required path:\n  - {} (missing)\nRun: cmdsync init --repo-root {}",
            display_path(&paths.commands_dir),
            display_path(&paths.repo_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub materialize_syncignore: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            materialize_syncignore: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
    pub wrote_syncignore: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (repo_root, root_source) = resolve_repo_root(context, overrides, &lookup_env);
    if repo_root.exists() && !repo_root.is_dir() {
        bail!(
            "repository root is not a directory: {}",
            display_path(&repo_root)
        );
    }

    let mut paths = ResolvedPaths::for_root(repo_root);
    paths.root_source = root_source;

    if let Some(path) = overrides.config.as_deref() {
        paths.sync_config_path = absolutize(path, &paths.repo_root);
        paths.config_source = ValueSource::Flag;
    } else if let Some(value) = lookup_env(CONFIG_ENV).filter(|value| !value.trim().is_empty()) {
        paths.sync_config_path = absolutize(Path::new(value.trim()), &paths.repo_root);
        paths.config_source = ValueSource::Env;
    }

    Ok(paths)
}

/// Create the repository layout. Existing directories and files are left
/// alone unless `force` is set for the files.
pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let required_dirs = [
        paths.repo_root.clone(),
        paths.config_dir.clone(),
        paths.frameworks_dir.clone(),
        paths.commands_dir.clone(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(&paths.sync_config_path, DEFAULT_SYNC_CONFIG, options.force)?
    } else {
        false
    };
    let wrote_syncignore = if options.materialize_syncignore {
        write_text_file(&paths.syncignore_path, DEFAULT_SYNCIGNORE, options.force)?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
        wrote_syncignore,
    })
}

/// Create `commands/<namespace>`; `namespace` may be nested (`docker/compose`).
pub fn create_namespace(paths: &ResolvedPaths, namespace: &str) -> Result<PathBuf> {
    let trimmed = namespace.trim().trim_matches('/');
    if trimmed.is_empty() {
        bail!("namespace must not be empty");
    }

    let relative = Path::new(trimmed);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!(
                "namespace escapes the commands directory: {namespace}\nUse plain directory names separated by `/`."
            ),
        }
    }

    let target = paths.commands_dir.join(relative);
    fs::create_dir_all(&target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    Ok(target)
}

fn resolve_repo_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.repo_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env(REPO_ROOT_ENV).filter(|value| !value.trim().is_empty()) {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    match detect_repo_root_heuristic(&context.cwd) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_repo_root_heuristic(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|candidate| {
            candidate.join(COMMANDS_DIR).is_dir() && candidate.join(CONFIG_DIR).is_dir()
        })
        .map(Path::to_path_buf)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        CONFIG_ENV, DEFAULT_SYNC_CONFIG, InitOptions, PathOverrides, REPO_ROOT_ENV,
        ResolutionContext, ResolvedPaths, ValueSource, create_namespace, ensure_repository_ready,
        init_layout, inspect_repository, resolve_paths_with_lookup,
    };

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            repo_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd: cwd.clone() };
        let env = HashMap::from([(
            REPO_ROOT_ENV.to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.repo_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.commands_dir, from_flag.join("commands"));
    }

    #[test]
    fn resolve_paths_uses_env_then_heuristic() {
        let temp = tempdir().expect("tempdir");
        let repo = temp.path().join("central");
        let nested = repo.join("commands").join("git");
        fs::create_dir_all(&nested).expect("create nested");
        fs::create_dir_all(repo.join("_config")).expect("create config");

        let context = ResolutionContext { cwd: nested.clone() };
        let env = HashMap::from([
            (REPO_ROOT_ENV.to_string(), "relative-root".to_string()),
            (CONFIG_ENV.to_string(), "custom.yaml".to_string()),
        ]);
        let from_env = resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
            env.get(key).cloned()
        })
        .expect("resolve from env");
        assert_eq!(from_env.repo_root, nested.join("relative-root"));
        assert_eq!(from_env.root_source, ValueSource::Env);
        assert_eq!(from_env.sync_config_path, nested.join("relative-root").join("custom.yaml"));
        assert_eq!(from_env.config_source, ValueSource::Env);

        let heuristic = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve heuristic");
        assert_eq!(heuristic.repo_root, repo);
        assert_eq!(heuristic.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn resolve_paths_falls_back_to_cwd() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.repo_root, temp.path());
        assert_eq!(resolved.root_source, ValueSource::Default);
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_files() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path().join("central-commands"));

        let report = init_layout(&paths, &InitOptions::default()).expect("init");

        assert_eq!(report.created_dirs.len(), 4);
        assert!(report.wrote_config);
        assert!(report.wrote_syncignore);
        assert!(paths.commands_dir.is_dir());
        assert!(paths.config_dir.is_dir());
        assert!(paths.frameworks_dir.is_dir());
        let config = fs::read_to_string(&paths.sync_config_path).expect("read config");
        assert_eq!(config, DEFAULT_SYNC_CONFIG);
        assert!(paths.syncignore_path.is_file());
    }

    #[test]
    fn init_layout_is_idempotent_and_preserves_edits() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("first init");
        fs::write(&paths.sync_config_path, "default_scope: user\n").expect("edit config");

        let again = init_layout(&paths, &InitOptions::default()).expect("second init");
        assert!(again.created_dirs.is_empty());
        assert!(!again.wrote_config);
        assert_eq!(
            fs::read_to_string(&paths.sync_config_path).expect("read"),
            "default_scope: user\n"
        );

        let forced = init_layout(
            &paths,
            &InitOptions {
                force: true,
                ..InitOptions::default()
            },
        )
        .expect("forced init");
        assert!(forced.wrote_config);
    }

    #[test]
    fn create_namespace_builds_nested_dirs() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("init");

        let created = create_namespace(&paths, "docker/compose").expect("namespace");
        assert_eq!(created, paths.commands_dir.join("docker").join("compose"));
        assert!(created.is_dir());
    }

    #[test]
    fn create_namespace_rejects_escapes() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        let error = create_namespace(&paths, "../outside").expect_err("must fail");
        assert!(error.to_string().contains("escapes the commands directory"));
        assert!(create_namespace(&paths, " / ").is_err());
    }

    #[test]
    fn inspect_reports_missing_layout() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());

        let status = inspect_repository(&paths);
        assert!(status.repo_root_exists);
        assert!(!status.commands_exists);
        assert_eq!(status.warnings.len(), 3);
        let error = ensure_repository_ready(&paths, &status).expect_err("must fail");
        assert!(error.to_string().contains("not initialized"));

        init_layout(&paths, &InitOptions::default()).expect("init");
        let status = inspect_repository(&paths);
        assert!(status.warnings.is_empty());
        ensure_repository_ready(&paths, &status).expect("ready");
    }
}
