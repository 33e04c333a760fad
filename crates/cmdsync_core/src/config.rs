use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::command::Scope;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default = "default_scope")]
    pub default_scope: Scope,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AgentConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub user_path: Option<String>,
    pub project_path: Option<String>,
}

fn default_scope() -> Scope {
    Scope::All
}

fn default_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    /// The agent set written by `cmdsync init`.
    fn default() -> Self {
        let agents = [
            (
                "claudecode",
                Some("~/.claude/commands"),
                Some("./.claude/commands"),
            ),
            ("codex", Some("~/.codex/prompts"), None),
            (
                "gemini",
                Some("~/.gemini/commands"),
                Some("./.gemini/commands"),
            ),
        ]
        .into_iter()
        .map(|(name, user_path, project_path)| {
            (
                name.to_string(),
                AgentConfig {
                    enabled: true,
                    user_path: user_path.map(str::to_string),
                    project_path: project_path.map(str::to_string),
                },
            )
        })
        .collect();

        Self {
            agents,
            default_scope: default_scope(),
        }
    }
}

impl AgentConfig {
    /// Deployment directory for `level`, resolved against the home directory
    /// (`~/`) or `project_root` (relative paths). `None` when the agent does
    /// not support the level.
    pub fn target_dir(&self, level: Scope, project_root: &Path) -> Option<PathBuf> {
        let raw = match level {
            Scope::User => self.user_path.as_deref(),
            Scope::Project => self.project_path.as_deref(),
            Scope::All => None,
        }?;
        let expanded = expand_home(raw);
        if expanded.is_absolute() {
            Some(expanded)
        } else {
            let relative = expanded.strip_prefix(".").unwrap_or(&expanded);
            Some(project_root.join(relative))
        }
    }
}

/// Load `sync-config.yaml`. Returns the built-in defaults if the file doesn't exist.
pub fn load_sync_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    if content.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    let parsed: SyncConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}
