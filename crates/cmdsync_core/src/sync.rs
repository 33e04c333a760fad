use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::command::{Command, Scope, is_plain_name};
use crate::config::SyncConfig;
use crate::filesystem::{COMMAND_FILE_EXTENSION, display_path};

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub scope: Scope,
    /// Restrict to these agents; `None` selects every enabled agent.
    pub agents: Option<Vec<String>>,
    /// Base for relative (project-level) agent paths.
    pub project_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlannedDeployment {
    pub agent: String,
    pub level: Scope,
    pub command: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedAgent {
    pub agent: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub entries: Vec<PlannedDeployment>,
    pub skipped_agents: Vec<SkippedAgent>,
}

/// Work out where each command would be deployed, without touching disk.
pub fn plan_sync(
    commands: &[Command],
    config: &SyncConfig,
    request: &SyncRequest,
) -> Result<SyncPlan> {
    if let Some(selected) = &request.agents {
        let unknown: Vec<&str> = selected
            .iter()
            .map(String::as_str)
            .filter(|name| !config.agents.contains_key(*name))
            .collect();
        if !unknown.is_empty() {
            bail!(
                "unknown agent(s): {}\nConfigured agents: {}",
                unknown.join(", "),
                config
                    .agents
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    if let Some(command) = commands.iter().find(|command| !is_plain_name(&command.name)) {
        bail!(
            "command name '{}' in {} cannot be used as a file name",
            command.name,
            display_path(&command.source_path)
        );
    }

    let levels: Vec<Scope> = [Scope::User, Scope::Project]
        .into_iter()
        .filter(|level| request.scope.includes(*level))
        .collect();

    let mut plan = SyncPlan::default();
    for (name, agent) in &config.agents {
        if let Some(selected) = &request.agents
            && !selected.iter().any(|candidate| candidate == name)
        {
            continue;
        }
        if !agent.enabled {
            plan.skipped_agents.push(SkippedAgent {
                agent: name.clone(),
                reason: "disabled".to_string(),
            });
            continue;
        }

        let mut planned_any = false;
        for level in &levels {
            let Some(target_dir) = agent.target_dir(*level, &request.project_root) else {
                debug!(agent = %name, level = %level, "agent has no path for level");
                continue;
            };
            planned_any = true;
            for command in commands {
                let Some(command_scope) = command.scope_kind() else {
                    continue;
                };
                if !command_scope.includes(*level) {
                    continue;
                }
                plan.entries.push(PlannedDeployment {
                    agent: name.clone(),
                    level: *level,
                    command: command.qualified_name(),
                    source_path: command.source_path.clone(),
                    target_path: target_path(&target_dir, command),
                    content_hash: command.content_hash.clone(),
                });
            }
        }

        if !planned_any {
            plan.skipped_agents.push(SkippedAgent {
                agent: name.clone(),
                reason: format!("no path configured for scope '{}'", request.scope),
            });
        }
    }

    Ok(plan)
}

fn target_path(target_dir: &Path, command: &Command) -> PathBuf {
    let mut path = target_dir.to_path_buf();
    for segment in command.namespace.split('/').filter(|segment| !segment.is_empty()) {
        path.push(segment);
    }
    path.push(format!("{}.{COMMAND_FILE_EXTENSION}", command.name));
    path
}
