use std::io;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use cmdsync_core::command::Scope;
use cmdsync_core::config::load_sync_config;
use cmdsync_core::filesystem::{
    ScanOptions, ScanReport, ScanStats, display_path, scan_repository, scan_stats,
};
use cmdsync_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, create_namespace,
    ensure_repository_ready, init_layout, inspect_repository, resolve_paths,
};
use cmdsync_core::sync::{SyncRequest, plan_sync};
use cmdsync_core::validation::{ValidationResult, validate_repository};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "cmdsync",
    version,
    disable_version_flag = true,
    about = "Unified command management across multiple AI agent CLIs"
)]
struct Cli {
    #[arg(short = 'v', long, action = ArgAction::Version, help = "Print version")]
    version: (),
    #[arg(long, global = true, value_name = "PATH")]
    repo_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved repository diagnostics")]
    diagnostics: bool,
    #[arg(short = 'V', long, global = true, help = "Enable verbose output")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    repo_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            repo_root: cli.repo_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the central repository layout
    Init(InitArgs),
    /// Create a namespace directory under commands/
    Namespace(NamespaceArgs),
    /// Scan and list commands
    List(OutputArgs),
    /// Validate every command in the repository
    Validate(OutputArgs),
    /// Show layout status and scan statistics
    Status,
    /// Synchronize commands to agent directories
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite existing config files")]
    force: bool,
    #[arg(long, help = "Skip writing _config/sync-config.yaml")]
    no_config: bool,
    #[arg(long, help = "Skip writing _config/.syncignore")]
    no_syncignore: bool,
}

#[derive(Debug, Args)]
struct NamespaceArgs {
    namespace: String,
}

#[derive(Debug, Args)]
struct OutputArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(
        short = 's',
        long,
        value_name = "SCOPE",
        help = "Deployment scope: user, project, or all (default from sync-config.yaml)"
    )]
    scope: Option<Scope>,
    #[arg(
        short = 'a',
        long,
        value_name = "AGENTS",
        value_delimiter = ',',
        help = "Comma-separated target agents; `all` or omitted selects every enabled agent"
    )]
    agents: Vec<String>,
    #[arg(short = 'd', long, help = "Show what would be done without making changes")]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct CommandListing<'a> {
    name: &'a str,
    namespace: &'a str,
    qualified_name: String,
    scope: &'a str,
    description: &'a str,
    source_path: String,
    tags: Option<&'a [String]>,
    shell_execution: bool,
    content_hash: &'a str,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Namespace(NamespaceArgs { namespace })) => {
            run_namespace(&runtime, &namespace)
        }
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Validate(args)) => run_validate(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            materialize_syncignore: !args.no_syncignore,
            force: args.force,
        },
    )?;

    println!("Initialized command repository layout");
    println!("repo_root: {}", display_path(&paths.repo_root));
    println!("commands: {}", display_path(&paths.commands_dir));
    println!("config_dir: {}", display_path(&paths.config_dir));
    println!("frameworks: {}", display_path(&paths.frameworks_dir));
    println!("sync_config_path: {}", display_path(&paths.sync_config_path));
    println!("syncignore_path: {}", display_path(&paths.syncignore_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("wrote_syncignore: {}", report.wrote_syncignore);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_namespace(runtime: &RuntimeOptions, namespace: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_repository(&paths);
    ensure_repository_ready(&paths, &status)?;

    let created = create_namespace(&paths, namespace)?;
    println!("namespace: {}", namespace.trim().trim_matches('/'));
    println!("path: {}", display_path(&created));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: OutputArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_repository(&paths);
    ensure_repository_ready(&paths, &status)?;
    let report = scan_repository(&paths.repo_root, &ScanOptions::default());

    if args.json {
        let listings: Vec<CommandListing<'_>> = report
            .commands
            .iter()
            .map(|command| CommandListing {
                name: &command.name,
                namespace: &command.namespace,
                qualified_name: command.qualified_name(),
                scope: &command.scope,
                description: &command.description,
                source_path: display_path(&command.source_path),
                tags: command.tags.as_deref(),
                shell_execution: command.shell_execution,
                content_hash: &command.content_hash,
            })
            .collect();
        let payload = serde_json::json!({
            "commands": listings,
            "failures": report.failures,
            "ignored": report.ignored,
            "warnings": report.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("commands: {}", report.commands.len());
    for command in &report.commands {
        println!(
            "  - {} [{}] {}",
            command.qualified_name(),
            command.scope,
            command.description
        );
    }
    print_scan_problems(&report);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_validate(runtime: &RuntimeOptions, args: OutputArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_repository(&paths);
    ensure_repository_ready(&paths, &status)?;
    let report = scan_repository(&paths.repo_root, &ScanOptions::default());
    let result = validate_repository(&report);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("commands: {}", report.commands.len());
        println!("errors: {}", result.errors.len());
        println!("warnings: {}", result.warnings.len());
        print_validation(&result);
        if runtime.diagnostics {
            println!("\n[diagnostics]\n{}", paths.diagnostics());
        }
    }

    if !result.is_valid() {
        bail!(
            "validation failed with {} error(s) in {}",
            result.errors.len(),
            display_path(&paths.commands_dir)
        );
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_repository(&paths);

    println!("repository status");
    println!("repo_root: {}", display_path(&paths.repo_root));
    println!("repo_root_exists: {}", format_flag(status.repo_root_exists));
    println!("commands_exists: {}", format_flag(status.commands_exists));
    println!("config_dir_exists: {}", format_flag(status.config_dir_exists));
    println!("frameworks_exists: {}", format_flag(status.frameworks_exists));
    println!(
        "sync_config_exists: {}",
        format_flag(status.sync_config_exists)
    );
    println!("syncignore_exists: {}", format_flag(status.syncignore_exists));
    if status.commands_exists {
        let report = scan_repository(&paths.repo_root, &ScanOptions::default());
        print_scan_stats("scan", &scan_stats(&report));
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_repository(&paths);
    ensure_repository_ready(&paths, &status)?;
    let config = load_sync_config(&paths.sync_config_path)?;

    let report = scan_repository(&paths.repo_root, &ScanOptions::default());
    let result = validate_repository(&report);
    if !result.is_valid() {
        print_validation(&result);
        bail!(
            "sync aborted: {} validation error(s); run `cmdsync validate` for details",
            result.errors.len()
        );
    }

    let scope = args.scope.unwrap_or(config.default_scope);
    let agents = selected_agents(&args.agents);
    let request = SyncRequest {
        scope,
        agents: agents.clone(),
        project_root: ResolutionContext::from_process()?.cwd,
    };
    let plan = plan_sync(&report.commands, &config, &request)?;
    debug!(entries = plan.entries.len(), "sync plan ready");

    println!("sync preflight");
    println!("repo_root: {}", display_path(&paths.repo_root));
    println!("scope: {scope}");
    println!(
        "agents: {}",
        agents
            .map(|names| names.join(","))
            .unwrap_or_else(|| "all".to_string())
    );
    println!("dry_run: {}", args.dry_run);
    println!("commands: {}", report.commands.len());
    println!("planned: {}", plan.entries.len());
    for entry in &plan.entries {
        println!(
            "  - {} ({} {}) -> {}",
            entry.command,
            entry.agent,
            entry.level,
            display_path(&entry.target_path)
        );
    }
    for skipped in &plan.skipped_agents {
        println!("skipped.{}: {}", skipped.agent, skipped.reason);
    }
    if !result.warnings.is_empty() {
        println!("warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning.message);
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }

    if args.dry_run {
        return Ok(());
    }
    bail!("`sync` deployment is not implemented yet; rerun with --dry-run to review the plan");
}

fn selected_agents(raw: &[String]) -> Option<Vec<String>> {
    let names: Vec<String> = raw
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() || names.iter().any(|name| name == "all") {
        None
    } else {
        Some(names)
    }
}

fn print_scan_problems(report: &ScanReport) {
    if !report.failures.is_empty() {
        println!("failures:");
        for failure in &report.failures {
            println!("  - [{}] {}", failure.kind.as_str(), failure.message);
        }
    }
    if !report.warnings.is_empty() {
        println!("warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }
}

fn print_validation(result: &ValidationResult) {
    for error in &result.errors {
        println!("  {error}");
    }
    for warning in &result.warnings {
        println!("  {warning}");
    }
}

fn print_scan_stats(prefix: &str, stats: &ScanStats) {
    println!("{prefix}.total_commands: {}", stats.total_commands);
    println!("{prefix}.failures: {}", stats.failures);
    println!("{prefix}.ignored: {}", stats.ignored);
    if stats.by_namespace.is_empty() {
        println!("{prefix}.by_namespace: <empty>");
    } else {
        for (namespace, count) in &stats.by_namespace {
            let label = if namespace.is_empty() { "<root>" } else { namespace };
            println!("{prefix}.namespace.{label}: {count}");
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        repo_root: runtime.repo_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let repo_env = initial.repo_root.join(".env");
    if repo_env.exists() {
        let _ = dotenvy::from_path_override(&repo_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
