//! diagramvc command-line tool.
//!
//! Provides subcommands for initializing diagrams for branching, managing
//! branches, committing snapshots, inspecting history and diffs, and merging
//! branches with conflict resolution. Also generates and validates
//! configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use diagramvc_core::config::AppConfig;
use diagramvc_core::db::Database;
use diagramvc_core::errors::BranchError;
use diagramvc_core::merge::{MergeConflict, MergeResult, Resolution};
use diagramvc_core::models::{Branch, BranchSource};
use diagramvc_core::snapshot::{DiagramElement, ElementType, Snapshot};
use diagramvc_core::BranchingService;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// diagramvc command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "diagramvc",
    version,
    about = "Branch, version and merge node/edge diagrams"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, global = true, default_value = "~/.config/diagramvc/config.toml")]
    config: String,

    /// Diagram used to look branches up by name instead of id.
    #[arg(short = 'd', long = "diagram", global = true)]
    lookup_diagram: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    InitConfig {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./diagramvc.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that open the diagram store.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Start versioning a diagram from a snapshot JSON file.
    Init {
        /// Diagram id.
        diagram: String,
        /// Snapshot file (`{"nodes": [...], "edges": [...]}`).
        snapshot: PathBuf,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Commit a snapshot JSON file on a branch.
    Commit {
        /// Branch id or name.
        branch: String,
        /// Snapshot file.
        snapshot: PathBuf,
        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show the version history of a branch, newest first.
    Log {
        /// Branch id or name.
        branch: String,
        /// Maximum number of versions (defaults to `history.default_limit`).
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a version.
    Show {
        /// Version id.
        version: String,
        /// Print the full version as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the element-level diff between two versions.
    Diff {
        /// Base version id.
        base: String,
        /// New version id.
        new: String,
    },

    /// Merge a source branch into a target branch.
    Merge {
        /// Branch whose changes are brought in ("theirs").
        source: String,
        /// Branch that receives the merge ("ours").
        target: String,
        /// JSON file with conflict resolutions.
        #[arg(short, long)]
        resolutions: Option<PathBuf>,
        /// Commit the merge onto the target branch.
        #[arg(long)]
        commit: bool,
        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
        /// Print the merge result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// List the branches of a diagram.
    List {
        /// Diagram id.
        diagram: String,
    },
    /// Show details of a branch.
    Show {
        /// Branch id or name.
        branch: String,
    },
    /// Create a branch.
    Create {
        /// Diagram id.
        diagram: String,
        /// New branch name.
        name: String,
        /// Fork from this branch (id or name) at its head.
        #[arg(long)]
        from: Option<String>,
        /// Fork from this exact version.
        #[arg(long)]
        at: Option<String>,
    },
    /// Rename a branch.
    Rename {
        /// Branch id or name.
        branch: String,
        /// New name.
        new_name: String,
    },
    /// Delete a branch. Its versions are kept.
    Delete {
        /// Branch id or name.
        branch: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Commands::InitConfig { output } => {
            init_logging("warn");
            cmd_init_config(&output)
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&config_path)
        }
        Commands::Store(command) => {
            let config = load_config(&config_path)?;
            init_logging(&config.general.log_level);
            let svc = open_service(&config)?;
            let ctx = Session {
                svc: &svc,
                config: &config,
                diagram: cli.lookup_diagram.as_deref(),
            };

            match command {
                StoreCommand::Init { diagram, snapshot } => cmd_init(&ctx, &diagram, &snapshot),
                StoreCommand::Branch { action } => cmd_branch(&ctx, action),
                StoreCommand::Commit {
                    branch,
                    snapshot,
                    message,
                } => cmd_commit(&ctx, &branch, &snapshot, message),
                StoreCommand::Log { branch, limit } => cmd_log(&ctx, &branch, limit),
                StoreCommand::Show { version, json } => cmd_show(&ctx, &version, json),
                StoreCommand::Diff { base, new } => cmd_diff(&ctx, &base, &new),
                StoreCommand::Merge {
                    source,
                    target,
                    resolutions,
                    commit,
                    message,
                    json,
                } => cmd_merge(
                    &ctx,
                    &source,
                    &target,
                    resolutions.as_deref(),
                    commit,
                    message,
                    json,
                ),
            }
        }
    }
}

/// Shared state for commands that touch the store.
struct Session<'a> {
    svc: &'a BranchingService<Database>,
    config: &'a AppConfig,
    diagram: Option<&'a str>,
}

impl Session<'_> {
    fn branch(&self, id_or_name: &str) -> Result<Branch> {
        let branch = match self.diagram {
            Some(diagram) => self.svc.find_branch(diagram, id_or_name),
            None => self.svc.get_branch(id_or_name),
        };
        branch.with_context(|| match self.diagram {
            Some(_) => format!("no branch '{id_or_name}'"),
            None => format!("no branch '{id_or_name}' (use --diagram to look up by name)"),
        })
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_service(config: &AppConfig) -> Result<BranchingService<Database>> {
    debug!(path = %config.database_path().display(), "opening store");
    let db = Database::new(config.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(BranchingService::from_config(db, config))
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid snapshot in {}", path.display()))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Config subcommands
// ---------------------------------------------------------------------------

fn cmd_init_config(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let body = toml::to_string_pretty(&AppConfig::default())
        .context("failed to render default configuration")?;
    let contents = format!("# diagramvc configuration\n\n{body}");
    std::fs::write(output, contents).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set general.author (or general.author_env) and store.data_dir");
    println!("  2. Validate with: diagramvc validate --config {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Author         : {}", config.general.author);
    println!("  Log level      : {}", config.general.log_level);
    println!("  Default branch : {}", config.general.default_branch_name);
    println!("  Database       : {}", config.database_path().display());
    println!("  History limit  : {}", config.history.default_limit);
    println!();
    println!("{}", style::success("Configuration is valid."));
    Ok(())
}

// ---------------------------------------------------------------------------
// Branch and version subcommands
// ---------------------------------------------------------------------------

fn cmd_init(ctx: &Session<'_>, diagram: &str, snapshot_path: &Path) -> Result<()> {
    let snapshot = read_snapshot(snapshot_path)?;
    let (branch, version) = ctx
        .svc
        .initialize_branching(diagram, snapshot)
        .context("failed to initialize branching")?;

    println!(
        "{}",
        style::success(&format!(
            "Initialized {} on branch '{}' ({})",
            diagram,
            branch.name,
            style::short_id(&version.id)
        ))
    );
    Ok(())
}

fn cmd_branch(ctx: &Session<'_>, action: BranchAction) -> Result<()> {
    match action {
        BranchAction::List { diagram } => {
            let branches = ctx
                .svc
                .list_branches(&diagram)
                .context("failed to list branches")?;

            if branches.is_empty() {
                println!("No branches for diagram '{}'.", diagram);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Name", "ID", "Head", "Forked From", "Created"]);

            for b in &branches {
                let name = if b.is_default {
                    Cell::new(format!("{} (default)", b.name)).fg(Color::Green)
                } else {
                    Cell::new(&b.name)
                };
                table.add_row(vec![
                    name,
                    Cell::new(style::short_id(&b.id)),
                    Cell::new(b.head_version_id.as_deref().map(style::short_id).unwrap_or("-")),
                    Cell::new(b.parent_version_id.as_deref().map(style::short_id).unwrap_or("-")),
                    Cell::new(b.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }

            println!("{}", table);
            Ok(())
        }

        BranchAction::Show { branch } => {
            let b = ctx.branch(&branch)?;
            println!("{}", style::header(&format!("Branch: {}", b.name)));
            println!();
            println!("  ID            : {}", b.id);
            println!("  Diagram       : {}", b.diagram_id);
            println!("  Default       : {}", if b.is_default { "yes" } else { "no" });
            println!("  Head          : {}", b.head_version_id.as_deref().unwrap_or("-"));
            println!("  Parent branch : {}", b.parent_branch_id.as_deref().unwrap_or("-"));
            println!("  Fork point    : {}", b.parent_version_id.as_deref().unwrap_or("-"));
            println!("  Created at    : {}", b.created_at.to_rfc3339());
            println!("  Created by    : {}", b.created_by);
            Ok(())
        }

        BranchAction::Create {
            diagram,
            name,
            from,
            at,
        } => {
            let from_branch_id = match from {
                Some(ref f) => Some(ctx.svc.find_branch(&diagram, f).context("unknown --from branch")?.id),
                None => None,
            };
            let source = BranchSource {
                from_branch_id,
                from_version_id: at,
            };
            let b = ctx
                .svc
                .create_branch(&diagram, &name, source)
                .context("failed to create branch")?;
            println!(
                "{}",
                style::success(&format!("Created branch '{}' ({})", b.name, style::short_id(&b.id)))
            );
            Ok(())
        }

        BranchAction::Rename { branch, new_name } => {
            let b = ctx.branch(&branch)?;
            let renamed = ctx
                .svc
                .rename_branch(&b.id, &new_name)
                .context("failed to rename branch")?;
            println!(
                "{}",
                style::success(&format!("Renamed '{}' to '{}'", b.name, renamed.name))
            );
            Ok(())
        }

        BranchAction::Delete { branch } => {
            let b = ctx.branch(&branch)?;
            ctx.svc.delete_branch(&b.id).context("failed to delete branch")?;
            println!("{}", style::success(&format!("Deleted branch '{}'", b.name)));
            Ok(())
        }
    }
}

fn cmd_commit(
    ctx: &Session<'_>,
    branch: &str,
    snapshot_path: &Path,
    message: Option<String>,
) -> Result<()> {
    let b = ctx.branch(branch)?;
    let snapshot = read_snapshot(snapshot_path)?;

    let version = match ctx.svc.create_version(&b.id, snapshot, message) {
        Ok(v) => v,
        Err(e @ BranchError::ConcurrentModification { .. }) => {
            println!("{}", style::warn("Branch moved while committing; re-run to retry."));
            return Err(e.into());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("failed to commit version")),
    };

    println!(
        "{}",
        style::success(&format!(
            "Committed {} on '{}' ({} nodes, {} edges)",
            style::short_id(&version.id),
            b.name,
            version.snapshot.nodes.len(),
            version.snapshot.edges.len()
        ))
    );
    Ok(())
}

fn cmd_log(ctx: &Session<'_>, branch: &str, limit: Option<usize>) -> Result<()> {
    let b = ctx.branch(branch)?;
    let limit = limit.unwrap_or(ctx.config.history.default_limit);
    let versions = ctx
        .svc
        .get_version_history(&b.id, limit)
        .context("failed to read history")?;

    if versions.is_empty() {
        println!("No versions on '{}'.", b.name);
        return Ok(());
    }

    println!();
    println!("{}", style::header(&format!("History of '{}'", b.name)));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Version", "Parent", "Created", "Author", "Size", "Message"]);

    for v in &versions {
        table.add_row(vec![
            Cell::new(style::short_id(&v.id)),
            Cell::new(v.parent_version_id.as_deref().map(style::short_id).unwrap_or("-")),
            Cell::new(v.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&v.created_by),
            Cell::new(format!("{}n/{}e", v.snapshot.nodes.len(), v.snapshot.edges.len())),
            Cell::new(v.message.as_deref().unwrap_or("")),
        ]);
    }

    println!("{}", table);
    println!("{}", style::dim(&format!("{} version(s) shown", versions.len())));
    Ok(())
}

fn cmd_show(ctx: &Session<'_>, version_id: &str, json: bool) -> Result<()> {
    let v = ctx.svc.get_version(version_id).context("failed to load version")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    println!("{}", style::header(&format!("Version: {}", v.id)));
    println!();
    println!("  Branch     : {}", v.branch_id);
    println!("  Parent     : {}", v.parent_version_id.as_deref().unwrap_or("-"));
    println!("  Created at : {}", v.created_at.to_rfc3339());
    println!("  Created by : {}", v.created_by);
    println!("  Message    : {}", v.message.as_deref().unwrap_or("-"));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Kind", "ID", "Label", "Endpoints"]);
    for n in &v.snapshot.nodes {
        table.add_row(vec![
            Cell::new("node"),
            Cell::new(&n.id),
            Cell::new(n.label().unwrap_or("")),
            Cell::new(""),
        ]);
    }
    for e in &v.snapshot.edges {
        table.add_row(vec![
            Cell::new("edge"),
            Cell::new(&e.id),
            Cell::new(e.data.get("label").and_then(|l| l.as_str()).unwrap_or("")),
            Cell::new(format!("{} → {}", e.source, e.target)),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn cmd_diff(ctx: &Session<'_>, base: &str, new: &str) -> Result<()> {
    let d = ctx.svc.diff_versions(base, new).context("failed to diff versions")?;

    if d.is_empty() {
        println!("{}", style::success("No differences."));
        return Ok(());
    }

    for n in &d.added_nodes {
        println!("{}", style::added(&format!("node {}", n.id)));
    }
    for n in &d.removed_nodes {
        println!("{}", style::removed(&format!("node {}", n.id)));
    }
    for m in &d.modified_nodes {
        println!("{}", style::modified(&format!("node {}", m.after.id)));
    }
    for e in &d.added_edges {
        println!("{}", style::added(&format!("edge {} ({} → {})", e.id, e.source, e.target)));
    }
    for e in &d.removed_edges {
        println!("{}", style::removed(&format!("edge {} ({} → {})", e.id, e.source, e.target)));
    }
    for m in &d.modified_edges {
        println!("{}", style::modified(&format!("edge {}", m.after.id)));
    }
    println!();
    println!("{}", style::dim(&format!("{} change(s)", d.change_count())));
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// One entry of a `--resolutions` file.
#[derive(Debug, Deserialize)]
struct ResolutionEntry {
    element_id: String,
    #[serde(default)]
    element_type: Option<ElementType>,
    resolution: Resolution,
    /// Required for `custom`.
    #[serde(default)]
    value: Option<DiagramElement>,
}

fn load_resolutions(path: &Path, conflicts: &[MergeConflict]) -> Result<Vec<MergeConflict>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<ResolutionEntry> =
        serde_json::from_str(&text).context("invalid resolutions file")?;

    let mut resolved = Vec::new();
    for entry in entries {
        let Some(conflict) = conflicts.iter().find(|c| {
            c.element_id == entry.element_id
                && entry.element_type.map_or(true, |t| t == c.element_type)
        }) else {
            println!(
                "{}",
                style::warn(&format!("no conflict for '{}', ignoring", entry.element_id))
            );
            continue;
        };

        let mut conflict = conflict.clone();
        match (entry.resolution, entry.value) {
            (Resolution::Custom, Some(value)) => conflict.resolve_custom(value)?,
            (Resolution::Custom, None) => {
                anyhow::bail!("custom resolution for '{}' needs a value", entry.element_id)
            }
            (resolution, _) => conflict.resolve(resolution)?,
        }
        resolved.push(conflict);
    }
    Ok(resolved)
}

fn cmd_merge(
    ctx: &Session<'_>,
    source: &str,
    target: &str,
    resolutions: Option<&Path>,
    commit: bool,
    message: Option<String>,
    json: bool,
) -> Result<()> {
    let source = ctx.branch(source)?;
    let target = ctx.branch(target)?;
    let result = ctx
        .svc
        .merge_branches(&source.id, &target.id)
        .context("failed to merge branches")?;

    let resolved = match resolutions {
        Some(path) => load_resolutions(path, &result.conflicts)?,
        None => Vec::new(),
    };

    if json {
        let mut preview = result.clone();
        preview.merged = ctx.svc.apply_resolutions(&result.merged, &resolved);
        for conflict in &mut preview.conflicts {
            if let Some(r) = resolved.iter().find(|r| {
                r.element_id == conflict.element_id && r.element_type == conflict.element_type
            }) {
                *conflict = r.clone();
            }
        }
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        print_merge(&source, &target, &result, &resolved);
    }

    if !commit {
        return Ok(());
    }

    let version = ctx
        .svc
        .commit_merge(&result, &resolved, message)
        .context("failed to commit merge")?;
    if !json {
        println!();
        println!(
            "{}",
            style::success(&format!(
                "Merged '{}' into '{}' as {}",
                source.name,
                target.name,
                style::short_id(&version.id)
            ))
        );
    }
    Ok(())
}

fn print_merge(source: &Branch, target: &Branch, result: &MergeResult, resolved: &[MergeConflict]) {
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Merge '{}' into '{}' ({})",
            source.name, target.name, result.strategy
        ))
    );
    println!();

    if result.success {
        println!(
            "{}",
            style::success(&format!(
                "Clean merge: {} nodes, {} edges",
                result.merged.nodes.len(),
                result.merged.edges.len()
            ))
        );
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Element", "Conflict", "Ours", "Theirs", "Resolution"]);

    let side = |e: &Option<DiagramElement>| match e {
        Some(el) => el
            .field("label")
            .and_then(|l| l.as_str())
            .unwrap_or("present")
            .to_string(),
        None => "deleted".to_string(),
    };

    for c in &result.conflicts {
        let resolution = resolved
            .iter()
            .find(|r| r.element_id == c.element_id && r.element_type == c.element_type)
            .and_then(|r| r.resolution);
        let resolution_cell = match resolution {
            Some(r) => Cell::new(r.to_string()).fg(Color::Green),
            None => Cell::new("pending").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&c.element_id),
            Cell::new(c.conflict_type.to_string()),
            Cell::new(side(&c.ours)),
            Cell::new(side(&c.theirs)),
            resolution_cell,
        ]);
    }

    println!("{}", table);
    let pending = result
        .conflicts
        .iter()
        .filter(|c| {
            !resolved
                .iter()
                .any(|r| r.element_id == c.element_id && r.element_type == c.element_type)
        })
        .count();
    if pending > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{} conflict(s) need a resolution (--resolutions <file>)",
                pending
            ))
        );
    }
}
