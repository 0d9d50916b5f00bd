//! goldcopy CLI
//!
//! Syncs a project's golden copy from its source database, clones it into
//! workspace databases and reports their migration compatibility.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use goldcopy::analyzer::{self, diff_schemas, suggest_exclusions};
use goldcopy::migration::{compare_baselines, MigrationBaseline};
use goldcopy::{
    golden_database_name, CancelToken, CloneEngine, GoldenCopyManager, PgExecutor, Settings,
};
use goldcopy_cli::{naming, render};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "goldcopy")]
#[command(about = "Golden-copy PostgreSQL replicas and per-workspace clones")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (default: goldcopy.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the golden copy from the source database
    Sync {
        /// Sync even when the last sync is within the cooldown
        #[arg(long)]
        force: bool,
    },

    /// Show golden copy size, last sync and freshness
    Status,

    /// List all golden copies on the local server
    List,

    /// Clone the golden copy into a workspace database
    Clone {
        #[arg(long)]
        worktree: Option<String>,
    },

    /// Drop a workspace database
    Drop {
        /// Database name
        name: String,
    },

    /// Drop and re-clone a workspace database, then check its migrations
    Reinit {
        #[arg(long)]
        worktree: Option<String>,

        /// Workspace checkout (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Compare a workspace database's migrations with the checkout
    MigrationStatus {
        #[arg(long)]
        worktree: Option<String>,

        /// Workspace checkout (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Report whether the golden copy needs a sync
    CheckFreshness,

    /// Inspect the source: table sizes, suggested exclusions, filter indexes
    Analyze,

    /// Capture or compare migration baselines
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Capture a baseline from a database ledger, or from the checkout
    Capture {
        /// Database on the local server (default: the golden copy)
        #[arg(long, conflicts_with = "from_disk")]
        database: Option<String>,

        /// Read the checkout's migrations directory instead of a database
        #[arg(long)]
        from_disk: bool,

        /// Workspace checkout for --from-disk (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Compare a reference baseline with a current one
    Compare { reference: PathBuf, current: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    dotenv::dotenv().ok();

    match run(&cli) {
        Ok(()) => {
            if !cli.quiet && !cli.json {
                println!("✅ Success");
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let manager = GoldenCopyManager::new(&settings.engine)?;
    let project = &settings.project.name;
    let cancel = CancelToken::new();

    match &cli.command {
        Commands::Sync { force } => handle_sync(cli, &settings, &manager, *force, &cancel),
        Commands::Status => {
            let status = manager.status(project)?;
            emit(cli, &status, || render::status(&status))
        }
        Commands::List => {
            let databases = manager.list()?;
            emit(cli, &databases, || render::list(&databases))
        }
        Commands::Clone { worktree } => {
            let name = naming::workspace_database_name(&settings.project, worktree.as_deref());
            let engine = CloneEngine::new(&manager, &settings.engine.migrations_dir);
            say(cli, &format!("Cloning {} into {}...", golden_database_name(project), name));
            let result = engine.clone(project, &name, &cancel)?;
            emit(cli, &result, || render::clone_result(&result))
        }
        Commands::Drop { name } => {
            let engine = CloneEngine::new(&manager, &settings.engine.migrations_dir);
            if engine.drop(name)? {
                println!("Dropped {}", name);
            } else {
                println!("{} does not exist", name);
            }
            Ok(())
        }
        Commands::Reinit {
            worktree,
            workspace,
        } => {
            let name = naming::workspace_database_name(&settings.project, worktree.as_deref());
            let workspace = workspace_path(workspace.as_deref())?;
            let engine = CloneEngine::new(&manager, &settings.engine.migrations_dir);
            say(cli, &format!("Re-cloning {} from {}...", name, golden_database_name(project)));
            let result = engine.reinit(project, &name, &workspace, &cancel)?;
            emit(cli, &result, || render::clone_result(&result))
        }
        Commands::MigrationStatus {
            worktree,
            workspace,
        } => {
            let name = naming::workspace_database_name(&settings.project, worktree.as_deref());
            let workspace = workspace_path(workspace.as_deref())?;
            let engine = CloneEngine::new(&manager, &settings.engine.migrations_dir);
            let state = engine
                .migration_state(&name, &workspace)
                .with_context(|| format!("Failed to check migrations of {}", name))?;
            emit(cli, &state, || render::migration_state(&name, &state))
        }
        Commands::CheckFreshness => {
            let decision = manager.needs_sync(project, None)?;
            emit(cli, &decision, || format!("{}\n", render::decision(&decision)))
        }
        Commands::Analyze => handle_analyze(cli, &settings, &manager),
        Commands::Baseline { action } => handle_baseline(cli, &settings, &manager, action),
    }
}

fn handle_sync(
    cli: &Cli,
    settings: &Settings,
    manager: &GoldenCopyManager,
    force: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let project = &settings.project.name;
    if !force {
        let decision = manager.needs_sync(project, None)?;
        if !decision.needs_sync {
            return emit(cli, &decision, || {
                format!("{}\nUse --force to sync anyway\n", render::decision(&decision))
            });
        }
        log::info!("sync needed: {}", decision.reason);
    }

    let progress = |msg: &str| say(cli, &format!("→ {}", msg));
    let result = manager.sync(project, &settings.project.source, cancel, Some(&progress))?;
    emit(cli, &result, || render::sync_result(&result))
}

#[derive(Serialize)]
struct Analysis {
    tables: Vec<analyzer::TableInfo>,
    suggested_exclusions: Vec<String>,
    filter_index_warnings: Vec<String>,
    schema_tables: usize,
    /// Source schema against the golden copy, when one exists
    schema_diff: Option<analyzer::SchemaDiff>,
}

fn handle_analyze(cli: &Cli, settings: &Settings, manager: &GoldenCopyManager) -> Result<()> {
    let source = &settings.project.source;
    let info = goldcopy::parse_connection_string(&source.url).context("Invalid project.source.url")?;
    let timeout = settings.engine.introspection_timeout();
    let executor = PgExecutor::connect(&info, timeout)
        .with_context(|| format!("Failed to connect to {}", info.masked()))?;
    executor.set_statement_timeout(timeout)?;

    let tables = analyzer::list_tables(&executor)?;
    let suggested = suggest_exclusions(&tables, source.size_threshold_mb);
    let filters = source.row_filter_map();
    let filter_tables: Vec<String> = filters.keys().cloned().collect();
    let warnings = if filter_tables.is_empty() {
        Vec::new()
    } else {
        match analyzer::indexes(&executor, &filter_tables) {
            Ok(indexes) => analyzer::filter_index_warnings(&filters, &indexes),
            Err(e) => {
                log::warn!("could not check indexes for row filters: {}", e);
                Vec::new()
            }
        }
    };
    let snapshot = analyzer::schema_snapshot(&executor)?;

    let project = &settings.project.name;
    let schema_diff = if manager.exists(project)? {
        let golden = manager.server().connect(&golden_database_name(project))?;
        Some(diff_schemas(&analyzer::schema_snapshot(&golden)?, &snapshot))
    } else {
        None
    };

    let analysis = Analysis {
        tables,
        suggested_exclusions: suggested,
        filter_index_warnings: warnings,
        schema_tables: snapshot.len(),
        schema_diff,
    };
    emit(cli, &analysis, || {
        let mut out = render::analysis(
            &analysis.tables,
            &analysis.suggested_exclusions,
            &analysis.filter_index_warnings,
            &snapshot,
        );
        if let Some(diff) = &analysis.schema_diff {
            out.push_str(&render::schema_diff(diff));
        }
        out
    })
}

fn handle_baseline(
    cli: &Cli,
    settings: &Settings,
    manager: &GoldenCopyManager,
    action: &BaselineAction,
) -> Result<()> {
    match action {
        BaselineAction::Capture {
            database,
            from_disk,
            workspace,
            output,
        } => {
            let baseline = if *from_disk {
                let workspace = workspace_path(workspace.as_deref())?;
                MigrationBaseline::capture_from_disk(&workspace.join(&settings.engine.migrations_dir))?
            } else {
                let database = database
                    .clone()
                    .unwrap_or_else(|| golden_database_name(&settings.project.name));
                let executor = manager.server().connect(&database)?;
                MigrationBaseline::capture_from_database(&executor)?
            };
            baseline.save(output)?;
            println!(
                "Captured {} migrations to {}",
                baseline.total,
                output.display()
            );
            Ok(())
        }
        BaselineAction::Compare { reference, current } => {
            let reference = MigrationBaseline::load(reference)?;
            let current = MigrationBaseline::load(current)?;
            let compatibility = compare_baselines(Some(&reference), Some(&current));
            emit(cli, &compatibility, || format!("Compatibility: {}\n", compatibility))
        }
    }
}

/// Progress line on stdout, suppressed with `--json`.
fn say(cli: &Cli, msg: &str) {
    if !cli.json {
        println!("{}", msg);
    }
}

fn workspace_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

/// Print `value` as JSON with `--json`, otherwise the rendered text.
fn emit<T: Serialize>(cli: &Cli, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}
