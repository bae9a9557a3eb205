//! # repodoc CLI
//!
//! The `repodoc` binary initializes the database, runs pipelines in the
//! foreground, inspects projects, sweeps expired run directories, and
//! starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! repodoc --config ./config/repodoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repodoc init` | Create the SQLite database and run schema migrations |
//! | `repodoc submit <url>` | Document a git repository and wait for the result |
//! | `repodoc submit --archive <zip>` | Document a zip archive and wait for the result |
//! | `repodoc status <id>` | Show a project's status and artifacts |
//! | `repodoc list` | List an owner's projects |
//! | `repodoc sweep` | Remove run directories older than the retention period |
//! | `repodoc serve` | Start the HTTP server |
//!
//! Log verbosity is controlled with `REPODOC_LOG` (an `EnvFilter`
//! directive, default `info`). Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use repodoc::config::{self, Config};
use repodoc::models::{ProjectStatus, Submission};
use repodoc::pipeline::Orchestrator;
use repodoc::progress::{ProgressMode, ProgressReporter};
use repodoc::store::sqlite::SqliteStore;
use repodoc::store::Store;
use repodoc::sweep::Sweeper;
use repodoc::{get, migrate, server};

/// repodoc — generate documentation for git repositories and zip archives
/// with an external analysis tool.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(name = "repodoc", version, about = "Repository documentation pipeline")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repodoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage root.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Submit a repository and run its pipeline to completion.
    ///
    /// Exits non-zero if the project ends in `failed`. Ctrl-C cancels the
    /// run, which then ends in `failed`.
    Submit {
        /// Git URL to clone.
        #[arg(required_unless_present = "archive", conflicts_with = "archive")]
        url: Option<String>,

        /// Local zip archive to document instead of a git URL.
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Owner the project is recorded under.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Display name; derived from the URL or archive name if omitted.
        #[arg(long)]
        name: Option<String>,

        /// Emit progress as JSON lines on stderr instead of log lines.
        #[arg(long, conflicts_with = "quiet")]
        json_progress: bool,

        /// Suppress progress events; only the final result is printed.
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show a project's status and artifacts.
    Status {
        /// Project id.
        id: String,

        /// Only show the project if it belongs to this owner.
        #[arg(long)]
        owner: Option<String>,

        /// Print the full project (including artifact contents) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List an owner's projects, newest first.
    List {
        #[arg(long, default_value = "local")]
        owner: String,

        #[arg(long)]
        json: bool,
    },

    /// Remove materialized-source directories older than the retention period.
    Sweep {
        /// Override `storage.retention_days`.
        #[arg(long)]
        days: Option<u64>,

        /// Show what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind`, fails runs interrupted by a previous
    /// process, and runs the periodic retention sweeper.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.repos_root).with_context(|| {
                format!(
                    "Failed to create storage root: {}",
                    cfg.storage.repos_root.display()
                )
            })?;
            println!("Database initialized successfully.");
        }
        Commands::Submit {
            url,
            archive,
            owner,
            name,
            json_progress,
            quiet,
        } => {
            let mode = if quiet {
                ProgressMode::Off
            } else if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::Log
            };
            let status = run_submit(&cfg, url, archive, &owner, name, mode).await?;
            if status != ProjectStatus::Completed {
                std::process::exit(1);
            }
        }
        Commands::Status { id, owner, json } => {
            get::run_status(&cfg, &id, owner.as_deref(), json).await?;
        }
        Commands::List { owner, json } => {
            get::run_list(&cfg, &owner, json).await?;
        }
        Commands::Sweep { days, dry_run } => {
            run_sweep(&cfg, days, dry_run).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("REPODOC_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

async fn run_submit(
    cfg: &Config,
    url: Option<String>,
    archive: Option<PathBuf>,
    owner: &str,
    name: Option<String>,
    mode: ProgressMode,
) -> anyhow::Result<ProjectStatus> {
    let mut submission = match (url, archive) {
        (_, Some(archive)) => stage_archive(cfg, &archive)?,
        (Some(url), None) => Submission::git(url),
        (None, None) => anyhow::bail!("either a git URL or --archive is required"),
    };
    submission.name = name;

    let store = Arc::new(SqliteStore::open(cfg).await?);
    let progress: Arc<dyn ProgressReporter> = Arc::from(mode.reporter());
    let orchestrator = Orchestrator::from_config(cfg, store.clone()).with_progress(progress);

    let project = orchestrator.submit(owner, submission).await?;
    println!("Submitted project {} ({})", project.id, project.name);

    let canceller = {
        let orchestrator = orchestrator.clone();
        let id = project.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling run for {}", id);
                orchestrator.cancel(&id);
            }
        })
    };
    orchestrator.wait(&project.id).await;
    canceller.abort();

    let finished = store
        .get_project(&project.id)
        .await?
        .with_context(|| format!("project disappeared: {}", project.id))?;
    let artifacts = store.list_artifacts(&project.id).await?;
    store.close().await;

    println!("Project {} {}", finished.id, finished.status);
    for a in &artifacts {
        println!("  [{}] {}", a.kind.as_str(), a.name);
    }
    Ok(finished.status)
}

/// Copy a user's archive into the uploads dir; acquisition consumes the
/// staged copy, never the original.
fn stage_archive(cfg: &Config, archive: &std::path::Path) -> anyhow::Result<Submission> {
    let file_name = archive
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .with_context(|| format!("not a file: {}", archive.display()))?;

    let uploads = cfg.storage.uploads_dir();
    std::fs::create_dir_all(&uploads)
        .with_context(|| format!("Failed to create uploads dir: {}", uploads.display()))?;
    let staged = uploads.join(format!("{}.zip", Uuid::new_v4()));
    std::fs::copy(archive, &staged)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;

    Ok(Submission::archive(staged, file_name))
}

async fn run_sweep(cfg: &Config, days: Option<u64>, dry_run: bool) -> anyhow::Result<()> {
    let max_age = match days {
        Some(d) => config::days(d),
        None => cfg.storage.retention(),
    };
    let sweeper = Sweeper::new(&cfg.storage.repos_root, max_age).dry_run(dry_run);
    let report = tokio::task::spawn_blocking(move || sweeper.sweep()).await??;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for path in &report.removed {
        println!("{} {}", verb, path.display());
    }
    for (path, reason) in &report.failed {
        eprintln!("Failed {}: {}", path.display(), reason);
    }
    println!(
        "{} {} of {} directories ({} failed).",
        verb,
        report.removed.len(),
        report.scanned,
        report.failed.len()
    );
    Ok(())
}
