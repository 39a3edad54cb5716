use anyhow::{bail, Context, Result};
use bugz_core::ReconcileOptions;
use bugz_storage::BugzStore;
use bugz_sync::{rederive_cycle, BugSyncer, JsonDirSource, SyncOptions};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_config, Config, Overrides};

#[derive(Parser, Debug)]
#[command(name = "bugz")]
#[command(about = "Mirror SRU tracking bugs into a local cache", long_about = None)]
struct Cli {
    /// YAML config file
    #[arg(long, global = true, env = "BUGZ_CONFIG_FILE")]
    config: Option<PathBuf>,
    /// Cache database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, reconcile and cache tracking bugs
    Sync {
        /// Directory of `<id>.json` tracker dumps
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Recompute cycle stats for every cached bug of a cycle
    Rederive { cycle: String },
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("BUGZ_LOG_LEVEL") {
        level
    } else if let Some(level) = config.log_level.clone() {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging already initialised");
    }
}

fn open_store(config: &Config) -> Result<BugzStore> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    BugzStore::open(&config.db_path)
        .with_context(|| format!("Failed to open cache {}", config.db_path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let source = match &cli.command {
        Commands::Sync { source, .. } => source.clone(),
        Commands::Rederive { .. } => None,
    };
    let config = load_config(
        cli.config.as_deref(),
        Overrides {
            db_path: cli.db.clone(),
            source_dir: source,
            debug: cli.debug,
        },
    )?;
    init_logging(&config);
    info!(event = "bugz_start", db = %config.db_path.display());

    match cli.command {
        Commands::Sync { ids, .. } => {
            let Some(source_dir) = config.source_dir.clone() else {
                bail!("No bug source: pass --source or set source_dir in the config");
            };
            let mut store = open_store(&config)?;
            let options = SyncOptions {
                reconcile: ReconcileOptions::default()
                    .with_extra_series(config.extra_series.iter().cloned()),
                derive_stats: config.derive_stats,
            };
            let syncer = BugSyncer::new(JsonDirSource::new(source_dir), options);
            let report = syncer.sync_bugs(&mut store, &ids);

            println!(
                "synced {} bug(s): {} tag(s), {} task(s), {} stat(s)",
                report.bugs_synced,
                report.tags_written,
                report.tasks_written,
                report.stats_written
            );
            for failure in &report.failures {
                println!("- {} failed: {}", failure.bug_id, failure.error);
            }
            if !report.is_clean() {
                bail!("{} bug(s) failed to sync", report.failures.len());
            }
        }
        Commands::Rederive { cycle } => {
            let store = open_store(&config)?;
            let stats = rederive_cycle(&store, &cycle)
                .with_context(|| format!("Failed to rederive cycle {cycle}"))?;
            if stats.is_empty() {
                println!("No cached bugs in cycle {cycle}");
            }
            for stat in &stats {
                println!(
                    "- {} {}/{} total={}s",
                    stat.id,
                    stat.series.as_deref().unwrap_or("-"),
                    stat.package.as_deref().unwrap_or("-"),
                    stat.total
                );
            }
        }
    }

    Ok(())
}
