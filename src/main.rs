use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lj_archiver::config;
use lj_archiver::db;
use lj_archiver::remote::RemoteClient;
use lj_archiver::sync::{self, SyncOptions};

#[derive(Debug, Parser)]
#[command(author, version, about = "Incrementally archive LiveJournal-style journals into SQLite")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only log warnings and errors; print the summary only when something changed
    #[arg(long, short)]
    quiet: bool,

    /// Stop fetching entries after this many (overrides sync.max_entries_per_run)
    #[arg(long)]
    max_entries: Option<usize>,

    /// Sync entries only and skip comments and reference data
    #[arg(long)]
    entries_only: bool,

    /// Print an example config and exit
    #[arg(long)]
    print_example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    if args.print_example_config {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let mut opts = SyncOptions::from_settings(&cfg.sync);
    if args.max_entries.is_some() {
        opts.max_entries = args.max_entries;
    }
    opts.entries_only = args.entries_only;

    let remote = RemoteClient::new(Duration::from_secs(cfg.server.timeout_secs))?
        .with_page_size(cfg.sync.comment_page_size);

    let mut failed = 0usize;
    for journal in cfg.journal_names() {
        let ctx = cfg.session_for(&journal)?;
        let journal_dir = cfg.journal_dir(&journal);
        let pool = db::open_journal_store(&journal_dir).await?;

        match sync::run_sync(&pool, &remote, &ctx, &journal_dir, &opts).await {
            Ok(summary) => {
                if summary.changed() || summary.errors > 0 || !args.quiet {
                    println!("{}: {}", journal, sync::summary_line(&summary));
                }
            }
            Err(err) => {
                error!(journal = %journal, error = ?err, "sync failed");
                failed += 1;
            }
        }
        pool.close().await;
    }

    if failed > 0 {
        anyhow::bail!("{failed} journal(s) failed to sync");
    }
    info!("all journals synced");
    Ok(())
}
