use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lj_archiver::config::{self, Config};
use lj_archiver::db;
use lj_archiver::images::{self, IMAGES_DIR};
use lj_archiver::remote::{self, RemoteClient};
use lj_archiver::render;

#[derive(Debug, Parser)]
#[command(
    about = "Render archived journals to static HTML. Remote images in entries are cached under images/ and linked locally."
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Export only this journal (defaults to every configured journal)
    #[arg(long)]
    journal: Option<String>,

    /// Retry images that failed recently, ignoring the cool-down
    #[arg(long)]
    force: bool,

    /// Render without fetching any images
    #[arg(long)]
    no_images: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let journals = match &args.journal {
        Some(j) => vec![j.clone()],
        None => cfg.journal_names(),
    };
    for journal in journals {
        export_journal(&cfg, &args, &journal).await?;
    }
    Ok(())
}

async fn export_journal(cfg: &Config, args: &Args, journal: &str) -> Result<()> {
    let journal_dir = cfg.journal_dir(journal);
    if !journal_dir.join(db::DB_FILE).exists() {
        anyhow::bail!(
            "no archive for {} at {}; run lj-archiver first",
            journal,
            journal_dir.display()
        );
    }
    let pool = db::open_journal_store(&journal_dir).await?;
    let mut conn = pool.acquire().await?;

    if !args.no_images {
        let snapshot = db::load_snapshot(&mut conn).await?;
        let mut urls: Vec<String> = Vec::new();
        for entry in &snapshot.entries {
            for url in images::image_urls(&entry.body) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        if !urls.is_empty() {
            let remote = RemoteClient::new(Duration::from_secs(cfg.server.timeout_secs))?;
            let retry_after = cfg.sync.image_retry_after();
            let report = images::cache_images(
                &mut conn,
                &remote,
                &urls,
                &journal_dir.join(IMAGES_DIR),
                retry_after,
                args.force,
            )
            .await
            .context("failed to cache images")?;
            info!(
                journal,
                cached = report.cached,
                failed = report.failed,
                deferred = report.deferred,
                "images processed"
            );
        }
    }

    let snapshot = db::load_snapshot(&mut conn).await?;
    drop(conn);
    pool.close().await;

    let report = render::write_site(
        &journal_dir,
        journal,
        remote::site_base(&cfg.server.url),
        &snapshot,
    )
    .await?;
    println!(
        "Wrote {} entry pages, {} history pages and {} tag pages under {}",
        report.entry_pages,
        report.history_pages,
        report.tag_pages,
        journal_dir.display()
    );
    println!(
        "Open {} in a browser",
        journal_dir.join("history").join("page-1.html").display()
    );
    Ok(())
}
