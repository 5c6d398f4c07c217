//! Local journal store: pool setup, embedded migrations and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by bulk reads (e.g., the render snapshot).
//! - `repo`: SQL-only functions that upsert and read back entities.
//!
//! Repository functions take a `&mut SqliteConnection`, so the same calls run
//! against a pooled connection or inside the transaction that spans one sync
//! run.

pub mod model;
pub mod repo;

pub use model::JournalSnapshot;
pub use repo::*;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;

pub type Pool = SqlitePool;

/// File name of the per-journal database.
pub const DB_FILE: &str = "journal.db";

/// Connect to the SQLite file at `db_path`, creating it and its parent
/// directory if missing.
pub async fn init_pool(db_path: &Path) -> Result<Pool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&url).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Open (creating if needed) the database inside a journal directory and bring
/// its schema up to date.
pub async fn open_journal_store(journal_dir: &Path) -> Result<Pool> {
    let path = journal_dir.join(DB_FILE);
    let pool = init_pool(&path)
        .await
        .with_context(|| format!("failed to open local store {}", path.display()))?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
