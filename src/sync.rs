//! One synchronization run for one journal.
//!
//! Phases run strictly in order inside a single transaction:
//! entries, comment metadata, comment bodies, reference data, then the
//! watermarks are written and the transaction committed.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::db;
use crate::model::{Comment, SyncItemKind, SyncStatus, SyncSummary, UserMapping};
use crate::remote::{ExportSession, JournalService, RemoteError, SessionContext};
use crate::state::{self, MetaCache};
use crate::userpics::{self, USERPICS_DIR};

/// Work bounds for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_entries: Option<usize>,
    pub max_meta_pages: usize,
    pub entries_only: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_entries: settings.max_entries_per_run,
            max_meta_pages: settings.max_comment_meta_pages,
            entries_only: false,
        }
    }
}

/// Render the run summary as `N new entries, M new comments[, K errors]`.
pub fn summary_line(summary: &SyncSummary) -> String {
    let mut line = format!(
        "{} new entries, {} new comments",
        summary.new_entries, summary.new_comments
    );
    if summary.errors > 0 {
        line.push_str(&format!(", {} errors", summary.errors));
    }
    line
}

struct EntryOutcome {
    cursor: String,
    new_entries: u64,
    errors: u64,
}

/// Phase 1: fetch and upsert every `L-` item reported since `last_sync`.
///
/// The cursor follows every processed item, including entries that came back
/// empty or malformed. Only a transport failure holds it, so the next run asks
/// for that entry again.
async fn sync_entries(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    last_sync: &str,
    max_entries: Option<usize>,
) -> Result<EntryOutcome> {
    let mut outcome = EntryOutcome {
        cursor: last_sync.to_string(),
        new_entries: 0,
        errors: 0,
    };

    let items = match remote.sync_items(ctx, last_sync).await {
        Ok(items) => items,
        Err(err) => {
            warn!(journal = ctx.journal(), error = %err, "sync item listing failed");
            outcome.errors += 1;
            return Ok(outcome);
        }
    };
    debug!(count = items.len(), "sync items received");

    let mut fetched = 0usize;
    let mut blocked = false;
    for item in &items {
        if let SyncItemKind::Entry(item_id) = item.kind() {
            match remote.fetch_entry(ctx, item_id).await {
                Ok(Some(entry)) => {
                    if db::upsert_entry(conn, &entry).await? {
                        outcome.new_entries += 1;
                    } else {
                        debug!(item_id, "entry updated");
                    }
                }
                Ok(None) => {
                    warn!(item_id, "entry fetch returned nothing");
                    outcome.errors += 1;
                }
                Err(err) => {
                    warn!(item_id, error = %err, "entry fetch failed");
                    outcome.errors += 1;
                    blocked |= err.is_transport();
                }
            }
            fetched += 1;
        }

        if !blocked {
            if item.time.as_str() >= outcome.cursor.as_str() {
                outcome.cursor = item.time.clone();
            } else {
                warn!(item = %item.item, time = %item.time, cursor = %outcome.cursor, "sync item older than cursor");
            }
        }

        if max_entries.is_some_and(|cap| fetched >= cap) {
            info!(cap = fetched, "entry cap reached");
            break;
        }
    }
    Ok(outcome)
}

struct CommentOutcome {
    new_comments: u64,
    /// Set only when both comment phases completed.
    watermark: Option<i64>,
}

/// Phase 2: page comment metadata from just past the watermark into the cache.
/// Returns the highest comment id seen.
async fn sync_comment_meta(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    session: &ExportSession,
    cache: &mut MetaCache,
    last_max: i64,
    max_pages: usize,
) -> Result<std::result::Result<i64, RemoteError>> {
    let mut new_max = last_max;
    let mut pages = 0usize;
    loop {
        let page = match remote.comment_meta_page(ctx, session, new_max + 1).await {
            Ok(page) => page,
            Err(err) => return Ok(Err(err)),
        };
        pages += 1;
        for mapping in &page.usermap {
            db::upsert_user_mapping(conn, mapping).await?;
        }
        if page.comments.is_empty() {
            debug!(start = new_max + 1, "empty comment metadata page");
            break;
        }
        for (id, meta) in page.comments {
            new_max = new_max.max(id);
            cache.insert(id, meta);
        }
        debug!(page = pages, new_max, server_max = page.max_id, "comment metadata page");
        if new_max >= page.max_id {
            break;
        }
        if pages >= max_pages {
            info!(pages, new_max, "comment metadata page limit reached");
            break;
        }
    }
    Ok(Ok(new_max))
}

/// Phase 3: fetch bodies for cached ids in `(last_max, new_max]`.
///
/// Body pages are neither dense nor contiguous, so every candidate id not yet
/// returned by an earlier page starts a fetch of its own.
#[allow(clippy::too_many_arguments)]
async fn sync_comment_bodies(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    session: &ExportSession,
    cache: &MetaCache,
    last_max: i64,
    new_max: i64,
) -> Result<std::result::Result<u64, RemoteError>> {
    let users = db::get_user_map(conn).await?;
    let mut fetched: HashSet<i64> = HashSet::new();
    let mut new_comments = 0u64;

    for id in cache.ids_between(last_max, new_max) {
        if fetched.contains(&id) {
            continue;
        }
        let bodies = match remote.comment_body_page(ctx, session, id).await {
            Ok(bodies) => bodies,
            Err(err) => return Ok(Err(err)),
        };
        fetched.insert(id);
        for body in bodies {
            let meta = cache.get(body.id).cloned().unwrap_or_default();
            let poster_id = body.poster_id.or(meta.poster_id);
            let comment = Comment {
                id: body.id,
                entry_id: body.entry_id,
                date: body.date,
                date_unix: body.date_unix,
                parent_id: body.parent_id,
                poster_id,
                user: poster_id.and_then(|p| users.get(&p).cloned()),
                subject: body.subject,
                body: body.body,
                state: meta.state,
            };
            if db::upsert_comment(conn, &comment).await? {
                new_comments += 1;
            }
            fetched.insert(body.id);
        }
    }
    Ok(Ok(new_comments))
}

async fn sync_comments(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    session: &ExportSession,
    journal_dir: &Path,
    last_max: i64,
    max_pages: usize,
) -> Result<CommentOutcome> {
    let mut cache = MetaCache::load(journal_dir).await?;
    let meta = sync_comment_meta(conn, remote, ctx, session, &mut cache, last_max, max_pages).await?;
    cache.save().await?;

    let new_max = match meta {
        Ok(new_max) => new_max,
        Err(err) => {
            warn!(journal = ctx.journal(), error = %err, "comment metadata fetch failed");
            return Ok(CommentOutcome {
                new_comments: 0,
                watermark: None,
            });
        }
    };

    match sync_comment_bodies(conn, remote, ctx, session, &cache, last_max, new_max).await? {
        Ok(new_comments) => Ok(CommentOutcome {
            new_comments,
            watermark: Some(new_max),
        }),
        Err(err) => {
            warn!(journal = ctx.journal(), error = %err, "comment body fetch failed");
            Ok(CommentOutcome {
                new_comments: 0,
                watermark: None,
            })
        }
    }
}

/// Phase 4: moods, tags, own user mapping and userpics. Returns the error count.
async fn sync_reference_data(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    journal_dir: &Path,
) -> Result<u64> {
    let mut errors = 0u64;

    match remote.moods(ctx).await {
        Ok(moods) => {
            for mood in &moods {
                db::upsert_mood(conn, mood).await?;
            }
            debug!(count = moods.len(), "moods refreshed");
        }
        Err(err) => {
            warn!(error = %err, "mood list fetch failed");
            errors += 1;
        }
    }

    match remote.tags(ctx).await {
        Ok(tags) => {
            for tag in &tags {
                db::upsert_tag(conn, tag).await?;
            }
            debug!(count = tags.len(), "tags refreshed");
        }
        Err(err) => {
            warn!(error = %err, "tag list fetch failed");
            errors += 1;
        }
    }

    match remote.user_info(ctx).await {
        Ok(info) => {
            if let Some(user_id) = info.user_id {
                db::upsert_user_mapping(
                    conn,
                    &UserMapping {
                        poster_id: user_id,
                        name: info.username,
                    },
                )
                .await?;
            }
        }
        Err(err) => {
            warn!(error = %err, "user info fetch failed");
            errors += 1;
        }
    }

    if ctx.is_own_journal() {
        match remote.userpics(ctx).await {
            Ok(pics) => {
                let report =
                    userpics::archive_userpics(conn, remote, &pics, &journal_dir.join(USERPICS_DIR))
                        .await?;
                errors += report.errors;
            }
            Err(err) => {
                warn!(error = %err, "userpic list fetch failed");
                errors += 1;
            }
        }
    }

    Ok(errors)
}

/// Run every phase for one journal against its store.
///
/// Store and file-system failures and a failed login end the run with an
/// error and nothing committed. Remote failures below that are counted in
/// the summary.
pub async fn run_sync(
    pool: &SqlitePool,
    remote: &dyn JournalService,
    ctx: &SessionContext,
    journal_dir: &Path,
    opts: &SyncOptions,
) -> Result<SyncSummary> {
    let session = remote
        .login(ctx)
        .await
        .with_context(|| format!("login failed for {}", ctx.journal()))?;

    let mut tx = pool.begin().await?;
    let seed = state::read_legacy_last(journal_dir)
        .await?
        .unwrap_or_default();
    let status = db::get_sync_status_or_insert(&mut tx, &seed).await?;
    info!(
        journal = ctx.journal(),
        last_sync = %status.last_sync,
        last_max_comment_id = status.last_max_comment_id,
        "starting sync"
    );

    let mut summary = SyncSummary::default();
    let entries = sync_entries(&mut tx, remote, ctx, &status.last_sync, opts.max_entries).await?;
    summary.new_entries = entries.new_entries;
    summary.errors += entries.errors;

    let mut next = SyncStatus {
        last_sync: entries.cursor,
        last_max_comment_id: status.last_max_comment_id,
    };

    if opts.entries_only {
        db::set_sync_status(&mut tx, &next).await?;
        tx.commit().await?;
        info!(journal = ctx.journal(), "entries-only run finished");
        return Ok(summary);
    }

    let comments = sync_comments(
        &mut tx,
        remote,
        ctx,
        &session,
        journal_dir,
        status.last_max_comment_id,
        opts.max_meta_pages.max(1),
    )
    .await?;
    summary.new_comments = comments.new_comments;
    match comments.watermark {
        Some(max) => next.last_max_comment_id = max.max(status.last_max_comment_id),
        None => summary.errors += 1,
    }

    summary.errors += sync_reference_data(&mut tx, remote, ctx, journal_dir).await?;

    db::set_sync_status(&mut tx, &next).await?;
    tx.commit().await?;
    info!(
        journal = ctx.journal(),
        last_sync = %next.last_sync,
        last_max_comment_id = next.last_max_comment_id,
        summary = %summary_line(&summary),
        "sync committed"
    );
    Ok(summary)
}
