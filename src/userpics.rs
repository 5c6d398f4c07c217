use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqliteConnection;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db;
use crate::model::Icon;
use crate::remote::{JournalService, Userpics};

pub const USERPICS_DIR: &str = "userpics";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[*?\\/:<> "|]"#).expect("valid userpic filename regex"));

/// Filename stem for a picture keyword: characters unsafe on common file
/// systems become `_`.
pub fn sanitize_keyword(keyword: &str) -> String {
    UNSAFE_CHARS.replace_all(keyword, "_").into_owned()
}

/// Same as [`sanitize_keyword`] with every non-ASCII character replaced too.
pub fn ascii_keyword(keyword: &str) -> String {
    sanitize_keyword(keyword)
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect()
}

pub fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
        Some("image/gif") => ".gif",
        Some("image/jpeg") => ".jpg",
        Some("image/png") => ".png",
        _ => "",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserpicReport {
    pub downloaded: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Download every picture into `dir` and record it as an icon row.
///
/// A keyword whose stored url is unchanged and whose file is still on disk is
/// left alone. Download and write failures are counted, not returned; only
/// store errors abort.
pub async fn archive_userpics(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    pics: &Userpics,
    dir: &Path,
) -> Result<UserpicReport> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut report = UserpicReport::default();
    for (keyword, url) in pics.iter() {
        if let Some(existing) = db::get_icon(conn, keyword).await? {
            let on_disk = existing
                .filename
                .as_deref()
                .map(|f| dir.join(f).exists())
                .unwrap_or(false);
            if on_disk && existing.url.as_deref() == Some(url) {
                debug!(keyword, "userpic unchanged");
                report.skipped += 1;
                continue;
            }
        }

        let download = match remote.download(url).await {
            Ok(d) => d,
            Err(err) => {
                warn!(keyword, url, error = %err, "userpic download failed");
                report.errors += 1;
                continue;
            }
        };
        let ext = extension_for(download.content_type.as_deref());

        let primary = format!("{}{}", sanitize_keyword(keyword), ext);
        let filename = match tokio::fs::write(dir.join(&primary), &download.bytes).await {
            Ok(()) => primary,
            Err(err) => {
                let fallback = format!("{}{}", ascii_keyword(keyword), ext);
                debug!(keyword, error = %err, fallback = %fallback, "retrying userpic with ascii name");
                match tokio::fs::write(dir.join(&fallback), &download.bytes).await {
                    Ok(()) => fallback,
                    Err(err) => {
                        warn!(keyword, error = %err, "could not write userpic");
                        report.errors += 1;
                        continue;
                    }
                }
            }
        };

        db::upsert_icon(
            conn,
            &Icon {
                keywords: keyword.to_string(),
                filename: Some(filename),
                url: Some(url.to_string()),
            },
        )
        .await?;
        report.downloaded += 1;
    }

    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        errors = report.errors,
        "userpics archived"
    );
    Ok(report)
}
