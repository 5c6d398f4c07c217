//! Local copies of images referenced from entry bodies.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::model::CachedImage;
use crate::remote::JournalService;
use crate::userpics::extension_for;

pub const IMAGES_DIR: &str = "images";

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*)(["'])(https?://[^"']+)(["'])"#)
        .expect("valid img src regex")
});

/// Remote image URLs referenced by `<img src=...>` in `html`, in order, without repeats.
pub fn image_urls(html: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in IMG_SRC.captures_iter(html) {
        let url = caps[3].to_string();
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}

/// Point cached image sources at `{prefix}{filename}`; others stay remote.
pub fn localise_image_sources(html: &str, files: &HashMap<&str, &str>, prefix: &str) -> String {
    IMG_SRC
        .replace_all(html, |caps: &Captures<'_>| match files.get(&caps[3]) {
            Some(file) => format!("{}{}{}{}{}", &caps[1], &caps[2], prefix, file, &caps[4]),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Whether a fetch should be tried now. Cached images are never fetched again;
/// failed ones wait out `retry_after` unless `force` is set.
pub fn should_attempt(
    record: &CachedImage,
    now: DateTime<Utc>,
    retry_after: Duration,
    force: bool,
) -> bool {
    if record.cached {
        return false;
    }
    if force {
        return true;
    }
    match record.date_last_attempted {
        None => true,
        Some(last) => now.timestamp() - last >= retry_after.num_seconds(),
    }
}

fn extension_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        ".png"
    } else if path.ends_with(".gif") {
        ".gif"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        ".jpg"
    } else {
        ""
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageReport {
    pub cached: u64,
    pub failed: u64,
    pub deferred: u64,
}

/// Make sure every url has a cache record and try to download the uncached ones.
pub async fn cache_images(
    conn: &mut SqliteConnection,
    remote: &dyn JournalService,
    urls: &[String],
    images_dir: &Path,
    retry_after: Duration,
    force: bool,
) -> Result<ImageReport> {
    tokio::fs::create_dir_all(images_dir)
        .await
        .with_context(|| format!("failed to create {}", images_dir.display()))?;

    let mut report = ImageReport::default();
    for url in urls {
        let now = Utc::now();
        let record = db::get_or_create_cached_image_record(conn, url, now).await?;
        if record.cached {
            continue;
        }
        if !should_attempt(&record, now, retry_after, force) {
            debug!(url = %url, "image in retry cool-down");
            report.deferred += 1;
            continue;
        }

        let download = match remote.download(url).await {
            Ok(d) => d,
            Err(err) => {
                warn!(url = %url, error = %err, "image download failed");
                db::report_image_attempted(conn, record.id, now).await?;
                report.failed += 1;
                continue;
            }
        };
        let mut ext = extension_for(download.content_type.as_deref());
        if ext.is_empty() {
            ext = extension_from_url(url);
        }
        let filename = format!("{}{}", Uuid::new_v4(), ext);
        if let Err(err) = tokio::fs::write(images_dir.join(&filename), &download.bytes).await {
            warn!(url = %url, error = %err, "could not write image");
            db::report_image_attempted(conn, record.id, now).await?;
            report.failed += 1;
            continue;
        }
        db::report_image_cached(conn, record.id, &filename, now).await?;
        report.cached += 1;
    }
    Ok(report)
}
