//! Per-journal files kept next to the database: the comment metadata cache and
//! the legacy `.last` watermark file.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{CommentMeta, SyncStatus};

pub const META_CACHE_FILE: &str = "comment_meta.json";
pub const LEGACY_LAST_FILE: &str = ".last";

/// Comment metadata accumulated across runs, keyed by comment id.
#[derive(Debug, Clone, Default)]
pub struct MetaCache {
    path: PathBuf,
    comments: BTreeMap<i64, CommentMeta>,
}

impl MetaCache {
    pub async fn load(journal_dir: &Path) -> Result<Self> {
        let path = journal_dir.join(META_CACHE_FILE);
        let comments = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        debug!(path = %path.display(), "loaded comment metadata cache");
        Ok(Self { path, comments })
    }

    pub fn insert(&mut self, id: i64, meta: CommentMeta) {
        self.comments.insert(id, meta);
    }

    pub fn get(&self, id: i64) -> Option<&CommentMeta> {
        self.comments.get(&id)
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Cached ids in `(after, up_to]`, ascending.
    pub fn ids_between(&self, after: i64, up_to: i64) -> Vec<i64> {
        if up_to <= after {
            return Vec::new();
        }
        self.comments
            .range(after + 1..=up_to)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Written to a temporary file, then renamed over the cache.
    pub async fn save(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.comments)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Read `{journal}/.last`: the cursor on the first line, the comment watermark on the second.
pub async fn read_legacy_last(journal_dir: &Path) -> Result<Option<SyncStatus>> {
    let path = journal_dir.join(LEGACY_LAST_FILE);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    let mut lines = raw.lines();
    let last_sync = lines.next().unwrap_or_default().trim_end().to_string();
    let max_line = lines.next().unwrap_or_default().trim();
    let last_max_comment_id = if max_line.is_empty() {
        0
    } else {
        match max_line.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(path = %path.display(), value = max_line, "ignoring unreadable comment watermark");
                0
            }
        }
    };
    Ok(Some(SyncStatus {
        last_sync,
        last_max_comment_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn meta_cache_round_trips_through_disk() {
        let td = tempdir().unwrap();
        let mut cache = MetaCache::load(td.path()).await.unwrap();
        assert!(cache.is_empty());

        cache.insert(
            12,
            CommentMeta {
                poster_id: Some(3),
                state: Some("S".into()),
            },
        );
        cache.insert(4, CommentMeta::default());
        cache.save().await.unwrap();
        assert!(!td.path().join("comment_meta.json.tmp").exists());

        let reloaded = MetaCache::load(td.path()).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(12).and_then(|m| m.poster_id), Some(3));
    }

    #[tokio::test]
    async fn ids_between_is_half_open_and_sorted() {
        let td = tempdir().unwrap();
        let mut cache = MetaCache::load(td.path()).await.unwrap();
        for id in [10, 3, 9, 1, 2] {
            cache.insert(id, CommentMeta::default());
        }
        assert_eq!(cache.ids_between(0, 10), vec![1, 2, 3, 9, 10]);
        assert_eq!(cache.ids_between(2, 9), vec![3, 9]);
        assert!(cache.ids_between(10, 10).is_empty());
        assert!(cache.ids_between(10, 5).is_empty());
    }

    #[tokio::test]
    async fn legacy_last_file_is_read() {
        let td = tempdir().unwrap();
        assert!(read_legacy_last(td.path()).await.unwrap().is_none());

        std::fs::write(td.path().join(".last"), "2020-05-01 10:00:00\n345\n").unwrap();
        let status = read_legacy_last(td.path()).await.unwrap().unwrap();
        assert_eq!(status.last_sync, "2020-05-01 10:00:00");
        assert_eq!(status.last_max_comment_id, 345);

        std::fs::write(td.path().join(".last"), "2020-05-01 10:00:00\n").unwrap();
        let status = read_legacy_last(td.path()).await.unwrap().unwrap();
        assert_eq!(status.last_max_comment_id, 0);
    }
}
