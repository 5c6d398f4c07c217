//! View models assembled from repository reads.
//!
//! Keep these structs focused on the data returned by queries. Rendering logic
//! lives in `crate::render`.

use crate::model::{CachedImage, Comment, Entry, Icon, Mood, Tag};
use std::collections::HashMap;

/// Everything the HTML export needs, read in one pass after a sync commit.
#[derive(Debug, Clone, Default)]
pub struct JournalSnapshot {
    pub entries: Vec<Entry>,
    pub comments: Vec<Comment>,
    pub moods: Vec<Mood>,
    pub tags: Vec<Tag>,
    pub icons: Vec<Icon>,
    pub cached_images: Vec<CachedImage>,
}

impl JournalSnapshot {
    /// Comments grouped by entry id; every entry gets a (possibly empty) list.
    pub fn comments_by_entry(&self) -> HashMap<i64, Vec<Comment>> {
        let mut grouped: HashMap<i64, Vec<Comment>> = self
            .entries
            .iter()
            .map(|e| (e.item_id, Vec::new()))
            .collect();
        for c in &self.comments {
            grouped.entry(c.entry_id).or_default().push(c.clone());
        }
        grouped
    }

    pub fn moods_by_id(&self) -> HashMap<i64, &Mood> {
        self.moods.iter().map(|m| (m.id, m)).collect()
    }

    pub fn icons_by_keyword(&self) -> HashMap<&str, &Icon> {
        self.icons.iter().map(|i| (i.keywords.as_str(), i)).collect()
    }

    /// Local filename for each cached image URL.
    pub fn cached_image_files(&self) -> HashMap<&str, &str> {
        self.cached_images
            .iter()
            .filter(|c| c.cached)
            .filter_map(|c| c.filename.as_deref().map(|f| (c.url.as_str(), f)))
            .collect()
    }
}
