use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persisted sync watermarks for one journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Opaque cursor handed back by the server with each sync item.
    pub last_sync: String,
    pub last_max_comment_id: i64,
}

/// Kind of change reported by the sync-item feed, taken from the item prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncItemKind {
    /// `L-<itemid>`: a journal entry.
    Entry(i64),
    /// Anything else (`C-` comments and so on); not fetched here.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub item: String,
    pub action: String,
    pub time: String,
}

impl SyncItem {
    pub fn kind(&self) -> SyncItemKind {
        match self.item.strip_prefix("L-").map(str::parse::<i64>) {
            Some(Ok(id)) => SyncItemKind::Entry(id),
            _ => SyncItemKind::Other,
        }
    }
}

/// Known entry properties plus the full property bag as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryProps {
    pub commentalter: Option<i64>,
    pub current_moodid: Option<i64>,
    pub current_music: Option<String>,
    pub import_source: Option<String>,
    pub interface: Option<String>,
    pub opt_backdated: Option<i64>,
    pub picture_keyword: Option<String>,
    pub picture_mapid: Option<i64>,
    pub taglist: Option<String>,
    /// Every property the server sent, including the ones modelled above.
    pub raw: Map<String, Value>,
}

impl EntryProps {
    /// Serialized property bag stored alongside the typed columns.
    pub fn raw_json(&self) -> String {
        Value::Object(self.raw.clone()).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub item_id: i64,
    pub anum: Option<i64>,
    /// ISO-8601 rendering of the event time (UTC).
    pub event_time: String,
    pub event_time_unix: i64,
    pub log_time: String,
    pub log_time_unix: i64,
    pub subject: Option<String>,
    /// Raw markup, untouched.
    pub body: String,
    pub url: Option<String>,
    pub props: EntryProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub entry_id: i64,
    pub date: Option<String>,
    pub date_unix: Option<i64>,
    pub parent_id: Option<i64>,
    pub poster_id: Option<i64>,
    pub user: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        matches!(self.parent_id, None | Some(0))
    }
}

/// Metadata row from the comment export endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMeta {
    pub poster_id: Option<i64>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mood {
    pub id: i64,
    pub name: String,
    pub parent: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub display: Option<i64>,
    pub security_private: Option<i64>,
    pub security_protected: Option<i64>,
    pub security_public: Option<i64>,
    pub security_level: Option<String>,
    pub uses: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub keywords: String,
    pub filename: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    pub poster_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImage {
    pub id: i64,
    pub url: String,
    pub filename: Option<String>,
    pub date_first_seen: i64,
    pub date_last_attempted: Option<i64>,
    pub cached: bool,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub new_entries: u64,
    pub new_comments: u64,
    pub errors: u64,
}

impl SyncSummary {
    pub fn changed(&self) -> bool {
        self.new_entries > 0 || self.new_comments > 0
    }
}
