use super::model::JournalSnapshot;
use crate::model::{
    CachedImage, Comment, Entry, EntryProps, Icon, Mood, SyncStatus, Tag, UserMapping,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Read the watermarks, creating the zero row on first use.
pub async fn get_sync_status(conn: &mut SqliteConnection) -> Result<SyncStatus> {
    get_sync_status_or_insert(conn, &SyncStatus::default()).await
}

/// Read the watermarks; when no row exists yet, persist `seed` and return it.
#[instrument(skip_all)]
pub async fn get_sync_status_or_insert(
    conn: &mut SqliteConnection,
    seed: &SyncStatus,
) -> Result<SyncStatus> {
    let row = sqlx::query("SELECT lastsync, lastmaxid FROM status WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = row {
        return Ok(SyncStatus {
            last_sync: row.get("lastsync"),
            last_max_comment_id: row.get("lastmaxid"),
        });
    }
    sqlx::query("INSERT INTO status (id, lastsync, lastmaxid) VALUES (1, ?, ?)")
        .bind(&seed.last_sync)
        .bind(seed.last_max_comment_id)
        .execute(&mut *conn)
        .await?;
    Ok(seed.clone())
}

#[instrument(skip_all)]
pub async fn set_sync_status(conn: &mut SqliteConnection, status: &SyncStatus) -> Result<()> {
    sqlx::query(
        "INSERT INTO status (id, lastsync, lastmaxid) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET lastsync = excluded.lastsync, lastmaxid = excluded.lastmaxid",
    )
    .bind(&status.last_sync)
    .bind(status.last_max_comment_id)
    .execute(&mut *conn)
    .await
    .context("failed to persist sync status")?;
    Ok(())
}

/// Insert or fully replace an entry. Returns true when the row is new.
#[instrument(skip_all, fields(item_id = entry.item_id))]
pub async fn upsert_entry(conn: &mut SqliteConnection, entry: &Entry) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT itemid FROM entries WHERE itemid = ?")
        .bind(entry.item_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    let p = &entry.props;
    sqlx::query(
        "INSERT INTO entries (itemid, anum, eventtime, eventtime_unix, logtime, logtime_unix, \
            subject, event, url, \
            props_commentalter, props_current_moodid, props_current_music, props_import_source, \
            props_interface, props_opt_backdated, props_picture_keyword, props_picture_mapid, \
            props_taglist, raw_props) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(itemid) DO UPDATE SET \
            anum = excluded.anum, \
            eventtime = excluded.eventtime, eventtime_unix = excluded.eventtime_unix, \
            logtime = excluded.logtime, logtime_unix = excluded.logtime_unix, \
            subject = excluded.subject, event = excluded.event, url = excluded.url, \
            props_commentalter = excluded.props_commentalter, \
            props_current_moodid = excluded.props_current_moodid, \
            props_current_music = excluded.props_current_music, \
            props_import_source = excluded.props_import_source, \
            props_interface = excluded.props_interface, \
            props_opt_backdated = excluded.props_opt_backdated, \
            props_picture_keyword = excluded.props_picture_keyword, \
            props_picture_mapid = excluded.props_picture_mapid, \
            props_taglist = excluded.props_taglist, \
            raw_props = excluded.raw_props",
    )
    .bind(entry.item_id)
    .bind(entry.anum)
    .bind(&entry.event_time)
    .bind(entry.event_time_unix)
    .bind(&entry.log_time)
    .bind(entry.log_time_unix)
    .bind(&entry.subject)
    .bind(&entry.body)
    .bind(&entry.url)
    .bind(p.commentalter)
    .bind(p.current_moodid)
    .bind(&p.current_music)
    .bind(&p.import_source)
    .bind(&p.interface)
    .bind(p.opt_backdated)
    .bind(&p.picture_keyword)
    .bind(p.picture_mapid)
    .bind(&p.taglist)
    .bind(p.raw_json())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to store entry {}", entry.item_id))?;
    if exists {
        debug!(subject = ?entry.subject, "updated entry");
    } else {
        debug!(subject = ?entry.subject, "added entry");
    }
    Ok(!exists)
}

/// Insert or fully replace a comment. Returns true when the id was unseen.
#[instrument(skip_all, fields(comment_id = comment.id))]
pub async fn upsert_comment(conn: &mut SqliteConnection, comment: &Comment) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM comments WHERE id = ?")
        .bind(comment.id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    sqlx::query(
        "INSERT INTO comments (id, entryid, date, date_unix, parentid, posterid, user, subject, body, state) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
            entryid = excluded.entryid, date = excluded.date, date_unix = excluded.date_unix, \
            parentid = excluded.parentid, posterid = excluded.posterid, user = excluded.user, \
            subject = excluded.subject, body = excluded.body, state = excluded.state",
    )
    .bind(comment.id)
    .bind(comment.entry_id)
    .bind(&comment.date)
    .bind(comment.date_unix)
    .bind(comment.parent_id)
    .bind(comment.poster_id)
    .bind(&comment.user)
    .bind(&comment.subject)
    .bind(&comment.body)
    .bind(&comment.state)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to store comment {}", comment.id))?;
    debug!(entry_id = comment.entry_id, user = ?comment.user, new = !exists, "stored comment");
    Ok(!exists)
}

#[instrument(skip_all, fields(mood_id = mood.id))]
pub async fn upsert_mood(conn: &mut SqliteConnection, mood: &Mood) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM moods WHERE id = ?")
        .bind(mood.id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    sqlx::query(
        "INSERT INTO moods (id, name, parent) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, parent = excluded.parent",
    )
    .bind(mood.id)
    .bind(&mood.name)
    .bind(mood.parent)
    .execute(&mut *conn)
    .await?;
    Ok(!exists)
}

#[instrument(skip_all, fields(tag = %tag.name))]
pub async fn upsert_tag(conn: &mut SqliteConnection, tag: &Tag) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, String>("SELECT name FROM tags WHERE name = ?")
        .bind(&tag.name)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    sqlx::query(
        "INSERT INTO tags (name, display, security_private, security_protected, security_public, security_level, uses) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET \
            display = excluded.display, \
            security_private = excluded.security_private, \
            security_protected = excluded.security_protected, \
            security_public = excluded.security_public, \
            security_level = excluded.security_level, \
            uses = excluded.uses",
    )
    .bind(&tag.name)
    .bind(tag.display)
    .bind(tag.security_private)
    .bind(tag.security_protected)
    .bind(tag.security_public)
    .bind(&tag.security_level)
    .bind(tag.uses)
    .execute(&mut *conn)
    .await?;
    Ok(!exists)
}

#[instrument(skip_all, fields(keywords = %icon.keywords))]
pub async fn upsert_icon(conn: &mut SqliteConnection, icon: &Icon) -> Result<bool> {
    let exists = get_icon(conn, &icon.keywords).await?.is_some();
    sqlx::query(
        "INSERT INTO icons (keywords, filename, url) VALUES (?, ?, ?) \
         ON CONFLICT(keywords) DO UPDATE SET filename = excluded.filename, url = excluded.url",
    )
    .bind(&icon.keywords)
    .bind(&icon.filename)
    .bind(&icon.url)
    .execute(&mut *conn)
    .await?;
    Ok(!exists)
}

pub async fn get_icon(conn: &mut SqliteConnection, keywords: &str) -> Result<Option<Icon>> {
    let row = sqlx::query("SELECT keywords, filename, url FROM icons WHERE keywords = ?")
        .bind(keywords)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(icon_from_row))
}

#[instrument(skip_all, fields(poster_id = mapping.poster_id))]
pub async fn upsert_user_mapping(
    conn: &mut SqliteConnection,
    mapping: &UserMapping,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM user_map WHERE id = ?")
        .bind(mapping.poster_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    sqlx::query(
        "INSERT INTO user_map (id, name) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(mapping.poster_id)
    .bind(&mapping.name)
    .execute(&mut *conn)
    .await?;
    Ok(!exists)
}

pub async fn get_user_map(conn: &mut SqliteConnection) -> Result<HashMap<i64, String>> {
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM user_map ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().collect())
}

#[instrument(skip_all)]
pub async fn get_all_entries(conn: &mut SqliteConnection) -> Result<Vec<Entry>> {
    let rows = sqlx::query(
        "SELECT itemid, anum, eventtime, eventtime_unix, logtime, logtime_unix, subject, event, url, \
            props_commentalter, props_current_moodid, props_current_music, props_import_source, \
            props_interface, props_opt_backdated, props_picture_keyword, props_picture_mapid, \
            props_taglist, raw_props \
         FROM entries ORDER BY itemid ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(entry_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_all_comments(conn: &mut SqliteConnection) -> Result<Vec<Comment>> {
    let rows = sqlx::query(
        "SELECT id, entryid, date, date_unix, parentid, posterid, user, subject, body, state \
         FROM comments ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(comment_from_row).collect())
}

pub async fn get_all_moods(conn: &mut SqliteConnection) -> Result<Vec<Mood>> {
    let rows = sqlx::query("SELECT id, name, parent FROM moods ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|row| Mood {
            id: row.get("id"),
            name: row.get("name"),
            parent: row.get("parent"),
        })
        .collect())
}

pub async fn get_all_tags(conn: &mut SqliteConnection) -> Result<Vec<Tag>> {
    let rows = sqlx::query(
        "SELECT name, display, security_private, security_protected, security_public, security_level, uses \
         FROM tags ORDER BY name ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(|row| Tag {
            name: row.get("name"),
            display: row.get("display"),
            security_private: row.get("security_private"),
            security_protected: row.get("security_protected"),
            security_public: row.get("security_public"),
            security_level: row.get("security_level"),
            uses: row.get("uses"),
        })
        .collect())
}

pub async fn get_all_icons(conn: &mut SqliteConnection) -> Result<Vec<Icon>> {
    let rows = sqlx::query("SELECT keywords, filename, url FROM icons ORDER BY keywords ASC")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(icon_from_row).collect())
}

/// Look up the cache record for `url`, creating an uncached one on first sight.
#[instrument(skip_all)]
pub async fn get_or_create_cached_image_record(
    conn: &mut SqliteConnection,
    url: &str,
    now: DateTime<Utc>,
) -> Result<CachedImage> {
    if let Some(row) = sqlx::query(
        "SELECT id, url, filename, date_first_seen, date_last_attempted, cached \
         FROM cached_images WHERE url = ?",
    )
    .bind(url)
    .fetch_optional(&mut *conn)
    .await?
    {
        return Ok(cached_image_from_row(&row));
    }

    let id: i64 = sqlx::query(
        "INSERT INTO cached_images (url, filename, date_first_seen, date_last_attempted, cached) \
         VALUES (?, NULL, ?, NULL, 0) RETURNING id",
    )
    .bind(url)
    .bind(now.timestamp())
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(CachedImage {
        id,
        url: url.to_string(),
        filename: None,
        date_first_seen: now.timestamp(),
        date_last_attempted: None,
        cached: false,
    })
}

#[instrument(skip_all)]
pub async fn report_image_attempted(
    conn: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE cached_images SET date_last_attempted = ? WHERE id = ?")
        .bind(now.timestamp())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn report_image_cached(
    conn: &mut SqliteConnection,
    id: i64,
    filename: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE cached_images SET filename = ?, cached = 1, date_last_attempted = ? WHERE id = ?",
    )
    .bind(filename)
    .bind(now.timestamp())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_all_cached_images(conn: &mut SqliteConnection) -> Result<Vec<CachedImage>> {
    let rows = sqlx::query(
        "SELECT id, url, filename, date_first_seen, date_last_attempted, cached \
         FROM cached_images ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(cached_image_from_row).collect())
}

/// Read every table the renderer consumes.
pub async fn load_snapshot(conn: &mut SqliteConnection) -> Result<JournalSnapshot> {
    Ok(JournalSnapshot {
        entries: get_all_entries(conn).await?,
        comments: get_all_comments(conn).await?,
        moods: get_all_moods(conn).await?,
        tags: get_all_tags(conn).await?,
        icons: get_all_icons(conn).await?,
        cached_images: get_all_cached_images(conn).await?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<Entry> {
    let item_id: i64 = row.get("itemid");
    let raw_props: String = row.get("raw_props");
    let raw = match serde_json::from_str::<Value>(&raw_props)
        .with_context(|| format!("entry {} has unreadable raw_props", item_id))?
    {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(Entry {
        item_id,
        anum: row.get("anum"),
        event_time: row.get("eventtime"),
        event_time_unix: row.get("eventtime_unix"),
        log_time: row.get("logtime"),
        log_time_unix: row.get("logtime_unix"),
        subject: row.get("subject"),
        body: row.get("event"),
        url: row.get("url"),
        props: EntryProps {
            commentalter: row.get("props_commentalter"),
            current_moodid: row.get("props_current_moodid"),
            current_music: row.get("props_current_music"),
            import_source: row.get("props_import_source"),
            interface: row.get("props_interface"),
            opt_backdated: row.get("props_opt_backdated"),
            picture_keyword: row.get("props_picture_keyword"),
            picture_mapid: row.get("props_picture_mapid"),
            taglist: row.get("props_taglist"),
            raw,
        },
    })
}

fn comment_from_row(row: &SqliteRow) -> Comment {
    Comment {
        id: row.get("id"),
        entry_id: row.get("entryid"),
        date: row.get("date"),
        date_unix: row.get("date_unix"),
        parent_id: row.get("parentid"),
        poster_id: row.get("posterid"),
        user: row.get("user"),
        subject: row.get("subject"),
        body: row.get("body"),
        state: row.get("state"),
    }
}

fn icon_from_row(row: &SqliteRow) -> Icon {
    Icon {
        keywords: row.get("keywords"),
        filename: row.get("filename"),
        url: row.get("url"),
    }
}

fn cached_image_from_row(row: &SqliteRow) -> CachedImage {
    CachedImage {
        id: row.get("id"),
        url: row.get("url"),
        filename: row.get("filename"),
        date_first_seen: row.get("date_first_seen"),
        date_last_attempted: row.get("date_last_attempted"),
        cached: row.get("cached"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::SqlitePool;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_entry(item_id: i64, subject: &str) -> Entry {
        let mut raw = Map::new();
        raw.insert("current_music".into(), Value::String("Low".into()));
        raw.insert("unknown_future_prop".into(), Value::String("kept".into()));
        Entry {
            item_id,
            anum: Some(77),
            event_time: "2009-03-01T12:30:00+00:00".into(),
            event_time_unix: 1_235_910_600,
            log_time: "2009-03-01T12:31:00+00:00".into(),
            log_time_unix: 1_235_910_660,
            subject: Some(subject.into()),
            body: "line one\nline <b>two</b>".into(),
            url: Some(format!("https://example.dreamwidth.org/{}.html", item_id * 256 + 77)),
            props: EntryProps {
                current_music: Some("Low".into()),
                taglist: Some("cats, dogs".into()),
                raw,
                ..Default::default()
            },
        }
    }

    fn sample_comment(id: i64, parent: Option<i64>, body: &str) -> Comment {
        Comment {
            id,
            entry_id: 5,
            date: Some("2010-01-01T00:00:00+00:00".into()),
            date_unix: Some(1_262_304_000),
            parent_id: parent,
            poster_id: Some(9),
            user: Some("bob".into()),
            subject: None,
            body: Some(body.into()),
            state: None,
        }
    }

    #[tokio::test]
    async fn sync_status_defaults_then_overwrites() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let status = get_sync_status(&mut conn).await.unwrap();
        assert_eq!(status, SyncStatus::default());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM status")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let next = SyncStatus {
            last_sync: "2024-01-01 10:00:00".into(),
            last_max_comment_id: 150,
        };
        set_sync_status(&mut conn, &next).await.unwrap();
        assert_eq!(get_sync_status(&mut conn).await.unwrap(), next);

        // A seed only applies when the row is missing.
        let seeded = get_sync_status_or_insert(&mut conn, &SyncStatus::default())
            .await
            .unwrap();
        assert_eq!(seeded, next);
    }

    #[tokio::test]
    async fn entry_upsert_is_idempotent_full_replace() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let entry = sample_entry(12, "first");
        assert!(upsert_entry(&mut conn, &entry).await.unwrap());
        assert!(!upsert_entry(&mut conn, &entry).await.unwrap());

        let all = get_all_entries(&mut conn).await.unwrap();
        assert_eq!(all, vec![entry.clone()]);

        let mut edited = sample_entry(12, "edited");
        edited.props.current_music = None;
        edited.props.taglist = None;
        edited.props.raw = Map::new();
        assert!(!upsert_entry(&mut conn, &edited).await.unwrap());

        let all = get_all_entries(&mut conn).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subject.as_deref(), Some("edited"));
        assert_eq!(all[0].props.current_music, None);
        assert!(all[0].props.raw.is_empty());
    }

    #[tokio::test]
    async fn comment_upsert_reports_new_only_once() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(upsert_comment(&mut conn, &sample_comment(3, None, "hi")).await.unwrap());
        assert!(!upsert_comment(&mut conn, &sample_comment(3, None, "edited")).await.unwrap());
        assert!(upsert_comment(&mut conn, &sample_comment(1, None, "older")).await.unwrap());

        let all = get_all_comments(&mut conn).await.unwrap();
        assert_eq!(all.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(all[1].body.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn reference_data_upserts() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let mood = Mood {
            id: 4,
            name: "happy".into(),
            parent: Some(0),
        };
        assert!(upsert_mood(&mut conn, &mood).await.unwrap());
        assert!(!upsert_mood(&mut conn, &mood).await.unwrap());

        let tag = Tag {
            name: "cats".into(),
            display: Some(1),
            security_private: Some(0),
            security_protected: Some(1),
            security_public: Some(3),
            security_level: Some("public".into()),
            uses: Some(4),
        };
        assert!(upsert_tag(&mut conn, &tag).await.unwrap());
        assert!(!upsert_tag(&mut conn, &tag).await.unwrap());

        let icon = Icon {
            keywords: "*".into(),
            filename: Some("_.png".into()),
            url: Some("https://v.dreamwidth.org/1/2".into()),
        };
        assert!(upsert_icon(&mut conn, &icon).await.unwrap());
        assert!(!upsert_icon(&mut conn, &icon).await.unwrap());

        let mapping = UserMapping {
            poster_id: 9,
            name: "bob".into(),
        };
        assert!(upsert_user_mapping(&mut conn, &mapping).await.unwrap());
        let renamed = UserMapping {
            poster_id: 9,
            name: "robert".into(),
        };
        assert!(!upsert_user_mapping(&mut conn, &renamed).await.unwrap());

        assert_eq!(get_all_moods(&mut conn).await.unwrap(), vec![mood]);
        assert_eq!(get_all_tags(&mut conn).await.unwrap(), vec![tag]);
        assert_eq!(get_all_icons(&mut conn).await.unwrap(), vec![icon]);
        assert_eq!(
            get_user_map(&mut conn).await.unwrap().get(&9).map(String::as_str),
            Some("robert")
        );
    }

    #[tokio::test]
    async fn cached_image_lifecycle() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();

        let rec = get_or_create_cached_image_record(&mut conn, "https://x/a.png", t0)
            .await
            .unwrap();
        assert!(!rec.cached);
        assert_eq!(rec.date_first_seen, t0.timestamp());

        let again = get_or_create_cached_image_record(&mut conn, "https://x/a.png", t1)
            .await
            .unwrap();
        assert_eq!(again.id, rec.id);
        assert_eq!(again.date_first_seen, t0.timestamp());

        report_image_attempted(&mut conn, rec.id, t1).await.unwrap();
        let all = get_all_cached_images(&mut conn).await.unwrap();
        assert_eq!(all[0].date_last_attempted, Some(t1.timestamp()));
        assert!(!all[0].cached);

        report_image_cached(&mut conn, rec.id, "abc.png", t1).await.unwrap();
        let all = get_all_cached_images(&mut conn).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].cached);
        assert_eq!(all[0].filename.as_deref(), Some("abc.png"));
    }

    #[tokio::test]
    async fn writes_inside_rolled_back_transaction_disappear() {
        let pool = setup_pool().await;
        {
            let mut tx = pool.begin().await.unwrap();
            upsert_entry(&mut tx, &sample_entry(1, "gone")).await.unwrap();
            tx.rollback().await.unwrap();
        }
        let mut conn = pool.acquire().await.unwrap();
        assert!(get_all_entries(&mut conn).await.unwrap().is_empty());
    }
}
