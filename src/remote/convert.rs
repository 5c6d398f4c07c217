//! Mapping from decoded XML-RPC structs to the crate's model types.

use chrono::NaiveDateTime;
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};

use super::xmlrpc::Value;
use super::{RemoteError, UserInfo, Userpics};
use crate::model::{Entry, EntryProps, Mood, SyncItem, Tag};

/// Timestamp layout used by `getevents` and `syncitems`.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a server timestamp as UTC and return its RFC 3339 rendering plus epoch seconds.
pub fn parse_utc(raw: &str, format: &str) -> Result<(String, i64), RemoteError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), format)
        .map_err(|err| RemoteError::Malformed(format!("bad timestamp {raw:?}: {err}")))?;
    let utc = naive.and_utc();
    Ok((utc.to_rfc3339(), utc.timestamp()))
}

fn required<'a>(v: &'a Value, key: &str) -> Result<&'a Value, RemoteError> {
    v.get(key)
        .ok_or_else(|| RemoteError::Malformed(format!("missing field {key:?}")))
}

fn required_text(v: &Value, key: &str) -> Result<String, RemoteError> {
    required(v, key)?
        .as_text()
        .ok_or_else(|| RemoteError::Malformed(format!("field {key:?} is not text")))
}

fn required_int(v: &Value, key: &str) -> Result<i64, RemoteError> {
    required(v, key)?
        .as_i64()
        .ok_or_else(|| RemoteError::Malformed(format!("field {key:?} is not an integer")))
}

fn array<'a>(v: &'a Value, key: &str) -> Result<&'a [Value], RemoteError> {
    match v.get(key) {
        Some(items) => items
            .as_array()
            .ok_or_else(|| RemoteError::Malformed(format!("field {key:?} is not an array"))),
        None => Ok(&[]),
    }
}

pub fn sync_items(v: &Value) -> Result<Vec<SyncItem>, RemoteError> {
    array(v, "syncitems")?
        .iter()
        .map(|item| {
            Ok(SyncItem {
                item: required_text(item, "item")?,
                action: item.get("action").and_then(Value::as_text).unwrap_or_default(),
                time: required_text(item, "time")?,
            })
        })
        .collect()
}

/// First event of a `getevents` reply, or `None` when the server returned none.
pub fn first_event(v: &Value) -> Result<Option<Entry>, RemoteError> {
    array(v, "events")?.first().map(entry_from_event).transpose()
}

pub fn entry_from_event(ev: &Value) -> Result<Entry, RemoteError> {
    let item_id = required_int(ev, "itemid")?;
    let event_time_raw = required_text(ev, "eventtime")?;
    let (event_time, event_time_unix) = parse_utc(&event_time_raw, EVENT_TIME_FORMAT)?;
    let (log_time, log_time_unix) = match ev.get("logtime").and_then(Value::as_text) {
        Some(raw) => parse_utc(&raw, EVENT_TIME_FORMAT)?,
        None => (event_time.clone(), event_time_unix),
    };

    let props = ev.get("props").map(props_from).unwrap_or_default();

    Ok(Entry {
        item_id,
        anum: ev.get("anum").and_then(Value::as_i64),
        event_time,
        event_time_unix,
        log_time,
        log_time_unix,
        subject: ev.get("subject").and_then(Value::as_text),
        body: required_text(ev, "event")?,
        url: ev.get("url").and_then(Value::as_text),
        props,
    })
}

fn props_from(props: &Value) -> EntryProps {
    let text = |key: &str| props.get(key).and_then(Value::as_text);
    let int = |key: &str| props.get(key).and_then(Value::as_i64);
    let raw = match props.to_json() {
        serde_json::Value::Object(map) => map,
        _ => Map::new(),
    };
    EntryProps {
        commentalter: int("commentalter"),
        current_moodid: int("current_moodid"),
        current_music: text("current_music"),
        import_source: text("import_source"),
        interface: text("interface"),
        opt_backdated: int("opt_backdated"),
        picture_keyword: text("picture_keyword"),
        picture_mapid: int("picture_mapid"),
        taglist: text("taglist"),
        raw,
    }
}

pub fn moods(v: &Value) -> Result<Vec<Mood>, RemoteError> {
    array(v, "moods")?
        .iter()
        .map(|m| {
            Ok(Mood {
                id: required_int(m, "id")?,
                name: required_text(m, "name")?,
                parent: m.get("parent").and_then(Value::as_i64),
            })
        })
        .collect()
}

pub fn tags(v: &Value) -> Result<Vec<Tag>, RemoteError> {
    array(v, "tags")?
        .iter()
        .map(|t| {
            let security = t.get("security");
            let counter =
                |key: &str| security.and_then(|s| s.get(key)).and_then(Value::as_i64);
            Ok(Tag {
                name: required_text(t, "name")?,
                display: t.get("display").and_then(Value::as_i64),
                security_private: counter("private"),
                security_protected: counter("protected"),
                security_public: counter("public"),
                security_level: t.get("security_level").and_then(Value::as_text),
                uses: t.get("uses").and_then(Value::as_i64),
            })
        })
        .collect()
}

/// Pair `pickws` with `pickwurls`; the default picture is filed under `*`.
pub fn userpics(v: &Value) -> Result<Userpics, RemoteError> {
    let keywords = array(v, "pickws")?;
    let urls = array(v, "pickwurls")?;
    if keywords.len() != urls.len() {
        return Err(RemoteError::Malformed(format!(
            "{} picture keywords but {} urls",
            keywords.len(),
            urls.len()
        )));
    }
    let by_keyword: BTreeMap<String, String> = keywords
        .iter()
        .zip(urls)
        .filter_map(|(k, u)| Some((k.as_text()?, u.as_text()?)))
        .collect();
    let default_url = v
        .get("defaultpicurl")
        .and_then(Value::as_text)
        .filter(|u| !u.is_empty());
    Ok(Userpics {
        by_keyword,
        default_url,
    })
}

pub fn user_info(v: &Value, username: &str) -> UserInfo {
    UserInfo {
        user_id: v.get("userid").and_then(Value::as_i64),
        username: v
            .get("username")
            .and_then(Value::as_text)
            .unwrap_or_else(|| username.to_string()),
        full_name: v.get("fullname").and_then(Value::as_text),
    }
}

/// Parse the flat protocol's alternating name/value lines.
pub fn parse_flat(body: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut lines = body.lines();
    while let Some(name) = lines.next() {
        if name.is_empty() {
            continue;
        }
        let value = lines.next().unwrap_or_default();
        out.insert(name.to_string(), value.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::xmlrpc::decode_response;

    fn event_response() -> Value {
        decode_response(
            r#"<methodResponse><params><param><value><struct>
<member><name>events</name><value><array><data><value><struct>
  <member><name>itemid</name><value><int>12</int></value></member>
  <member><name>anum</name><value><int>201</int></value></member>
  <member><name>eventtime</name><value><string>2009-03-01 12:30:00</string></value></member>
  <member><name>logtime</name><value><string>2009-03-01 12:31:00</string></value></member>
  <member><name>subject</name><value><base64>Q2Fmw6k=</base64></value></member>
  <member><name>event</name><value><string>body &lt;b&gt;text&lt;/b&gt;</string></value></member>
  <member><name>url</name><value><string>https://alice.example.org/3273.html</string></value></member>
  <member><name>props</name><value><struct>
    <member><name>current_moodid</name><value><int>15</int></value></member>
    <member><name>opt_backdated</name><value><string>1</string></value></member>
    <member><name>taglist</name><value><string>cats, dogs</string></value></member>
    <member><name>personifi_tags</name><value><string>nterms:no</string></value></member>
  </struct></value></member>
</struct></value></data></array></value></member>
</struct></value></param></params></methodResponse>"#,
        )
        .unwrap()
    }

    #[test]
    fn converts_event_with_props_and_times() {
        let entry = first_event(&event_response()).unwrap().unwrap();
        assert_eq!(entry.item_id, 12);
        assert_eq!(entry.anum, Some(201));
        assert_eq!(entry.event_time, "2009-03-01T12:30:00+00:00");
        assert_eq!(entry.event_time_unix, 1_235_910_600);
        assert_eq!(entry.log_time_unix, 1_235_910_660);
        assert_eq!(entry.subject.as_deref(), Some("Café"));
        assert_eq!(entry.body, "body <b>text</b>");
        assert_eq!(entry.props.current_moodid, Some(15));
        assert_eq!(entry.props.opt_backdated, Some(1));
        assert_eq!(entry.props.taglist.as_deref(), Some("cats, dogs"));
        assert_eq!(
            entry.props.raw.get("personifi_tags").and_then(|v| v.as_str()),
            Some("nterms:no")
        );
    }

    #[test]
    fn empty_events_is_none() {
        let v = decode_response(
            "<methodResponse><params><param><value><struct>\
             <member><name>events</name><value><array><data></data></array></value></member>\
             </struct></value></param></params></methodResponse>",
        )
        .unwrap();
        assert!(first_event(&v).unwrap().is_none());
    }

    #[test]
    fn userpics_pair_keywords_and_default() {
        let mut m = BTreeMap::new();
        m.insert(
            "pickws".to_string(),
            Value::Array(vec!["happy".into(), "sad face".into()]),
        );
        m.insert(
            "pickwurls".to_string(),
            Value::Array(vec!["https://v/1".into(), "https://v/2".into()]),
        );
        m.insert("defaultpicurl".to_string(), "https://v/0".into());
        let pics = userpics(&Value::Struct(m)).unwrap();
        assert_eq!(pics.by_keyword.get("sad face").map(String::as_str), Some("https://v/2"));
        assert_eq!(pics.default_url.as_deref(), Some("https://v/0"));
        let all: Vec<_> = pics.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(all, vec!["*", "happy", "sad face"]);
    }

    #[test]
    fn tags_take_security_level_from_its_own_field() {
        let mut security = BTreeMap::new();
        security.insert("private".to_string(), Value::Int(1));
        security.insert("protected".to_string(), Value::Int(2));
        security.insert("public".to_string(), Value::Int(3));
        let mut tag = BTreeMap::new();
        tag.insert("name".to_string(), "cats".into());
        tag.insert("display".to_string(), Value::Int(1));
        tag.insert("security".to_string(), Value::Struct(security));
        tag.insert("security_level".to_string(), "public".into());
        tag.insert("uses".to_string(), Value::Int(6));
        let mut root = BTreeMap::new();
        root.insert("tags".to_string(), Value::Array(vec![Value::Struct(tag)]));

        let tags = tags(&Value::Struct(root)).unwrap();
        assert_eq!(tags[0].security_level.as_deref(), Some("public"));
        assert_eq!(tags[0].security_protected, Some(2));
        assert_eq!(tags[0].uses, Some(6));
    }

    #[test]
    fn flat_response_pairs_lines() {
        let parsed = parse_flat("success\nOK\nljsession\nv1:u2:s3:abc\n");
        assert_eq!(parsed.get("success").map(String::as_str), Some("OK"));
        assert_eq!(
            parsed.get("ljsession").map(String::as_str),
            Some("v1:u2:s3:abc")
        );
    }

    #[test]
    fn bad_timestamps_are_malformed() {
        assert!(matches!(
            parse_utc("yesterday", EVENT_TIME_FORMAT),
            Err(RemoteError::Malformed(_))
        ));
    }
}
