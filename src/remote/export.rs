//! Decoders for the `export_comments.bml` pages.

use super::convert::parse_utc;
use super::xml;
use super::{CommentBody, CommentMetaPage, RemoteError};
use crate::model::{CommentMeta, UserMapping};

const BODY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn int_attr(el: &xml::Element, name: &str) -> Option<i64> {
    el.attr(name).and_then(|v| v.trim().parse().ok())
}

fn required_id(el: &xml::Element) -> Result<i64, RemoteError> {
    int_attr(el, "id").ok_or_else(|| {
        RemoteError::Malformed(format!("<{}> without a numeric id", el.name))
    })
}

pub fn parse_comment_meta(body: &str) -> Result<CommentMetaPage, RemoteError> {
    let root = xml::parse(body)?;
    let max_id = root
        .descendants_named("maxid")
        .first()
        .and_then(|el| el.text.trim().parse().ok())
        .ok_or_else(|| RemoteError::Malformed("comment meta page without <maxid>".into()))?;

    let mut comments = Vec::new();
    for el in root.descendants_named("comment") {
        let meta = CommentMeta {
            poster_id: int_attr(el, "posterid"),
            state: el.attr("state").filter(|s| !s.is_empty()).map(str::to_string),
        };
        comments.push((required_id(el)?, meta));
    }

    let mut usermap = Vec::new();
    for el in root.descendants_named("usermap") {
        if let (Some(poster_id), Some(name)) = (int_attr(el, "id"), el.attr("user")) {
            usermap.push(UserMapping {
                poster_id,
                name: name.to_string(),
            });
        }
    }

    Ok(CommentMetaPage {
        comments,
        usermap,
        max_id,
    })
}

pub fn parse_comment_bodies(body: &str) -> Result<Vec<CommentBody>, RemoteError> {
    let root = xml::parse(body)?;
    let mut out = Vec::new();
    for el in root.descendants_named("comment") {
        let id = required_id(el)?;
        let entry_id = int_attr(el, "jitemid").ok_or_else(|| {
            RemoteError::Malformed(format!("comment {id} without jitemid"))
        })?;
        let date = el.child_text("date").map(str::trim).filter(|d| !d.is_empty());
        let (date, date_unix) = match date.map(|d| (d, parse_utc(d, BODY_DATE_FORMAT))) {
            Some((_, Ok((iso, unix)))) => (Some(iso), Some(unix)),
            Some((raw, Err(_))) => (Some(raw.to_string()), None),
            None => (None, None),
        };
        out.push(CommentBody {
            id,
            entry_id,
            parent_id: int_attr(el, "parentid"),
            poster_id: int_attr(el, "posterid"),
            subject: el.child_text("subject").map(str::to_string),
            body: el.child_text("body").map(str::to_string),
            date,
            date_unix,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_page_collects_comments_usermap_and_maxid() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<livejournal>
<maxid>150</maxid>
<comments>
<comment id="101" posterid="7" />
<comment id="106" posterid="8" state="D" />
</comments>
<usermaps>
<usermap id="7" user="alice" />
<usermap id="8" user="bob" />
</usermaps>
</livejournal>"#;
        let page = parse_comment_meta(xml).unwrap();
        assert_eq!(page.max_id, 150);
        assert_eq!(page.comments.len(), 2);
        assert_eq!(page.comments[0].0, 101);
        assert_eq!(page.comments[0].1.state, None);
        assert_eq!(page.comments[1].1.state.as_deref(), Some("D"));
        assert_eq!(page.comments[1].1.poster_id, Some(8));
        assert_eq!(page.usermap[1].name, "bob");
    }

    #[test]
    fn meta_page_requires_maxid() {
        let err = parse_comment_meta("<livejournal><comments/></livejournal>").unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[test]
    fn body_page_reads_fields_and_dates() {
        let xml = r#"<livejournal><comments>
<comment id="9" jitemid="3" posterid="7" parentid="2">
<subject>Re: hi</subject>
<body>line one
line &lt;two&gt;</body>
<date>2010-02-03T04:05:06Z</date>
</comment>
<comment id="10" jitemid="3" posterid="0" state="D"><date>garbled</date></comment>
</comments></livejournal>"#;
        let bodies = parse_comment_bodies(xml).unwrap();
        assert_eq!(bodies.len(), 2);
        let first = &bodies[0];
        assert_eq!(first.entry_id, 3);
        assert_eq!(first.parent_id, Some(2));
        assert_eq!(first.subject.as_deref(), Some("Re: hi"));
        assert_eq!(first.body.as_deref(), Some("line one\nline <two>"));
        assert_eq!(first.date.as_deref(), Some("2010-02-03T04:05:06+00:00"));
        assert_eq!(first.date_unix, Some(1_265_169_906));

        let second = &bodies[1];
        assert_eq!(second.body, None);
        assert_eq!(second.parent_id, None);
        assert_eq!(second.date.as_deref(), Some("garbled"));
        assert_eq!(second.date_unix, None);
    }
}
