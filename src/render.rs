//! Static HTML pages for an archived journal.
//!
//! Layout under the journal directory:
//! - `entries/entry-{itemid}.html`: one page per entry with its comment threads
//! - `history/page-{n}.html`: entries oldest first, twenty per page
//! - `tags/{tag}.html`: links to every entry carrying the tag
//! - `stylesheet.css`

use anyhow::{Context, Result};
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::db::JournalSnapshot;
use crate::images;
use crate::model::{Comment, Entry, Icon, Mood};
use crate::userpics::{sanitize_keyword, USERPICS_DIR};

pub const ENTRIES_PER_PAGE: usize = 20;

static LINE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r\n|\r|\n").expect("valid line break regex"));

/// Lookups shared by every page of one journal.
pub struct RenderContext<'a> {
    pub journal: &'a str,
    pub site: &'a str,
    moods: HashMap<i64, &'a Mood>,
    icons: HashMap<&'a str, &'a Icon>,
    images: HashMap<&'a str, &'a str>,
}

impl<'a> RenderContext<'a> {
    pub fn new(journal: &'a str, site: &'a str, snapshot: &'a JournalSnapshot) -> Self {
        Self {
            journal,
            site,
            moods: snapshot.moods_by_id(),
            icons: snapshot.icons_by_keyword(),
            images: snapshot.cached_image_files(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteReport {
    pub entry_pages: usize,
    pub history_pages: usize,
    pub tag_pages: usize,
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}

/// Entry markup is kept as written; only line breaks become `<br />`.
pub fn entry_body_html(body: &str) -> String {
    LINE_BREAKS.replace_all(body, "<br />").into_owned()
}

fn display_time(unix: i64) -> String {
    match DateTime::from_timestamp(unix, 0) {
        Some(t) => t.format("%b. %d, %Y %I:%M %p").to_string(),
        None => "(None)".to_string(),
    }
}

fn tags_of(entry: &Entry) -> Vec<&str> {
    entry
        .props
        .taglist
        .as_deref()
        .map(|list| {
            list.split(", ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn tag_file(tag: &str) -> String {
    format!("{}.html", sanitize_keyword(tag))
}

/// Comments in display order with their depth (1 = top level).
///
/// Siblings are ordered by id. A comment whose parent is missing from `comments`
/// is shown at the top level so nothing stored is dropped.
pub fn thread_order(comments: &[Comment]) -> Vec<(&Comment, usize)> {
    let mut sorted: Vec<&Comment> = comments.iter().collect();
    sorted.sort_by_key(|c| c.id);
    let known: HashSet<i64> = sorted.iter().map(|c| c.id).collect();

    let mut children: HashMap<i64, Vec<&Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for c in &sorted {
        match c.parent_id {
            Some(parent) if parent != 0 && parent != c.id && known.contains(&parent) => {
                children.entry(parent).or_default().push(c)
            }
            _ => roots.push(*c),
        }
    }

    let mut out = Vec::with_capacity(sorted.len());
    let mut visited = HashSet::new();
    let mut stack: Vec<(&Comment, usize)> = roots.into_iter().rev().map(|c| (c, 1)).collect();
    while let Some((comment, depth)) = stack.pop() {
        if !visited.insert(comment.id) {
            continue;
        }
        out.push((comment, depth));
        if let Some(kids) = children.get(&comment.id) {
            for kid in kids.iter().rev() {
                stack.push((kid, depth + 1));
            }
        }
    }
    // Anything left only hangs off a cycle; surface it rather than lose it.
    for c in sorted {
        if !visited.contains(&c.id) {
            visited.insert(c.id);
            out.push((c, 1));
        }
    }
    out
}

fn page_shell(ctx: &RenderContext<'_>, title: &str, content: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <link rel="stylesheet" href="../stylesheet.css">
  </head>
  <body>
    <div id="header">
      <h1 id="title"><span>{journal}</span></h1>
      <h2 id="pagetitle"><span>{title}</span></h2>
    </div>
    <div id="content">
{content}
    </div>
  </body>
</html>
"#,
        title = html_escape(title),
        journal = html_escape(ctx.journal),
        content = content
    )
}

fn navigation(class: &str, back: Option<(String, String)>, forward: Option<(String, String)>) -> String {
    let mut nav = format!("<div class=\"navigation {class}\"><ul>");
    let has_back = back.is_some();
    if let Some((href, label)) = back {
        nav.push_str(&format!(
            "<li class=\"page-back\"><a href=\"{}\">{}</a></li>",
            html_attr(&href),
            html_escape(&label)
        ));
    }
    if let Some((href, label)) = forward {
        if has_back {
            nav.push_str("<li class=\"page-separator\"> | </li>");
        }
        nav.push_str(&format!(
            "<li class=\"page-forward\"><a href=\"{}\">{}</a></li>",
            html_attr(&href),
            html_escape(&label)
        ));
    }
    nav.push_str("</ul></div>\n");
    nav
}

fn user_link(ctx: &RenderContext<'_>, user: Option<&str>) -> String {
    match user {
        Some(name) => format!(
            "<span class=\"ljuser\"><a href=\"{}/users/{}\">{}</a></span>",
            html_attr(ctx.site),
            html_attr(name),
            html_escape(name)
        ),
        None => "<span class=\"ljuser\">(None)</span>".to_string(),
    }
}

fn render_entry(ctx: &RenderContext<'_>, entry: &Entry, comments: &[Comment]) -> String {
    let title = entry.subject.as_deref().unwrap_or("");
    let mut html = format!(
        "<div class=\"entry-wrapper\" id=\"entry-wrapper-{id}\"><div class=\"entry\" id=\"entry-{id}\">\n",
        id = entry.item_id
    );
    html.push_str(&format!(
        "<div class=\"header\"><h3 class=\"entry-title\"><a href=\"../entries/entry-{}.html\">{}</a></h3>\
         <span class=\"datetime\">{}</span></div>\n",
        entry.item_id,
        html_escape(title),
        html_escape(&display_time(entry.event_time_unix))
    ));

    html.push_str("<div class=\"contents\">");
    let keyword = entry.props.picture_keyword.as_deref().unwrap_or("*");
    let icon = self_or_default_icon(ctx, keyword);
    html.push_str("<div class=\"userpic\">");
    if let Some(file) = icon.and_then(|i| i.filename.as_deref()) {
        html.push_str(&format!(
            "<img src=\"../{}/{}\" alt=\"{}\">",
            USERPICS_DIR,
            html_attr(file),
            html_attr(keyword)
        ));
    }
    html.push_str("</div>");
    html.push_str(&format!(
        "<span class=\"poster entry-poster\">{}</span>",
        user_link(ctx, Some(ctx.journal))
    ));

    let body = images::localise_image_sources(
        &entry_body_html(&entry.body),
        &ctx.images,
        &format!("../{}/", images::IMAGES_DIR),
    );
    html.push_str(&format!("<div class=\"entry-content\">{body}</div>"));

    let mood = entry
        .props
        .current_moodid
        .and_then(|id| ctx.moods.get(&id))
        .map(|m| m.name.as_str());
    let music = entry.props.current_music.as_deref();
    if mood.is_some() || music.is_some() {
        html.push_str("<div class=\"metadata\"><ul>");
        if let Some(mood) = mood {
            html.push_str(&format!(
                "<li class=\"metadata-mood\"><span class=\"metadata-label\">Current Mood: </span>{}</li>",
                html_escape(mood)
            ));
        }
        if let Some(music) = music {
            html.push_str(&format!(
                "<li class=\"metadata-music\"><span class=\"metadata-label\">Current Music: </span>{}</li>",
                html_escape(music)
            ));
        }
        html.push_str("</ul></div>");
    }
    html.push_str("</div>\n");

    html.push_str("<div class=\"footer\">");
    let tags = tags_of(entry);
    if !tags.is_empty() {
        let links: Vec<String> = tags
            .iter()
            .map(|t| {
                format!(
                    "<li><a href=\"../tags/{}\" rel=\"tag\">{}</a></li>",
                    html_attr(&tag_file(t)),
                    html_escape(t)
                )
            })
            .collect();
        html.push_str(&format!(
            "<div class=\"tag\"><span class=\"tag-text\">Tags: </span><ul>{}</ul></div>",
            links.join(", ")
        ));
    }
    html.push_str("<ul class=\"entry-interaction-links\">");
    if let Some(url) = &entry.url {
        html.push_str(&format!(
            "<li class=\"entry-permalink\"><a href=\"{}\">Original</a></li>",
            html_attr(url)
        ));
    }
    let top_level = comments.iter().filter(|c| c.is_top_level()).count();
    if top_level > 0 {
        let label = if top_level == 1 {
            "1 comment".to_string()
        } else {
            format!("{top_level} comments")
        };
        html.push_str(&format!(
            "<li class=\"entry-comments\"><a href=\"../entries/entry-{}.html\">{}</a></li>",
            entry.item_id, label
        ));
    }
    html.push_str("</ul></div>\n</div></div>\n");
    html
}

fn self_or_default_icon<'a>(ctx: &RenderContext<'a>, keyword: &str) -> Option<&'a Icon> {
    ctx.icons
        .get(keyword)
        .or_else(|| ctx.icons.get("*"))
        .copied()
}

fn render_comments(ctx: &RenderContext<'_>, entry: &Entry, comments: &[Comment]) -> String {
    let mut html = format!(
        "<div class=\"comments\" id=\"comments-wrapper-{}\">\n",
        entry.item_id
    );
    for (comment, depth) in thread_order(comments) {
        let date = comment
            .date_unix
            .map(display_time)
            .unwrap_or_else(|| "(None)".to_string());
        html.push_str(&format!(
            "<div class=\"comment-thread comment-depth-{depth}\" id=\"cmt{id}\" style=\"margin-left: {indent}px\">\
             <div class=\"comment\"><div class=\"header\">",
            depth = depth,
            id = comment.id,
            indent = (depth - 1) * 25
        ));
        if let Some(subject) = comment.subject.as_deref().filter(|s| !s.is_empty()) {
            html.push_str(&format!(
                "<h4 class=\"comment-title\">{}</h4>",
                html_escape(subject)
            ));
        }
        html.push_str(&format!(
            "<span class=\"datetime\">Date: {}</span></div>",
            html_escape(&date)
        ));
        html.push_str(&format!(
            "<span class=\"poster comment-poster\">From: {}</span>",
            user_link(ctx, comment.user.as_deref())
        ));
        if comment.state.as_deref() == Some("D") {
            html.push_str("<div class=\"comment-content deleted\">(Deleted comment)</div>");
        } else {
            html.push_str(&format!(
                "<div class=\"comment-content\">{}</div>",
                comment.body.as_deref().unwrap_or("")
            ));
        }
        html.push_str("</div></div>\n");
    }
    html.push_str("</div>\n");
    html
}

pub fn render_entry_page(
    ctx: &RenderContext<'_>,
    entry: &Entry,
    comments: &[Comment],
    previous: Option<&Entry>,
    next: Option<&Entry>,
) -> String {
    let back = previous.map(|e| (format!("entry-{}.html", e.item_id), "Previous Entry".to_string()));
    let forward = next.map(|e| (format!("entry-{}.html", e.item_id), "Next Entry".to_string()));
    let mut content = navigation("topnav", back.clone(), forward.clone());
    content.push_str(&render_entry(ctx, entry, comments));
    content.push_str(&render_comments(ctx, entry, comments));
    content.push_str(&navigation("bottomnav", back, forward));
    page_shell(
        ctx,
        &format!("{} entry {}", ctx.journal, entry.item_id),
        &content,
    )
}

pub fn render_history_page(
    ctx: &RenderContext<'_>,
    entries: &[&Entry],
    comments_by_entry: &HashMap<i64, Vec<Comment>>,
    page_number: usize,
    previous_count: usize,
    next_count: usize,
) -> String {
    let back = (previous_count > 0).then(|| {
        (
            format!("page-{}.html", page_number - 1),
            format!("Previous {previous_count}"),
        )
    });
    let forward = (next_count > 0).then(|| {
        (
            format!("page-{}.html", page_number + 1),
            format!("Next {next_count}"),
        )
    });
    let mut content = navigation("topnav", back.clone(), forward.clone());
    for entry in entries {
        let comments = comments_by_entry
            .get(&entry.item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        content.push_str(&render_entry(ctx, entry, comments));
    }
    content.push_str(&navigation("bottomnav", back, forward));
    page_shell(
        ctx,
        &format!("{} entries page {}", ctx.journal, page_number),
        &content,
    )
}

pub fn render_tag_page(ctx: &RenderContext<'_>, tag: &str, entries: &[&Entry]) -> String {
    let mut content = String::from("<ul class=\"tagged-entries\">\n");
    for entry in entries {
        content.push_str(&format!(
            "<li><a href=\"../entries/entry-{}.html\">{}</a> <span class=\"datetime\">{}</span></li>\n",
            entry.item_id,
            html_escape(entry.subject.as_deref().unwrap_or("(No subject)")),
            html_escape(&display_time(entry.event_time_unix))
        ));
    }
    content.push_str("</ul>\n");
    page_shell(ctx, &format!("{} tag {}", ctx.journal, tag), &content)
}

async fn write_page(path: &Path, html: String) -> Result<()> {
    tokio::fs::write(path, html)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Render every page for the snapshot into `journal_dir`.
pub async fn write_site(
    journal_dir: &Path,
    journal: &str,
    site: &str,
    snapshot: &JournalSnapshot,
) -> Result<SiteReport> {
    let ctx = RenderContext::new(journal, site, snapshot);
    let comments_by_entry = snapshot.comments_by_entry();

    let mut by_date: Vec<&Entry> = snapshot.entries.iter().collect();
    by_date.sort_by_key(|e| (e.event_time_unix, e.item_id));

    for dir in ["entries", "history", "tags"] {
        tokio::fs::create_dir_all(journal_dir.join(dir))
            .await
            .with_context(|| format!("failed to create {}/{}", journal_dir.display(), dir))?;
    }

    let mut report = SiteReport::default();
    for (i, entry) in by_date.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| by_date[p]);
        let next = by_date.get(i + 1).copied();
        let comments = comments_by_entry
            .get(&entry.item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let html = render_entry_page(&ctx, entry, comments, previous, next);
        write_page(
            &journal_dir
                .join("entries")
                .join(format!("entry-{}.html", entry.item_id)),
            html,
        )
        .await?;
        report.entry_pages += 1;
    }

    let pages: Vec<&[&Entry]> = by_date.chunks(ENTRIES_PER_PAGE).collect();
    for (i, group) in pages.iter().enumerate() {
        let previous_count = i.checked_sub(1).map(|p| pages[p].len()).unwrap_or(0);
        let next_count = pages.get(i + 1).map(|g| g.len()).unwrap_or(0);
        let html = render_history_page(
            &ctx,
            group,
            &comments_by_entry,
            i + 1,
            previous_count,
            next_count,
        );
        write_page(
            &journal_dir.join("history").join(format!("page-{}.html", i + 1)),
            html,
        )
        .await?;
        report.history_pages += 1;
    }

    let mut by_tag: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
    for entry in by_date.iter().copied() {
        for tag in tags_of(entry) {
            by_tag.entry(tag).or_default().push(entry);
        }
    }
    for (tag, entries) in &by_tag {
        let html = render_tag_page(&ctx, tag, entries);
        write_page(&journal_dir.join("tags").join(tag_file(tag)), html).await?;
        report.tag_pages += 1;
    }

    write_page(&journal_dir.join("stylesheet.css"), STYLESHEET.to_string()).await?;

    info!(
        journal,
        entries = report.entry_pages,
        history = report.history_pages,
        tags = report.tag_pages,
        "rendered journal"
    );
    Ok(report)
}

pub const STYLESHEET: &str = r#"
:root {
  color-scheme: light dark;
  --fg: #222;
  --bg: #fff;
  --muted: #666;
  --rule: #ddd;
}

@media (prefers-color-scheme: dark) {
  :root {
    --fg: #eee;
    --bg: #121212;
    --muted: #aaa;
    --rule: #333;
  }
}

html,
body {
  margin: 0;
  padding: 0;
  background: var(--bg);
  color: var(--fg);
  font: 15px/1.6 Georgia, 'Times New Roman', serif;
}

#header {
  padding: 16px;
  border-bottom: 1px solid var(--rule);
}

#content {
  padding: 16px;
  max-width: 820px;
  margin: 0 auto;
}

.navigation ul,
.entry-interaction-links,
.tag ul,
.metadata ul {
  list-style: none;
  padding: 0;
  margin: 4px 0;
}

.navigation li,
.entry-interaction-links li,
.tag li {
  display: inline;
}

.entry-wrapper {
  margin: 16px 0 24px;
  padding-bottom: 12px;
  border-bottom: 1px dashed var(--rule);
}

.datetime,
.metadata-label,
.tag-text {
  color: var(--muted);
}

.userpic img {
  float: left;
  margin: 0 12px 8px 0;
  max-width: 100px;
}

.entry-content {
  clear: both;
}

.entry-content img {
  max-width: 100%;
}

.comment-thread {
  margin-top: 8px;
  padding: 6px 8px;
  border-left: 2px solid var(--rule);
}

.comment-title {
  margin: 0;
}

.deleted {
  color: var(--muted);
  font-style: italic;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CachedImage, EntryProps};

    fn entry(item_id: i64, unix: i64, body: &str) -> Entry {
        Entry {
            item_id,
            anum: None,
            event_time: String::new(),
            event_time_unix: unix,
            log_time: String::new(),
            log_time_unix: unix,
            subject: Some(format!("Subject {item_id}")),
            body: body.to_string(),
            url: Some(format!("https://alice.example.org/{item_id}.html")),
            props: EntryProps::default(),
        }
    }

    fn comment(id: i64, parent: Option<i64>) -> Comment {
        Comment {
            id,
            entry_id: 1,
            date: None,
            date_unix: Some(1_262_304_000),
            parent_id: parent,
            poster_id: None,
            user: Some("bob".into()),
            subject: None,
            body: Some(format!("body {id}")),
            state: None,
        }
    }

    #[test]
    fn thread_order_is_depth_first_by_id() {
        let comments = vec![
            comment(5, Some(1)),
            comment(1, None),
            comment(3, Some(0)),
            comment(2, Some(1)),
            comment(4, Some(2)),
        ];
        let order: Vec<(i64, usize)> = thread_order(&comments)
            .into_iter()
            .map(|(c, d)| (c.id, d))
            .collect();
        assert_eq!(order, vec![(1, 1), (2, 2), (4, 3), (5, 2), (3, 1)]);
    }

    #[test]
    fn thread_order_keeps_orphans_and_cycles() {
        let comments = vec![comment(7, Some(99)), comment(8, Some(9)), comment(9, Some(8))];
        let order: Vec<i64> = thread_order(&comments).into_iter().map(|(c, _)| c.id).collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], 7);
        assert!(order.contains(&8) && order.contains(&9));
    }

    #[test]
    fn deep_threads_do_not_recurse() {
        let comments: Vec<Comment> = (1..=5000)
            .map(|id| comment(id, if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let order = thread_order(&comments);
        assert_eq!(order.len(), 5000);
        assert_eq!(order.last().map(|(_, d)| *d), Some(5000));
    }

    #[test]
    fn entry_body_keeps_markup_and_breaks_lines() {
        assert_eq!(
            entry_body_html("a <b>b</b>\r\nc\nd\re"),
            "a <b>b</b><br />c<br />d<br />e"
        );
    }

    #[test]
    fn entry_page_links_neighbours_and_localises_images() {
        let mut snapshot = JournalSnapshot::default();
        let mut e = entry(2, 1_000, "see <img src=\"https://pics/x.png\">");
        e.props.taglist = Some("cats, dogs".into());
        e.props.current_music = Some("Low & slow".into());
        snapshot.entries = vec![entry(1, 500, "first"), e.clone(), entry(3, 2_000, "last")];
        snapshot.cached_images = vec![CachedImage {
            id: 1,
            url: "https://pics/x.png".into(),
            filename: Some("abc.png".into()),
            date_first_seen: 0,
            date_last_attempted: None,
            cached: true,
        }];
        snapshot.icons = vec![Icon {
            keywords: "*".into(),
            filename: Some("_.png".into()),
            url: None,
        }];
        let ctx = RenderContext::new("alice", "https://www.dreamwidth.org", &snapshot);
        let comments = vec![comment(1, None)];
        let html = render_entry_page(
            &ctx,
            &e,
            &comments,
            snapshot.entries.first(),
            snapshot.entries.last(),
        );
        assert!(html.contains("href=\"entry-1.html\">Previous Entry"));
        assert!(html.contains("href=\"entry-3.html\">Next Entry"));
        assert!(html.contains("<img src=\"../images/abc.png\">"));
        assert!(html.contains("../userpics/_.png"));
        assert!(html.contains("../tags/cats.html"));
        assert!(html.contains("Low &amp; slow"));
        assert!(html.contains("1 comment"));
        assert!(html.contains("body 1"));
    }

    #[tokio::test]
    async fn write_site_pages_history_in_twenties() {
        let td = tempfile::tempdir().unwrap();
        let mut snapshot = JournalSnapshot::default();
        snapshot.entries = (1..=45).map(|i| entry(i, i * 100, "x")).collect();
        snapshot.entries[0].props.taglist = Some("only".into());

        let report = write_site(td.path(), "alice", "https://www.dreamwidth.org", &snapshot)
            .await
            .unwrap();
        assert_eq!(report.entry_pages, 45);
        assert_eq!(report.history_pages, 3);
        assert_eq!(report.tag_pages, 1);

        let page2 = std::fs::read_to_string(td.path().join("history/page-2.html")).unwrap();
        assert!(page2.contains("Previous 20"));
        assert!(page2.contains("Next 5"));
        assert!(td.path().join("tags/only.html").exists());
        assert!(td.path().join("stylesheet.css").exists());
    }
}
