use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, Response, Url};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{CommentMeta, Entry, Mood, SyncItem, Tag, UserMapping};

pub mod convert;
pub mod export;
pub mod xml;
pub mod xmlrpc;

use xmlrpc::{Params, Value};

const RPC_PATH: &str = "/interface/xmlrpc";
const FLAT_PATH: &str = "/interface/flat";
const EXPORT_PATH: &str = "/export_comments.bml";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    Status { status: u16, url: String },
    #[error("XML-RPC fault {code}: {message}")]
    Fault { code: i64, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid server URL {0}")]
    InvalidServer(String),
}

impl RemoteError {
    /// Network and HTTP status failures; a later run may succeed.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Http(_) | RemoteError::Status { .. })
    }
}

/// Site root for a configured server URL: surrounding whitespace, trailing
/// slashes and an `/interface/xmlrpc` suffix are dropped.
pub fn site_base(server: &str) -> &str {
    let trimmed = server.trim().trim_end_matches('/');
    trimmed
        .strip_suffix(RPC_PATH)
        .unwrap_or(trimmed)
        .trim_end_matches('/')
}

/// Server and credentials for one journal, fixed for the whole run.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    server: String,
    username: String,
    password: String,
    journal: String,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// `server` may be the bare site URL or the full `.../interface/xmlrpc` endpoint.
    pub fn new(
        server: &str,
        username: &str,
        password: &str,
        journal: &str,
    ) -> Result<Self, RemoteError> {
        let base = site_base(server);
        Url::parse(base).map_err(|err| RemoteError::InvalidServer(format!("{base}: {err}")))?;
        Ok(Self {
            server: base.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            journal: journal.to_string(),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn journal(&self) -> &str {
        &self.journal
    }

    pub fn is_own_journal(&self) -> bool {
        self.username == self.journal
    }

    /// Journal to act as on the export endpoint when it is not our own.
    pub fn authas(&self) -> Option<&str> {
        (!self.is_own_journal()).then_some(self.journal.as_str())
    }

    fn authed(&self, params: Params) -> Params {
        params
            .with("auth_method", "clear")
            .with("username", self.username.as_str())
            .with("password", self.password.as_str())
            .with("ver", 1i64)
    }
}

/// Session cookie for the comment export endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSession {
    pub ljsession: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMetaPage {
    pub comments: Vec<(i64, CommentMeta)>,
    pub usermap: Vec<UserMapping>,
    /// Highest comment id the server knows for this journal.
    pub max_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentBody {
    pub id: i64,
    pub entry_id: i64,
    pub parent_id: Option<i64>,
    pub poster_id: Option<i64>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub date: Option<String>,
    pub date_unix: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Userpics {
    pub by_keyword: BTreeMap<String, String>,
    pub default_url: Option<String>,
}

impl Userpics {
    /// Keyword/url pairs, the default picture first under `*`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.default_url
            .as_deref()
            .map(|url| ("*", url))
            .into_iter()
            .chain(
                self.by_keyword
                    .iter()
                    .map(|(k, u)| (k.as_str(), u.as_str())),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: Option<i64>,
    pub username: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait JournalService: Send + Sync {
    async fn login(&self, ctx: &SessionContext) -> Result<ExportSession, RemoteError>;

    async fn sync_items(
        &self,
        ctx: &SessionContext,
        last_sync: &str,
    ) -> Result<Vec<SyncItem>, RemoteError>;

    async fn fetch_entry(
        &self,
        ctx: &SessionContext,
        item_id: i64,
    ) -> Result<Option<Entry>, RemoteError>;

    async fn comment_meta_page(
        &self,
        ctx: &SessionContext,
        session: &ExportSession,
        start_id: i64,
    ) -> Result<CommentMetaPage, RemoteError>;

    async fn comment_body_page(
        &self,
        ctx: &SessionContext,
        session: &ExportSession,
        start_id: i64,
    ) -> Result<Vec<CommentBody>, RemoteError>;

    async fn moods(&self, ctx: &SessionContext) -> Result<Vec<Mood>, RemoteError>;

    async fn tags(&self, ctx: &SessionContext) -> Result<Vec<Tag>, RemoteError>;

    async fn userpics(&self, ctx: &SessionContext) -> Result<Userpics, RemoteError>;

    async fn user_info(&self, ctx: &SessionContext) -> Result<UserInfo, RemoteError>;

    async fn download(&self, url: &str) -> Result<Download, RemoteError>;
}

/// HTTP implementation of [`JournalService`].
#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    page_size: Option<u32>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!("lj-archiver/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            page_size: None,
        })
    }

    /// Ask the export endpoint for `numitems` comments per page.
    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    async fn call(
        &self,
        ctx: &SessionContext,
        method: &str,
        params: Params,
    ) -> Result<Value, RemoteError> {
        let url = format!("{}{}", ctx.server(), RPC_PATH);
        let body = xmlrpc::encode_call(
            &format!("LJ.XMLRPC.{method}"),
            &[ctx.authed(params).into_value()],
        );
        debug!(method, journal = ctx.journal(), "xml-rpc call");
        let res = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;
        let text = ensure_success(res).await?.text().await?;
        xmlrpc::decode_response(&text)
    }

    async fn export_page(
        &self,
        ctx: &SessionContext,
        session: &ExportSession,
        kind: &str,
        start_id: i64,
    ) -> Result<String, RemoteError> {
        let mut url = Url::parse(&format!("{}{}", ctx.server(), EXPORT_PATH))
            .map_err(|err| RemoteError::Malformed(format!("bad export URL: {err}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("get", kind);
            q.append_pair("startid", &start_id.to_string());
            if let Some(n) = self.page_size {
                q.append_pair("numitems", &n.to_string());
            }
            if let Some(journal) = ctx.authas() {
                q.append_pair("authas", journal);
            }
        }
        debug!(kind, start_id, "export page");
        let res = self
            .http
            .get(url)
            .header(COOKIE, format!("ljsession={}", session.ljsession))
            .send()
            .await?;
        Ok(ensure_success(res).await?.text().await?)
    }
}

async fn ensure_success(res: Response) -> Result<Response, RemoteError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let url = res.url().to_string();
    let body = res.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    warn!(%status, %url, body = %snippet, "remote error");
    Err(RemoteError::Status {
        status: status.as_u16(),
        url,
    })
}

#[async_trait]
impl JournalService for RemoteClient {
    async fn login(&self, ctx: &SessionContext) -> Result<ExportSession, RemoteError> {
        self.call(ctx, "login", Params::new()).await?;

        let url = format!("{}{}", ctx.server(), FLAT_PATH);
        let res = self
            .http
            .post(&url)
            .form(&[
                ("mode", "sessiongenerate"),
                ("user", ctx.username()),
                ("auth_method", "clear"),
                ("password", ctx.password.as_str()),
            ])
            .send()
            .await?;
        let text = ensure_success(res).await?.text().await?;
        let flat = convert::parse_flat(&text);
        if flat.get("success").map(String::as_str) == Some("FAIL") {
            let msg = flat.get("errmsg").cloned().unwrap_or_default();
            return Err(RemoteError::Auth(msg));
        }
        let ljsession = flat
            .get("ljsession")
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or_else(|| RemoteError::Auth("no ljsession in sessiongenerate reply".into()))?;
        Ok(ExportSession { ljsession })
    }

    async fn sync_items(
        &self,
        ctx: &SessionContext,
        last_sync: &str,
    ) -> Result<Vec<SyncItem>, RemoteError> {
        let params = Params::new()
            .with("lastsync", last_sync)
            .with("usejournal", ctx.journal());
        let v = self.call(ctx, "syncitems", params).await?;
        convert::sync_items(&v)
    }

    async fn fetch_entry(
        &self,
        ctx: &SessionContext,
        item_id: i64,
    ) -> Result<Option<Entry>, RemoteError> {
        let params = Params::new()
            .with("selecttype", "one")
            .with("itemid", item_id)
            .with("usejournal", ctx.journal());
        let v = self.call(ctx, "getevents", params).await?;
        convert::first_event(&v)
    }

    async fn comment_meta_page(
        &self,
        ctx: &SessionContext,
        session: &ExportSession,
        start_id: i64,
    ) -> Result<CommentMetaPage, RemoteError> {
        let body = self
            .export_page(ctx, session, "comment_meta", start_id)
            .await?;
        export::parse_comment_meta(&body)
    }

    async fn comment_body_page(
        &self,
        ctx: &SessionContext,
        session: &ExportSession,
        start_id: i64,
    ) -> Result<Vec<CommentBody>, RemoteError> {
        let body = self
            .export_page(ctx, session, "comment_body", start_id)
            .await?;
        export::parse_comment_bodies(&body)
    }

    async fn moods(&self, ctx: &SessionContext) -> Result<Vec<Mood>, RemoteError> {
        let v = self
            .call(ctx, "login", Params::new().with("getmoods", 1i64))
            .await?;
        convert::moods(&v)
    }

    async fn tags(&self, ctx: &SessionContext) -> Result<Vec<Tag>, RemoteError> {
        let v = self
            .call(
                ctx,
                "getusertags",
                Params::new().with("usejournal", ctx.journal()),
            )
            .await?;
        convert::tags(&v)
    }

    async fn userpics(&self, ctx: &SessionContext) -> Result<Userpics, RemoteError> {
        let params = Params::new()
            .with("getpickws", 1i64)
            .with("getpickwurls", 1i64);
        let v = self.call(ctx, "login", params).await?;
        convert::userpics(&v)
    }

    async fn user_info(&self, ctx: &SessionContext) -> Result<UserInfo, RemoteError> {
        let v = self.call(ctx, "login", Params::new()).await?;
        Ok(convert::user_info(&v, ctx.username()))
    }

    async fn download(&self, url: &str) -> Result<Download, RemoteError> {
        let res = ensure_success(self.http.get(url).send().await?).await?;
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = res.bytes().await?.to_vec();
        Ok(Download {
            bytes,
            content_type,
        })
    }
}
