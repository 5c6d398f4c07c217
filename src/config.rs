//! Configuration loader and validator for the journal archiver.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::remote::SessionContext;

/// Environment variable consulted when the config omits `server.password`.
pub const PASSWORD_ENV: &str = "LJ_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub journals: Vec<String>,
    pub app: App,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Remote server and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Per-run work bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default)]
    pub max_entries_per_run: Option<usize>,
    #[serde(default = "default_max_comment_meta_pages")]
    pub max_comment_meta_pages: usize,
    #[serde(default)]
    pub comment_page_size: Option<u32>,
    #[serde(default = "default_image_retry_hours")]
    pub image_retry_hours: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_entries_per_run: None,
            max_comment_meta_pages: default_max_comment_meta_pages(),
            comment_page_size: None,
            image_retry_hours: default_image_retry_hours(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_comment_meta_pages() -> usize {
    50
}

/// Upper bound for `sync.image_retry_hours` (ten years).
pub const MAX_IMAGE_RETRY_HOURS: u64 = 24 * 365 * 10;

fn default_image_retry_hours() -> u64 {
    24
}

impl SyncSettings {
    /// Cool-down before a failed image download is tried again.
    pub fn image_retry_after(&self) -> chrono::Duration {
        let hours = self.image_retry_hours.min(MAX_IMAGE_RETRY_HOURS);
        chrono::Duration::hours(hours as i64)
    }
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Journals to archive; the account's own journal when none are listed.
    pub fn journal_names(&self) -> Vec<String> {
        if self.journals.is_empty() {
            vec![self.server.username.clone()]
        } else {
            self.journals.clone()
        }
    }

    /// Directory holding one journal's database, caches and rendered pages.
    pub fn journal_dir(&self, journal: &str) -> PathBuf {
        Path::new(&self.app.resolved_data_dir()).join(journal)
    }

    /// Build the immutable session context for one journal.
    pub fn session_for(&self, journal: &str) -> Result<SessionContext, ConfigError> {
        let password = match &self.server.password {
            Some(p) if !p.is_empty() => p.clone(),
            _ => std::env::var(PASSWORD_ENV)
                .map_err(|_| ConfigError::Invalid("server.password or LJ_PASSWORD must be set"))?,
        };
        SessionContext::new(&self.server.url, &self.server.username, &password, journal)
            .map_err(|_| ConfigError::Invalid("server.url must be a valid URL"))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.url.trim().is_empty() {
        return Err(ConfigError::Invalid("server.url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.server.url).is_err() {
        return Err(ConfigError::Invalid("server.url must be a valid URL"));
    }
    if cfg.server.username.trim().is_empty() {
        return Err(ConfigError::Invalid("server.username must be non-empty"));
    }
    if cfg.server.timeout_secs == 0 {
        return Err(ConfigError::Invalid("server.timeout_secs must be > 0"));
    }
    if cfg.journals.iter().any(|j| j.trim().is_empty()) {
        return Err(ConfigError::Invalid("journals must not contain empty names"));
    }
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.sync.max_entries_per_run == Some(0) {
        return Err(ConfigError::Invalid("sync.max_entries_per_run must be > 0"));
    }
    if cfg.sync.max_comment_meta_pages == 0 {
        return Err(ConfigError::Invalid("sync.max_comment_meta_pages must be > 0"));
    }
    if cfg.sync.comment_page_size == Some(0) {
        return Err(ConfigError::Invalid("sync.comment_page_size must be > 0"));
    }
    if cfg.sync.image_retry_hours > MAX_IMAGE_RETRY_HOURS {
        return Err(ConfigError::Invalid(
            "sync.image_retry_hours must be at most 87600 (ten years)",
        ));
    }
    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"server:
  url: "https://www.dreamwidth.org"
  username: "exampleuser"
  password: "hunter2"
  timeout_secs: 10

journals:
  - exampleuser
  - examplecommunity

app:
  data_dir: "./archive"

sync:
  max_entries_per_run: null
  max_comment_meta_pages: 50
  comment_page_size: null
  image_retry_hours: 24
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.max_comment_meta_pages, 50);
        assert_eq!(cfg.sync.max_entries_per_run, None);
    }

    #[test]
    fn sync_section_is_optional() {
        let yaml = r#"
server:
  url: "https://www.livejournal.com"
  username: "bob"
app:
  data_dir: "./out"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync, SyncSettings::default());
        assert_eq!(cfg.server.timeout_secs, 10);
        assert_eq!(cfg.journal_names(), vec!["bob".to_string()]);
    }

    #[test]
    fn invalid_server_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.server.username = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("server.username")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.server.url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("server.url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.server.timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_bounds() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_entries_per_run = Some(0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_comment_meta_pages = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.comment_page_size = Some(0);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn image_retry_hours_are_bounded() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(cfg.sync.image_retry_after(), chrono::Duration::hours(24));

        cfg.sync.image_retry_hours = u64::MAX;
        match validate(&cfg) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("image_retry_hours")),
            other => panic!("expected invalid config, got {other:?}"),
        }
        assert_eq!(
            cfg.sync.image_retry_after(),
            chrono::Duration::hours(MAX_IMAGE_RETRY_HOURS as i64)
        );

        cfg.sync.image_retry_hours = MAX_IMAGE_RETRY_HOURS;
        validate(&cfg).unwrap();
    }

    #[test]
    fn session_for_uses_config_password() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let ctx = cfg.session_for("examplecommunity").unwrap();
        assert_eq!(ctx.username(), "exampleuser");
        assert_eq!(ctx.journal(), "examplecommunity");
        assert!(!ctx.is_own_journal());
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("archive");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert_eq!(cfg.journal_dir("alice"), data_path.join("alice"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(
            cfg.journal_names(),
            vec!["exampleuser".to_string(), "examplecommunity".to_string()]
        );
    }
}
