//! Run configuration, resolved from the settings table and the environment.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::document::StatusAliases;
use crate::error::{Error, Result};
use crate::graph::logseq::DEFAULT_API_URL;
use crate::graph::throttle::DEFAULT_MUTATION_DELAY;
use crate::storage::{repository, Database};
use crate::sync::PageMode;

pub mod keys {
    pub const TODOIST_TOKEN: &str = "todoist_token";
    pub const LOGSEQ_URL: &str = "logseq_url";
    pub const LOGSEQ_TOKEN: &str = "logseq_token";
    pub const PAGE_PREFIX: &str = "page_prefix";
    pub const PAGE_MODE: &str = "page_mode";
    pub const SYNC_INTERVAL_MINUTES: &str = "sync_interval_minutes";
    pub const INCLUDE_COMMENTS: &str = "include_comments";
    pub const EXCLUDE_PATTERNS: &str = "exclude_patterns";
    pub const VERBOSE: &str = "verbose";
    pub const STATUS_ACTIVE: &str = "status_active";
    pub const STATUS_COMPLETED: &str = "status_completed";
    pub const STATUS_DELETED: &str = "status_deleted";
    pub const MUTATION_DELAY_MS: &str = "mutation_delay_ms";
}

pub const KNOWN_KEYS: &[&str] = &[
    keys::TODOIST_TOKEN,
    keys::LOGSEQ_URL,
    keys::LOGSEQ_TOKEN,
    keys::PAGE_PREFIX,
    keys::PAGE_MODE,
    keys::SYNC_INTERVAL_MINUTES,
    keys::INCLUDE_COMMENTS,
    keys::EXCLUDE_PATTERNS,
    keys::VERBOSE,
    keys::STATUS_ACTIVE,
    keys::STATUS_COMPLETED,
    keys::STATUS_DELETED,
    keys::MUTATION_DELAY_MS,
];

pub const ENV_TODOIST_TOKEN: &str = "TODOIST_API_TOKEN";
pub const ENV_LOGSEQ_TOKEN: &str = "LOGSEQ_API_TOKEN";
pub const ENV_LOGSEQ_URL: &str = "LOGSEQ_API_URL";

pub const DEFAULT_PAGE_PREFIX: &str = "Todoist";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;

/// Snapshot of the settings a run reads. Taken once per run.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub todoist_token: Option<String>,
    pub logseq_url: String,
    pub logseq_token: Option<String>,
    pub page_prefix: String,
    pub page_mode: PageMode,
    pub sync_interval_minutes: u64,
    pub include_comments: bool,
    pub exclude_patterns: Vec<String>,
    pub verbose: bool,
    pub aliases: StatusAliases,
    pub mutation_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            todoist_token: None,
            logseq_url: DEFAULT_API_URL.to_string(),
            logseq_token: None,
            page_prefix: DEFAULT_PAGE_PREFIX.to_string(),
            page_mode: PageMode::Single,
            sync_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            include_comments: false,
            exclude_patterns: Vec::new(),
            verbose: false,
            aliases: StatusAliases::default(),
            mutation_delay: DEFAULT_MUTATION_DELAY,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("SyncConfig")
            .field("todoist_token", &redact(&self.todoist_token))
            .field("logseq_url", &self.logseq_url)
            .field("logseq_token", &redact(&self.logseq_token))
            .field("page_prefix", &self.page_prefix)
            .field("page_mode", &self.page_mode)
            .field("sync_interval_minutes", &self.sync_interval_minutes)
            .field("include_comments", &self.include_comments)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("verbose", &self.verbose)
            .field("aliases", &self.aliases)
            .field("mutation_delay", &self.mutation_delay)
            .finish()
    }
}

impl SyncConfig {
    /// Read the settings table and apply environment overrides.
    pub async fn load(db: &Database) -> Result<Self> {
        let settings: HashMap<String, String> = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?
            .into_iter()
            .collect();
        Self::resolve(&settings, |name| std::env::var(name).ok())
    }

    /// Build a snapshot from stored settings. `env` supplies overrides.
    pub fn resolve<F>(settings: &HashMap<String, String>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            settings
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let env = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mut config = Self {
            todoist_token: env(ENV_TODOIST_TOKEN)
                .or_else(|| get(keys::TODOIST_TOKEN).map(String::from)),
            logseq_url: env(ENV_LOGSEQ_URL)
                .or_else(|| get(keys::LOGSEQ_URL).map(String::from))
                .unwrap_or(defaults.logseq_url),
            logseq_token: env(ENV_LOGSEQ_TOKEN)
                .or_else(|| get(keys::LOGSEQ_TOKEN).map(String::from)),
            page_prefix: get(keys::PAGE_PREFIX)
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.page_prefix),
            page_mode: get(keys::PAGE_MODE)
                .map(str::parse::<PageMode>)
                .transpose()?
                .unwrap_or_default(),
            sync_interval_minutes: get(keys::SYNC_INTERVAL_MINUTES)
                .map(|v| parse_number(keys::SYNC_INTERVAL_MINUTES, v))
                .transpose()?
                .unwrap_or(defaults.sync_interval_minutes)
                .max(1),
            include_comments: get(keys::INCLUDE_COMMENTS)
                .map(|v| parse_bool(keys::INCLUDE_COMMENTS, v))
                .transpose()?
                .unwrap_or(false),
            exclude_patterns: get(keys::EXCLUDE_PATTERNS)
                .map(split_patterns)
                .unwrap_or_default(),
            verbose: get(keys::VERBOSE)
                .map(|v| parse_bool(keys::VERBOSE, v))
                .transpose()?
                .unwrap_or(false),
            aliases: defaults.aliases,
            mutation_delay: get(keys::MUTATION_DELAY_MS)
                .map(|v| parse_number(keys::MUTATION_DELAY_MS, v))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.mutation_delay),
        };

        if let Some(v) = get(keys::STATUS_ACTIVE) {
            config.aliases.active = v.to_string();
        }
        if let Some(v) = get(keys::STATUS_COMPLETED) {
            config.aliases.completed = v.to_string();
        }
        if let Some(v) = get(keys::STATUS_DELETED) {
            config.aliases.deleted = v.to_string();
        }
        Ok(config)
    }

    /// Minimum time between automatic runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.max(1) * 60)
    }

    pub fn require_todoist_token(&self) -> Result<&str> {
        self.todoist_token.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "no Todoist token. Run: todoseq config set {} <TOKEN> (or set {ENV_TODOIST_TOKEN})",
                keys::TODOIST_TOKEN
            ))
        })
    }
}

/// Check a value before it is stored with `config set`.
pub fn validate(key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    match key {
        keys::PAGE_MODE => value.parse::<PageMode>().map(|_| ()),
        keys::SYNC_INTERVAL_MINUTES | keys::MUTATION_DELAY_MS => {
            parse_number(key, value).map(|_| ())
        }
        keys::INCLUDE_COMMENTS | keys::VERBOSE => parse_bool(key, value).map(|_| ()),
        keys::LOGSEQ_URL => url::Url::parse(value).map(|_| ()).map_err(Error::from),
        k if KNOWN_KEYS.contains(&k) => Ok(()),
        other => Err(Error::Config(format!(
            "unknown setting '{other}'. Known settings: {}",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

/// Settings holding credentials are never printed in full.
pub fn is_secret(key: &str) -> bool {
    key.ends_with("_token")
}

/// Keep the last four characters of a secret.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected true or false, got '{other}'"))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected a whole number, got '{value}'")))
}

/// One pattern per line; blank lines ignored.
fn split_patterns(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
