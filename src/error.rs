use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Todoist API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Logseq graph error: {0}")]
    Graph(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid exclusion pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid URL: {0}")]
    UrlParse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("a sync run is already in progress")]
    RunInProgress,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for HTTP 429 responses from either side of the sync.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Api { status, .. } => *status == 429,
            Error::Http(e) => e.status().map(|s| s.as_u16()) == Some(429),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::UrlParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
