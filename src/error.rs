use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("probe failed: server responded {0}")]
    ProbeStatus(StatusCode),

    #[error("invalid Content-Length header: {0:?}")]
    InvalidLength(String),

    #[error("part {index}: response error: {status}")]
    PartStatus { index: usize, status: StatusCode },

    #[error("part {index}: server ignored the range request")]
    RangeIgnored { index: usize },

    #[error("part {index}: stream ended early at offset {current}")]
    Truncated { index: usize, current: u64 },

    #[error("part {index}: worker stopped abnormally: {reason}")]
    Worker { index: usize, reason: String },

    #[error("no saved download named {0:?}")]
    NotFound(String),

    #[error("download folder {0:?} exists but holds no state record; remove it to start over")]
    StaleFolder(PathBuf),

    #[error("state record {path:?} is corrupt: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state record for {0:?} has no parts")]
    EmptyState(String),

    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("rate limiter rejected a {0} byte increment")]
    RateLimit(u32),

    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
