use permission_core::{ConfigError, DocumentError};
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the registry's box store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("box {key} was modified concurrently")]
    Conflict { key: String },
    #[error("undecodable store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Transport failures, 5xx/429 answers and conflicts may succeed when
    /// retried; everything else will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Conflict { .. } => true,
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
            StoreError::Decode(_) => false,
        }
    }
}

/// Failure reading a staking, subscription or indexer feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("feed answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable feed response: {0}")]
    Decode(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("registry already holds {0} records; seeding needs an empty registry")]
    StoreNotEmpty(usize),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

// --- shared HTTP failure ----------------------------------------------------

/// Failure of one HTTP exchange, before it is attributed to a store or feed.
#[derive(Debug)]
pub(crate) enum HttpFailure {
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
}

impl From<reqwest::Error> for HttpFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            HttpFailure::Decode(e.to_string())
        } else {
            HttpFailure::Transport(e.to_string())
        }
    }
}

impl From<HttpFailure> for StoreError {
    fn from(e: HttpFailure) -> Self {
        match e {
            HttpFailure::Transport(m) => StoreError::Transport(m),
            HttpFailure::Status { status, body } => StoreError::Status { status, body },
            HttpFailure::Decode(m) => StoreError::Decode(m),
        }
    }
}

impl From<HttpFailure> for FeedError {
    fn from(e: HttpFailure) -> Self {
        match e {
            HttpFailure::Transport(m) => FeedError::Transport(m),
            HttpFailure::Status { status, body } => FeedError::Status { status, body },
            HttpFailure::Decode(m) => FeedError::Decode(m),
        }
    }
}

impl From<StoreError> for FeedError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transport(m) => FeedError::Transport(m),
            StoreError::Status { status, body } => FeedError::Status { status, body },
            StoreError::Conflict { key } => FeedError::Status {
                status: 409,
                body: key,
            },
            StoreError::Decode(m) => FeedError::Decode(m),
        }
    }
}
