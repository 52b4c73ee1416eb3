use thiserror::Error;

/// Errors raised while encoding or decoding registry box values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed record: {len} bytes is not 48 + 9*n")]
    MalformedRecord { len: usize },
    #[error("record carries {0} document contributions, more than a box can hold")]
    TooManyContributions(usize),
    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be 58 characters, got {0}")]
    Length(usize),
    #[error("address contains a character outside the base32 alphabet: {0:?}")]
    Alphabet(char),
    #[error("address checksum mismatch")]
    Checksum,
    #[error("address has non-zero padding bits in its final character")]
    Padding,
    #[error("box key must be 32 bytes, got {0}")]
    KeyLength(usize),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("boundary table is empty")]
    Empty,
    #[error("boundary {0} must be positive")]
    NonPositiveBoundary(u64),
    #[error("base votes {0} for boundary {1} must be finite and non-negative")]
    InvalidBaseVotes(f64, u64),
    #[error("boundaries must be strictly ascending ({previous} then {next})")]
    NotAscending { previous: u64, next: u64 },
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("document {path} is not an address map: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("membership box must be 40 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration value `{0}` is not set")]
    Missing(&'static str),
    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
