//! Error types for the routing loop, its collaborators, and persistence.

use thiserror::Error;

/// Top-level crate error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Council(#[from] CouncilError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("router is no longer running")]
    RouterClosed,

    #[error("unknown bank {bank:?}, expected one of: {known}")]
    UnknownBank { bank: String, known: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A transaction that violates the feature-extraction contract.
///
/// These are caller errors and are fatal at the router boundary.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("transaction {id} has non-positive or non-finite amount {amount}")]
    InvalidAmount { id: String, amount: f64 },

    #[error("transaction {id} amount {amount} exceeds the maximum of {max}")]
    AmountOutOfRange { id: String, amount: f64, max: f64 },

    #[error("transaction {id} produced features the model cannot absorb")]
    UnusableFeatures { id: String },

    #[error("failed transaction {id} carries no error code")]
    MissingErrorCode { id: String },

    #[error("transaction {id} is not failed but carries error code {code}")]
    UnexpectedErrorCode { id: String, code: String },

    #[error("transaction {id} has an empty bank name")]
    MissingBank { id: String },
}

/// Reasoning backend failures. Always absorbed by the council into a
/// neutral fallback; never surfaced to the router.
#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("reasoning backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("reasoning backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("reasoning backend returned malformed output: {0}")]
    Malformed(String),

    #[error("council deliberation timed out after {0}s")]
    Timeout(u64),

    #[error("missing API key for reasoning backend")]
    MissingApiKey,

    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),
}

/// Persistence errors from the SQLite store or snapshot files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payops database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid database path: {0}")]
    InvalidPath(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid environment override {key}={value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
