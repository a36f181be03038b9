//! Error types for the drift source connector.
//!
//! Storage failures are classified into a small taxonomy so callers can
//! distinguish retryable conditions (`Transient`) from fatal ones (`Auth`)
//! and per-record decode failures (`Malformed`).

use snafu::prelude::*;

/// Errors raised by object storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Referenced bucket or key does not exist.
    #[snafu(display("Not found: {what}"))]
    NotFound { what: String },

    /// A listing operation failed.
    #[snafu(display("Listing failed under '{prefix}': {source}"))]
    Listing {
        prefix: String,
        source: object_store::Error,
    },

    /// Network, throttling, or otherwise retryable failure.
    #[snafu(display("Transient storage failure: {source}"))]
    Transient { source: object_store::Error },

    /// Credential or permission failure. Fatal for the task.
    #[snafu(display("Authorization failure: {source}"))]
    Auth { source: object_store::Error },

    /// A specific record could not be decoded.
    #[snafu(display("Malformed record at {path} line {line}: {message}"))]
    Malformed {
        path: String,
        line: i64,
        message: String,
    },
}

impl StorageError {
    /// Classify an `object_store` error into the connector taxonomy.
    pub fn classify(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { what: path },
            object_store::Error::Unauthenticated { .. }
            | object_store::Error::PermissionDenied { .. } => StorageError::Auth { source: err },
            _ => StorageError::Transient { source: err },
        }
    }

    /// Classify an `object_store` error raised while enumerating `prefix`.
    pub fn classify_listing(err: object_store::Error, prefix: &str) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { what: path },
            object_store::Error::Unauthenticated { .. }
            | object_store::Error::PermissionDenied { .. } => StorageError::Auth { source: err },
            _ => StorageError::Listing {
                prefix: prefix.to_string(),
                source: err,
            },
        }
    }

    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Check if this error is fatal for the owning task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Auth { .. })
    }
}

/// Errors raised while parsing and validating connector properties.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required property is missing.
    #[snafu(display("Missing required property '{key}'"))]
    MissingProperty { key: String },

    /// A property holds a value that cannot be parsed.
    #[snafu(display("Invalid value '{value}' for property '{key}': {message}"))]
    InvalidProperty {
        key: String,
        value: String,
        message: String,
    },

    /// A route expression could not be parsed.
    #[snafu(display("Invalid route expression '{expression}'"))]
    InvalidRoute { expression: String },

    /// An unknown storage format name in a STOREAS clause.
    #[snafu(display("Unknown storage format '{format}'"))]
    UnknownFormat { format: String },

    /// The extractor regex failed to compile.
    #[snafu(display("Invalid partition extractor regex '{pattern}': {source}"))]
    ExtractorRegex {
        pattern: String,
        source: regex::Error,
    },

    /// Unknown AWS authentication mode.
    #[snafu(display("Unknown auth mode '{mode}' (expected 'credentials' or 'default')"))]
    UnknownAuthMode { mode: String },

    /// S3 client construction failed.
    #[snafu(display("Failed to build S3 client: {source}"))]
    S3Client { source: object_store::Error },
}

/// Errors surfaced to the host through the task lifecycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    /// `poll` or `close` was invoked before `start`.
    #[snafu(display("Task has not been started"))]
    NotStarted,

    /// `start` was invoked on an already-open task.
    #[snafu(display("Task has already been started"))]
    AlreadyStarted,

    /// An operation was invoked on a closed task.
    #[snafu(display("Task has been closed"))]
    Closed,

    /// Configuration was invalid. Fatal at `start`.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// A storage failure that poisons the task (auth) or the whole poll.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// An internal invariant was violated. Bug; fatal.
    #[snafu(display("Internal invariant violated: {message}"))]
    Invariant { message: String },
}
