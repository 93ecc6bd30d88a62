//! Typed error hierarchy for repo-scan.
//!
//! Two groups of enums:
//! - synchronous request-path errors: `RequestError`, `StoreError`, `SubmitError`
//! - asynchronous pipeline-stage errors: `FetchError`, `PullError`,
//!   `SandboxError`, `ClassificationError`, unified by `ScanError`
//!
//! A `ScanError` is always terminal for its job; its `Display` output becomes
//! the job's `error` field.

use thiserror::Error;

/// Malformed submission input, reported synchronously to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("url must not be empty")]
    EmptyUrl,

    #[error("url must not contain whitespace: '{0}'")]
    Whitespace(String),

    #[error("unsupported source url '{0}': expected https://, http://, git://, ssh:// or user@host:path")]
    UnsupportedScheme(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

/// Persistence failures from a `JobStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("failed to encode job {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored record for job {id} is corrupt: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned from `ScanOrchestrator::submit`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scan dispatcher is not running")]
    DispatcherClosed,
}

/// Clone failures. "Already cloned" is never reported as a `FetchError`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("git clone of {url} failed: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("clone task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The analyzer image could not be made available locally.
#[derive(Debug, Error)]
#[error("failed to pull image {image}: {message}")]
pub struct PullError {
    pub image: String,
    pub message: String,
}

/// Container lifecycle and output-contract failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create container from {image}: {message}")]
    Create { image: String, message: String },

    #[error("failed to start container {id}: {message}")]
    Start { id: String, message: String },

    #[error("failed waiting for container {id}: {message}")]
    Wait { id: String, message: String },

    #[error("container {id} did not exit within {secs}s")]
    TimedOut { id: String, secs: u64 },

    #[error("failed to read output of container {id}: {message}")]
    Logs { id: String, message: String },

    #[error("container {id} steps aborted: {message}")]
    Aborted { id: String, message: String },

    #[error("analyzer output contains no JSON object")]
    MissingPayload,

    #[error("analyzer JSON payload is invalid: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

/// Analyzer JSON did not have the expected shape.
#[derive(Debug, Error, PartialEq)]
pub enum ClassificationError {
    #[error("analyzer output is missing field '{0}'")]
    MissingField(String),

    #[error("analyzer field '{field}' is not a number: {found}")]
    NotANumber { field: String, found: String },

    #[error("analyzer output does not match the expected schema: {0}")]
    Schema(String),
}

/// Any pipeline-stage failure. First failure wins; none are retried.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error("sandbox failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("scan task panicked: {0}")]
    Panicked(String),
}

/// Illegal job status transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("job {id} already reached terminal status '{status}'")]
    AlreadyTerminal { id: String, status: String },
}
