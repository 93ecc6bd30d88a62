use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{JobStateError, RequestError};

pub type JobId = String;

/// Raw analyzer JSON, kept opaque.
pub type AnalyzerOutput = serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested scan and its eventual verdict.
///
/// Status moves Processing → Done | Error exactly once. `result` is present
/// only when Done, `error` only when Error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalyzerOutput>,
    #[serde(default = "default_is_secure")]
    pub is_secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_is_secure() -> bool {
    true
}

impl Job {
    /// A fresh Processing job with a new v4 id.
    pub fn new(url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            url: url.into(),
            status: JobStatus::Processing,
            result: None,
            is_secure: true,
            error: None,
        }
    }

    /// Refresh `updated_at` before a persisted write. Strictly increasing,
    /// even when the wall clock has not advanced since the previous write.
    pub fn touch(&mut self) {
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = Utc::now().max(floor);
    }

    /// Finalize as Done with the analyzer output and verdict.
    pub fn complete(&mut self, result: AnalyzerOutput, is_secure: bool) -> Result<(), JobStateError> {
        self.ensure_processing()?;
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.is_secure = is_secure;
        self.error = None;
        Ok(())
    }

    /// Finalize as Error with the failing stage's message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), JobStateError> {
        self.ensure_processing()?;
        self.status = JobStatus::Error;
        self.result = None;
        self.error = Some(message.into());
        Ok(())
    }

    fn ensure_processing(&self) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}

/// Check a submitted source URL.
///
/// Accepts `https://`, `http://`, `git://`, `ssh://` and scp-like
/// `user@host:path`. Local paths and `file://` are rejected so a submission
/// cannot point the cloner at the server's own filesystem.
pub fn validate_source_url(raw: &str) -> Result<String, RequestError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(RequestError::EmptyUrl);
    }
    if url.chars().any(char::is_whitespace) {
        return Err(RequestError::Whitespace(url.to_string()));
    }

    const SCHEMES: [&str; 4] = ["https://", "http://", "git://", "ssh://"];
    if let Some(scheme) = SCHEMES.iter().find(|s| url.starts_with(*s)) {
        let rest = &url[scheme.len()..];
        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(RequestError::UnsupportedScheme(url.to_string()));
        }
        return Ok(url.to_string());
    }

    // scp-like syntax: user@host:path
    if !url.contains("://")
        && let Some((user_host, path)) = url.split_once(':')
        && let Some((user, host)) = user_host.split_once('@')
        && !user.is_empty()
        && !host.is_empty()
        && !path.is_empty()
    {
        return Ok(url.to_string());
    }

    Err(RequestError::UnsupportedScheme(url.to_string()))
}
