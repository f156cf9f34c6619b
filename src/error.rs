//! Error taxonomy shared by the session, pipeline, and status layers.
//!
//! Failures that cross a component boundary are carried as [`ErrorRecord`]
//! values so the status reporter can keep the original cause around for the
//! lifetime of the process.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Result alias used by configuration and construction code.
pub type AgentResult<T> = Result<T, AgentError>;

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied a malformed identifier or setting.
    Validation,
    /// Upstream demands interactive verification.
    AuthChallenge,
    /// Bad credentials or an unexpected login outcome.
    AuthFailure,
    /// Session cookies stopped being accepted.
    SessionExpired,
    /// Transient upstream or network fault.
    Upstream,
    /// Upstream payload no longer has the expected shape.
    DataFormat,
    /// The agent has no active session to serve with.
    ServiceUnavailable,
    /// Anything that escaped classification.
    Internal,
}

impl ErrorKind {
    /// Same name the kind serializes to.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::AuthChallenge => "auth_challenge",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::Upstream => "upstream",
            ErrorKind::DataFormat => "data_format",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a single failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<ErrorKind>,
    message: String,
    occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            cause: None,
            message: message.into(),
            occurred_at: Utc::now(),
            upstream_status: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        let mut record = Self::new(ErrorKind::Upstream, message);
        record.upstream_status = status;
        record
    }

    /// Wraps a session-level failure for a caller that needed an active
    /// session. The original kind survives as the cause.
    pub fn unavailable(source: &ErrorRecord) -> Self {
        let cause = match source.kind {
            ErrorKind::ServiceUnavailable => source.cause,
            other => Some(other),
        };
        Self {
            kind: ErrorKind::ServiceUnavailable,
            cause,
            message: source.message.clone(),
            occurred_at: source.occurred_at,
            upstream_status: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Sub-kind preserved when the record was wrapped as `ServiceUnavailable`.
    pub fn cause(&self) -> Option<ErrorKind> {
        self.cause
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn upstream_status(&self) -> Option<u16> {
        self.upstream_status
    }

    /// True when this record, or the record it wraps, is a login challenge.
    pub fn is_challenge(&self) -> bool {
        self.kind == ErrorKind::AuthChallenge || self.cause == Some(ErrorKind::AuthChallenge)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorRecord {}

/// Errors raised while building the agent itself.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read settings file {path}: {source}")]
    SettingsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] serde_yaml::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AgentError {
    /// Startup errors surface as validation records.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::validation(self.to_string())
    }
}
