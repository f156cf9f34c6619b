//! Transport seam between the agent and the upstream service.
//!
//! The session manager and the fetch pipeline only ever talk to an
//! [`UpstreamClient`]; the reqwest implementation lives in
//! [`super::reqwest_client`], tests plug in scripted clients.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{Credentials, NoiseTarget};
use crate::error::{ErrorKind, ErrorRecord};
use crate::profile::ProfileId;

/// Contract that abstracts the upstream HTTP surface.
///
/// Implementations must not follow redirects on profile requests; a redirect
/// to the login page is how session expiry is observed.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Performs a fresh login and returns the resulting credential blob.
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, UpstreamFailure>;

    /// Fetches the raw profile payload for `id`.
    async fn fetch_profile(
        &self,
        session: &SessionToken,
        id: &ProfileId,
    ) -> Result<RawPayload, UpstreamFailure>;

    /// Fetches the recent feed updates of the member behind `profile_urn`.
    async fn fetch_posts(
        &self,
        session: &SessionToken,
        profile_urn: &str,
    ) -> Result<RawPayload, UpstreamFailure>;

    /// Issues one decoy request. The response body is discarded.
    async fn send_noise(
        &self,
        session: &SessionToken,
        target: &NoiseTarget,
    ) -> Result<(), UpstreamFailure>;
}

/// Opaque authenticated-session blob (cookies plus CSRF token).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionToken {
    cookie_header: String,
    csrf_token: String,
}

impl SessionToken {
    pub fn new(cookie_header: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        Self {
            cookie_header: cookie_header.into(),
            csrf_token: csrf_token.into(),
        }
    }

    pub fn cookie_header(&self) -> &str {
        &self.cookie_header
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("cookie_header", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .finish()
    }
}

/// Raw upstream payload handed to the parser.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub status: u16,
    pub body: Bytes,
}

impl RawPayload {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Classified upstream failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamFailure {
    #[error("login challenge required, upstream demands interactive verification")]
    Challenge { url: Option<String> },
    #[error("credentials rejected: {0}")]
    BadCredentials(String),
    #[error("session expired ({0})")]
    LoginRedirect(String),
    #[error("upstream responded with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected upstream response: {0}")]
    UnexpectedShape(String),
}

impl UpstreamFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamFailure::Challenge { .. } => ErrorKind::AuthChallenge,
            UpstreamFailure::BadCredentials(_) => ErrorKind::AuthFailure,
            UpstreamFailure::LoginRedirect(_) => ErrorKind::SessionExpired,
            UpstreamFailure::Status { .. } | UpstreamFailure::Transport(_) => ErrorKind::Upstream,
            UpstreamFailure::UnexpectedShape(_) => ErrorKind::DataFormat,
        }
    }

    /// Converts a failure seen outside of login into a record.
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            UpstreamFailure::Status { status, .. } => {
                ErrorRecord::upstream(Some(*status), self.to_string())
            }
            _ => ErrorRecord::new(self.kind(), self.to_string()),
        }
    }

    /// Converts a failure seen during login. Anything that is not a
    /// challenge is an authentication failure at that point.
    pub fn to_login_record(&self) -> ErrorRecord {
        match self {
            UpstreamFailure::Challenge { .. } => {
                ErrorRecord::new(ErrorKind::AuthChallenge, self.to_string())
            }
            other => ErrorRecord::new(ErrorKind::AuthFailure, format!("login failed: {other}")),
        }
    }
}

impl From<reqwest::Error> for UpstreamFailure {
    fn from(err: reqwest::Error) -> Self {
        UpstreamFailure::Transport(err.to_string())
    }
}
