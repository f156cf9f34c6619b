//! Authenticated session state machine.
//!
//! `Uninitialized -> Authenticating -> {Active | ChallengeRequired | Failed}`,
//! with `Active -> Authenticating` when a fetch observes an expired session.
//! `ChallengeRequired` and `Failed` are terminal for the process.
//!
//! Login attempts are single-flight: the attempt runs in its own task and
//! every caller awaits a shared handle to it, so a caller that goes away only
//! stops waiting.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::time::Instant;

use super::client::{SessionToken, UpstreamClient};
use crate::config::{Credentials, NoiseTarget, PASSWORD_ENV, SessionPolicy, USERNAME_ENV};
use crate::error::{ErrorKind, ErrorRecord};
use crate::modules::events::{AgentEvent, AuthenticationEvent, EventDispatcher};
use crate::modules::pacing::NoiseSink;

type AttemptFuture = Shared<BoxFuture<'static, Result<SessionLease, ErrorRecord>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Authenticating,
    Active,
    ChallengeRequired,
    Failed,
}

impl SessionStatus {
    /// Terminal states are never left without a restart.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::ChallengeRequired | SessionStatus::Failed)
    }
}

/// Public snapshot of the session. Never carries the credential blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_error: Option<ErrorRecord>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

impl SessionState {
    fn fresh(generation: u64, status: SessionStatus) -> Self {
        Self {
            status,
            last_error: None,
            authenticated_at: None,
            generation,
        }
    }
}

/// Token handed to a fetch, tagged with the session generation it belongs to.
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub token: SessionToken,
    pub generation: u64,
}

struct Inner {
    state: SessionState,
    token: Option<SessionToken>,
    in_flight: Option<AttemptFuture>,
    renewals: VecDeque<Instant>,
}

impl Inner {
    fn current_lease(&self) -> Option<SessionLease> {
        match (self.state.status, &self.token) {
            (SessionStatus::Active, Some(token)) => Some(SessionLease {
                token: token.clone(),
                generation: self.state.generation,
            }),
            _ => None,
        }
    }

    fn terminal_error(&self) -> Option<ErrorRecord> {
        if !self.state.status.is_terminal() {
            return None;
        }
        Some(self.state.last_error.clone().unwrap_or_else(|| {
            ErrorRecord::new(ErrorKind::Internal, "session is terminal without a recorded cause")
        }))
    }
}

struct SessionShared {
    client: Arc<dyn UpstreamClient>,
    credentials: Credentials,
    policy: SessionPolicy,
    events: Arc<EventDispatcher>,
    inner: Mutex<Inner>,
}

enum Step {
    Ready(Result<SessionLease, ErrorRecord>),
    Wait(AttemptFuture),
}

/// Owns the upstream session and the only code path that logs in.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<SessionShared>,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        credentials: Credentials,
        policy: SessionPolicy,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                client,
                credentials,
                policy,
                events,
                inner: Mutex::new(Inner {
                    state: SessionState::fresh(0, SessionStatus::Uninitialized),
                    token: None,
                    in_flight: None,
                    renewals: VecDeque::new(),
                }),
            }),
        }
    }

    /// Logs in with the configured credentials, or joins the attempt that is
    /// already running. Terminal states return their recorded error.
    pub async fn authenticate(&self) -> Result<(), ErrorRecord> {
        self.lease().await.map(|_| ())
    }

    /// No-op while `Active`; otherwise authenticates.
    pub async fn ensure_active_session(&self) -> Result<(), ErrorRecord> {
        self.lease().await.map(|_| ())
    }

    /// Returns the active token, authenticating first when needed.
    pub async fn lease(&self) -> Result<SessionLease, ErrorRecord> {
        let step = {
            let mut inner = self.lock();
            if let Some(lease) = inner.current_lease() {
                Step::Ready(Ok(lease))
            } else if let Some(error) = inner.terminal_error() {
                Step::Ready(Err(error))
            } else if let Some(ref attempt) = inner.in_flight {
                Step::Wait(attempt.clone())
            } else {
                Step::Wait(self.start_attempt(&mut inner, false))
            }
        };
        self.resolve(step).await
    }

    /// Replaces a session the caller saw expire.
    ///
    /// `observed_generation` is the generation of the lease that was
    /// rejected. If a newer session already exists it is returned as is, and
    /// concurrent renewals join a single login attempt.
    pub async fn renew(&self, observed_generation: u64) -> Result<SessionLease, ErrorRecord> {
        let step = {
            let mut inner = self.lock();
            if let Some(error) = inner.terminal_error() {
                Step::Ready(Err(error))
            } else if let Some(ref attempt) = inner.in_flight {
                Step::Wait(attempt.clone())
            } else if inner.state.generation > observed_generation
                && let Some(lease) = inner.current_lease()
            {
                Step::Ready(Ok(lease))
            } else if let Some(error) = self.trip_breaker(&mut inner) {
                Step::Ready(Err(error))
            } else {
                Step::Wait(self.start_attempt(&mut inner, true))
            }
        };
        self.resolve(step).await
    }

    /// Records a challenge observed outside of login for the given session
    /// generation. Later generations are left alone.
    pub fn mark_challenged(&self, generation: u64, record: ErrorRecord) {
        let mut inner = self.lock();
        if inner.state.generation != generation || inner.state.status.is_terminal() {
            return;
        }
        inner.state = SessionState {
            status: SessionStatus::ChallengeRequired,
            last_error: Some(record.clone()),
            authenticated_at: None,
            generation,
        };
        inner.token = None;
        drop(inner);
        self.shared
            .events
            .dispatch(AgentEvent::Authentication(AuthenticationEvent {
                generation,
                status: SessionStatus::ChallengeRequired,
                renewal: false,
                error: Some(record.to_string()),
                timestamp: Utc::now(),
            }));
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().state.status
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("session lock poisoned")
    }

    async fn resolve(&self, step: Step) -> Result<SessionLease, ErrorRecord> {
        match step {
            Step::Ready(result) => result,
            Step::Wait(attempt) => attempt.await,
        }
    }

    fn trip_breaker(&self, inner: &mut Inner) -> Option<ErrorRecord> {
        let policy = self.shared.policy;
        let now = Instant::now();
        while let Some(&oldest) = inner.renewals.front() {
            if now.duration_since(oldest) >= policy.renewal_window {
                inner.renewals.pop_front();
            } else {
                break;
            }
        }
        if inner.renewals.len() < policy.max_renewals as usize {
            inner.renewals.push_back(now);
            return None;
        }

        let record = ErrorRecord::new(
            ErrorKind::AuthFailure,
            format!(
                "session renewal circuit breaker open: {} renewals within {}s, restart required",
                inner.renewals.len(),
                policy.renewal_window.as_secs()
            ),
        );
        let generation = inner.state.generation;
        inner.state = SessionState {
            status: SessionStatus::Failed,
            last_error: Some(record.clone()),
            authenticated_at: None,
            generation,
        };
        inner.token = None;
        self.shared
            .events
            .dispatch(AgentEvent::Authentication(AuthenticationEvent {
                generation,
                status: SessionStatus::Failed,
                renewal: true,
                error: Some(record.to_string()),
                timestamp: Utc::now(),
            }));
        Some(record)
    }

    fn start_attempt(&self, inner: &mut Inner, renewal: bool) -> AttemptFuture {
        let generation = inner.state.generation + 1;
        inner.state = SessionState::fresh(generation, SessionStatus::Authenticating);
        inner.token = None;

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run_attempt(generation, renewal).await });
        let attempt = async move {
            match handle.await {
                Ok(result) => result,
                Err(join) => Err(ErrorRecord::new(
                    ErrorKind::Internal,
                    format!("authentication task ended abnormally: {join}"),
                )),
            }
        }
        .boxed()
        .shared();
        inner.in_flight = Some(attempt.clone());
        attempt
    }
}

impl SessionShared {
    async fn run_attempt(&self, generation: u64, renewal: bool) -> Result<SessionLease, ErrorRecord> {
        log::info!(
            "{} upstream session (attempt #{generation})",
            if renewal { "renewing" } else { "establishing" }
        );

        let outcome = if self.credentials.is_complete() {
            self.client
                .login(&self.credentials)
                .await
                .map_err(|failure| failure.to_login_record())
        } else {
            Err(ErrorRecord::new(
                ErrorKind::AuthFailure,
                format!("credentials missing: set {USERNAME_ENV} and {PASSWORD_ENV}"),
            ))
        };

        let (status, result) = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            inner.in_flight = None;
            let (state, token, result) = match outcome {
                Ok(token) => (
                    SessionState {
                        status: SessionStatus::Active,
                        last_error: None,
                        authenticated_at: Some(Utc::now()),
                        generation,
                    },
                    Some(token.clone()),
                    Ok(SessionLease { token, generation }),
                ),
                Err(record) => {
                    let status = if record.is_challenge() {
                        SessionStatus::ChallengeRequired
                    } else {
                        SessionStatus::Failed
                    };
                    (
                        SessionState {
                            status,
                            last_error: Some(record.clone()),
                            authenticated_at: None,
                            generation,
                        },
                        None,
                        Err(record),
                    )
                }
            };
            let status = state.status;
            inner.state = state;
            inner.token = token;
            (status, result)
        };

        self.events
            .dispatch(AgentEvent::Authentication(AuthenticationEvent {
                generation,
                status,
                renewal,
                error: result.as_ref().err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            }));
        result
    }
}

#[async_trait]
impl NoiseSink for SessionManager {
    /// Logs in first when there is no session yet, so a lazily started agent
    /// still sends its decoy. Terminal sessions fail without a network call.
    async fn send_noise(&self, target: &NoiseTarget) -> Result<(), ErrorRecord> {
        let lease = self.lease().await?;
        self.shared
            .client
            .send_noise(&lease.token, target)
            .await
            .map_err(|failure| failure.to_record())
    }
}
