//! Profile fetch pipeline.
//!
//! Validation, cache lookup, pacing, session acquisition, the upstream call,
//! and classification of what came back. Every failure leaves this module as
//! a typed [`FetchResult::Failure`]. Posts are fetched after the profile on a
//! best-effort basis and never fail the fetch.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

use crate::error::{ErrorKind, ErrorRecord};
use crate::modules::cache::ProfileCache;
use crate::modules::events::{AgentEvent, CacheHitEvent, EventDispatcher, FetchEvent, PacingEvent};
use crate::modules::pacing::PacingScheduler;
use crate::modules::queue::QueueTracker;
use crate::modules::status::StatusReporter;
use crate::profile::{ProfileId, ProfileParser, ProfileRecord};
use crate::session::{SessionLease, SessionManager, UpstreamClient, UpstreamFailure};

/// Outcome of a single profile fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Success(ProfileRecord),
    Failure(ErrorRecord),
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn into_result(self) -> Result<ProfileRecord, ErrorRecord> {
        match self {
            FetchResult::Success(record) => Ok(record),
            FetchResult::Failure(error) => Err(error),
        }
    }
}

/// Shared collaborators of the pipeline.
#[derive(Clone)]
pub struct FetchPipeline {
    client: Arc<dyn UpstreamClient>,
    sessions: SessionManager,
    pacing: PacingScheduler,
    parser: Arc<dyn ProfileParser>,
    cache: Arc<ProfileCache>,
    queue: Arc<QueueTracker>,
    reporter: Arc<StatusReporter>,
    events: Arc<EventDispatcher>,
    posts: bool,
}

impl FetchPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        sessions: SessionManager,
        pacing: PacingScheduler,
        parser: Arc<dyn ProfileParser>,
        cache: Arc<ProfileCache>,
        queue: Arc<QueueTracker>,
        reporter: Arc<StatusReporter>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            client,
            sessions,
            pacing,
            parser,
            cache,
            queue,
            reporter,
            events,
            posts: true,
        }
    }

    /// Toggles the follow-up posts request.
    pub fn with_posts(mut self, enabled: bool) -> Self {
        self.posts = enabled;
        self
    }

    /// Fetches and parses one profile.
    ///
    /// Malformed identifiers fail before any pacing or network cost, and a
    /// cached profile skips pacing and the session entirely.
    pub async fn fetch_profile(&self, identifier: &str) -> FetchResult {
        let started = Instant::now();
        let id = match ProfileId::parse(identifier) {
            Ok(id) => id,
            Err(error) => return self.fail(identifier, error, started),
        };

        if let Some(record) = self.cache.get(&id) {
            self.events.dispatch(AgentEvent::CacheHit(CacheHitEvent {
                profile_id: id.to_string(),
                timestamp: Utc::now(),
            }));
            return FetchResult::Success(record);
        }

        let _queued = self.queue.enter();
        log::info!(
            "fetching profile {id} ({} request(s) in queue)",
            self.queue.waiting()
        );

        let state = self.sessions.state();
        if state.status.is_terminal() {
            let cause = state.last_error.unwrap_or_else(|| {
                ErrorRecord::new(ErrorKind::Internal, "session is terminal without a recorded cause")
            });
            return self.fail(id.as_str(), ErrorRecord::unavailable(&cause), started);
        }

        let ticket = self.pacing.before_request(&self.sessions).await;
        self.events.dispatch(AgentEvent::Pacing(PacingEvent {
            profile_id: id.to_string(),
            ticket,
            timestamp: Utc::now(),
        }));

        match self.fetch_with_session(&id).await {
            Ok(record) => {
                self.cache.insert(id.clone(), record.clone());
                self.events.dispatch(AgentEvent::Fetch(FetchEvent {
                    profile_id: id.to_string(),
                    success: true,
                    error_kind: None,
                    latency: started.elapsed(),
                    timestamp: Utc::now(),
                }));
                FetchResult::Success(record)
            }
            Err(error) => self.fail(id.as_str(), error, started),
        }
    }

    async fn fetch_with_session(&self, id: &ProfileId) -> Result<ProfileRecord, ErrorRecord> {
        let mut lease = self
            .sessions
            .lease()
            .await
            .map_err(|error| ErrorRecord::unavailable(&error))?;
        let mut renewed = false;

        loop {
            match self.client.fetch_profile(&lease.token, id).await {
                Ok(payload) => {
                    let mut record = self.parser.parse_profile(id, &payload.body)?;
                    if self.posts {
                        self.attach_posts(&lease, &mut record).await;
                    }
                    return Ok(record);
                }
                Err(UpstreamFailure::LoginRedirect(detail)) if !renewed => {
                    log::info!("session #{} expired ({detail}), renewing", lease.generation);
                    renewed = true;
                    lease = self
                        .sessions
                        .renew(lease.generation)
                        .await
                        .map_err(|error| ErrorRecord::unavailable(&error))?;
                }
                Err(UpstreamFailure::LoginRedirect(detail)) => {
                    return Err(ErrorRecord::new(
                        ErrorKind::SessionExpired,
                        format!("session rejected again right after renewal ({detail})"),
                    ));
                }
                Err(failure @ UpstreamFailure::Challenge { .. }) => {
                    let record = failure.to_login_record();
                    self.sessions.mark_challenged(lease.generation, record.clone());
                    return Err(ErrorRecord::unavailable(&record));
                }
                Err(failure) => return Err(failure.to_record()),
            }
        }
    }

    async fn attach_posts(&self, lease: &SessionLease, record: &mut ProfileRecord) {
        let Some(urn) = record.profile_urn.clone() else {
            log::debug!("profile {} has no URN, skipping posts", record.public_id);
            return;
        };
        let result = match self.client.fetch_posts(&lease.token, &urn).await {
            Ok(payload) => self.parser.attach_posts(record, &payload.body),
            Err(failure @ UpstreamFailure::Challenge { .. }) => {
                let error = failure.to_login_record();
                self.sessions.mark_challenged(lease.generation, error.clone());
                Err(error)
            }
            Err(failure) => Err(failure.to_record()),
        };
        if let Err(error) = result {
            log::warn!("posts for {} unavailable: {error}", record.public_id);
            record.posts.clear();
        }
    }

    fn fail(&self, profile_id: &str, error: ErrorRecord, started: Instant) -> FetchResult {
        self.reporter.record_request_error(&error);
        self.events.dispatch(AgentEvent::Fetch(FetchEvent {
            profile_id: profile_id.to_string(),
            success: false,
            error_kind: Some(error.kind()),
            latency: started.elapsed(),
            timestamp: Utc::now(),
        }));
        FetchResult::Failure(error)
    }
}
