use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use linkedin_agent::{
    AgentConfig, AgentConfigBuilder, Credentials, DelayRange, ErrorKind, FetchResult,
    LinkedInAgent, NoiseTarget, ProfileId, RawPayload, SessionStatus, SessionToken,
    UpstreamClient, UpstreamFailure,
};

const PROFILE: &str = r#"{
    "profile": {
        "firstName": "Alice",
        "lastName": "Example",
        "headline": "Staff Engineer",
        "geoLocationName": "Lisbon",
        "summary": "Builds distributed systems.",
        "miniProfile": {
            "entityUrn": "urn:li:fs_miniProfile:ACoAAlice",
            "objectUrn": "urn:li:member:1001"
        }
    },
    "positionView": {
        "elements": [
            {
                "title": "Staff Engineer",
                "companyName": "Example Corp",
                "timePeriod": { "startDate": { "year": 2020, "month": 3 } }
            }
        ]
    },
    "skillView": { "elements": [ { "name": "Rust" }, { "name": "Distributed Systems" } ] }
}"#;

const POSTS: &str = r#"{
    "elements": [
        {
            "actor": { "urn": "urn:li:member:1001" },
            "commentary": { "text": { "text": "Shipped the new scheduler." } },
            "socialDetail": {
                "totalSocialActivityCounts": {
                    "numComments": 2,
                    "numShares": 0,
                    "reactionTypeCounts": [ { "reactionType": "LIKE", "count": 12 } ]
                }
            }
        }
    ]
}"#;

/// In-memory upstream. Tokens carry the number of the login that minted
/// them, so a test can expire every token below a given login number.
struct ScriptedUpstream {
    logins: AtomicUsize,
    profile_fetches: AtomicUsize,
    noise_requests: AtomicUsize,
    posts_requests: AtomicUsize,
    posts_profile_urn: Mutex<Option<String>>,
    posts_fail: AtomicBool,
    login_failure: Mutex<Option<UpstreamFailure>>,
    profile_failure: Mutex<Option<UpstreamFailure>>,
    first_valid_login: AtomicUsize,
    noise_fails: AtomicBool,
}

impl ScriptedUpstream {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicUsize::new(0),
            profile_fetches: AtomicUsize::new(0),
            noise_requests: AtomicUsize::new(0),
            posts_requests: AtomicUsize::new(0),
            posts_profile_urn: Mutex::new(None),
            posts_fail: AtomicBool::new(false),
            login_failure: Mutex::new(None),
            profile_failure: Mutex::new(None),
            first_valid_login: AtomicUsize::new(1),
            noise_fails: AtomicBool::new(false),
        })
    }

    fn failing_login(failure: UpstreamFailure) -> Arc<Self> {
        let upstream = Self::new();
        *upstream.login_failure.lock().unwrap() = Some(failure);
        upstream
    }

    fn fail_profiles_with(&self, failure: UpstreamFailure) {
        *self.profile_failure.lock().unwrap() = Some(failure);
    }

    fn expire_sessions_before(&self, login: usize) {
        self.first_valid_login.store(login, Ordering::SeqCst);
    }

    fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    fn noise_requests(&self) -> usize {
        self.noise_requests.load(Ordering::SeqCst)
    }

    fn posts_requests(&self) -> usize {
        self.posts_requests.load(Ordering::SeqCst)
    }
}

fn login_number(session: &SessionToken) -> usize {
    session
        .csrf_token()
        .trim_start_matches("ajax:")
        .parse()
        .unwrap_or(0)
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn login(&self, _credentials: &Credentials) -> Result<SessionToken, UpstreamFailure> {
        let number = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(failure) = self.login_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(SessionToken::new(
            format!("li_at=token-{number}; JSESSIONID=\"ajax:{number}\""),
            format!("ajax:{number}"),
        ))
    }

    async fn fetch_profile(
        &self,
        session: &SessionToken,
        _id: &ProfileId,
    ) -> Result<RawPayload, UpstreamFailure> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        if login_number(session) < self.first_valid_login.load(Ordering::SeqCst) {
            return Err(UpstreamFailure::LoginRedirect(
                "302 to https://www.linkedin.com/login".into(),
            ));
        }
        if let Some(failure) = self.profile_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(RawPayload::new(200, PROFILE))
    }

    async fn fetch_posts(
        &self,
        _session: &SessionToken,
        profile_urn: &str,
    ) -> Result<RawPayload, UpstreamFailure> {
        self.posts_requests.fetch_add(1, Ordering::SeqCst);
        *self.posts_profile_urn.lock().unwrap() = Some(profile_urn.to_string());
        if self.posts_fail.load(Ordering::SeqCst) {
            return Err(UpstreamFailure::Status {
                status: 500,
                detail: "feed unavailable".into(),
            });
        }
        Ok(RawPayload::new(200, POSTS))
    }

    async fn send_noise(
        &self,
        _session: &SessionToken,
        _target: &NoiseTarget,
    ) -> Result<(), UpstreamFailure> {
        self.noise_requests.fetch_add(1, Ordering::SeqCst);
        if self.noise_fails.load(Ordering::SeqCst) {
            return Err(UpstreamFailure::Transport("connection reset".into()));
        }
        Ok(())
    }
}

fn agent_with<F>(upstream: &Arc<ScriptedUpstream>, configure: F) -> LinkedInAgent
where
    F: FnOnce(AgentConfigBuilder) -> AgentConfigBuilder,
{
    let builder = AgentConfig::builder()
        .with_credentials(Credentials::new("agent@example.com", "correct horse"))
        .with_delay(false)
        .with_noise(false);
    let config = configure(builder).build().unwrap();
    LinkedInAgent::builder()
        .with_config(config)
        .with_client(upstream.clone())
        .build()
        .unwrap()
}

fn plain_agent(upstream: &Arc<ScriptedUpstream>) -> LinkedInAgent {
    agent_with(upstream, |builder| builder)
}

#[tokio::test(start_paused = true)]
async fn fetches_profile_with_pacing_disabled() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();

    let profile = agent.fetch_profile("alice").await.into_result().unwrap();
    assert_eq!(profile.public_id, "alice");
    assert_eq!(profile.full_name, "Alice Example");
    assert!(profile.summary.contains("HEADLINE: Staff Engineer"));
    assert!(profile.experience.contains("Example Corp"));
    assert!(profile.skills.contains("Rust"));

    let status = agent.status();
    assert!(status.initialized);
    assert!(status.initialization_error.is_none());
    assert_eq!(upstream.noise_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn fetch_without_initialize_logs_in_lazily() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);

    assert!(agent.fetch_profile("alice").await.is_success());
    assert_eq!(upstream.logins(), 1);
    assert_eq!(agent.session_state().status, SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn challenge_at_startup_is_reported_and_blocks_fetches() {
    let upstream = ScriptedUpstream::failing_login(UpstreamFailure::Challenge {
        url: Some("https://www.linkedin.com/checkpoint/challenge/abc".into()),
    });
    let agent = plain_agent(&upstream);

    let error = agent.initialize().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AuthChallenge);

    let info = agent.startup_info();
    assert!(!info.linkedin_agent_initialized);
    assert!(
        info.initialization_error
            .as_deref()
            .unwrap()
            .contains("login challenge required")
    );

    match agent.fetch_profile("alice").await {
        FetchResult::Failure(failure) => {
            assert_eq!(failure.kind(), ErrorKind::ServiceUnavailable);
            assert_eq!(failure.cause(), Some(ErrorKind::AuthChallenge));
            assert!(failure.is_challenge());
            assert_eq!(failure.message(), error.message());
        }
        FetchResult::Success(_) => panic!("challenged agent must not serve profiles"),
    }
    assert_eq!(upstream.profile_fetches(), 0);
    assert_eq!(upstream.logins(), 1);
}

#[tokio::test(start_paused = true)]
async fn bad_credentials_differ_from_challenge() {
    let upstream =
        ScriptedUpstream::failing_login(UpstreamFailure::BadCredentials("BAD_PASSWORD".into()));
    let agent = plain_agent(&upstream);

    let error = agent.initialize().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AuthFailure);
    assert!(!error.is_challenge());
    let message = agent.startup_info().initialization_error.unwrap();
    assert!(!message.contains("challenge"));
    assert_eq!(agent.session_state().status, SessionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_fail_without_network() {
    let upstream = ScriptedUpstream::new();
    let config = AgentConfig::builder()
        .with_delay(false)
        .with_noise(false)
        .build()
        .unwrap();
    let agent = LinkedInAgent::builder()
        .with_config(config)
        .with_client(upstream.clone())
        .build()
        .unwrap();

    let error = agent.initialize().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AuthFailure);
    assert_eq!(upstream.logins(), 0);

    let info = agent.startup_info();
    assert!(!info.environment_variables.username_set);
    assert!(!info.environment_variables.password_set);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_renewed_transparently() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_cache_enabled(false));
    agent.initialize().await.unwrap();
    assert!(agent.fetch_profile("alice").await.is_success());

    upstream.expire_sessions_before(2);
    let profile = agent.fetch_profile("bob-smith").await.into_result().unwrap();
    assert_eq!(profile.public_id, "bob-smith");

    assert_eq!(upstream.logins(), 2);
    assert_eq!(upstream.profile_fetches(), 3);
    let state = agent.session_state();
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.generation, 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_expiries_share_one_renewal() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_cache_enabled(false));
    agent.initialize().await.unwrap();
    upstream.expire_sessions_before(2);

    let fetches: Vec<_> = ["alice", "bob-smith", "carol_w", "dave-k", "erin-j"]
        .into_iter()
        .map(|id| {
            let agent = agent.clone();
            tokio::spawn(async move { agent.fetch_profile(id).await })
        })
        .collect();
    for fetch in fetches {
        assert!(fetch.await.unwrap().is_success());
    }

    assert_eq!(upstream.logins(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_expiry_after_renewal_fails_the_fetch() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();
    upstream.expire_sessions_before(usize::MAX);

    match agent.fetch_profile("alice").await {
        FetchResult::Failure(error) => assert_eq!(error.kind(), ErrorKind::SessionExpired),
        FetchResult::Success(_) => panic!("expected a session expiry"),
    }
    assert_eq!(upstream.logins(), 2);
    assert_eq!(upstream.profile_fetches(), 2);
    assert_eq!(
        agent.status().last_request_error.map(|e| e.kind()),
        Some(ErrorKind::SessionExpired)
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_identifier_never_touches_the_network() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_delay(true).with_noise(true).with_noise_probability(1.0));

    let started = Instant::now();
    for bad in ["", "ab", "-alice", "alice-", "al ice", "../etc/passwd"] {
        match agent.fetch_profile(bad).await {
            FetchResult::Failure(error) => assert_eq!(error.kind(), ErrorKind::Validation, "{bad:?}"),
            FetchResult::Success(_) => panic!("{bad:?} should be rejected"),
        }
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(upstream.logins(), 0);
    assert_eq!(upstream.profile_fetches(), 0);
    assert_eq!(upstream.noise_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn noise_probability_one_sends_exactly_one_decoy_per_fetch() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| {
        b.with_noise(true)
            .with_noise_probability(1.0)
            .with_cache_enabled(false)
    });
    agent.initialize().await.unwrap();

    for _ in 0..5 {
        assert!(agent.fetch_profile("alice").await.is_success());
    }
    assert_eq!(upstream.noise_requests(), 5);
}

#[tokio::test(start_paused = true)]
async fn lazy_login_still_sends_the_decoy() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_noise(true).with_noise_probability(1.0));

    assert!(agent.fetch_profile("alice").await.is_success());
    assert_eq!(upstream.logins(), 1);
    assert_eq!(upstream.noise_requests(), 1);
    assert_eq!(agent.session_state().status, SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn noise_probability_zero_sends_none() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| {
        b.with_noise(true)
            .with_noise_probability(0.0)
            .with_cache_enabled(false)
    });
    agent.initialize().await.unwrap();

    for _ in 0..5 {
        assert!(agent.fetch_profile("alice").await.is_success());
    }
    assert_eq!(upstream.noise_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_noise_does_not_fail_the_fetch() {
    let upstream = ScriptedUpstream::new();
    upstream.noise_fails.store(true, Ordering::SeqCst);
    let agent = agent_with(&upstream, |b| b.with_noise(true).with_noise_probability(1.0));
    agent.initialize().await.unwrap();

    assert!(agent.fetch_profile("alice").await.is_success());
    assert_eq!(upstream.noise_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn pacing_delay_stays_within_configured_range() {
    let upstream = ScriptedUpstream::new();
    let min = Duration::from_secs(1);
    let max = Duration::from_secs(3);
    let agent = agent_with(&upstream, |b| {
        b.with_delay(true)
            .with_delay_range(DelayRange::new(min, max).unwrap())
            .with_cache_enabled(false)
    });
    agent.initialize().await.unwrap();

    for _ in 0..10 {
        let started = Instant::now();
        assert!(agent.fetch_profile("alice").await.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= min && elapsed <= max, "elapsed {elapsed:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_fetch_leaves_session_untouched() {
    let upstream = ScriptedUpstream::new();
    let delay = Duration::from_secs(5);
    let agent = agent_with(&upstream, |b| {
        b.with_delay(true)
            .with_delay_range(DelayRange::new(delay, delay).unwrap())
    });
    agent.initialize().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), agent.fetch_profile("alice")).await;
    assert!(outcome.is_err());

    assert_eq!(agent.queue_status().waiting_requests_count, 0);
    assert_eq!(agent.session_state().status, SessionStatus::Active);
    assert_eq!(upstream.profile_fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn cached_profiles_skip_pacing_and_network() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| {
        b.with_delay(true)
            .with_delay_range(DelayRange::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap())
    });
    agent.initialize().await.unwrap();
    assert!(agent.fetch_profile("alice").await.is_success());

    let started = Instant::now();
    assert!(agent.fetch_profile("https://www.linkedin.com/in/alice/").await.is_success());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(upstream.profile_fetches(), 1);
    assert_eq!(agent.cached_profiles(), 1);
}

#[tokio::test(start_paused = true)]
async fn challenge_during_fetch_ends_the_session() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_cache_enabled(false));
    agent.initialize().await.unwrap();
    upstream.fail_profiles_with(UpstreamFailure::Challenge { url: None });

    match agent.fetch_profile("alice").await {
        FetchResult::Failure(error) => {
            assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
            assert!(error.is_challenge());
        }
        FetchResult::Success(_) => panic!("expected a challenge"),
    }
    assert_eq!(agent.session_state().status, SessionStatus::ChallengeRequired);

    assert!(!agent.fetch_profile("bob-smith").await.is_success());
    assert_eq!(upstream.profile_fetches(), 1);
    assert_eq!(upstream.logins(), 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_errors_keep_their_status() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();
    upstream.fail_profiles_with(UpstreamFailure::Status {
        status: 429,
        detail: "too many requests".into(),
    });

    match agent.fetch_profile("alice").await {
        FetchResult::Failure(error) => {
            assert_eq!(error.kind(), ErrorKind::Upstream);
            assert_eq!(error.upstream_status(), Some(429));
        }
        FetchResult::Success(_) => panic!("expected an upstream failure"),
    }
    assert_eq!(agent.session_state().status, SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn reshaped_payload_is_a_data_format_error() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();
    upstream.fail_profiles_with(UpstreamFailure::UnexpectedShape("missing profile".into()));

    match agent.fetch_profile("alice").await {
        FetchResult::Failure(error) => assert_eq!(error.kind(), ErrorKind::DataFormat),
        FetchResult::Success(_) => panic!("expected a data format failure"),
    }
}

#[tokio::test(start_paused = true)]
async fn posts_follow_the_profile() {
    let upstream = ScriptedUpstream::new();
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();

    let profile = agent.fetch_profile("alice").await.into_result().unwrap();
    assert_eq!(upstream.posts_requests(), 1);
    assert_eq!(
        upstream.posts_profile_urn.lock().unwrap().as_deref(),
        Some("urn:li:fs_miniProfile:ACoAAlice")
    );
    assert!(profile.posts.starts_with("# POSTS\n[Posted]\nREACTIONS: 12 (LIKE)"));
    assert!(profile.posts.contains("Shipped the new scheduler."));
    assert!(profile.raw.posts.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_posts_leave_the_profile_intact() {
    let upstream = ScriptedUpstream::new();
    upstream.posts_fail.store(true, Ordering::SeqCst);
    let agent = plain_agent(&upstream);
    agent.initialize().await.unwrap();

    let profile = agent.fetch_profile("alice").await.into_result().unwrap();
    assert_eq!(upstream.posts_requests(), 1);
    assert!(profile.posts.is_empty());
    assert!(profile.experience.contains("Example Corp"));
    assert!(agent.status().last_request_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn posts_can_be_switched_off() {
    let upstream = ScriptedUpstream::new();
    let agent = agent_with(&upstream, |b| b.with_posts(false));

    let profile = agent.fetch_profile("alice").await.into_result().unwrap();
    assert_eq!(upstream.posts_requests(), 0);
    assert!(profile.posts.is_empty());
}
