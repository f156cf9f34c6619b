//! Agent configuration.
//!
//! Settings come from a YAML file (anti-rate-limiting, cache, and session
//! policy) and credentials from the process environment. Everything is
//! validated once at load time; the resulting [`AgentConfig`] is never
//! mutated afterwards.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

pub const USERNAME_ENV: &str = "LINKEDIN_AGENT_USERNAME";
pub const PASSWORD_ENV: &str = "LINKEDIN_AGENT_PASSWORD";
pub const CONFIG_PATH_ENV: &str = "LINKEDIN_AGENT_CONFIG";
/// Listen address for the HTTP binary.
pub const BIND_ENV: &str = "LINKEDIN_AGENT_BIND";

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Longest accepted per-request delay.
pub const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

/// Login credentials. `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: non_empty(Some(username.into())),
            password: non_empty(Some(password.into())),
        }
    }

    /// Reads both credential variables through `env`. Empty values count as
    /// absent.
    pub fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            username: non_empty(env(USERNAME_ENV)),
            password: non_empty(env(PASSWORD_ENV)),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn presence(&self) -> CredentialPresence {
        CredentialPresence {
            username_set: self.username.is_some(),
            password_set: self.password.is_some(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_ref().map(|_| "<set>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Which credentials were provided, without their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialPresence {
    pub username_set: bool,
    pub password_set: bool,
}

/// Inclusive bounds of the artificial delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> AgentResult<Self> {
        if max > MAX_DELAY {
            return Err(AgentError::Config(format!(
                "max_delay ({:.2}s) exceeds the {}s limit",
                max.as_secs_f64(),
                MAX_DELAY.as_secs()
            )));
        }
        if min > max {
            return Err(AgentError::Config(format!(
                "min_delay ({:.2}s) exceeds max_delay ({:.2}s)",
                min.as_secs_f64(),
                max.as_secs_f64()
            )));
        }
        Ok(Self { min, max })
    }

    fn from_secs(min: f64, max: f64) -> AgentResult<Self> {
        for (name, value) in [("min_delay", min), ("max_delay", max)] {
            if !value.is_finite() || value < 0.0 {
                return Err(AgentError::Config(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        let seconds = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|err| {
                AgentError::Config(format!("{name} of {value}s is out of range: {err}"))
            })
        };
        Self::new(seconds("min_delay", min)?, seconds("max_delay", max)?)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn contains(&self, delay: Duration) -> bool {
        delay >= self.min && delay <= self.max
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(15),
        }
    }
}

/// A benign upstream request issued as decoy traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseTarget {
    pub name: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl NoiseTarget {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn defaults() -> Vec<NoiseTarget> {
        vec![
            NoiseTarget::new("profile_views", "/identity/wvmpCards"),
            NoiseTarget::new("invitations", "/relationships/invitationViews")
                .with_param("start", "0")
                .with_param("count", "3")
                .with_param("includeInsights", "true")
                .with_param("q", "receivedInvitation"),
            NoiseTarget::new("feed", "/feed/updatesV2")
                .with_param("count", "10")
                .with_param("q", "chronFeed"),
        ]
    }
}

/// Profile cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Circuit breaker for session renewals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_renewals: u32,
    pub renewal_window: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_renewals: 3,
            renewal_window: Duration::from_secs(600),
        }
    }
}

/// Immutable agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub credentials: Credentials,
    pub delay_enabled: bool,
    pub delay_range: DelayRange,
    pub noise_enabled: bool,
    pub noise_probability: f64,
    pub noise_targets: Vec<NoiseTarget>,
    pub posts_enabled: bool,
    pub cache: CacheSettings,
    pub session: SessionPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            delay_enabled: true,
            delay_range: DelayRange::default(),
            noise_enabled: true,
            noise_probability: 0.3,
            noise_targets: NoiseTarget::defaults(),
            posts_enabled: true,
            cache: CacheSettings::default(),
            session: SessionPolicy::default(),
        }
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }

    /// Loads settings from the path named by `LINKEDIN_AGENT_CONFIG` (or
    /// `config.yaml`) and credentials from the process environment.
    pub fn from_env() -> AgentResult<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let path = lookup(CONFIG_PATH_ENV).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path), lookup)
    }

    /// Loads settings from `path`. A missing file falls back to defaults; a
    /// present but invalid one is rejected.
    pub fn load<F>(path: &Path, env: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "settings file {} not found, falling back to default values",
                    path.display()
                );
                None
            }
            Err(source) => {
                return Err(AgentError::SettingsIo {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Self::from_sources(content.as_deref(), env)
    }

    /// Builds a configuration from raw YAML text (if any) and an environment
    /// lookup.
    pub fn from_sources<F>(settings: Option<&str>, env: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawSettings = match settings {
            Some(text) if !text.trim().is_empty() => serde_yaml::from_str(text)?,
            _ => RawSettings::default(),
        };

        let mut builder = AgentConfigBuilder::new().with_credentials(Credentials::from_lookup(env));

        let anti = raw.anti_rate_limiting.unwrap_or_default();
        let defaults = AgentConfig::default();
        if let Some(toggle) = anti.delay {
            builder = builder.with_delay(toggle.parse("anti_rate_limiting.delay")?);
        }
        let min = anti
            .min_delay
            .unwrap_or(defaults.delay_range.min().as_secs_f64());
        let max = anti
            .max_delay
            .unwrap_or(defaults.delay_range.max().as_secs_f64());
        builder = builder.with_delay_range(DelayRange::from_secs(min, max)?);
        if let Some(toggle) = anti.noise {
            builder = builder.with_noise(toggle.parse("anti_rate_limiting.noise")?);
        }
        if let Some(probability) = anti.noise_probability {
            builder = builder.with_noise_probability(probability);
        }

        if let Some(toggle) = raw.profile.and_then(|profile| profile.posts) {
            builder = builder.with_posts(toggle.parse("profile.posts")?);
        }

        if let Some(cache) = raw.cache {
            if let Some(toggle) = cache.enabled {
                builder = builder.with_cache_enabled(toggle.parse("cache.enabled")?);
            }
            if let Some(minutes) = cache.ttl_minutes {
                builder = builder.with_cache_ttl(Duration::from_secs(minutes.saturating_mul(60)));
            }
        }

        if let Some(session) = raw.session {
            let mut policy = SessionPolicy::default();
            if let Some(max) = session.max_renewals {
                policy.max_renewals = max;
            }
            if let Some(secs) = session.renewal_window_secs {
                policy.renewal_window = Duration::from_secs(secs);
            }
            builder = builder.with_session_policy(policy);
        }

        builder.build()
    }

    pub fn credential_presence(&self) -> CredentialPresence {
        self.credentials.presence()
    }
}

/// Fluent builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn with_delay(mut self, enabled: bool) -> Self {
        self.config.delay_enabled = enabled;
        self
    }

    pub fn with_delay_range(mut self, range: DelayRange) -> Self {
        self.config.delay_range = range;
        self
    }

    pub fn with_noise(mut self, enabled: bool) -> Self {
        self.config.noise_enabled = enabled;
        self
    }

    pub fn with_noise_probability(mut self, probability: f64) -> Self {
        self.config.noise_probability = probability;
        self
    }

    pub fn with_noise_targets<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = NoiseTarget>,
    {
        self.config.noise_targets = targets.into_iter().collect();
        self
    }

    pub fn with_posts(mut self, enabled: bool) -> Self {
        self.config.posts_enabled = enabled;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.config.session = policy;
        self
    }

    pub fn build(self) -> AgentResult<AgentConfig> {
        let config = self.config;
        let p = config.noise_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(AgentError::Config(format!(
                "noise_probability must lie in [0, 1], got {p}"
            )));
        }
        if config.noise_enabled && p > 0.0 && config.noise_targets.is_empty() {
            return Err(AgentError::Config(
                "noise is enabled but no noise targets are configured".into(),
            ));
        }
        if config.session.max_renewals == 0 {
            return Err(AgentError::Config("session.max_renewals must be at least 1".into()));
        }
        Ok(config)
    }
}

/// `on`/`off` switch as written in the settings file. YAML booleans are
/// accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Toggle {
    Flag(bool),
    Word(String),
}

impl Toggle {
    fn parse(&self, key: &str) -> AgentResult<bool> {
        match self {
            Toggle::Flag(value) => Ok(*value),
            Toggle::Word(word) => match word.trim().to_ascii_lowercase().as_str() {
                "on" => Ok(true),
                "off" => Ok(false),
                other => Err(AgentError::Config(format!(
                    "{key} must be `on` or `off`, got `{other}`"
                ))),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    anti_rate_limiting: Option<RawAntiRateLimiting>,
    profile: Option<RawProfile>,
    cache: Option<RawCache>,
    session: Option<RawSession>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAntiRateLimiting {
    delay: Option<Toggle>,
    min_delay: Option<f64>,
    max_delay: Option<f64>,
    noise: Option<Toggle>,
    noise_probability: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    posts: Option<Toggle>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCache {
    enabled: Option<Toggle>,
    ttl_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSession {
    max_renewals: Option<u32>,
    renewal_window_secs: Option<u64>,
}
