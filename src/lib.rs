//! # linkedin-agent
//!
//! A paced, session-aware agent that fetches LinkedIn profiles on behalf of a
//! small HTTP service.
//!
//! ## Features
//!
//! - Randomized per-request delays and optional decoy traffic
//! - Single-flight login with session renewal and a renewal circuit breaker
//! - Typed failures that keep their original cause for the status surface
//! - TTL profile cache and queue estimates
//! - axum router exposing profile, health, startup-info, and queue endpoints
//!
//! ## Example
//!
//! ```no_run
//! use linkedin_agent::{AgentConfig, FetchResult, LinkedInAgent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = LinkedInAgent::new(AgentConfig::from_env()?)?;
//!     agent.initialize().await?;
//!     match agent.fetch_profile("alice").await {
//!         FetchResult::Success(profile) => println!("{}", profile.summary),
//!         FetchResult::Failure(error) => eprintln!("{error}"),
//!     }
//!     Ok(())
//! }
//! ```

mod agent;

pub mod api;
pub mod config;
pub mod error;
pub mod modules;
pub mod pipeline;
pub mod profile;
pub mod session;

pub use crate::agent::{AgentBuilder, LinkedInAgent};

pub use crate::config::{
    AgentConfig,
    AgentConfigBuilder,
    BIND_ENV,
    CONFIG_PATH_ENV,
    CacheSettings,
    CredentialPresence,
    Credentials,
    DelayRange,
    NoiseTarget,
    PASSWORD_ENV,
    SessionPolicy,
    USERNAME_ENV,
};

pub use crate::error::{AgentError, AgentResult, ErrorKind, ErrorRecord};

pub use crate::pipeline::{FetchPipeline, FetchResult};

pub use crate::profile::{ProfileId, ProfileParser, ProfileRecord, VoyagerProfileParser};

pub use crate::session::{
    RawPayload,
    ReqwestUpstreamClient,
    SessionLease,
    SessionManager,
    SessionState,
    SessionStatus,
    SessionToken,
    UpstreamClient,
    UpstreamFailure,
};

pub use crate::modules::{
    AgentEvent,
    AgentStatus,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    NoiseOutcome,
    NoiseSink,
    PacingScheduler,
    PacingTicket,
    ProfileCache,
    QueueStatus,
    QueueTracker,
    StartupInfo,
    StatusReporter,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
