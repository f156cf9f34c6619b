//! Cross-cutting services module
//!
//! Pacing, caching, queue bookkeeping, status reporting, and event hooks
//! shared by the session manager and the fetch pipeline.

pub mod cache;
pub mod events;
pub mod pacing;
pub mod queue;
pub mod status;

// Re-export commonly used types
pub use cache::ProfileCache;
pub use events::{
    AgentEvent, AuthenticationEvent, CacheHitEvent, EventDispatcher, EventHandler, FetchEvent,
    LoggingHandler, NoiseEvent, PacingEvent,
};
pub use pacing::{NoiseOutcome, NoiseSink, PacingPlan, PacingScheduler, PacingTicket};
pub use queue::{QueueGuard, QueueStatus, QueueTracker};
pub use status::{AgentStatus, StartupInfo, StatusReporter};
