//! Event system for agent activity.
//!
//! Provides hooks for logging and custom reactions around pacing, session,
//! and fetch activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::modules::pacing::PacingTicket;
use crate::session::SessionStatus;

/// Structured pacing event, emitted once per fetch attempt.
#[derive(Debug, Clone)]
pub struct PacingEvent {
    pub profile_id: String,
    pub ticket: PacingTicket,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NoiseEvent {
    pub target: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthenticationEvent {
    pub generation: u64,
    pub status: SessionStatus,
    pub renewal: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub profile_id: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheHitEvent {
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Pacing(PacingEvent),
    Noise(NoiseEvent),
    Authentication(AuthenticationEvent),
    Fetch(FetchEvent),
    CacheHit(CacheHitEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AgentEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: AgentEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Pacing(pacing) => {
                log::debug!(
                    "pacing {} delay={:.2}s noise={}",
                    pacing.profile_id,
                    pacing.ticket.delay.as_secs_f64(),
                    pacing.ticket.noise_target.as_deref().unwrap_or("-")
                );
            }
            AgentEvent::Noise(noise) => match &noise.error {
                None => log::debug!("noise request {} ok", noise.target),
                Some(error) => {
                    log::info!("noise request {} failed (ignored): {}", noise.target, error)
                }
            },
            AgentEvent::Authentication(auth) => {
                if let Some(ref error) = auth.error {
                    log::warn!(
                        "authentication #{} (renewal={}) -> {:?}: {}",
                        auth.generation,
                        auth.renewal,
                        auth.status,
                        error
                    );
                } else {
                    log::info!(
                        "authentication #{} (renewal={}) -> {:?}",
                        auth.generation,
                        auth.renewal,
                        auth.status
                    );
                }
            }
            AgentEvent::Fetch(fetch) => {
                if fetch.success {
                    log::info!(
                        "fetched profile {} ({:.2}s)",
                        fetch.profile_id,
                        fetch.latency.as_secs_f64()
                    );
                } else {
                    log::warn!(
                        "fetch {} failed: {}",
                        fetch.profile_id,
                        fetch.error_kind.map(ErrorKind::as_str).unwrap_or("unknown")
                    );
                }
            }
            AgentEvent::CacheHit(hit) => {
                log::debug!("cache hit for profile {}", hit.profile_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &AgentEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(AgentEvent::Noise(NoiseEvent {
            target: "feed".into(),
            success: false,
            error: Some("timeout".into()),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }
}
