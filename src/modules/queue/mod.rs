//! Queue bookkeeping for fetches currently in the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::AgentConfig;

const BASE_REQUEST_SECS: f64 = 4.0;
const NOISE_OVERHEAD_SECS: f64 = 2.0;

/// Body of `GET /api/queue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub waiting_requests_count: usize,
    /// Unix seconds; deliberately pessimistic.
    pub estimated_completion_timestamp: i64,
}

#[derive(Debug)]
pub struct QueueTracker {
    waiting: Arc<AtomicUsize>,
    per_request: Duration,
}

impl QueueTracker {
    pub fn new(config: &AgentConfig) -> Self {
        let max_delay = config.delay_range.max().as_secs_f64();
        let mut secs = BASE_REQUEST_SECS;
        if config.delay_enabled {
            secs += max_delay;
        }
        if config.noise_enabled {
            secs += NOISE_OVERHEAD_SECS + max_delay;
        }
        Self {
            waiting: Arc::new(AtomicUsize::new(0)),
            per_request: Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
        }
    }

    /// Registers a fetch; the count drops again when the guard does.
    pub fn enter(&self) -> QueueGuard {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        QueueGuard {
            waiting: Arc::clone(&self.waiting),
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn per_request_estimate(&self) -> Duration {
        self.per_request
    }

    pub fn status(&self) -> QueueStatus {
        let waiting = self.waiting();
        let horizon = self.per_request.as_secs_f64() * (waiting as f64 + 1.0);
        QueueStatus {
            waiting_requests_count: waiting,
            estimated_completion_timestamp: Utc::now()
                .timestamp()
                .saturating_add(horizon.ceil() as i64),
        }
    }
}

#[derive(Debug)]
pub struct QueueGuard {
    waiting: Arc<AtomicUsize>,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}
