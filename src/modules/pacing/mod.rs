//! Request pacing.
//!
//! Draws a per-request delay uniformly from the configured range and decides,
//! with an independent Bernoulli draw, whether a decoy request precedes the
//! real one. Each fetch draws independently; there is no shared token bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::time::sleep;

use crate::config::{AgentConfig, DelayRange, NoiseTarget};
use crate::error::ErrorRecord;
use crate::modules::events::{AgentEvent, EventDispatcher, NoiseEvent};

/// Something that can issue a decoy request on the agent's behalf.
#[async_trait]
pub trait NoiseSink: Send + Sync {
    async fn send_noise(&self, target: &NoiseTarget) -> Result<(), ErrorRecord>;
}

/// Outcome of the decoy request attached to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseOutcome {
    Sent,
    Failed,
}

/// Per-fetch pacing record. Observability only.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingTicket {
    pub delay: Duration,
    pub noise_target: Option<String>,
    pub noise_outcome: Option<NoiseOutcome>,
}

impl PacingTicket {
    pub fn noise_dispatched(&self) -> bool {
        self.noise_target.is_some()
    }
}

/// Decision drawn before any suspension happens.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingPlan {
    pub delay: Duration,
    pub noise: Option<NoiseTarget>,
}

#[derive(Debug, Clone)]
struct PacingPolicy {
    delay_enabled: bool,
    delay_range: DelayRange,
    noise_enabled: bool,
    noise_probability: f64,
    noise_targets: Vec<NoiseTarget>,
}

/// Computes delays and noise decisions for each fetch.
#[derive(Clone)]
pub struct PacingScheduler {
    policy: Arc<PacingPolicy>,
    events: Arc<EventDispatcher>,
}

impl PacingScheduler {
    pub fn new(config: &AgentConfig, events: Arc<EventDispatcher>) -> Self {
        Self {
            policy: Arc::new(PacingPolicy {
                delay_enabled: config.delay_enabled,
                delay_range: config.delay_range,
                noise_enabled: config.noise_enabled,
                noise_probability: config.noise_probability,
                noise_targets: config.noise_targets.clone(),
            }),
            events,
        }
    }

    /// Draws the delay and noise decision for one request.
    pub fn plan(&self) -> PacingPlan {
        let policy = &self.policy;
        let mut rng = rand::thread_rng();

        let delay = if policy.delay_enabled {
            let (min, max) = (policy.delay_range.min(), policy.delay_range.max());
            if min == max {
                min
            } else {
                Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
                    .clamp(min, max)
            }
        } else {
            Duration::ZERO
        };

        let noise = if policy.noise_enabled && rng.gen_bool(policy.noise_probability) {
            policy.noise_targets.choose(&mut rng).cloned()
        } else {
            None
        };

        PacingPlan { delay, noise }
    }

    /// Runs the pacing step for one fetch: the optional decoy request, then
    /// the delay. Both are suspension points of the calling task only, and
    /// dropping the returned future cancels them.
    pub async fn before_request(&self, sink: &dyn NoiseSink) -> PacingTicket {
        let plan = self.plan();
        let mut ticket = PacingTicket {
            delay: plan.delay,
            noise_target: plan.noise.as_ref().map(|t| t.name.clone()),
            noise_outcome: None,
        };

        if let Some(target) = plan.noise {
            let result = sink.send_noise(&target).await;
            ticket.noise_outcome = Some(if result.is_ok() {
                NoiseOutcome::Sent
            } else {
                NoiseOutcome::Failed
            });
            self.events.dispatch(AgentEvent::Noise(NoiseEvent {
                target: target.name,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            }));
        }

        if !ticket.delay.is_zero() {
            sleep(ticket.delay).await;
        }

        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl NoiseSink for CountingSink {
        async fn send_noise(&self, _target: &NoiseTarget) -> Result<(), ErrorRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ErrorRecord::new(ErrorKind::Upstream, "noise endpoint down"))
            } else {
                Ok(())
            }
        }
    }

    fn scheduler(delay: bool, noise: bool, probability: f64) -> PacingScheduler {
        let config = AgentConfig::builder()
            .with_delay(delay)
            .with_delay_range(
                DelayRange::new(Duration::from_millis(200), Duration::from_millis(900)).unwrap(),
            )
            .with_noise(noise)
            .with_noise_probability(probability)
            .build()
            .unwrap();
        PacingScheduler::new(&config, Arc::new(EventDispatcher::new()))
    }

    #[test]
    fn delays_stay_within_range() {
        let pacing = scheduler(true, false, 0.0);
        let range = DelayRange::new(Duration::from_millis(200), Duration::from_millis(900)).unwrap();
        for _ in 0..500 {
            let plan = pacing.plan();
            assert!(range.contains(plan.delay), "delay {:?} out of range", plan.delay);
            assert!(plan.noise.is_none());
        }
    }

    #[test]
    fn degenerate_range_is_exact() {
        let config = AgentConfig::builder()
            .with_delay_range(DelayRange::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap())
            .build()
            .unwrap();
        let pacing = PacingScheduler::new(&config, Arc::new(EventDispatcher::new()));
        assert_eq!(pacing.plan().delay, Duration::from_secs(2));
    }

    #[test]
    fn noise_probability_extremes() {
        let always = scheduler(false, true, 1.0);
        let never = scheduler(false, true, 0.0);
        for _ in 0..200 {
            assert!(always.plan().noise.is_some());
            assert!(never.plan().noise.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_pacing_does_not_wait() {
        let pacing = scheduler(false, false, 0.0);
        let sink = CountingSink::new(false);
        let started = Instant::now();
        let ticket = pacing.before_request(&sink).await;
        assert_eq!(ticket.delay, Duration::ZERO);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_drawn_delay_and_sends_one_noise_request() {
        let pacing = scheduler(true, true, 1.0);
        let sink = CountingSink::new(false);
        let started = Instant::now();
        let ticket = pacing.before_request(&sink).await;
        assert!(started.elapsed() >= ticket.delay);
        assert!(ticket.delay >= Duration::from_millis(200));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ticket.noise_outcome, Some(NoiseOutcome::Sent));
    }

    #[tokio::test(start_paused = true)]
    async fn noise_failure_is_absorbed() {
        let pacing = scheduler(false, true, 1.0);
        let sink = CountingSink::new(true);
        let ticket = pacing.before_request(&sink).await;
        assert!(ticket.noise_dispatched());
        assert_eq!(ticket.noise_outcome, Some(NoiseOutcome::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delay_is_cancellable() {
        let pacing = scheduler(true, false, 0.0);
        let sink = CountingSink::new(false);
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), pacing.before_request(&sink)).await;
        assert!(outcome.is_err());
    }
}
