//! Per-service circuit breaker.
//!
//! State machine: `closed → open` after `failure_threshold` consecutive
//! failures, `open → half_open` once `reset_timeout` has elapsed,
//! `half_open → closed` after `half_open_requests` consecutive successes,
//! and any half-open failure reopens immediately.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::store::{BreakerRow, BreakerState, Store};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub reset_timeout_minutes: i64,
    pub half_open_requests: u32,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_minutes: 5,
            half_open_requests: 2,
        }
    }
}

pub struct CircuitBreaker {
    store: Store,
    defaults: BreakerParams,
}

impl CircuitBreaker {
    pub fn new(store: Store, defaults: BreakerParams) -> Self {
        Self { store, defaults }
    }

    /// Per-service overrides live under the `circuit_breaker.<service>`
    /// policy key.
    fn params_for(&self, service: &str) -> Result<BreakerParams> {
        self.store
            .policies()
            .get_or(&format!("circuit_breaker.{}", service), self.defaults)
    }

    /// May a call to this service proceed right now? An `open` breaker
    /// whose reset timeout has elapsed is moved to `half_open` here, so the
    /// probe that follows is the one that decides its fate.
    pub fn can_proceed(&self, service: &str) -> Result<bool> {
        let params = self.params_for(service)?;
        let mut row = self.store.breakers().get_or_default(service)?;
        match row.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(true),
            BreakerState::Open => {
                let elapsed = Utc::now() - row.updated_at;
                if elapsed >= Duration::minutes(params.reset_timeout_minutes) {
                    row.state = BreakerState::HalfOpen;
                    row.half_open_successes = 0;
                    row.updated_at = Utc::now();
                    self.store.breakers().put(&row)?;
                    info!(%service, "breaker entering half-open probation");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Record the outcome of a call and apply the transition rules.
    pub fn record(&self, service: &str, success: bool) -> Result<BreakerRow> {
        let params = self.params_for(service)?;
        let mut row = self.store.breakers().get_or_default(service)?;
        match (row.state, success) {
            (BreakerState::Closed, true) => {
                row.failure_count = 0;
            }
            (BreakerState::Closed, false) => {
                row.failure_count += 1;
                if row.failure_count >= params.failure_threshold {
                    row.state = BreakerState::Open;
                    warn!(%service, failures = row.failure_count, "breaker opened");
                }
            }
            (BreakerState::HalfOpen, true) => {
                row.half_open_successes += 1;
                if row.half_open_successes >= params.half_open_requests {
                    row.state = BreakerState::Closed;
                    row.failure_count = 0;
                    row.half_open_successes = 0;
                    info!(%service, "breaker closed");
                }
            }
            (BreakerState::HalfOpen, false) => {
                row.state = BreakerState::Open;
                row.half_open_successes = 0;
                warn!(%service, "breaker reopened from half-open");
            }
            (BreakerState::Open, _) => {
                // Outcomes reported while open (e.g. a straggling call)
                // keep it open; only the timeout moves it forward.
                if !success {
                    row.failure_count += 1;
                }
            }
        }
        row.updated_at = Utc::now();
        self.store.breakers().put(&row)?;
        Ok(row)
    }

    pub fn state(&self, service: &str) -> Result<BreakerRow> {
        self.store.breakers().get_or_default(service)
    }

    pub fn reset(&self, service: &str) -> Result<BreakerRow> {
        info!(%service, "breaker force-reset");
        self.store.breakers().reset(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Store::open_in_memory().unwrap(), BreakerParams::default())
    }

    fn trip(breaker: &CircuitBreaker, service: &str) {
        for _ in 0..3 {
            breaker.record(service, false).unwrap();
        }
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = breaker();
        breaker.record("llm", false).unwrap();
        breaker.record("llm", false).unwrap();
        assert!(breaker.can_proceed("llm").unwrap());

        breaker.record("llm", false).unwrap();
        assert_eq!(breaker.state("llm").unwrap().state, BreakerState::Open);
        assert!(!breaker.can_proceed("llm").unwrap());
    }

    #[test]
    fn test_success_resets_the_failure_streak() {
        let breaker = breaker();
        breaker.record("llm", false).unwrap();
        breaker.record("llm", false).unwrap();
        breaker.record("llm", true).unwrap();
        breaker.record("llm", false).unwrap();
        assert_eq!(breaker.state("llm").unwrap().state, BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_then_closes_on_successes() {
        let store = Store::open_in_memory().unwrap();
        let breaker = CircuitBreaker::new(
            store.clone(),
            BreakerParams {
                reset_timeout_minutes: 0,
                ..Default::default()
            },
        );
        trip(&breaker, "twitter");

        // Zero timeout: the next check moves it to half-open.
        assert!(breaker.can_proceed("twitter").unwrap());
        assert_eq!(
            breaker.state("twitter").unwrap().state,
            BreakerState::HalfOpen
        );

        breaker.record("twitter", true).unwrap();
        assert_eq!(
            breaker.state("twitter").unwrap().state,
            BreakerState::HalfOpen
        );
        breaker.record("twitter", true).unwrap();
        assert_eq!(breaker.state("twitter").unwrap().state, BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            Store::open_in_memory().unwrap(),
            BreakerParams {
                reset_timeout_minutes: 0,
                ..Default::default()
            },
        );
        trip(&breaker, "twitter");
        assert!(breaker.can_proceed("twitter").unwrap());

        breaker.record("twitter", false).unwrap();
        assert_eq!(breaker.state("twitter").unwrap().state, BreakerState::Open);
    }

    #[test]
    fn test_services_are_independent() {
        let breaker = breaker();
        trip(&breaker, "llm");
        assert!(!breaker.can_proceed("llm").unwrap());
        assert!(breaker.can_proceed("twitter").unwrap());
    }

    #[test]
    fn test_reset_forces_closed() {
        let breaker = breaker();
        trip(&breaker, "llm");
        breaker.reset("llm").unwrap();
        assert!(breaker.can_proceed("llm").unwrap());
        assert_eq!(breaker.state("llm").unwrap().failure_count, 0);
    }
}
