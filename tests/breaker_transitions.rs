//! Circuit breaker state machine over the persisted store.

use serde_json::json;

use opsfleet::store::{BreakerState, Store};
use opsfleet::{BreakerParams, CircuitBreaker};

fn breaker(store: &Store) -> CircuitBreaker {
    CircuitBreaker::new(
        store.clone(),
        BreakerParams {
            failure_threshold: 3,
            // Zero timeout lets tests reach half_open without sleeping.
            reset_timeout_minutes: 0,
            half_open_requests: 2,
        },
    )
}

#[test]
fn consecutive_failures_open_then_probes_close() {
    let store = Store::open_in_memory().unwrap();
    let breaker = breaker(&store);

    assert!(breaker.can_proceed("x_api").unwrap());
    breaker.record("x_api", false).unwrap();
    breaker.record("x_api", true).unwrap();
    // Success resets the consecutive count.
    assert_eq!(
        breaker.state("x_api").unwrap().state,
        BreakerState::Closed
    );

    for _ in 0..3 {
        breaker.record("x_api", false).unwrap();
    }
    assert_eq!(breaker.state("x_api").unwrap().state, BreakerState::Open);

    // Timeout elapsed: the next check flips to half_open and admits a probe.
    assert!(breaker.can_proceed("x_api").unwrap());
    assert_eq!(
        breaker.state("x_api").unwrap().state,
        BreakerState::HalfOpen
    );

    breaker.record("x_api", true).unwrap();
    assert_eq!(
        breaker.state("x_api").unwrap().state,
        BreakerState::HalfOpen
    );
    breaker.record("x_api", true).unwrap();
    assert_eq!(breaker.state("x_api").unwrap().state, BreakerState::Closed);
}

#[test]
fn half_open_failure_reopens() {
    let store = Store::open_in_memory().unwrap();
    let breaker = breaker(&store);

    for _ in 0..3 {
        breaker.record("crawler", false).unwrap();
    }
    assert!(breaker.can_proceed("crawler").unwrap());
    breaker.record("crawler", false).unwrap();
    assert_eq!(breaker.state("crawler").unwrap().state, BreakerState::Open);
}

#[test]
fn per_service_policy_overrides_defaults() {
    let store = Store::open_in_memory().unwrap();
    store
        .policies()
        .upsert(
            "circuit_breaker.x_api",
            &json!({"failure_threshold": 1, "reset_timeout_minutes": 5, "half_open_requests": 2}),
            None,
        )
        .unwrap();
    let breaker = breaker(&store);

    breaker.record("x_api", false).unwrap();
    assert_eq!(breaker.state("x_api").unwrap().state, BreakerState::Open);
    assert!(!breaker.can_proceed("x_api").unwrap());

    // The override is scoped to its service.
    breaker.record("crawler", false).unwrap();
    assert_eq!(breaker.state("crawler").unwrap().state, BreakerState::Closed);

    breaker.reset("x_api").unwrap();
    assert_eq!(breaker.state("x_api").unwrap().state, BreakerState::Closed);
    assert!(breaker.can_proceed("x_api").unwrap());
}
