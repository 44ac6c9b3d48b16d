//! Per-endpoint circuit breaker.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use placelink_common::Clock;

/// Consecutive failures before the breaker opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open breaker refuses traffic before probing again.
pub const OPEN_FOR_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: DateTime<Utc> },
    HalfOpen,
}

/// Tracks the health of one logical endpoint. After
/// [`FAILURE_THRESHOLD`] consecutive failures the breaker opens and
/// [`allows`](CircuitBreaker::allows) returns false until the cooldown
/// elapses; the first call after that runs as a half-open probe whose
/// outcome closes or re-opens the breaker.
pub struct CircuitBreaker {
    name: String,
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::Closed { failures: 0 }),
            clock,
        }
    }

    /// Whether a call may proceed right now. Transitions Open → HalfOpen
    /// when the cooldown has elapsed.
    pub fn allows(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Closed { .. } | State::HalfOpen => true,
            State::Open { until } => {
                if self.clock.now() >= until {
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        *self.state.lock().unwrap() = State::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        let failures = match *state {
            State::Closed { failures } => failures + 1,
            // A failed half-open probe re-opens immediately.
            State::HalfOpen => FAILURE_THRESHOLD,
            State::Open { .. } => return,
        };

        if failures >= FAILURE_THRESHOLD {
            let until = self.clock.now() + Duration::seconds(OPEN_FOR_SECS);
            warn!(endpoint = %self.name, until = %until, "Circuit breaker opened");
            *state = State::Open { until };
        } else {
            *state = State::Closed { failures };
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placelink_common::FixedClock;

    fn breaker() -> (CircuitBreaker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new("2025-06-01T00:00:00Z".parse().unwrap()));
        (CircuitBreaker::new("annorepo", clock.clone()), clock)
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
            assert!(breaker.allows());
        }
        breaker.record_failure();
        assert!(!breaker.allows());
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let (breaker, _clock) = breaker();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allows());
    }

    #[test]
    fn half_open_probe_closes_on_success_and_reopens_on_failure() {
        let (breaker, clock) = breaker();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        assert!(!breaker.allows());

        clock.advance(Duration::seconds(OPEN_FOR_SECS + 1));
        assert!(breaker.allows(), "cooldown elapsed, probe allowed");

        breaker.record_failure();
        assert!(!breaker.allows(), "failed probe reopens");

        clock.advance(Duration::seconds(OPEN_FOR_SECS + 1));
        assert!(breaker.allows());
        breaker.record_success();
        assert!(breaker.allows());
        assert!(!breaker.is_open());
    }
}
