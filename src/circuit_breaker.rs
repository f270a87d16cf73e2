//! Consecutive-failure circuit breaker gating provider start attempts.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{OrbitMeshError, Result};

/// Trips open after `threshold` consecutive failures, then refuses new
/// attempts until `cooldown` has elapsed since the last failure.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Builds a breaker with the given threshold and cooldown.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(State::default()),
        }
    }

    /// Checks whether a new attempt may proceed, returning a `CooldownActive`
    /// error with the remaining seconds if the breaker is open.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        if let Some(opened_at) = state.opened_at {
            let elapsed = opened_at.elapsed();
            if elapsed < self.cooldown {
                let retry_after_secs = (self.cooldown - elapsed).as_secs().max(1);
                return Err(OrbitMeshError::CooldownActive { retry_after_secs });
            }
            // Cooldown elapsed: close the breaker and give the next attempt
            // a clean slate.
            state.opened_at = None;
            state.consecutive_failures = 0;
        }
        Ok(())
    }

    /// Records a successful attempt, resetting the failure count.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    /// Records a failed attempt, tripping the breaker once `threshold`
    /// consecutive failures have accumulated.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.opened_at = Some(Instant::now());
        }
    }

    /// Whether the breaker is currently open.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("circuit breaker mutex poisoned");
        state
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() < self.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(matches!(
            breaker.check(),
            Err(OrbitMeshError::CooldownActive { .. })
        ));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn cooldown_expiry_closes_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(5));
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.check().is_ok());
        assert!(!breaker.is_open());
    }
}
