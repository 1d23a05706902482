//! Per-endpoint circuit breaker.

use std::time::{Duration, Instant};

/// Breaker state for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; requests pass through.
    Closed,
    /// Endpoint assumed down; requests are skipped until the retry deadline.
    Open,
    /// One trial request allowed to test recovery.
    HalfOpen,
}

/// Configuration for the circuit breaker state machine.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures required to trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial request.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, open_duration: Duration::from_secs(30) }
    }
}

/// Three-state latch that short-circuits requests to failing endpoints.
///
/// Trips open at `failure_threshold` consecutive failures, allows one trial
/// after `open_duration`, and closes again on a trial success.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
    config: BreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub const fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            next_retry: None,
            config,
        }
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> BreakerState {
        self.state
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a request may be sent now.
    ///
    /// An open breaker whose retry deadline has passed transitions to
    /// half-open and admits the request as its trial.
    pub fn can_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let due = self.next_retry.is_some_and(|deadline| Instant::now() >= deadline);
                if due {
                    self.state = BreakerState::HalfOpen;
                }
                due
            }
        }
    }

    /// Record a successful request: close and clear the failure streak.
    pub fn on_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.next_retry = None;
    }

    /// Record a failed request.
    ///
    /// A closed breaker trips open at the failure threshold; a half-open
    /// trial failure reopens with a fresh retry deadline.
    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());

        match self.state {
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            BreakerState::HalfOpen | BreakerState::Open => self.trip(),
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.next_retry = Some(Instant::now() + self.config.open_duration);
    }
}
