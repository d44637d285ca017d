use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::constants::defaults as d;
use crate::error::Error;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

/// Configuration for a single adapter's circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_test_period: Duration,
    pub cleanup_interval: Duration,
    pub retention_period: Duration,
    pub call_history_capacity: usize,
    pub state_transition_capacity: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d::CIRCUIT_FAILURE_THRESHOLD,
            recovery_timeout: d::CIRCUIT_RECOVERY_TIMEOUT,
            half_open_test_period: d::CIRCUIT_HALF_OPEN_TEST_PERIOD,
            cleanup_interval: d::CIRCUIT_CLEANUP_INTERVAL,
            retention_period: d::CIRCUIT_RETENTION_PERIOD,
            call_history_capacity: d::CIRCUIT_CALL_HISTORY_CAPACITY,
            state_transition_capacity: d::CIRCUIT_STATE_TRANSITION_CAPACITY,
            base_delay: d::DEFAULT_RETRY_BASE_DELAY,
            max_delay: d::DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

/// One entry in the bounded call history.
#[derive(Debug, Clone, Copy)]
pub struct CallRecord {
    pub ts: u64,
    pub success: bool,
    pub duration_ms: u64,
}

/// One entry in the bounded state-transition log.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub ts: u64,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
}

/// Snapshot of a breaker's counters and state, safe to hand to callers
/// without exposing the lock.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub circuit_opened_count: u64,
    pub call_history: Vec<CallRecord>,
    pub state_transitions: Vec<StateTransition>,
    pub last_cleanup_ts: u64,
}

struct CircuitBreakerState {
    state: CircuitState,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    consecutive_failures: u32,
    circuit_opened_count: u64,
    last_failure_time: Option<SystemTime>,
    half_open_started: Option<SystemTime>,
    call_history: VecDeque<CallRecord>,
    state_transitions: VecDeque<StateTransition>,
    last_cleanup_ts: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            consecutive_failures: 0,
            circuit_opened_count: 0,
            last_failure_time: None,
            half_open_started: None,
            call_history: VecDeque::new(),
            state_transitions: VecDeque::new(),
            last_cleanup_ts: now_secs(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-adapter circuit breaker. Shared mutable state is
/// guarded by a single [`parking_lot::Mutex`] per breaker — the breaker's
/// state is the only data shared across concurrent requests to the same
/// adapter.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let s = self.state.lock();
        CircuitBreakerStats {
            state: s.state,
            total_calls: s.total_calls,
            successful_calls: s.successful_calls,
            failed_calls: s.failed_calls,
            rejected_calls: s.rejected_calls,
            consecutive_failures: s.consecutive_failures,
            circuit_opened_count: s.circuit_opened_count,
            call_history: s.call_history.iter().copied().collect(),
            state_transitions: s.state_transitions.iter().cloned().collect(),
            last_cleanup_ts: s.last_cleanup_ts,
        }
    }

    fn should_allow_request(&self, s: &mut CircuitBreakerState) -> bool {
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = s
                    .last_failure_time
                    .and_then(|t| t.elapsed().ok())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    self.transition(s, CircuitState::HalfOpen, "recovery_timeout_elapsed");
                    s.half_open_started = Some(SystemTime::now());
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Only the first call after entering half-open is admitted;
                // subsequent concurrent calls fail fast until the trial
                // resolves.
                s.half_open_started.is_some()
            }
        }
    }

    fn transition(&self, s: &mut CircuitBreakerState, to: CircuitState, reason: &str) {
        if s.state == to {
            return;
        }
        let from = s.state;
        s.state = to;
        if to == CircuitState::Open {
            s.circuit_opened_count += 1;
        }
        if s.state_transitions.len() >= self.config.state_transition_capacity {
            s.state_transitions.pop_front();
        }
        s.state_transitions.push_back(StateTransition {
            ts: now_secs(),
            from,
            to,
            reason: reason.to_string(),
        });
    }

    fn record_call(&self, s: &mut CircuitBreakerState, success: bool, duration: Duration) {
        if s.call_history.len() >= self.config.call_history_capacity {
            s.call_history.pop_front();
        }
        s.call_history.push_back(CallRecord {
            ts: now_secs(),
            success,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn on_success(&self, s: &mut CircuitBreakerState, duration: Duration) {
        s.total_calls += 1;
        s.successful_calls += 1;
        s.consecutive_failures = 0;
        self.record_call(s, true, duration);
        if s.state == CircuitState::HalfOpen {
            self.transition(s, CircuitState::Closed, "half_open_probe_succeeded");
            s.half_open_started = None;
        }
    }

    fn on_failure(&self, s: &mut CircuitBreakerState, duration: Duration) {
        s.total_calls += 1;
        s.failed_calls += 1;
        s.consecutive_failures += 1;
        s.last_failure_time = Some(SystemTime::now());
        self.record_call(s, false, duration);

        if s.state == CircuitState::HalfOpen {
            self.transition(s, CircuitState::Open, "half_open_probe_failed");
            s.half_open_started = None;
        } else if s.consecutive_failures >= self.config.failure_threshold {
            self.transition(s, CircuitState::Open, "consecutive_failure_threshold_reached");
        }
    }

    /// Run `f` through the breaker: fast-fails with [`Error::CircuitOpen`]
    /// if the breaker is open, otherwise runs `f` and records the
    /// outcome.
    pub async fn call<F, T, Fut>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        {
            let mut s = self.state.lock();
            if !self.should_allow_request(&mut s) {
                s.rejected_calls += 1;
                let retry_after_secs = self
                    .config
                    .recovery_timeout
                    .as_secs()
                    .saturating_sub(
                        s.last_failure_time
                            .and_then(|t| t.elapsed().ok())
                            .unwrap_or(Duration::ZERO)
                            .as_secs(),
                    );
                return Err(Error::CircuitOpen {
                    adapter: self.name.clone(),
                    retry_after_secs,
                });
            }
        }

        let start = std::time::Instant::now();
        let result = f().await;
        let duration = start.elapsed();

        let mut s = self.state.lock();
        match &result {
            Ok(_) => self.on_success(&mut s, duration),
            Err(_) => self.on_failure(&mut s, duration),
        }
        result
    }

    /// Drop call-history and state-transition entries older than
    /// `retention_period`. Runs automatically every
    /// `cleanup_interval` via [`crate::breaker::CircuitBreakerRegistry`];
    /// callers may invoke it directly to force an immediate pass.
    pub fn force_cleanup(&self) {
        let mut s = self.state.lock();
        let cutoff = now_secs().saturating_sub(self.config.retention_period.as_secs());
        s.call_history.retain(|r| r.ts >= cutoff);
        s.state_transitions.retain(|t| t.ts >= cutoff);
        s.last_cleanup_ts = now_secs();
    }

    /// Whether `cleanup_interval` has elapsed since the last cleanup.
    #[must_use]
    pub fn cleanup_due(&self) -> bool {
        let s = self.state.lock();
        now_secs().saturating_sub(s.last_cleanup_ts) >= self.config.cleanup_interval.as_secs()
    }

    /// Reset to closed with all counters zeroed. Used by tests and by
    /// admin tooling to manually clear a breaker.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        *s = CircuitBreakerState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn breaker_with(failure_threshold: u32, recovery_timeout: StdDuration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-adapter",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker_with(3, StdDuration::from_secs(60));
        for _ in 0..3 {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::InvalidInput("boom".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling() {
        let breaker = breaker_with(1, StdDuration::from_secs(60));
        let _ = breaker
            .call(|| async { Err::<(), _>(Error::InvalidInput("boom".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .call(|| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets_counters() {
        let breaker = breaker_with(1, StdDuration::from_millis(10));
        let _ = breaker
            .call(|| async { Err::<(), _>(Error::InvalidInput("boom".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = breaker_with(1, StdDuration::from_millis(10));
        let _ = breaker
            .call(|| async { Err::<(), _>(Error::InvalidInput("boom".into())) })
            .await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let _ = breaker
            .call(|| async { Err::<(), _>(Error::InvalidInput("boom again".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_cleanup_drops_entries_older_than_retention() {
        let breaker = CircuitBreaker::new(
            "test-adapter",
            CircuitBreakerConfig {
                retention_period: StdDuration::from_secs(0),
                ..CircuitBreakerConfig::default()
            },
        );
        {
            let mut s = breaker.state.lock();
            s.call_history.push_back(CallRecord {
                ts: 0,
                success: true,
                duration_ms: 1,
            });
        }
        breaker.force_cleanup();
        assert!(breaker.stats().call_history.is_empty());
    }

    #[test]
    fn call_history_is_bounded() {
        let breaker = CircuitBreaker::new(
            "test-adapter",
            CircuitBreakerConfig {
                call_history_capacity: 2,
                ..CircuitBreakerConfig::default()
            },
        );
        let mut s = breaker.state.lock();
        for i in 0..5u64 {
            breaker.record_call(&mut s, true, Duration::from_millis(i));
        }
        drop(s);
        assert_eq!(breaker.stats().call_history.len(), 2);
    }
}
