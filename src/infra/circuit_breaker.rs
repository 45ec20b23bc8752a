//! Circuit breaker for the ledger
//!
//! When the ledger keeps failing, writes fail fast instead of each request
//! spending the full ledger timeout. The off-chain commit is unaffected; the
//! batch is simply marked as failed to sync.
//!
//! # States
//!
//! - **Closed**: calls pass through
//! - **Open**: calls are rejected until the backoff elapses
//! - **HalfOpen**: a limited number of probe calls decide whether to close

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Successful probes in half-open state needed to close
    pub success_threshold: u32,
    /// First open period; doubles on each consecutive reopen
    pub open_timeout: Duration,
    pub max_backoff: Duration,
    /// Probe calls allowed while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_parse("LEDGER_CB_FAILURE_THRESHOLD")
                .unwrap_or(defaults.failure_threshold),
            open_timeout: env_parse("LEDGER_CB_OPEN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.open_timeout),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Default)]
pub struct CircuitBreakerStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub rejected: AtomicU64,
    pub times_opened: AtomicU64,
}

struct InternalState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    half_open_requests: u32,
    consecutive_opens: u32,
    current_backoff: Duration,
}

impl InternalState {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            half_open_requests: 0,
            consecutive_opens: 0,
            current_backoff: config.open_timeout,
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    stats: CircuitBreakerStats,
}

impl CircuitBreaker {
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(InternalState::new(&config)),
            config,
            stats: CircuitBreakerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        self.maybe_half_open(&mut state);
        state.state
    }

    /// Whether a call may proceed. Counts the call as a probe when half-open.
    pub async fn is_allowed(&self) -> bool {
        let mut state = self.state.write().await;
        self.maybe_half_open(&mut state);

        let allowed = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    true
                } else {
                    false
                }
            }
        };
        if !allowed {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    pub async fn record_success(&self) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.close(&mut state);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            CircuitState::HalfOpen => self.open(&mut state),
            CircuitState::Open => {}
        }
    }

    pub fn stats(&self) -> &CircuitBreakerStats {
        &self.stats
    }

    #[cfg(test)]
    pub async fn force_open(&self) {
        let mut state = self.state.write().await;
        self.open(&mut state);
    }

    fn maybe_half_open(&self, state: &mut InternalState) {
        if state.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() >= state.current_backoff {
                tracing::info!(circuit = %self.name, "circuit half-open, probing");
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                state.half_open_requests = 0;
            }
        }
    }

    fn open(&self, state: &mut InternalState) {
        state.consecutive_opens += 1;
        let factor = 2u32.saturating_pow(state.consecutive_opens.saturating_sub(1));
        state.current_backoff = self
            .config
            .open_timeout
            .saturating_mul(factor)
            .min(self.config.max_backoff);

        tracing::warn!(
            circuit = %self.name,
            failures = state.failure_count,
            consecutive_opens = state.consecutive_opens,
            backoff_secs = state.current_backoff.as_secs(),
            "circuit opened"
        );

        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.success_count = 0;
        state.half_open_requests = 0;
        self.stats.times_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn close(&self, state: &mut InternalState) {
        tracing::info!(circuit = %self.name, "circuit closed");
        *state = InternalState::new(&self.config);
    }
}
