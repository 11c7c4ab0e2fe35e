//! Per-`platform:operation` circuit breaker with pluggable persistence.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::RecordflowError;
use crate::utils::{now, Timestamp};

/// Consecutive failures before a closed circuit opens.
pub(crate) const FAILURE_THRESHOLD: u32 = 5;

/// Base cool-down for a freshly opened circuit, in seconds.
const BASE_COOLDOWN_SECS: i64 = 60;

/// Cap on the extended cool-down, in seconds.
const MAX_COOLDOWN_SECS: i64 = 3600;

/// The three circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

/// Persisted breaker state for one `platform:operation` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// The `platform:operation` key.
    pub key: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures while closed, total failures while open.
    pub failure_count: u32,
    /// Successes since the last open.
    pub success_count: u32,
    /// How many times this circuit has opened; extends the cool-down.
    pub open_count: u32,
    /// When the last failure was recorded.
    pub last_failure_at: Option<Timestamp>,
    /// When an open circuit next allows a trial.
    pub next_retry_at: Option<Timestamp>,
    /// Optimistic-concurrency version, bumped by the store on every write.
    pub version: u64,
}

impl CircuitBreakerState {
    /// A fresh closed circuit for `key`.
    #[must_use]
    pub fn closed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            open_count: 0,
            last_failure_at: None,
            next_retry_at: None,
            version: 0,
        }
    }

    fn cooldown(&self) -> ChronoDuration {
        let exp = self.open_count.saturating_sub(1).min(10);
        let secs = BASE_COOLDOWN_SECS
            .saturating_mul(1i64 << exp)
            .min(MAX_COOLDOWN_SECS);
        ChronoDuration::seconds(secs)
    }
}

/// What a circuit check tells the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// The circuit is closed; proceed normally.
    Allow,
    /// The circuit moved to half-open; exactly one trial may proceed.
    AllowTrial,
    /// The circuit is open; do not call before `retry_at`.
    Reject {
        /// When the next trial becomes possible.
        retry_at: Option<Timestamp>,
    },
}

/// Persistence collaborator for breaker state.
///
/// `compare_and_swap` gives multi-process deployments lost-update safety;
/// the in-memory store serializes per key instead.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    /// Loads the state for a key, if any was ever persisted.
    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerState>, RecordflowError>;

    /// Unconditionally persists `state`, bumping its version.
    async fn save(&self, state: &CircuitBreakerState) -> Result<(), RecordflowError>;

    /// Persists `state` only if the stored version still equals
    /// `expected_version` (0 for a key never persisted). Returns whether the
    /// write won.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        state: &CircuitBreakerState,
    ) -> Result<bool, RecordflowError>;
}

/// Entry-locked map store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCircuitBreakerStore {
    states: DashMap<String, CircuitBreakerState>,
}

impl InMemoryCircuitBreakerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitBreakerStore for InMemoryCircuitBreakerStore {
    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerState>, RecordflowError> {
        Ok(self.states.get(key).map(|e| e.clone()))
    }

    async fn save(&self, state: &CircuitBreakerState) -> Result<(), RecordflowError> {
        let mut saved = state.clone();
        saved.version = state.version + 1;
        self.states.insert(saved.key.clone(), saved);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        state: &CircuitBreakerState,
    ) -> Result<bool, RecordflowError> {
        match self.states.entry(state.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().version != expected_version {
                    return Ok(false);
                }
                let mut saved = state.clone();
                saved.version = expected_version + 1;
                entry.insert(saved);
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(false);
                }
                let mut saved = state.clone();
                saved.version = 1;
                entry.insert(saved);
                Ok(true)
            }
        }
    }
}

/// The breaker itself: checks and records outcomes against the store.
pub struct CircuitBreaker {
    store: std::sync::Arc<dyn CircuitBreakerStore>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker").finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a breaker over a store.
    #[must_use]
    pub fn new(store: std::sync::Arc<dyn CircuitBreakerStore>) -> Self {
        Self { store }
    }

    /// Decides whether a call for `key` may proceed, transitioning an
    /// elapsed open circuit to half-open.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged.
    pub async fn check(&self, key: &str) -> Result<CircuitDecision, RecordflowError> {
        let Some(state) = self.store.load(key).await? else {
            return Ok(CircuitDecision::Allow);
        };

        match state.state {
            CircuitState::Closed => Ok(CircuitDecision::Allow),
            CircuitState::HalfOpen => Ok(CircuitDecision::Reject {
                retry_at: state.next_retry_at,
            }),
            CircuitState::Open => {
                let due = state.next_retry_at.is_none_or(|at| now() >= at);
                if !due {
                    return Ok(CircuitDecision::Reject {
                        retry_at: state.next_retry_at,
                    });
                }
                // Cool-down elapsed: claim the single half-open trial. Losing
                // the CAS means another caller claimed it first.
                let mut trial = state.clone();
                trial.state = CircuitState::HalfOpen;
                if self.store.compare_and_swap(state.version, &trial).await? {
                    info!(key, "circuit half-open, allowing trial");
                    Ok(CircuitDecision::AllowTrial)
                } else {
                    Ok(CircuitDecision::Reject {
                        retry_at: state.next_retry_at,
                    })
                }
            }
        }
    }

    /// Records a failed call, opening the circuit at the threshold and
    /// re-opening (with extended cool-down) on a failed half-open trial.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged.
    pub async fn record_failure(&self, key: &str) -> Result<CircuitBreakerState, RecordflowError> {
        let mut state = self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| CircuitBreakerState::closed(key));

        state.failure_count += 1;
        state.last_failure_at = Some(now());

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.failure_count >= FAILURE_THRESHOLD,
            CircuitState::Open => false,
        };
        if should_open {
            state.state = CircuitState::Open;
            state.open_count += 1;
            state.next_retry_at = Some(now() + state.cooldown());
            warn!(
                key,
                failures = state.failure_count,
                open_count = state.open_count,
                "circuit opened"
            );
        }

        self.store.save(&state).await?;
        Ok(state)
    }

    /// Records a successful call; a half-open trial success closes the
    /// circuit and resets its counters.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged.
    pub async fn record_success(&self, key: &str) -> Result<CircuitBreakerState, RecordflowError> {
        let mut state = self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| CircuitBreakerState::closed(key));

        match state.state {
            CircuitState::HalfOpen => {
                info!(key, "circuit closed after successful trial");
                let version = state.version;
                state = CircuitBreakerState::closed(key);
                state.version = version;
                state.success_count = 1;
            }
            CircuitState::Closed | CircuitState::Open => {
                state.failure_count = 0;
                state.success_count += 1;
            }
        }

        self.store.save(&state).await?;
        Ok(state)
    }
}
