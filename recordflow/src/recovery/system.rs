//! The recovery orchestrator: classify, check the circuit, walk the chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::circuit::{CircuitBreaker, CircuitBreakerStore, CircuitDecision, InMemoryCircuitBreakerStore};
use super::classify::{AiDiagnostics, ErrorCategory, ErrorClassifier, ErrorSeverity};
use super::dead_letter::{
    DeadLetterEntry, DeadLetterStatus, DeadLetterStore, InMemoryDeadLetterStore,
};
use super::strategy::{default_strategies, PlatformOperation, RecoveryStrategy, StrategyContext};
use super::ErrorContext;
use crate::errors::RecordflowError;
use crate::pipeline::DeadLetterSink;
use crate::rules::RuleEngine;
use crate::utils::{now, Timestamp};

/// One strategy attempt, recorded for analytics regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// The strategy that ran.
    pub strategy_id: String,
    /// When it ran.
    pub timestamp: Timestamp,
    /// Whether it resolved the failure.
    pub resolved: bool,
    /// What it did.
    pub outcome: String,
    /// How long it took.
    pub duration_ms: u64,
}

/// The final word on one failure.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    /// True when some strategy resolved the failure.
    pub resolved: bool,
    /// The resolving strategy's id.
    pub strategy_used: Option<String>,
    /// The resolving (or last) action description.
    pub action: Option<String>,
    /// The failure's classification.
    pub category: ErrorCategory,
    /// Severity of the classification.
    pub severity: ErrorSeverity,
    /// True when an open circuit rejected the call before any strategy ran.
    pub circuit_rejected: bool,
    /// Throttling hint for the caller, when applicable.
    pub retry_after_ms: Option<u64>,
    /// The dead-letter entry created on escalation.
    pub dead_letter_id: Option<String>,
    /// Every attempt made, in chain order.
    pub attempts: Vec<RecoveryAttempt>,
}

/// Classifies failures, consults the circuit breaker and walks the strategy
/// chain; unresolved failures land in the dead-letter queue.
pub struct ErrorRecoverySystem {
    classifier: ErrorClassifier,
    breaker: Arc<CircuitBreaker>,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    dead_letters: Arc<dyn DeadLetterStore>,
    engine: Arc<RuleEngine>,
    ai: Option<Arc<dyn AiDiagnostics>>,
}

impl std::fmt::Debug for ErrorRecoverySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecoverySystem")
            .field("strategies", &self.strategies.len())
            .field("ai", &self.ai.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ErrorRecoverySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecoverySystem {
    /// Creates a system with in-memory stores and the standard chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            breaker: Arc::new(CircuitBreaker::new(Arc::new(
                InMemoryCircuitBreakerStore::new(),
            ))),
            strategies: default_strategies(),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            engine: Arc::new(RuleEngine::new()),
            ai: None,
        }
    }

    /// Swaps in a persistent circuit-breaker store.
    #[must_use]
    pub fn with_circuit_store(mut self, store: Arc<dyn CircuitBreakerStore>) -> Self {
        self.breaker = Arc::new(CircuitBreaker::new(store));
        self
    }

    /// Swaps in a persistent dead-letter store.
    #[must_use]
    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = store;
        self
    }

    /// Shares a rule engine for data-correction strategies.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<RuleEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Attaches the AI diagnosis collaborator.
    #[must_use]
    pub fn with_ai(mut self, ai: Arc<dyn AiDiagnostics>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Replaces the strategy chain (re-sorted by priority).
    #[must_use]
    pub fn with_strategies(mut self, mut strategies: Vec<Arc<dyn RecoveryStrategy>>) -> Self {
        strategies.sort_by_key(|s| s.priority());
        self.strategies = strategies;
        self
    }

    /// The circuit breaker, for callers that pre-check before expensive
    /// operations.
    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Recovers from one failure.
    ///
    /// An open circuit rejects before any strategy runs; otherwise the chain
    /// is walked in priority order, skipping strategies whose categories do
    /// not match, until one resolves or the list is exhausted. Exhaustion
    /// creates exactly one pending dead-letter entry; its persistence is
    /// fire-and-forget with respect to the returned result.
    pub async fn recover_from_error(
        &self,
        error: ErrorContext,
        operation: Option<Arc<dyn PlatformOperation>>,
    ) -> RecoveryResult {
        let classification = self
            .classifier
            .classify_with_ai(&error, self.ai.as_deref())
            .await;

        let key = error.circuit_key();
        let decision = match self.breaker.check(&key).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(key, error = %e, "circuit check failed, allowing call");
                CircuitDecision::Allow
            }
        };
        if let CircuitDecision::Reject { retry_at } = decision {
            info!(key, "circuit open, rejecting without recovery");
            return RecoveryResult {
                resolved: false,
                strategy_used: None,
                action: Some("circuit open, call rejected".to_string()),
                category: classification.category,
                severity: classification.severity,
                circuit_rejected: true,
                retry_after_ms: retry_at
                    .map(|at| (at - now()).num_milliseconds().max(0))
                    .and_then(|ms| u64::try_from(ms).ok()),
                dead_letter_id: None,
                attempts: Vec::new(),
            };
        }

        let ctx = StrategyContext {
            error: error.clone(),
            classification,
            operation,
            engine: Arc::clone(&self.engine),
            breaker: Arc::clone(&self.breaker),
            ai: self.ai.clone(),
        };

        let mut attempts: Vec<RecoveryAttempt> = Vec::new();
        let mut resolution: Option<(String, String, Option<u64>)> = None;

        for strategy in &self.strategies {
            let applicable = strategy
                .applies_to()
                .is_none_or(|cats| cats.contains(&classification.category));
            if !applicable {
                continue;
            }

            let started = Instant::now();
            let outcome = strategy.attempt(&ctx).await;
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = started.elapsed().as_millis() as u64;

            attempts.push(RecoveryAttempt {
                strategy_id: strategy.id().to_string(),
                timestamp: now(),
                resolved: outcome.resolved,
                outcome: outcome.action.clone(),
                duration_ms,
            });

            if outcome.resolved {
                resolution = Some((
                    strategy.id().to_string(),
                    outcome.action,
                    outcome.retry_after_ms,
                ));
                break;
            }
        }

        match resolution {
            Some((strategy_id, action, retry_after_ms)) => {
                if let Err(e) = self.breaker.record_success(&key).await {
                    warn!(key, error = %e, "failed to record circuit success");
                }
                info!(key, strategy = %strategy_id, "failure recovered");
                RecoveryResult {
                    resolved: true,
                    strategy_used: Some(strategy_id),
                    action: Some(action),
                    category: classification.category,
                    severity: classification.severity,
                    circuit_rejected: false,
                    retry_after_ms,
                    dead_letter_id: None,
                    attempts,
                }
            }
            None => {
                let last_action = attempts.last().map(|a| a.outcome.clone());
                let entry = DeadLetterEntry::pending(error, attempts.clone());
                let entry_id = entry.id.clone();
                if let Err(e) = self.dead_letters.insert(&entry).await {
                    // Persistence failure never masks the recovery outcome.
                    error!(entry_id = %entry.id, error = %e, "dead-letter insert failed");
                }
                warn!(
                    key,
                    entry_id = %entry_id,
                    priority = ?entry.priority,
                    "recovery exhausted, escalated to dead letter"
                );
                RecoveryResult {
                    resolved: false,
                    strategy_used: None,
                    action: last_action,
                    category: classification.category,
                    severity: classification.severity,
                    circuit_rejected: false,
                    retry_after_ms: None,
                    dead_letter_id: Some(entry_id),
                    attempts,
                }
            }
        }
    }

    /// Manually dispositions a dead-letter entry.
    ///
    /// # Errors
    ///
    /// Returns [`RecordflowError::Store`] when the entry does not exist or
    /// the store write fails.
    pub async fn resolve_dead_letter(
        &self,
        id: &str,
        status: DeadLetterStatus,
        resolution: impl Into<String>,
    ) -> Result<DeadLetterEntry, RecordflowError> {
        let Some(mut entry) = self.dead_letters.load(id).await? else {
            return Err(RecordflowError::Store(format!(
                "dead-letter entry '{id}' not found"
            )));
        };
        entry.status = status;
        entry.resolution = Some(resolution.into());
        entry.updated_at = now();
        self.dead_letters.update(&entry).await?;
        info!(entry_id = %id, status = ?entry.status, "dead-letter entry dispositioned");
        Ok(entry)
    }

    /// Lists dead-letter entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged.
    pub async fn list_dead_letters(
        &self,
        status: DeadLetterStatus,
    ) -> Result<Vec<DeadLetterEntry>, RecordflowError> {
        self.dead_letters.list_by_status(status).await
    }
}

#[async_trait]
impl DeadLetterSink for ErrorRecoverySystem {
    async fn forward(&self, error: ErrorContext) {
        let result = self.recover_from_error(error, None).await;
        if !result.resolved {
            info!(
                dead_letter_id = ?result.dead_letter_id,
                "forwarded stage failure was not auto-recovered"
            );
        }
    }
}
