//! Error classification, circuit breaking and recovery strategies.
//!
//! A failure arrives as an [`ErrorContext`], is classified by message
//! pattern, checked against the per-`platform:operation` circuit breaker,
//! then walked through a priority-ordered strategy chain. Failures that
//! exhaust the chain land in the dead-letter queue for manual disposition.

mod circuit;
mod classify;
mod dead_letter;
mod strategy;
mod system;

pub use circuit::{
    CircuitBreaker, CircuitBreakerState, CircuitBreakerStore, CircuitDecision, CircuitState,
    InMemoryCircuitBreakerStore,
};
pub use classify::{AiDiagnostics, Classification, ErrorCategory, ErrorClassifier, ErrorSeverity};
pub use dead_letter::{
    derive_priority, DeadLetterEntry, DeadLetterPriority, DeadLetterStatus, DeadLetterStore,
    InMemoryDeadLetterStore,
};
pub use strategy::{
    default_strategies, AiSuggestedActionStrategy, CircuitBreakerActivationStrategy,
    DataCorrectionStrategy, DeadLetterEscalationStrategy, NetworkRetryStrategy,
    PlatformOperation, RateLimitThrottleStrategy, RecoveryStrategy, StrategyContext,
    StrategyOutcome,
};
pub use system::{ErrorRecoverySystem, RecoveryAttempt, RecoveryResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::Timestamp;

/// One failure handed to the recovery system. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The error message, the primary classification input.
    pub message: String,
    /// The downstream operation that failed (or the stage id).
    pub operation: String,
    /// The platform the operation targets.
    pub platform: String,
    /// How many times this operation has been attempted.
    pub attempt: u32,
    /// When the failure occurred.
    pub timestamp: Timestamp,
    /// Free-form context: ids, hints like `retry_after_ms`, payload excerpts.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    /// Creates a first-attempt context stamped now.
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        platform: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            operation: operation.into(),
            platform: platform.into(),
            attempt: 1,
            timestamp: crate::utils::now(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The circuit-breaker key for this failure.
    #[must_use]
    pub fn circuit_key(&self) -> String {
        format!("{}:{}", self.platform, self.operation)
    }
}
