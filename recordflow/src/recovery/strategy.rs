//! The priority-ordered recovery strategy chain.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::circuit::CircuitBreaker;
use super::classify::{AiDiagnostics, Classification, ErrorCategory};
use super::ErrorContext;
use crate::errors::RecordflowError;
use crate::pipeline::{with_retry, RetryStrategy};
use crate::rules::RuleEngine;

/// A retryable downstream platform call, identified by `(platform,
/// operation)`. Callers implement this around their API clients.
#[async_trait]
pub trait PlatformOperation: Send + Sync {
    /// Executes the call once.
    async fn execute(&self) -> Result<(), RecordflowError>;
}

/// Everything a strategy may draw on for one recovery attempt.
pub struct StrategyContext {
    /// The failure being recovered.
    pub error: ErrorContext,
    /// Its classification.
    pub classification: Classification,
    /// The retryable downstream call, when the caller can re-issue it.
    pub operation: Option<Arc<dyn PlatformOperation>>,
    /// Rule engine for data-correction strategies.
    pub engine: Arc<RuleEngine>,
    /// The circuit breaker guarding this `platform:operation`.
    pub breaker: Arc<CircuitBreaker>,
    /// Optional AI collaborator.
    pub ai: Option<Arc<dyn AiDiagnostics>>,
}

/// What one strategy attempt produced.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// True when the failure is resolved and processing may proceed.
    pub resolved: bool,
    /// What the strategy did (or suggests doing).
    pub action: String,
    /// When the caller should retry, for throttling outcomes.
    pub retry_after_ms: Option<u64>,
}

impl StrategyOutcome {
    fn resolved(action: impl Into<String>) -> Self {
        Self {
            resolved: true,
            action: action.into(),
            retry_after_ms: None,
        }
    }

    fn unresolved(action: impl Into<String>) -> Self {
        Self {
            resolved: false,
            action: action.into(),
            retry_after_ms: None,
        }
    }
}

/// One automated recovery approach in the chain.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Stable id used in attempt records.
    fn id(&self) -> &'static str;

    /// Chain position; lower runs first.
    fn priority(&self) -> u8;

    /// Categories this strategy applies to; `None` means any.
    fn applies_to(&self) -> Option<&'static [ErrorCategory]>;

    /// Whether the strategy acts without operator involvement.
    fn automated(&self) -> bool;

    /// Rough prior success rate, for analytics.
    fn estimated_success_rate(&self) -> f64;

    /// Tries to recover.
    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome;
}

/// Strategy 1: re-issue the failed call with exponential backoff.
pub struct NetworkRetryStrategy {
    retry: RetryStrategy,
}

impl Default for NetworkRetryStrategy {
    fn default() -> Self {
        Self {
            retry: RetryStrategy::new().with_base_delay_ms(500).with_max_attempts(3),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRetryStrategy {
    fn id(&self) -> &'static str {
        "network_retry"
    }
    fn priority(&self) -> u8 {
        1
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        Some(&[ErrorCategory::Network])
    }
    fn automated(&self) -> bool {
        true
    }
    fn estimated_success_rate(&self) -> f64 {
        0.7
    }

    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome {
        let Some(operation) = &ctx.operation else {
            return StrategyOutcome::unresolved("no retryable operation supplied");
        };
        match with_retry(&self.retry, || operation.execute()).await {
            Ok(()) => StrategyOutcome::resolved(format!(
                "retried {} with backoff",
                ctx.error.operation
            )),
            Err(e) => StrategyOutcome::unresolved(format!("retries exhausted: {e}")),
        }
    }
}

/// Strategy 2: wait out the platform's rate-limit window, then retry once.
pub struct RateLimitThrottleStrategy {
    /// Upper bound on how long the strategy will actually sleep.
    max_wait: Duration,
}

impl Default for RateLimitThrottleStrategy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RateLimitThrottleStrategy {
    /// Computes the reset delay: the platform's `retry_after_ms` hint when
    /// present, otherwise one second per attempt so far.
    fn reset_delay(error: &ErrorContext) -> Duration {
        let hinted = error
            .metadata
            .get("retry_after_ms")
            .and_then(|v| v.parse::<u64>().ok());
        Duration::from_millis(hinted.unwrap_or_else(|| 1000 * u64::from(error.attempt.max(1))))
    }
}

#[async_trait]
impl RecoveryStrategy for RateLimitThrottleStrategy {
    fn id(&self) -> &'static str {
        "rate_limit_throttle"
    }
    fn priority(&self) -> u8 {
        2
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        Some(&[ErrorCategory::RateLimit])
    }
    fn automated(&self) -> bool {
        true
    }
    fn estimated_success_rate(&self) -> f64 {
        0.9
    }

    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome {
        let delay = Self::reset_delay(&ctx.error);
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;

        let Some(operation) = &ctx.operation else {
            // Nothing to re-issue; hand the computed window back to the
            // caller.
            let mut outcome =
                StrategyOutcome::unresolved(format!("throttled, retry after {delay_ms}ms"));
            outcome.retry_after_ms = Some(delay_ms);
            return outcome;
        };

        debug!(delay_ms, "throttling before rate-limited retry");
        tokio::time::sleep(delay.min(self.max_wait)).await;
        match operation.execute().await {
            Ok(()) => StrategyOutcome::resolved(format!("throttled {delay_ms}ms, then succeeded")),
            Err(e) => {
                let mut outcome =
                    StrategyOutcome::unresolved(format!("still failing after throttle: {e}"));
                outcome.retry_after_ms = Some(delay_ms);
                outcome
            }
        }
    }
}

/// Strategy 3: correct the offending payload with a registered rule.
///
/// The caller points at the rule via `correction_rule` metadata and supplies
/// the payload as JSON under `record`; the corrected payload is returned in
/// the action text for the caller to re-submit.
#[derive(Default)]
pub struct DataCorrectionStrategy;

#[async_trait]
impl RecoveryStrategy for DataCorrectionStrategy {
    fn id(&self) -> &'static str {
        "data_correction"
    }
    fn priority(&self) -> u8 {
        3
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        Some(&[ErrorCategory::Validation])
    }
    fn automated(&self) -> bool {
        true
    }
    fn estimated_success_rate(&self) -> f64 {
        0.5
    }

    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome {
        let Some(rule_id) = ctx.error.metadata.get("correction_rule") else {
            return StrategyOutcome::unresolved("no correction rule configured");
        };
        let Some(payload) = ctx
            .error
            .metadata
            .get("record")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
        else {
            return StrategyOutcome::unresolved("no record payload to correct");
        };

        let result = ctx.engine.execute_rule(rule_id, &payload);
        if result.success {
            StrategyOutcome::resolved(format!(
                "corrected via rule '{rule_id}': {}",
                result.output_or_null()
            ))
        } else {
            StrategyOutcome::unresolved(format!(
                "correction rule '{rule_id}' failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ))
        }
    }
}

/// Strategy 4: engage the circuit breaker so a persistently failing
/// downstream stops being called.
///
/// Engaging protection never resolves the failure itself, so server faults
/// still fall through to escalation.
#[derive(Default)]
pub struct CircuitBreakerActivationStrategy;

#[async_trait]
impl RecoveryStrategy for CircuitBreakerActivationStrategy {
    fn id(&self) -> &'static str {
        "circuit_breaker_activation"
    }
    fn priority(&self) -> u8 {
        4
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        Some(&[ErrorCategory::Server, ErrorCategory::Network])
    }
    fn automated(&self) -> bool {
        true
    }
    fn estimated_success_rate(&self) -> f64 {
        0.0
    }

    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome {
        match ctx.breaker.record_failure(&ctx.error.circuit_key()).await {
            Ok(state) => StrategyOutcome::unresolved(format!(
                "recorded failure on '{}', circuit {:?}",
                state.key, state.state
            )),
            Err(e) => StrategyOutcome::unresolved(format!("circuit update failed: {e}")),
        }
    }
}

/// Strategy 5: ask the AI collaborator for a suggested action.
///
/// Suggestions are surfaced for the operator, not executed, so the outcome
/// is never resolved.
#[derive(Default)]
pub struct AiSuggestedActionStrategy;

#[async_trait]
impl RecoveryStrategy for AiSuggestedActionStrategy {
    fn id(&self) -> &'static str {
        "ai_suggested_action"
    }
    fn priority(&self) -> u8 {
        5
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        None
    }
    fn automated(&self) -> bool {
        false
    }
    fn estimated_success_rate(&self) -> f64 {
        0.3
    }

    async fn attempt(&self, ctx: &StrategyContext) -> StrategyOutcome {
        let Some(ai) = &ctx.ai else {
            return StrategyOutcome::unresolved("no AI collaborator configured");
        };
        match ai.suggest_action(&ctx.error).await {
            Some(suggestion) => StrategyOutcome::unresolved(format!("suggested: {suggestion}")),
            None => StrategyOutcome::unresolved("no suggestion available"),
        }
    }
}

/// Strategy 6: terminal marker; the recovery system creates the dead-letter
/// entry once the chain is exhausted.
#[derive(Default)]
pub struct DeadLetterEscalationStrategy;

#[async_trait]
impl RecoveryStrategy for DeadLetterEscalationStrategy {
    fn id(&self) -> &'static str {
        "dead_letter_escalation"
    }
    fn priority(&self) -> u8 {
        6
    }
    fn applies_to(&self) -> Option<&'static [ErrorCategory]> {
        None
    }
    fn automated(&self) -> bool {
        true
    }
    fn estimated_success_rate(&self) -> f64 {
        1.0
    }

    async fn attempt(&self, _ctx: &StrategyContext) -> StrategyOutcome {
        StrategyOutcome::unresolved("escalating to dead-letter queue")
    }
}

/// The standard chain, sorted by ascending priority.
#[must_use]
pub fn default_strategies() -> Vec<Arc<dyn RecoveryStrategy>> {
    let mut strategies: Vec<Arc<dyn RecoveryStrategy>> = vec![
        Arc::new(NetworkRetryStrategy::default()),
        Arc::new(RateLimitThrottleStrategy::default()),
        Arc::new(DataCorrectionStrategy),
        Arc::new(CircuitBreakerActivationStrategy),
        Arc::new(AiSuggestedActionStrategy),
        Arc::new(DeadLetterEscalationStrategy),
    ];
    strategies.sort_by_key(|s| s.priority());
    strategies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::circuit::InMemoryCircuitBreakerStore;
    use crate::rules::TransformationRule;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyOperation {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    #[async_trait]
    impl PlatformOperation for FlakyOperation {
        async fn execute(&self) -> Result<(), RecordflowError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(RecordflowError::Internal("connection reset".to_string()))
            }
        }
    }

    fn ctx(error: ErrorContext, operation: Option<Arc<dyn PlatformOperation>>) -> StrategyContext {
        StrategyContext {
            classification: Classification::for_category(ErrorCategory::Network),
            error,
            operation,
            engine: Arc::new(RuleEngine::new()),
            breaker: Arc::new(CircuitBreaker::new(Arc::new(
                InMemoryCircuitBreakerStore::new(),
            ))),
            ai: None,
        }
    }

    #[tokio::test]
    async fn test_network_retry_eventually_succeeds() {
        let op = Arc::new(FlakyOperation {
            calls: AtomicUsize::new(0),
            succeed_on: 2,
        });
        let strategy = NetworkRetryStrategy {
            retry: RetryStrategy::new()
                .with_base_delay_ms(1)
                .with_jitter(crate::pipeline::JitterStrategy::None),
        };

        let outcome = strategy
            .attempt(&ctx(
                ErrorContext::new("connection reset", "shopify", "update"),
                Some(op.clone()),
            ))
            .await;
        assert!(outcome.resolved);
        assert_eq!(op.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_retry_without_operation_is_unresolved() {
        let strategy = NetworkRetryStrategy::default();
        let outcome = strategy
            .attempt(&ctx(ErrorContext::new("timeout", "p", "op"), None))
            .await;
        assert!(!outcome.resolved);
    }

    #[test]
    fn test_rate_limit_reset_delay() {
        let hinted = ErrorContext::new("429", "p", "op").with_metadata("retry_after_ms", "250");
        assert_eq!(
            RateLimitThrottleStrategy::reset_delay(&hinted),
            Duration::from_millis(250)
        );

        let unhinted = ErrorContext::new("429", "p", "op").with_attempt(3);
        assert_eq!(
            RateLimitThrottleStrategy::reset_delay(&unhinted),
            Duration::from_millis(3000)
        );
    }

    #[tokio::test]
    async fn test_throttle_then_retry() {
        let op = Arc::new(FlakyOperation {
            calls: AtomicUsize::new(0),
            succeed_on: 1,
        });
        let strategy = RateLimitThrottleStrategy::default();
        let error = ErrorContext::new("429 too many requests", "p", "op")
            .with_metadata("retry_after_ms", "5");

        let outcome = strategy.attempt(&ctx(error, Some(op))).await;
        assert!(outcome.resolved);
    }

    #[tokio::test]
    async fn test_data_correction_via_rule() {
        let context = ctx(
            ErrorContext::new("validation failed: bad sku", "p", "op")
                .with_metadata("correction_rule", "fix_sku")
                .with_metadata("record", r#"{"sku": " ab-1 "}"#),
            None,
        );
        context
            .engine
            .register_rule(TransformationRule::new("fix_sku", "upper(trim(input.sku))"));

        let outcome = DataCorrectionStrategy.attempt(&context).await;
        assert!(outcome.resolved);
        assert!(outcome.action.contains("AB-1"));
    }

    #[tokio::test]
    async fn test_circuit_activation_never_resolves() {
        let context = ctx(ErrorContext::new("500 server error", "p", "op"), None);
        let outcome = CircuitBreakerActivationStrategy.attempt(&context).await;
        assert!(!outcome.resolved);
        assert!(outcome.action.contains("recorded failure"));
    }

    #[test]
    fn test_default_chain_order() {
        let chain = default_strategies();
        let ids: Vec<&str> = chain.iter().map(|s| s.id()).collect();
        assert_eq!(
            ids,
            vec![
                "network_retry",
                "rate_limit_throttle",
                "data_correction",
                "circuit_breaker_activation",
                "ai_suggested_action",
                "dead_letter_escalation",
            ]
        );
    }
}
