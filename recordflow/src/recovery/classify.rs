//! Message-pattern error classification.

use async_trait::async_trait;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::ErrorContext;

/// The error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity failures: timeouts, resets, DNS.
    Network,
    /// Throttling by the downstream platform.
    RateLimit,
    /// Credential and permission failures. Non-recoverable.
    Authentication,
    /// The payload was rejected as invalid.
    Validation,
    /// Downstream 5xx-style faults.
    Server,
    /// Nothing matched; candidates for AI-assisted diagnosis.
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Fixed severity scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Transient, expected under load.
    Low,
    /// Needs attention if persistent.
    Medium,
    /// Data or availability impact.
    High,
    /// Security-relevant or blocking.
    Critical,
}

/// The outcome of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// The matched category.
    pub category: ErrorCategory,
    /// Fixed severity for the category.
    pub severity: ErrorSeverity,
    /// Whether automated recovery is worth attempting.
    pub recoverable: bool,
}

impl Classification {
    /// The fixed classification for a category.
    #[must_use]
    pub fn for_category(category: ErrorCategory) -> Self {
        let (severity, recoverable) = match category {
            ErrorCategory::Network => (ErrorSeverity::Medium, true),
            ErrorCategory::RateLimit => (ErrorSeverity::Low, true),
            ErrorCategory::Authentication => (ErrorSeverity::Critical, false),
            ErrorCategory::Validation => (ErrorSeverity::Medium, true),
            ErrorCategory::Server => (ErrorSeverity::High, true),
            ErrorCategory::Unknown => (ErrorSeverity::Medium, true),
        };
        Self {
            category,
            severity,
            recoverable,
        }
    }
}

/// External AI-diagnosis collaborator consulted for `Unknown` errors.
#[async_trait]
pub trait AiDiagnostics: Send + Sync {
    /// Best-effort categorization of an unmatched error.
    async fn categorize(&self, error: &ErrorContext) -> Option<ErrorCategory>;

    /// Suggests a manual or automated action for the failure.
    async fn suggest_action(&self, error: &ErrorContext) -> Option<String>;
}

/// Pattern-based classifier over error message text.
#[derive(Debug)]
pub struct ErrorClassifier {
    sets: Vec<(RegexSet, ErrorCategory)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Builds the classifier with its fixed pattern tables.
    ///
    /// Each table is paired with its category at construction, so a table
    /// that failed to compile would only disable its own category instead
    /// of shifting the ones after it.
    #[must_use]
    pub fn new() -> Self {
        let tables: [(ErrorCategory, &[&str]); 5] = [
            // rate limit is checked before network: "too many requests" et al.
            (
                ErrorCategory::RateLimit,
                &[
                    r"(?i)rate.?limit",
                    r"(?i)too many requests",
                    r"(?i)\b429\b",
                    r"(?i)throttl",
                    r"(?i)quota exceeded",
                ],
            ),
            (
                ErrorCategory::Authentication,
                &[
                    r"(?i)unauthori[sz]ed",
                    r"(?i)authenticat",
                    r"(?i)forbidden",
                    r"(?i)invalid (api.?key|token|credential)",
                    r"(?i)\b401\b",
                    r"(?i)\b403\b",
                    r"(?i)access denied",
                    r"(?i)token expired",
                ],
            ),
            (
                ErrorCategory::Network,
                &[
                    r"(?i)timed? ?out",
                    r"(?i)connection (refused|reset|closed|aborted)",
                    r"(?i)\bECONN",
                    r"(?i)dns",
                    r"(?i)network",
                    r"(?i)socket",
                    r"(?i)unreachable",
                ],
            ),
            (
                ErrorCategory::Validation,
                &[
                    r"(?i)validation",
                    r"(?i)invalid (field|value|format|payload|record)",
                    r"(?i)missing required",
                    r"(?i)schema",
                    r"(?i)\b422\b",
                    r"(?i)malformed",
                ],
            ),
            (
                ErrorCategory::Server,
                &[
                    r"(?i)internal server error",
                    r"(?i)\b5\d\d\b",
                    r"(?i)service unavailable",
                    r"(?i)bad gateway",
                    r"(?i)server error",
                    r"(?i)upstream",
                ],
            ),
        ];

        let sets = tables
            .into_iter()
            .map(|(category, patterns)| {
                let set = RegexSet::new(patterns).unwrap_or_else(|e| {
                    error!(category = %category, error = %e, "pattern table failed to compile");
                    RegexSet::empty()
                });
                (set, category)
            })
            .collect();
        Self { sets }
    }

    /// Classifies by the first matching category table.
    #[must_use]
    pub fn classify(&self, error: &ErrorContext) -> Classification {
        for (set, category) in &self.sets {
            if set.is_match(&error.message) {
                debug!(category = %category, message = %error.message, "classified error");
                return Classification::for_category(*category);
            }
        }
        Classification::for_category(ErrorCategory::Unknown)
    }

    /// Classifies, consulting the AI collaborator for unmatched errors.
    pub async fn classify_with_ai(
        &self,
        error: &ErrorContext,
        ai: Option<&dyn AiDiagnostics>,
    ) -> Classification {
        let classification = self.classify(error);
        if classification.category != ErrorCategory::Unknown {
            return classification;
        }
        if let Some(ai) = ai {
            if let Some(category) = ai.categorize(error).await {
                debug!(category = %category, "AI-assisted classification");
                return Classification::for_category(category);
            }
        }
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(message: &str) -> Classification {
        ErrorClassifier::new().classify(&ErrorContext::new(message, "shopify", "update"))
    }

    #[test]
    fn test_every_table_compiles_and_keeps_precedence() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.sets.len(), 5);
        for (set, category) in &classifier.sets {
            assert!(!set.is_empty(), "empty pattern table for {category}");
        }
        let order: Vec<ErrorCategory> =
            classifier.sets.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            order,
            vec![
                ErrorCategory::RateLimit,
                ErrorCategory::Authentication,
                ErrorCategory::Network,
                ErrorCategory::Validation,
                ErrorCategory::Server,
            ]
        );
    }

    #[test]
    fn test_network_patterns() {
        assert_eq!(
            classify("connection refused by host").category,
            ErrorCategory::Network
        );
        assert_eq!(classify("request timed out").category, ErrorCategory::Network);
        assert_eq!(classify("ECONNRESET").category, ErrorCategory::Network);
    }

    #[test]
    fn test_rate_limit_beats_network() {
        // "Too many requests" mentions neither timeout nor connection, but a
        // combined message must still classify as rate limiting.
        let c = classify("429 Too Many Requests: network busy");
        assert_eq!(c.category, ErrorCategory::RateLimit);
        assert!(c.recoverable);
        assert_eq!(c.severity, ErrorSeverity::Low);
    }

    #[test]
    fn test_authentication_is_non_recoverable() {
        let c = classify("401 Unauthorized: token expired");
        assert_eq!(c.category, ErrorCategory::Authentication);
        assert!(!c.recoverable);
        assert_eq!(c.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_validation_and_server() {
        assert_eq!(
            classify("missing required field 'sku'").category,
            ErrorCategory::Validation
        );
        assert_eq!(
            classify("502 Bad Gateway").category,
            ErrorCategory::Server
        );
    }

    #[test]
    fn test_unmatched_is_unknown() {
        let c = classify("wibble happened");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(c.recoverable);
    }

    #[tokio::test]
    async fn test_ai_fallback_for_unknown() {
        struct FixedAi;

        #[async_trait]
        impl AiDiagnostics for FixedAi {
            async fn categorize(&self, _error: &ErrorContext) -> Option<ErrorCategory> {
                Some(ErrorCategory::Server)
            }
            async fn suggest_action(&self, _error: &ErrorContext) -> Option<String> {
                None
            }
        }

        let classifier = ErrorClassifier::new();
        let error = ErrorContext::new("wibble happened", "p", "op");
        let c = classifier.classify_with_ai(&error, Some(&FixedAi)).await;
        assert_eq!(c.category, ErrorCategory::Server);

        // Matched errors never consult the collaborator's answer.
        let matched = ErrorContext::new("connection refused", "p", "op");
        let c = classifier.classify_with_ai(&matched, Some(&FixedAi)).await;
        assert_eq!(c.category, ErrorCategory::Network);
    }
}
