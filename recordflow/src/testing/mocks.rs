//! Mock collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::RecordflowError;
use crate::pipeline::stages::{CustomLogic, EnrichmentSource};
use crate::pipeline::{DataProcessingContext, Record};
use crate::recovery::{AiDiagnostics, ErrorCategory, ErrorContext, PlatformOperation};

/// An enrichment source returning a fixed payload, recording calls.
pub struct MockEnrichmentSource {
    payload: Record,
    fail_with: Mutex<Option<String>>,
    call_count: Mutex<usize>,
}

impl MockEnrichmentSource {
    /// Creates a source that always returns `payload`.
    #[must_use]
    pub fn new(payload: Record) -> Self {
        Self {
            payload,
            fail_with: Mutex::new(None),
            call_count: Mutex::new(0),
        }
    }

    /// Makes every subsequent fetch fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    /// How many times fetch was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl EnrichmentSource for MockEnrichmentSource {
    async fn fetch(&self, _record: &Record) -> Result<Record, RecordflowError> {
        *self.call_count.lock() += 1;
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(RecordflowError::Internal(message));
        }
        Ok(self.payload.clone())
    }
}

/// A custom-logic handler applying a closure to the batch.
pub struct MockCustomLogic {
    #[allow(clippy::type_complexity)]
    handler: Arc<dyn Fn(Vec<Record>) -> Result<Vec<Record>, RecordflowError> + Send + Sync>,
    call_count: Mutex<usize>,
}

impl MockCustomLogic {
    /// Creates a handler around `f`.
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, RecordflowError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(f),
            call_count: Mutex::new(0),
        }
    }

    /// A handler that passes the batch through unchanged.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(Ok)
    }

    /// How many times process was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl CustomLogic for MockCustomLogic {
    async fn process(
        &self,
        records: Vec<Record>,
        _ctx: &DataProcessingContext,
    ) -> Result<Vec<Record>, RecordflowError> {
        *self.call_count.lock() += 1;
        (self.handler)(records)
    }
}

/// A platform operation that fails a configured number of times before
/// succeeding.
pub struct MockPlatformOperation {
    failures_before_success: Mutex<usize>,
    call_count: Mutex<usize>,
    error_message: String,
}

impl MockPlatformOperation {
    /// Always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::failing_times(0, "unused")
    }

    /// Fails `failures` times with `message`, then succeeds.
    #[must_use]
    pub fn failing_times(failures: usize, message: impl Into<String>) -> Self {
        Self {
            failures_before_success: Mutex::new(failures),
            call_count: Mutex::new(0),
            error_message: message.into(),
        }
    }

    /// How many times execute was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl PlatformOperation for MockPlatformOperation {
    async fn execute(&self) -> Result<(), RecordflowError> {
        *self.call_count.lock() += 1;
        let mut remaining = self.failures_before_success.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RecordflowError::Internal(self.error_message.clone()));
        }
        Ok(())
    }
}

/// An AI collaborator returning canned answers.
#[derive(Default)]
pub struct MockAiDiagnostics {
    category: Option<ErrorCategory>,
    suggestion: Option<String>,
}

impl MockAiDiagnostics {
    /// Returns `category` for every unknown error.
    #[must_use]
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Returns `suggestion` for every error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[async_trait]
impl AiDiagnostics for MockAiDiagnostics {
    async fn categorize(&self, _error: &ErrorContext) -> Option<ErrorCategory> {
        self.category
    }

    async fn suggest_action(&self, _error: &ErrorContext) -> Option<String> {
        self.suggestion.clone()
    }
}
