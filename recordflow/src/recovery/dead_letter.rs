//! Dead-letter queue for failures that exhausted automated recovery.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::system::RecoveryAttempt;
use super::ErrorContext;
use crate::errors::RecordflowError;
use crate::utils::{generate_uuid, now, Timestamp};

/// Lifecycle of a dead-letter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    /// Awaiting manual disposition.
    Pending,
    /// An operator resolved it.
    Resolved,
    /// An operator marked it unresolvable.
    Unresolvable,
    /// Escalated to a higher support tier.
    Escalated,
}

/// Triage priority, derived from error content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterPriority {
    /// Everything else.
    Low,
    /// Repeated attempts or server faults.
    Medium,
    /// Data-integrity risks.
    High,
    /// Authentication and security failures.
    Critical,
}

/// Derives the triage priority from the failure's content.
///
/// Authentication/security wording is critical, data-integrity wording is
/// high, more than two attempts or server faults are medium, the rest low.
#[must_use]
pub fn derive_priority(error: &ErrorContext) -> DeadLetterPriority {
    let message = error.message.to_lowercase();
    let has_any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has_any(&[
        "auth",
        "unauthorized",
        "forbidden",
        "credential",
        "token",
        "security",
        "permission",
    ]) {
        return DeadLetterPriority::Critical;
    }
    if has_any(&["integrity", "corrupt", "data loss", "inconsistent", "duplicate key"]) {
        return DeadLetterPriority::High;
    }
    if error.attempt > 2 || has_any(&["server error", "internal server", "unavailable", "5xx"]) {
        return DeadLetterPriority::Medium;
    }
    DeadLetterPriority::Low
}

/// One failure awaiting manual triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique entry id.
    pub id: String,
    /// The failure as it arrived at the recovery system.
    pub error: ErrorContext,
    /// Every recovery attempt made before escalation.
    pub attempts: Vec<RecoveryAttempt>,
    /// Current lifecycle status.
    pub status: DeadLetterStatus,
    /// Derived triage priority.
    pub priority: DeadLetterPriority,
    /// Operator note recorded at resolution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// When the entry was created.
    pub created_at: Timestamp,
    /// When the entry last changed.
    pub updated_at: Timestamp,
}

impl DeadLetterEntry {
    /// Creates a pending entry with derived priority.
    #[must_use]
    pub fn pending(error: ErrorContext, attempts: Vec<RecoveryAttempt>) -> Self {
        let priority = derive_priority(&error);
        let at = now();
        Self {
            id: generate_uuid(),
            error,
            attempts,
            status: DeadLetterStatus::Pending,
            priority,
            resolution: None,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Persistence collaborator for dead-letter entries.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persists a new entry.
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), RecordflowError>;

    /// Replaces an existing entry.
    async fn update(&self, entry: &DeadLetterEntry) -> Result<(), RecordflowError>;

    /// Loads an entry by id.
    async fn load(&self, id: &str) -> Result<Option<DeadLetterEntry>, RecordflowError>;

    /// Lists entries with the given status, oldest first.
    async fn list_by_status(
        &self,
        status: DeadLetterStatus,
    ) -> Result<Vec<DeadLetterEntry>, RecordflowError>;
}

/// Map-backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<HashMap<String, DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many entries are stored, across all statuses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<(), RecordflowError> {
        self.entries
            .write()
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<(), RecordflowError> {
        let mut entries = self.entries.write();
        if !entries.contains_key(&entry.id) {
            return Err(RecordflowError::Store(format!(
                "dead-letter entry '{}' not found",
                entry.id
            )));
        }
        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<DeadLetterEntry>, RecordflowError> {
        Ok(self.entries.read().get(id).cloned())
    }

    async fn list_by_status(
        &self,
        status: DeadLetterStatus,
    ) -> Result<Vec<DeadLetterEntry>, RecordflowError> {
        let mut found: Vec<DeadLetterEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }
}
