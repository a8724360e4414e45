//! Audit log - bounded, append-only record of every execution attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::info;

use crate::core::{Language, ResourceUsage};

/// Default number of retained entries
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// One execution attempt, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub user_id: String,
    /// Code exactly as submitted, before sanitization
    pub code: String,
    pub language: Language,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_used: Option<ResourceUsage>,
}

/// Ring buffer of audit entries; the oldest entry is evicted on overflow
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: RwLock<VecDeque<AuditLogEntry>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        AuditLog::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    /// Create an empty log retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AuditLog {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an entry and emit it as an audit event
    pub async fn append(&self, entry: AuditLogEntry) {
        info!(
            target: "execbox::audit",
            user_id = %entry.user_id,
            language = %entry.language,
            success = entry.success,
            elapsed_ms = entry.execution_time_ms,
            code_bytes = entry.code.len(),
            error = entry.error.as_deref().unwrap_or(""),
            "Code execution"
        );

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries for one user, oldest first
    pub async fn for_user(&self, user_id: &str) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Every retained entry, oldest first. Callers must gate this behind an
    /// administrative check.
    pub async fn all(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str, code: &str) -> AuditLogEntry {
        AuditLogEntry {
            user_id: user.to_string(),
            code: code.to_string(),
            language: Language::JavaScript,
            execution_time_ms: 12,
            success: true,
            error: None,
            timestamp: Utc::now(),
            resources_used: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_filter_by_user() {
        let log = AuditLog::default();
        log.append(entry("alice", "1")).await;
        log.append(entry("bob", "2")).await;
        log.append(entry("alice", "3")).await;

        let alice = log.for_user("alice").await;
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].code, "1");
        assert_eq!(alice[1].code, "3");
        assert!(log.for_user("carol").await.is_empty());
        assert_eq!(log.all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.append(entry("alice", &i.to_string())).await;
        }

        let codes: Vec<String> = log.all().await.into_iter().map(|e| e.code).collect();
        assert_eq!(codes, vec!["2", "3", "4"]);
        assert_eq!(log.len().await, 3);
    }

    #[test]
    fn test_entry_serialization_omits_empty_fields() {
        let json = serde_json::to_value(entry("alice", "x")).unwrap();
        assert_eq!(json["language"], "javascript");
        assert!(json.get("error").is_none());
        assert!(json.get("resources_used").is_none());
    }
}
