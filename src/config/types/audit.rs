//! Audit log configuration types

use serde::{Deserialize, Serialize};

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Entries kept in memory before the oldest is evicted
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            capacity: default_audit_capacity(),
        }
    }
}

fn default_audit_capacity() -> usize {
    crate::audit::DEFAULT_AUDIT_CAPACITY
}
