//! Validator configuration types

use serde::{Deserialize, Serialize};

use crate::validator::RuleSpec;

/// Validator extensions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Rules appended to the built-in denylist
    #[serde(default)]
    pub extra_rules: Vec<RuleSpec>,
    /// Module prefixes appended to the import allow-list
    #[serde(default)]
    pub extra_allowed_imports: Vec<String>,
}
