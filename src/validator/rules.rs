//! Security rule table
//!
//! Rules are data: a pattern and the human-readable description reported
//! when it matches. The scanning engine in `validator::mod` never names a
//! specific construct, so operators can extend the table from configuration.
//!
//! Matching is lexical. String concatenation, computed property access or
//! alternate encodings defeat it; a syntax-tree screen would not be.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::Result;

/// Default denylist, in reporting order
pub const DEFAULT_RULES: &[(&str, &str)] = &[
    (r"process\.exit", "Process termination"),
    (r"process\.kill", "Process killing"),
    (
        r#"require\s*\(\s*['"]child_process['"]"#,
        "Child process spawning",
    ),
    (
        r#"require\s*\(\s*['"]fs['"]"#,
        "Filesystem access (use virtual fs instead)",
    ),
    (r#"require\s*\(\s*['"]net['"]"#, "Network access"),
    (r#"require\s*\(\s*['"]http['"]"#, "HTTP access"),
    (r#"require\s*\(\s*['"]https['"]"#, "HTTPS access"),
    (r"\beval\s*\(", "Dynamic code evaluation"),
    (r"Function\s*\(", "Dynamic function construction"),
    (r"new\s+Function", "Dynamic function construction"),
    (r#"require\s*\(\s*['"]vm['"]"#, "VM module access"),
    (r#"require\s*\(\s*['"]vm2['"]"#, "VM2 module access"),
    (r"\bglobal\.", "Global object access"),
    (r"\bprocess\s*\[", "Process object manipulation"),
];

/// Module prefixes code may import besides relative paths
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    // Virtual filesystem backed by the sandbox tmpfs
    "fs/promises",
    // Generated tool bindings
    "/servers/",
];

/// A rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Regular expression, matched case-insensitively
    pub pattern: String,
    /// Reported when the pattern matches
    pub description: String,
}

/// A compiled denylist rule
#[derive(Debug, Clone)]
pub struct SecurityRule {
    pattern: Regex,
    description: String,
}

impl SecurityRule {
    /// Compile a rule; patterns are case-insensitive
    pub fn new(pattern: &str, description: impl Into<String>) -> Result<Self> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(SecurityRule {
            pattern,
            description: description.into(),
        })
    }

    /// Whether the rule matches anywhere in `code`
    pub fn matches(&self, code: &str) -> bool {
        self.pattern.is_match(code)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Ordered denylist plus the import allow-list
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<SecurityRule>,
    allowed_imports: Vec<String>,
}

impl RuleSet {
    /// Build the default table with additional rules and allow-listed
    /// prefixes appended
    pub fn with_extensions(extra_rules: &[RuleSpec], extra_imports: &[String]) -> Result<Self> {
        let mut rules = DEFAULT_RULES
            .iter()
            .map(|(pattern, description)| SecurityRule::new(pattern, *description))
            .collect::<Result<Vec<_>>>()?;

        for spec in extra_rules {
            rules.push(SecurityRule::new(&spec.pattern, spec.description.clone())?);
        }

        let allowed_imports = DEFAULT_ALLOWED_IMPORTS
            .iter()
            .map(|s| s.to_string())
            .chain(extra_imports.iter().cloned())
            .collect();

        Ok(RuleSet {
            rules,
            allowed_imports,
        })
    }

    /// Shared instance of the built-in table
    pub fn builtin() -> &'static RuleSet {
        static BUILTIN: OnceLock<RuleSet> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            RuleSet::with_extensions(&[], &[]).expect("built-in security rules compile")
        })
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    /// Whether `module` may be imported: relative, or under an allowed prefix
    pub fn is_import_allowed(&self, module: &str) -> bool {
        module.starts_with('.')
            || self
                .allowed_imports
                .iter()
                .any(|prefix| module.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_compiles_in_order() {
        let rules = RuleSet::builtin().rules();
        assert_eq!(rules.len(), DEFAULT_RULES.len());
        assert_eq!(rules[0].description(), "Process termination");
    }

    #[test]
    fn test_rules_are_case_insensitive() {
        let rule = SecurityRule::new(r"process\.exit", "Process termination").unwrap();
        assert!(rule.matches("PROCESS.EXIT(1)"));
        assert!(!rule.matches("processexit"));
    }

    #[test]
    fn test_extensions_append() {
        let extra = vec![RuleSpec {
            pattern: r"\bWebAssembly\b".to_string(),
            description: "WebAssembly access".to_string(),
        }];
        let set = RuleSet::with_extensions(&extra, &["@internal/".to_string()]).unwrap();

        assert_eq!(set.rules().len(), DEFAULT_RULES.len() + 1);
        assert_eq!(set.rules().last().unwrap().description(), "WebAssembly access");
        assert!(set.is_import_allowed("@internal/tasks"));
    }

    #[test]
    fn test_invalid_extension_pattern_is_config_error() {
        let extra = vec![RuleSpec {
            pattern: "(unclosed".to_string(),
            description: "broken".to_string(),
        }];
        let err = RuleSet::with_extensions(&extra, &[]).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_import_allow_list() {
        let set = RuleSet::builtin();
        assert!(set.is_import_allowed("./helpers"));
        assert!(set.is_import_allowed("../shared/util"));
        assert!(set.is_import_allowed("fs/promises"));
        assert!(set.is_import_allowed("/servers/tasks/getTasks"));
        assert!(!set.is_import_allowed("fs"));
        assert!(!set.is_import_allowed("axios"));
    }
}
