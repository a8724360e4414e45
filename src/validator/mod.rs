//! Validator module - Pre-execution screening of submitted code
//!
//! Three pure operations, all cheap enough to run before any sandbox exists:
//! - `sanitize_code`: strip comments, trim
//! - `validate_code_size`: byte and line ceilings
//! - `validate_code`: denylist scan plus import allow-list

pub mod rules;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::core::Language;

pub use rules::{RuleSet, RuleSpec, SecurityRule, DEFAULT_ALLOWED_IMPORTS, DEFAULT_RULES};

/// Largest accepted code size in bytes
pub const MAX_CODE_BYTES: usize = 100_000;

/// Largest accepted number of lines
pub const MAX_CODE_LINES: usize = 5_000;

/// Reason reported when any security rule matched
pub const DANGEROUS_PATTERNS_REASON: &str = "Code contains potentially dangerous patterns";

/// Outcome of a validation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the code may run
    pub valid: bool,
    /// Why it may not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every rule that matched, in table order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        ValidationResult {
            valid: true,
            reason: None,
            violations: Vec::new(),
        }
    }

    pub fn invalid(reason: impl Into<String>, violations: Vec<String>) -> Self {
        ValidationResult {
            valid: false,
            reason: Some(reason.into()),
            violations,
        }
    }
}

fn comment_regex() -> &'static Regex {
    static COMMENTS: OnceLock<Regex> = OnceLock::new();
    // Block comments first so a `//` inside one cannot hide its terminator
    COMMENTS.get_or_init(|| {
        Regex::new(r"/\*[\s\S]*?\*/|//[^\n]*").expect("comment pattern compiles")
    })
}

fn import_regex() -> &'static Regex {
    static IMPORTS: OnceLock<Regex> = OnceLock::new();
    IMPORTS.get_or_init(|| {
        Regex::new(
            r#"import\s+.*?\s+from\s+['"]([^'"]+)['"]|import\s+['"]([^'"]+)['"]|import\s*\(\s*['"]([^'"]+)['"]\s*\)|require\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        )
        .expect("import pattern compiles")
    })
}

/// Strip line and block comments and trim surrounding whitespace
pub fn sanitize_code(code: &str) -> String {
    comment_regex().replace_all(code, "").trim().to_string()
}

/// Module specifiers referenced by import/require forms, in source order
pub fn extract_imports(code: &str) -> Vec<String> {
    import_regex()
        .captures_iter(code)
        .filter_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Screens code against size ceilings and a rule table
#[derive(Debug, Clone)]
pub struct CodeValidator {
    rules: RuleSet,
    max_bytes: usize,
    max_lines: usize,
}

impl Default for CodeValidator {
    fn default() -> Self {
        CodeValidator::new(RuleSet::builtin().clone())
    }
}

impl CodeValidator {
    /// Create a validator over `rules` with the standard size ceilings
    pub fn new(rules: RuleSet) -> Self {
        CodeValidator {
            rules,
            max_bytes: MAX_CODE_BYTES,
            max_lines: MAX_CODE_LINES,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Strip comments and trim
    pub fn sanitize(&self, code: &str) -> String {
        sanitize_code(code)
    }

    /// Reject code over the byte or line ceiling
    pub fn validate_size(&self, code: &str) -> ValidationResult {
        if code.len() > self.max_bytes {
            return ValidationResult::invalid(
                format!("Code exceeds maximum size of {} bytes", self.max_bytes),
                Vec::new(),
            );
        }

        let lines = code.split('\n').count();
        if lines > self.max_lines {
            return ValidationResult::invalid(
                format!("Code exceeds maximum of {} lines", self.max_lines),
                Vec::new(),
            );
        }

        ValidationResult::valid()
    }

    /// Scan for denylisted constructs and unauthorized imports.
    ///
    /// All violations are collected; nothing short-circuits.
    pub fn validate(&self, code: &str, language: Language) -> ValidationResult {
        let mut violations: Vec<String> = self
            .rules
            .rules()
            .iter()
            .filter(|rule| rule.matches(code))
            .map(|rule| rule.description().to_string())
            .collect();

        for module in extract_imports(code) {
            if !self.rules.is_import_allowed(&module) {
                violations.push(format!("Unauthorized module import: {}", module));
            }
        }

        if violations.is_empty() {
            ValidationResult::valid()
        } else {
            debug!(%language, count = violations.len(), "Code rejected by security screen");
            ValidationResult::invalid(DANGEROUS_PATTERNS_REASON, violations)
        }
    }
}

/// Size check with the standard ceilings
pub fn validate_code_size(code: &str) -> ValidationResult {
    CodeValidator::default().validate_size(code)
}

/// Security check against the built-in rule table
pub fn validate_code(code: &str, language: Language) -> ValidationResult {
    CodeValidator::default().validate(code, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_comments() {
        let code = "// header\nconst a = 1; // trailing\n/* block\n spanning */const b = 2;\n  ";
        assert_eq!(sanitize_code(code), "const a = 1; \nconst b = 2;");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "a//* x *//b",
            "x/ /* c */ / y",
            "x//*\n*/y",
            "/* a // b */ c",
            "  /* only */  ",
            "const url = 'a'; /* x */ // y\n z",
            "s = 1 /* unterminated",
        ];
        for sample in samples {
            let once = sanitize_code(sample);
            assert_eq!(sanitize_code(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_sanitize_keeps_code_tokens() {
        let code = "const total = items.length; /* count */\nconsole.log(total);";
        let tokens = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();
        assert_eq!(
            tokens(&sanitize_code(code)),
            tokens("const total = items.length;\nconsole.log(total);")
        );
    }

    #[test]
    fn test_size_byte_ceiling() {
        let code = "a".repeat(MAX_CODE_BYTES + 1);
        let result = validate_code_size(&code);
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("100000 bytes"));

        assert!(validate_code_size(&"a".repeat(MAX_CODE_BYTES)).valid);
    }

    #[test]
    fn test_size_line_ceiling() {
        let code = "x\n".repeat(MAX_CODE_LINES);
        let result = validate_code_size(&code);
        assert!(!result.valid);
        assert_eq!(
            result.reason.as_deref(),
            Some("Code exceeds maximum of 5000 lines")
        );

        let ok = vec!["x"; MAX_CODE_LINES].join("\n");
        assert!(validate_code_size(&ok).valid);
    }

    #[test]
    fn test_clean_code_passes() {
        let code = "import { getTasks } from '/servers/tasks';\nconst t = await getTasks({});\nconsole.log(t.length);";
        let result = validate_code(code, Language::TypeScript);
        assert!(result.valid, "{:?}", result.violations);
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        let result = validate_code("PROCESS.EXIT(0)", Language::JavaScript);
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some(DANGEROUS_PATTERNS_REASON));
        assert_eq!(result.violations, vec!["Process termination"]);
    }

    #[test]
    fn test_all_violations_reported() {
        let code = "const cp = require('child_process');\neval('1+1');\nglobal.x = 1;";
        let result = validate_code(code, Language::JavaScript);
        assert!(!result.valid);
        assert!(result.violations.contains(&"Child process spawning".to_string()));
        assert!(result.violations.contains(&"Dynamic code evaluation".to_string()));
        assert!(result.violations.contains(&"Global object access".to_string()));
        assert!(result
            .violations
            .contains(&"Unauthorized module import: child_process".to_string()));
    }

    #[test]
    fn test_filesystem_require_reports_both_rules() {
        let result = validate_code("const fs = require('fs')", Language::JavaScript);
        assert_eq!(
            result.violations,
            vec![
                "Filesystem access (use virtual fs instead)".to_string(),
                "Unauthorized module import: fs".to_string(),
            ]
        );
    }

    #[test]
    fn test_import_forms() {
        let code = "import axios from 'axios';\nimport 'side-effect';\nconst m = await import(\"lodash\");\nimport { x } from './local';";
        assert_eq!(
            extract_imports(code),
            vec!["axios", "side-effect", "lodash", "./local"]
        );

        let result = validate_code(code, Language::TypeScript);
        assert_eq!(result.violations.len(), 3);
    }

    #[test]
    fn test_allowed_virtual_fs_import() {
        let result = validate_code(
            "import { readFile } from 'fs/promises';",
            Language::TypeScript,
        );
        assert!(result.valid);
    }

    #[test]
    fn test_obfuscation_is_not_detected() {
        // Lexical screening only: split identifiers slip through
        let result = validate_code("const p = globalThis['pro' + 'cess'];", Language::JavaScript);
        assert!(result.valid);
    }
}
