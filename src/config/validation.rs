//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;
use crate::validator::RuleSet;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_sandbox_config(config, result);
    result = validate_validator_config(config, result);
    result = validate_audit_config(config, result);
    result = validate_gateway_config(config, result);

    result
}

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.image.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new("sandbox.image", "No sandbox image specified")
                .with_suggestion("Set sandbox.image or EXECBOX_IMAGE to an image providing node and tsx"),
        );
    }

    if sandbox.pids_limit <= 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.pids_limit", "Process limit must be positive")
                .with_suggestion("Use the default of 100"),
        );
    }

    if sandbox.tmp_size_mb == 0 || sandbox.workspace_size_mb == 0 {
        result = result.with_error(ValidationIssue::new(
            "sandbox.tmp_size_mb",
            "Scratch and workspace mounts must have a positive size",
        ));
    }

    let user = sandbox.user.split(':').next().unwrap_or_default();
    if user.is_empty() || user == "root" || user == "0" {
        result = result.with_error(
            ValidationIssue::new("sandbox.user", "Sandboxed code must not run as root")
                .with_suggestion("Use a dedicated unprivileged user such as sandbox:sandbox"),
        );
    }

    if sandbox.label.is_empty() {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.label",
            "Empty label: orphaned sandboxes cannot be reaped",
        ));
    }

    result
}

fn validate_validator_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if let Err(e) = RuleSet::with_extensions(
        &config.validator.extra_rules,
        &config.validator.extra_allowed_imports,
    ) {
        result = result.with_error(
            ValidationIssue::new("validator.extra_rules", e.to_string())
                .with_suggestion("Fix the regular expression syntax of the extra rule"),
        );
    }

    if config
        .validator
        .extra_allowed_imports
        .iter()
        .any(|prefix| prefix.is_empty())
    {
        result = result.with_error(ValidationIssue::new(
            "validator.extra_allowed_imports",
            "An empty prefix would allow every import",
        ));
    }

    result
}

fn validate_audit_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.audit.capacity == 0 {
        result = result.with_error(
            ValidationIssue::new("audit.capacity", "Audit log capacity must be positive")
                .with_suggestion("Use the default of 1000"),
        );
    }

    result
}

fn validate_gateway_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.gateway.admin_token.is_none() {
        result = result.with_warning(
            ValidationIssue::new(
                "gateway.admin_token",
                "No admin token configured. The global audit endpoint will reject all requests.",
            )
            .with_suggestion("Set EXECBOX_ADMIN_TOKEN"),
        );
    }

    result
}
