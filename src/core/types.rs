//! Core types used across the engine

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default lifetime of a sandbox before forced cleanup
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Largest sandbox lifetime a caller may request
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Default memory ceiling per sandbox
pub const DEFAULT_MAX_MEMORY_MB: u64 = 512;

/// Smallest memory ceiling the container engine accepts
pub const MIN_MEMORY_MB: u64 = 6;

/// Largest memory ceiling a caller may request
pub const MAX_MEMORY_MB: u64 = 8 * 1024;

/// Default share of one CPU per sandbox
pub const DEFAULT_MAX_CPU_FRACTION: f64 = 0.5;

/// Smallest CPU share; one percent of the 100ms accounting period is the
/// engine's 1ms minimum quota
pub const MIN_CPU_FRACTION: f64 = 0.01;

/// Largest CPU share a caller may request
pub const MAX_CPU_FRACTION: f64 = 4.0;

/// Interpreted dialects the sandbox image can run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// JavaScript (Node.js)
    JavaScript,
    /// TypeScript (run through tsx)
    #[default]
    TypeScript,
}

impl Language {
    /// File name the code is written to inside the sandbox workspace
    pub fn file_name(&self) -> &'static str {
        match self {
            Language::JavaScript => "code.js",
            Language::TypeScript => "code.ts",
        }
    }

    /// Interpreter command for a script at `path`
    pub fn command(&self, path: &str) -> Vec<String> {
        match self {
            Language::JavaScript => vec!["node".to_string(), path.to_string()],
            Language::TypeScript => vec!["npx".to_string(), "tsx".to_string(), path.to_string()],
        }
    }
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported language: {}. Supported: javascript, typescript",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
        }
    }
}

/// Request to execute code in a sandbox
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,
    /// Dialect of the code
    #[serde(default)]
    pub language: Language,
    /// Owner of the execution
    pub user_id: String,
    /// Opaque token handed to in-sandbox tool calls
    #[serde(alias = "token")]
    pub auth_token: SecretString,
    /// Lifetime of the sandbox before forced cleanup
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Memory ceiling (swap mirrors it)
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Share of one CPU
    #[serde(default = "default_max_cpu_fraction")]
    pub max_cpu_fraction: f64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_memory_mb() -> u64 {
    DEFAULT_MAX_MEMORY_MB
}

fn default_max_cpu_fraction() -> f64 {
    DEFAULT_MAX_CPU_FRACTION
}

impl ExecutionRequest {
    /// Create a new execution request with default limits
    pub fn new(
        code: impl Into<String>,
        language: Language,
        user_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        ExecutionRequest {
            code: code.into(),
            language,
            user_id: user_id.into(),
            auth_token: SecretString::from(auth_token.into()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_cpu_fraction: DEFAULT_MAX_CPU_FRACTION,
        }
    }

    /// Set the sandbox lifetime
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the memory ceiling
    pub fn with_max_memory_mb(mut self, max_memory_mb: u64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self
    }

    /// Set the CPU share
    pub fn with_max_cpu_fraction(mut self, fraction: f64) -> Self {
        self.max_cpu_fraction = fraction;
        self
    }

    /// Check the request invariants: non-empty code and owner, limits in range
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(Error::InvalidInput("Code must not be empty".to_string()));
        }
        if self.user_id.is_empty() {
            return Err(Error::InvalidInput("User ID must not be empty".to_string()));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::InvalidInput(format!(
                "Timeout must be between 1 and {} ms",
                MAX_TIMEOUT_MS
            )));
        }
        self.sandbox_options().validate()
    }

    /// Sandbox options derived from this request
    pub fn sandbox_options(&self) -> SandboxOptions {
        SandboxOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_memory_mb: self.max_memory_mb,
            max_cpu_fraction: self.max_cpu_fraction,
        }
    }
}

/// Resource limits applied when creating a sandbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SandboxOptions {
    /// Lifetime before the forced-cleanup timer fires
    pub timeout: Duration,
    /// Memory ceiling in MiB
    pub max_memory_mb: u64,
    /// Share of one CPU
    pub max_cpu_fraction: f64,
}

impl SandboxOptions {
    /// Reject limits the container engine would read as "unlimited" or
    /// could not represent
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&self.max_memory_mb) {
            return Err(Error::InvalidInput(format!(
                "Memory limit must be between {} and {} MB",
                MIN_MEMORY_MB, MAX_MEMORY_MB
            )));
        }
        if !(MIN_CPU_FRACTION..=MAX_CPU_FRACTION).contains(&self.max_cpu_fraction) {
            return Err(Error::InvalidInput(format!(
                "CPU limit must be between {} and {}",
                MIN_CPU_FRACTION, MAX_CPU_FRACTION
            )));
        }
        Ok(())
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        SandboxOptions {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_cpu_fraction: DEFAULT_MAX_CPU_FRACTION,
        }
    }
}

/// Resource usage sampled from a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage as a percentage of host capacity
    pub cpu_percent: f64,
    /// Memory usage in MiB
    pub memory_mb: f64,
    /// Block I/O in MiB
    pub disk_io_mb: f64,
}

/// Result of a code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution was successful
    pub success: bool,
    /// Standard output, trimmed
    pub output: String,
    /// Error text (stderr, validation or infrastructure failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time of the whole call
    pub execution_time_ms: u64,
    /// Resource usage, when statistics were available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_used: Option<ResourceUsage>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(output: String, execution_time_ms: u64) -> Self {
        ExecutionResult {
            success: true,
            output,
            error: None,
            execution_time_ms,
            resources_used: None,
        }
    }

    /// Create a failure result with no output
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        ExecutionResult {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms,
            resources_used: None,
        }
    }

    /// Attach resource usage
    pub fn with_resources(mut self, resources: Option<ResourceUsage>) -> Self {
        self.resources_used = resources;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_language_parsing() {
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("TypeScript".parse::<Language>().unwrap(), Language::TypeScript);
        assert!("python".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_commands() {
        assert_eq!(
            Language::JavaScript.command("/workspace/code.js"),
            vec!["node", "/workspace/code.js"]
        );
        assert_eq!(Language::TypeScript.file_name(), "code.ts");
        assert_eq!(Language::TypeScript.command("/w/code.ts")[1], "tsx");
    }

    #[test]
    fn test_request_defaults_from_json() {
        let req: ExecutionRequest = serde_json::from_str(
            r#"{"code": "console.log(1)", "user_id": "u1", "token": "t0k"}"#,
        )
        .unwrap();

        assert_eq!(req.language, Language::TypeScript);
        assert_eq!(req.timeout_ms, 30_000);
        assert_eq!(req.max_memory_mb, 512);
        assert_eq!(req.max_cpu_fraction, 0.5);
        assert_eq!(req.auth_token.expose_secret(), "t0k");
    }

    #[test]
    fn test_request_validation() {
        let ok = ExecutionRequest::new("console.log(1)", Language::JavaScript, "u1", "t");
        assert!(ok.validate().is_ok());

        let empty = ExecutionRequest::new("   ", Language::JavaScript, "u1", "t");
        assert!(empty.validate().is_err());

        let no_memory = ok.clone().with_max_memory_mb(0);
        assert!(no_memory.validate().is_err());

        let no_cpu = ok.clone().with_max_cpu_fraction(0.0);
        assert!(no_cpu.validate().is_err());

        let nan_cpu = ok.clone().with_max_cpu_fraction(f64::NAN);
        assert!(nan_cpu.validate().is_err());

        let too_long = ok.with_timeout_ms(MAX_TIMEOUT_MS + 1);
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let req = ExecutionRequest::new("x", Language::JavaScript, "u1", "super-secret");
        assert!(!format!("{:?}", req).contains("super-secret"));
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let result = ExecutionResult::success("hi".to_string(), 12);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["output"], "hi");
        assert!(json.get("error").is_none());
        assert!(json.get("resources_used").is_none());
    }

    #[test]
    fn test_limits_outside_engine_range_are_rejected() {
        let ok = ExecutionRequest::new("console.log(1)", Language::JavaScript, "u1", "t");

        let tiny_cpu = ok.clone().with_max_cpu_fraction(0.000001);
        assert!(matches!(tiny_cpu.validate(), Err(Error::InvalidInput(_))));

        let huge_cpu = ok.clone().with_max_cpu_fraction(1e300);
        assert!(matches!(huge_cpu.validate(), Err(Error::InvalidInput(_))));

        let huge_memory = ok.clone().with_max_memory_mb(1 << 44);
        assert!(matches!(huge_memory.validate(), Err(Error::InvalidInput(_))));

        let tiny_memory = ok.clone().with_max_memory_mb(1);
        assert!(tiny_memory.validate().is_err());

        let edges = ok
            .with_max_cpu_fraction(MIN_CPU_FRACTION)
            .with_max_memory_mb(MAX_MEMORY_MB);
        assert!(edges.validate().is_ok());
    }
}
