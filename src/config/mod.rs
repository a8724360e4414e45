//! Configuration module
//!
//! - types/mod.rs: Core configuration types (Config, GatewayConfig, LoggingConfig)
//! - types/sandbox.rs: Sandbox image, identity and isolation settings
//! - types/validator.rs: Validator extensions
//! - types/audit.rs: Audit log configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, GatewayConfig, LoggingConfig};

// Re-export component types
pub use types::audit::AuditConfig;
pub use types::sandbox::SandboxConfig;
pub use types::validator::ValidatorConfig;

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
