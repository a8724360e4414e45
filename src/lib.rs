//! # execbox
//!
//! Runs untrusted JavaScript and TypeScript inside short-lived, isolated
//! Docker containers.
//!
//! ## Features
//!
//! - **Static Screening:** Size ceilings plus a configurable denylist and import allow-list
//! - **Hardened Sandboxes:** No network, read-only root, dropped capabilities, memory/CPU/pid limits
//! - **Guaranteed Teardown:** Idempotent cleanup racing a forced-cleanup timer
//! - **Audit Trail:** Bounded per-process log of every execution attempt
//! - **HTTP Gateway:** axum front end for execution and audit queries

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod sandbox;
pub mod telemetry;
pub mod tools;
pub mod validator;

pub use audit::{AuditLog, AuditLogEntry};
pub use config::Config;
pub use core::{ExecutionRequest, ExecutionResult, Language, ResourceUsage, SandboxOptions};
pub use error::{Error, Result};
pub use orchestrator::ExecutionOrchestrator;
pub use sandbox::ContainerSandboxManager;
pub use validator::{validate_code, validate_code_size, CodeValidator, ValidationResult};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
