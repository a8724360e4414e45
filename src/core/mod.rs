//! Core module - Types shared by the validator, the sandbox manager and the
//! orchestrator
//!
//! Requests and results are plain serde types so they can travel through the
//! gateway unchanged.

pub mod types;

pub use types::*;
