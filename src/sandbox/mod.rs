//! Sandbox module - Ephemeral, isolated containers for untrusted code
//!
//! - runtime.rs: The `ContainerRuntime` trait and the types crossing it
//! - docker.rs: Docker Engine implementation
//! - manager.rs: Lifecycle, execution and teardown of sandboxes
//! - output.rs: stdout/stderr demultiplexing
//! - stats.rs: Resource usage from raw counters

mod docker;
#[cfg(test)]
pub(crate) mod fake;
mod manager;
mod output;
mod runtime;
mod stats;

pub use docker::DockerRuntime;
pub use manager::{
    ContainerSandboxManager, SandboxEnvironment, SandboxInfo, AUTH_TOKEN_ENV, EXECUTION_TIMEOUT,
    WORKSPACE_DIR,
};
pub use output::{ExecOutput, OutputCollector};
pub use runtime::{
    ContainerRuntime, ContainerSpec, ExecSession, ExecSpec, LabeledContainer, OutputFrame,
    OutputStream, RawStats, StopOutcome, StreamKind,
};
pub use stats::resource_usage;

use std::sync::Arc;

use crate::config::SandboxConfig;
use crate::error::Result;

/// Create a sandbox manager backed by the local Docker daemon
pub async fn create_manager(config: &SandboxConfig) -> Result<ContainerSandboxManager> {
    let runtime = DockerRuntime::connect(config).await?;
    Ok(ContainerSandboxManager::new(Arc::new(runtime), config.clone()))
}
