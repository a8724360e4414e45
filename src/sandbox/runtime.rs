//! Container runtime trait - the seam between the sandbox manager and the
//! engine that actually isolates processes
//!
//! The manager speaks only in terms of these types. `DockerRuntime` maps them
//! onto the Docker Engine API; tests substitute a scripted runtime.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// Everything the runtime needs to create one isolated environment
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Image to instantiate
    pub image: String,
    /// Identity the keep-alive process runs as
    pub user: String,
    /// Initial working directory
    pub working_dir: String,
    /// Keep-alive command
    pub command: Vec<String>,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Labels used for bulk cleanup
    pub labels: HashMap<String, String>,
    /// Memory ceiling in bytes
    pub memory_bytes: i64,
    /// Memory plus swap ceiling in bytes
    pub memory_swap_bytes: i64,
    /// CPU time allowed per period, in microseconds
    pub cpu_quota: i64,
    /// CPU accounting period, in microseconds
    pub cpu_period: i64,
    /// Maximum number of processes
    pub pids_limit: i64,
    /// Disable all networking
    pub network_disabled: bool,
    /// Mount the root filesystem read-only
    pub readonly_rootfs: bool,
    /// tmpfs mount point to mount options
    pub tmpfs: HashMap<String, String>,
    /// Capabilities to drop
    pub cap_drop: Vec<String>,
    /// Security options (e.g. `no-new-privileges`)
    pub security_opt: Vec<String>,
}

/// A command to run inside an existing environment
#[derive(Debug, Clone, PartialEq)]
pub struct ExecSpec {
    /// Command and arguments
    pub command: Vec<String>,
    /// Identity to run as
    pub user: String,
    /// Working directory
    pub working_dir: String,
    /// Extra `KEY=value` environment entries for this command only
    pub env: Vec<String>,
    /// Bytes written to the command's standard input, then closed
    pub stdin: Option<Vec<u8>>,
}

/// Which stream a chunk of output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One demultiplexed chunk of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub stream: StreamKind,
    pub data: Vec<u8>,
}

impl OutputFrame {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        OutputFrame {
            stream: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        OutputFrame {
            stream: StreamKind::Stderr,
            data: data.into(),
        }
    }
}

/// Output frames of a running command
pub type OutputStream = BoxStream<'static, Result<OutputFrame>>;

/// A started command: its handle and its output
pub struct ExecSession {
    /// Runtime handle, used to query the exit status
    pub exec_id: String,
    /// Output frames until the command exits
    pub output: OutputStream,
}

/// Result of a graceful stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Cumulative counters from one statistics sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStats {
    /// Container CPU time at the current sample, nanoseconds
    pub cpu_total: u64,
    /// Container CPU time at the previous sample
    pub precpu_total: u64,
    /// Host CPU time at the current sample
    pub system_total: Option<u64>,
    /// Host CPU time at the previous sample
    pub presystem_total: Option<u64>,
    /// Current memory usage in bytes
    pub memory_usage: Option<u64>,
    /// Per-device recursive service byte counters
    pub io_service_bytes: Vec<u64>,
}

/// A container found by label, with all of its labels
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledContainer {
    pub id: String,
    pub labels: HashMap<String, String>,
}

/// Operations the sandbox manager needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Get the runtime name
    fn name(&self) -> &str;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Run a command inside a running container
    async fn exec(&self, container_id: &str, spec: ExecSpec) -> Result<ExecSession>;

    /// Exit status of a finished command, if the runtime knows it
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Stop a container, waiting up to `grace` before killing it
    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<StopOutcome>;

    /// Forcibly remove a container. Removing an absent container succeeds.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Take one statistics sample
    async fn stats(&self, container_id: &str) -> Result<RawStats>;

    /// All containers (running or not) carrying `key=value`
    async fn list_labeled(&self, key: &str, value: &str) -> Result<Vec<LabeledContainer>>;
}
