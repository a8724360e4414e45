//! Sandbox configuration types
//!
//! Container image, identity and isolation settings shared by every sandbox.
//! Per-request limits (memory, CPU, lifetime) travel with the request.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Docker image providing node and tsx
    #[serde(default = "default_image")]
    pub image: String,
    /// Pull the image at startup when it is missing locally
    #[serde(default = "default_true")]
    pub pull_image: bool,
    /// Non-root identity code runs as
    #[serde(default = "default_user")]
    pub user: String,
    /// Value of the `app` label placed on every sandbox
    #[serde(default = "default_label")]
    pub label: String,
    /// Maximum processes inside one sandbox
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    /// Size of the `/tmp` scratch mount in MiB
    #[serde(default = "default_tmp_size")]
    pub tmp_size_mb: u64,
    /// Size of the `/workspace` mount in MiB
    #[serde(default = "default_workspace_size")]
    pub workspace_size_mb: u64,
    /// Grace period for a stop before the container is killed
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
    /// How long a failed cleanup keeps being retried
    #[serde(default = "default_cleanup_retry", with = "humantime_serde")]
    pub cleanup_retry: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            image: default_image(),
            pull_image: true,
            user: default_user(),
            label: default_label(),
            pids_limit: default_pids_limit(),
            tmp_size_mb: default_tmp_size(),
            workspace_size_mb: default_workspace_size(),
            stop_grace: default_stop_grace(),
            cleanup_retry: default_cleanup_retry(),
        }
    }
}

fn default_image() -> String {
    "execbox-sandbox:latest".to_string()
}

fn default_true() -> bool {
    true
}

fn default_user() -> String {
    "sandbox:sandbox".to_string()
}

fn default_label() -> String {
    "execbox".to_string()
}

fn default_pids_limit() -> i64 {
    100
}

fn default_tmp_size() -> u64 {
    100
}

fn default_workspace_size() -> u64 {
    50
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_cleanup_retry() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let config = SandboxConfig::default();
        assert_eq!(config.user, "sandbox:sandbox");
        assert_eq!(config.pids_limit, 100);
        assert_eq!(config.stop_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_durations_are_human_readable() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"stop_grace": "2s", "cleanup_retry": "500ms"}"#).unwrap();
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.cleanup_retry, Duration::from_millis(500));
        assert_eq!(config.image, "execbox-sandbox:latest");
    }
}
