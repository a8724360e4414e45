//! Docker runtime
//!
//! Implements `ContainerRuntime` over the Docker Engine API. Exec output
//! arrives multiplexed on one connection with an 8-byte frame header naming
//! the stream; bollard decodes the header into `LogOutput` variants, which
//! are mapped onto `OutputFrame`s here.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::sandbox::runtime::{
    ContainerRuntime, ContainerSpec, ExecSession, ExecSpec, LabeledContainer, OutputFrame,
    RawStats, StopOutcome,
};

/// Docker-backed container runtime
pub struct DockerRuntime {
    /// Docker client
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon (honours `DOCKER_HOST`) and make
    /// sure the sandbox image is present
    pub async fn connect(config: &SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        // Verify connection
        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!("Sandbox runtime connected to Docker");

        let runtime = DockerRuntime { docker };
        runtime.ensure_image(&config.image, config.pull_image).await?;

        Ok(runtime)
    }

    /// Ensure the sandbox image is available, pulling it if allowed
    async fn ensure_image(&self, image: &str, pull: bool) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        if !pull {
            return Err(Error::Container(format!(
                "Sandbox image {} not found and pulling is disabled",
                image
            )));
        }

        info!("Pulling Docker image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::Container(format!("Failed to pull image: {}", e)));
                }
            }
        }

        info!("Image pulled successfully");
        Ok(())
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn to_frame(item: std::result::Result<LogOutput, BollardError>) -> Option<Result<OutputFrame>> {
    match item {
        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
            Some(Ok(OutputFrame::stdout(message.to_vec())))
        }
        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::stderr(message.to_vec()))),
        Ok(LogOutput::StdIn { .. }) => None,
        Err(e) => Some(Err(Error::from(e))),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let container_name = format!("execbox-{}", uuid::Uuid::new_v4());

        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_swap_bytes),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            network_mode: Some(if spec.network_disabled { "none" } else { "bridge" }.to_string()),
            readonly_rootfs: Some(spec.readonly_rootfs),
            tmpfs: Some(spec.tmpfs.clone()),
            security_opt: Some(spec.security_opt.clone()),
            cap_drop: Some(spec.cap_drop.clone()),
            pids_limit: Some(spec.pids_limit),
            auto_remove: Some(false), // Removal is driven by the manager
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.working_dir.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), container_config)
            .await?;

        for warning in &response.warnings {
            debug!(container_id = %response.id, "Docker warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn exec(&self, container_id: &str, spec: ExecSpec) -> Result<ExecSession> {
        let options = CreateExecOptions::<String> {
            cmd: Some(spec.command),
            user: Some(spec.user),
            working_dir: Some(spec.working_dir),
            env: (!spec.env.is_empty()).then_some(spec.env),
            attach_stdin: Some(spec.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, options).await?;

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { output, mut input } => {
                if let Some(data) = spec.stdin {
                    input.write_all(&data).await?;
                    input.shutdown().await?;
                }

                let output = output
                    .filter_map(|item| futures::future::ready(to_frame(item)))
                    .boxed();

                Ok(ExecSession {
                    exec_id: exec.id,
                    output,
                })
            }
            StartExecResults::Detached => Err(Error::Container(
                "Exec started detached; output is unavailable".to_string(),
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code)
    }

    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<StopOutcome> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(StopOutcome::Stopped),
            // 304: container already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(StopOutcome::AlreadyStopped),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => {
                debug!("Removed container: {}", container_id);
                Ok(())
            }
            // 404: already gone
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(Error::Container(format!("Failed to remove container: {}", e))),
        }
    }

    async fn stats(&self, container_id: &str) -> Result<RawStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.docker.stats(container_id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| Error::Container("Stats stream ended without a sample".to_string()))??;

        let io_service_bytes = stats
            .blkio_stats
            .io_service_bytes_recursive
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.value)
            .collect();

        Ok(RawStats {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_total: stats.cpu_stats.system_cpu_usage,
            presystem_total: stats.precpu_stats.system_cpu_usage,
            memory_usage: stats.memory_stats.usage,
            io_service_bytes,
        })
    }

    async fn list_labeled(&self, key: &str, value: &str) -> Result<Vec<LabeledContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}={}", key, value)]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(LabeledContainer {
                    id: c.id?,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::runtime::StreamKind;

    #[test]
    fn test_log_output_mapping() {
        let out = to_frame(Ok(LogOutput::StdOut {
            message: "hi".into(),
        }))
        .unwrap()
        .unwrap();
        assert_eq!(out.stream, StreamKind::Stdout);
        assert_eq!(out.data, b"hi");

        let err = to_frame(Ok(LogOutput::StdErr {
            message: "boom".into(),
        }))
        .unwrap()
        .unwrap();
        assert_eq!(err.stream, StreamKind::Stderr);

        assert!(to_frame(Ok(LogOutput::StdIn {
            message: "echo".into()
        }))
        .is_none());
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_connect_and_list() {
        let runtime = DockerRuntime::connect(&SandboxConfig::default()).await.unwrap();
        let found = runtime.list_labeled("app", "execbox").await.unwrap();
        assert!(found.iter().all(|c| c.labels.get("app").map(String::as_str) == Some("execbox")));
    }
}
