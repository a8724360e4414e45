//! Sandbox manager - owns every live sandbox for the process lifetime
//!
//! The live map is the only shared state. It is locked for short critical
//! sections around insert, lookup and remove, never across a runtime call.
//! Teardown of one sandbox is serialized on a per-sandbox mutex so that the
//! forced-cleanup timer and an explicit cleanup cannot both release the
//! same container. The timer stays armed until removal succeeds.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SandboxConfig;
use crate::core::{Language, ResourceUsage, SandboxOptions, MAX_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::sandbox::output::{ExecOutput, OutputCollector};
use crate::sandbox::runtime::{ContainerRuntime, ContainerSpec, ExecSpec, StopOutcome};
use crate::sandbox::stats::resource_usage;

/// Ceiling for a single code execution, independent of the sandbox lifetime
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable carrying the auth token into the interpreter process
pub const AUTH_TOKEN_ENV: &str = "EXECBOX_AUTH_TOKEN";

/// Working directory inside every sandbox
pub const WORKSPACE_DIR: &str = "/workspace";

/// CPU accounting period in microseconds
const CPU_PERIOD: i64 = 100_000;

/// Smallest quota the engine enforces; zero means unlimited
const MIN_CPU_QUOTA: i64 = 1_000;

/// Delay between forced-cleanup attempts once the lifetime has expired
const FORCED_CLEANUP_RETRY: Duration = Duration::from_secs(5);

pub const LABEL_APP: &str = "app";
pub const LABEL_USER: &str = "userId";
pub const LABEL_CREATED: &str = "createdAt";
pub const LABEL_INSTANCE: &str = "instance";

/// Handle to one live sandbox.
///
/// Cloning shares the running flag; the manager flips it to false exactly
/// once, when the sandbox is torn down.
#[derive(Debug, Clone)]
pub struct SandboxEnvironment {
    container_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    running: Arc<AtomicBool>,
    manager: Weak<ManagerInner>,
}

impl SandboxEnvironment {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tear the sandbox down through its owning manager.
    ///
    /// A no-op if it is already gone or the manager has been dropped.
    pub async fn release(&self) -> Result<()> {
        match self.manager.upgrade() {
            Some(inner) => {
                ContainerSandboxManager { inner }
                    .cleanup_container(&self.container_id)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Serializable snapshot
    pub fn info(&self) -> SandboxInfo {
        SandboxInfo {
            container_id: self.container_id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            is_running: self.is_running(),
        }
    }
}

/// Point-in-time view of a sandbox
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxInfo {
    pub container_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub is_running: bool,
}

struct LiveSandbox {
    env: SandboxEnvironment,
    /// Aborts in-flight executions once teardown starts
    cancel: CancellationToken,
    /// Disarms the forced-cleanup timer once the container is removed
    timer: CancellationToken,
    /// Serializes teardown
    teardown: Arc<Mutex<()>>,
}

struct ManagerInner {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    /// Labels every container this manager creates
    instance: String,
    live: RwLock<HashMap<String, LiveSandbox>>,
}

impl std::fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerInner")
            .field("runtime", &self.runtime.name())
            .field("image", &self.config.image)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Creates, runs code in, measures and tears down sandboxes
#[derive(Debug, Clone)]
pub struct ContainerSandboxManager {
    inner: Arc<ManagerInner>,
}

impl ContainerSandboxManager {
    /// Create a manager over a container runtime
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        ContainerSandboxManager {
            inner: Arc::new(ManagerInner {
                runtime,
                config,
                instance: uuid::Uuid::new_v4().to_string(),
                live: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    /// Identifier carried by this manager's containers in the `instance` label
    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    fn container_spec(
        &self,
        user_id: &str,
        options: &SandboxOptions,
        created_at: DateTime<Utc>,
    ) -> Result<ContainerSpec> {
        options.validate()?;

        let config = &self.inner.config;
        let memory_bytes = options
            .max_memory_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| i64::try_from(bytes).ok())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Memory limit of {} MB is not representable",
                    options.max_memory_mb
                ))
            })?;
        let cpu_quota =
            ((options.max_cpu_fraction * CPU_PERIOD as f64).floor() as i64).max(MIN_CPU_QUOTA);

        let labels = HashMap::from([
            (LABEL_APP.to_string(), config.label.clone()),
            (LABEL_INSTANCE.to_string(), self.inner.instance.clone()),
            (LABEL_USER.to_string(), user_id.to_string()),
            (LABEL_CREATED.to_string(), created_at.to_rfc3339()),
        ]);

        let tmpfs = HashMap::from([
            (
                "/tmp".to_string(),
                format!("rw,noexec,nosuid,size={}m", config.tmp_size_mb),
            ),
            (
                WORKSPACE_DIR.to_string(),
                format!("rw,noexec,nosuid,size={}m", config.workspace_size_mb),
            ),
        ]);

        Ok(ContainerSpec {
            image: config.image.clone(),
            user: config.user.clone(),
            working_dir: WORKSPACE_DIR.to_string(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "sleep infinity".to_string(),
            ],
            env: vec![
                format!("USER_ID={}", user_id),
                "NODE_ENV=production".to_string(),
            ],
            labels,
            memory_bytes,
            // Equal to the memory limit: no swap
            memory_swap_bytes: memory_bytes,
            cpu_quota,
            cpu_period: CPU_PERIOD,
            pids_limit: config.pids_limit,
            network_disabled: true,
            readonly_rootfs: true,
            tmpfs,
            cap_drop: vec!["ALL".to_string()],
            security_opt: vec!["no-new-privileges".to_string()],
        })
    }

    /// Create, start and register a sandbox for `user_id`.
    ///
    /// A forced-cleanup timer fires after `options.timeout` unless the
    /// sandbox is cleaned up first. Limits the engine would treat as
    /// unlimited are rejected with `Error::InvalidInput`.
    pub async fn create_container(
        &self,
        user_id: &str,
        options: SandboxOptions,
    ) -> Result<SandboxEnvironment> {
        let created_at = Utc::now();
        let spec = self.container_spec(user_id, &options, created_at)?;
        let runtime = &self.inner.runtime;

        let container_id = runtime
            .create_container(&spec)
            .await
            .map_err(|e| Error::SandboxCreation(e.to_string()))?;

        if let Err(e) = runtime.start_container(&container_id).await {
            if let Err(remove_err) = runtime.remove_container(&container_id).await {
                warn!(%container_id, "Failed to remove unstarted container: {}", remove_err);
            }
            return Err(Error::SandboxCreation(format!(
                "Failed to start container: {}",
                e
            )));
        }

        let env = SandboxEnvironment {
            container_id: container_id.clone(),
            user_id: user_id.to_string(),
            created_at,
            running: Arc::new(AtomicBool::new(true)),
            manager: Arc::downgrade(&self.inner),
        };
        let timer = CancellationToken::new();

        self.inner.live.write().await.insert(
            container_id.clone(),
            LiveSandbox {
                env: env.clone(),
                cancel: CancellationToken::new(),
                timer: timer.clone(),
                teardown: Arc::new(Mutex::new(())),
            },
        );

        self.schedule_forced_cleanup(container_id.clone(), options.timeout, timer);

        info!(
            %container_id,
            user_id,
            memory_mb = options.max_memory_mb,
            cpu = options.max_cpu_fraction,
            "Sandbox created"
        );

        Ok(env)
    }

    /// Force cleanup once `timeout` elapses, retrying until removal succeeds,
    /// the timer is disarmed or the manager is dropped.
    fn schedule_forced_cleanup(
        &self,
        container_id: String,
        timeout: Duration,
        timer: CancellationToken,
    ) {
        let manager = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            warn!(%container_id, "Sandbox lifetime expired, forcing cleanup");

            loop {
                let result = match manager.upgrade() {
                    Some(inner) => {
                        ContainerSandboxManager { inner }
                            .cleanup_container(&container_id)
                            .await
                    }
                    None => return,
                };

                match result {
                    Ok(()) => return,
                    Err(e) => error!(
                        target: "execbox::alert",
                        %container_id,
                        "Forced cleanup failed, retrying in {:?}: {}",
                        FORCED_CLEANUP_RETRY,
                        e
                    ),
                }

                tokio::select! {
                    _ = timer.cancelled() => return,
                    _ = tokio::time::sleep(FORCED_CLEANUP_RETRY) => {}
                }
            }
        });
    }

    /// Write `code` into the sandbox and run it with the dialect's
    /// interpreter.
    ///
    /// The auth token, when given, is visible to the interpreter process
    /// only, through `AUTH_TOKEN_ENV`. Runtime errors of the code itself are
    /// reported in `ExecOutput::error`, not as `Err`.
    pub async fn execute_code(
        &self,
        container_id: &str,
        code: &str,
        language: Language,
        auth_token: Option<&SecretString>,
    ) -> Result<ExecOutput> {
        let cancel = {
            let live = self.inner.live.read().await;
            match live.get(container_id) {
                Some(sandbox) if sandbox.env.is_running() => sandbox.cancel.clone(),
                _ => return Err(Error::SandboxUnavailable(container_id.to_string())),
            }
        };

        let path = format!("{}/{}", WORKSPACE_DIR, language.file_name());

        let run = async {
            self.write_code(container_id, &path, code).await?;

            let env = auth_token
                .map(|token| vec![format!("{}={}", AUTH_TOKEN_ENV, token.expose_secret())])
                .unwrap_or_default();

            let spec = ExecSpec {
                command: language.command(&path),
                user: self.inner.config.user.clone(),
                working_dir: WORKSPACE_DIR.to_string(),
                env,
                stdin: None,
            };

            let session = self.inner.runtime.exec(container_id, spec).await?;
            let (stdout, stderr) = OutputCollector::collect(session.output).await?;

            let exit_code = match self.inner.runtime.exec_exit_code(&session.exec_id).await {
                Ok(code) => code,
                Err(e) => {
                    debug!(container_id, "Exit status unavailable: {}", e);
                    None
                }
            };

            Ok::<_, Error>(ExecOutput::new(&stdout, &stderr, exit_code))
        };

        tokio::select! {
            result = run => result,
            _ = tokio::time::sleep(EXECUTION_TIMEOUT) => {
                warn!(container_id, "Execution timed out after {:?}", EXECUTION_TIMEOUT);
                Err(Error::ExecutionTimeout(EXECUTION_TIMEOUT.as_secs()))
            }
            _ = cancel.cancelled() => {
                Err(Error::Cancelled(format!("sandbox {} was torn down", container_id)))
            }
        }
    }

    /// Stream `code` into `path` over stdin; user text never reaches a shell
    async fn write_code(&self, container_id: &str, path: &str, code: &str) -> Result<()> {
        let spec = ExecSpec {
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("cat > {}", path),
            ],
            user: self.inner.config.user.clone(),
            working_dir: WORKSPACE_DIR.to_string(),
            env: Vec::new(),
            stdin: Some(code.as_bytes().to_vec()),
        };

        let session = self.inner.runtime.exec(container_id, spec).await?;
        let (_, stderr) = OutputCollector::collect(session.output).await?;

        match self.inner.runtime.exec_exit_code(&session.exec_id).await? {
            Some(code) if code != 0 => Err(Error::Container(format!(
                "Failed to write code into sandbox (exit code {}): {}",
                code,
                stderr.trim()
            ))),
            _ => Ok(()),
        }
    }

    /// Stop and remove a sandbox.
    ///
    /// Unknown ids are a no-op, so this is safe to race against the
    /// forced-cleanup timer. If removal fails the sandbox stays registered,
    /// the call can be retried and the forced-cleanup timer stays armed.
    pub async fn cleanup_container(&self, container_id: &str) -> Result<()> {
        let teardown = {
            let live = self.inner.live.read().await;
            match live.get(container_id) {
                Some(sandbox) => sandbox.teardown.clone(),
                None => return Ok(()),
            }
        };

        let _guard = teardown.lock().await;

        // Re-check: a concurrent cleanup may have finished while we waited
        let (cancel, timer, running) = {
            let live = self.inner.live.read().await;
            match live.get(container_id) {
                Some(sandbox) => (
                    sandbox.cancel.clone(),
                    sandbox.timer.clone(),
                    sandbox.env.running.clone(),
                ),
                None => return Ok(()),
            }
        };

        cancel.cancel();

        let runtime = &self.inner.runtime;
        match runtime
            .stop_container(container_id, self.inner.config.stop_grace)
            .await
        {
            Ok(StopOutcome::Stopped) => debug!(container_id, "Sandbox stopped"),
            Ok(StopOutcome::AlreadyStopped) => debug!(container_id, "Sandbox already stopped"),
            Err(e) => debug!(container_id, "Stop failed, forcing removal: {}", e),
        }

        runtime
            .remove_container(container_id)
            .await
            .map_err(|e| Error::Cleanup {
                container_id: container_id.to_string(),
                message: e.to_string(),
            })?;

        running.store(false, Ordering::SeqCst);
        self.inner.live.write().await.remove(container_id);
        timer.cancel();

        info!(container_id, "Sandbox removed");
        Ok(())
    }

    /// Clean up every sandbox owned by `user_id`, concurrently
    pub async fn cleanup_user_containers(&self, user_id: &str) -> Result<()> {
        let ids: Vec<String> = self
            .inner
            .live
            .read()
            .await
            .values()
            .filter(|sandbox| sandbox.env.user_id == user_id)
            .map(|sandbox| sandbox.env.container_id.clone())
            .collect();

        self.cleanup_many(ids).await
    }

    /// Clean up every live sandbox, concurrently
    pub async fn cleanup_all(&self) -> Result<()> {
        let ids: Vec<String> = self.inner.live.read().await.keys().cloned().collect();
        self.cleanup_many(ids).await
    }

    async fn cleanup_many(&self, ids: Vec<String>) -> Result<()> {
        let results = join_all(ids.iter().map(|id| self.cleanup_container(id))).await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!("Cleanup failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Sample resource usage. Best effort: `None` when the runtime cannot
    /// provide statistics.
    pub async fn get_container_stats(&self, container_id: &str) -> Option<ResourceUsage> {
        match self.inner.runtime.stats(container_id).await {
            Ok(raw) => Some(resource_usage(&raw)),
            Err(e) => {
                warn!(container_id, "Error getting container stats: {}", e);
                None
            }
        }
    }

    /// Remove labeled containers left behind by another manager instance,
    /// such as a crashed process. Returns how many were removed.
    ///
    /// Only containers older than the longest lifetime a live owner could
    /// give them are touched; this manager's own containers never are.
    pub async fn reap_orphans(&self) -> Result<usize> {
        let labeled = self
            .inner
            .runtime
            .list_labeled(LABEL_APP, &self.inner.config.label)
            .await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.orphan_age()).unwrap_or(chrono::Duration::zero());

        let orphans: Vec<String> = {
            let live = self.inner.live.read().await;
            labeled
                .into_iter()
                .filter(|c| !live.contains_key(&c.id))
                .filter(|c| {
                    c.labels.get(LABEL_INSTANCE).map(String::as_str)
                        != Some(self.inner.instance.as_str())
                })
                .filter(|c| match labeled_created_at(&c.labels) {
                    Some(created_at) => created_at < cutoff,
                    None => {
                        debug!(container_id = %c.id, "Skipping sandbox without a creation time");
                        false
                    }
                })
                .map(|c| c.id)
                .collect()
        };

        let mut removed = 0;
        for id in &orphans {
            match self.inner.runtime.remove_container(id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container_id = %id, "Failed to reap orphaned sandbox: {}", e),
            }
        }

        if removed > 0 {
            info!(removed, "Reaped orphaned sandboxes");
        }
        Ok(removed)
    }

    /// Past this age a live owner would already have forced its sandbox down
    fn orphan_age(&self) -> Duration {
        Duration::from_millis(MAX_TIMEOUT_MS) + EXECUTION_TIMEOUT + self.inner.config.stop_grace
    }

    /// Number of live sandboxes
    pub async fn live_count(&self) -> usize {
        self.inner.live.read().await.len()
    }

    /// Handle for a live sandbox
    pub async fn get(&self, container_id: &str) -> Option<SandboxEnvironment> {
        self.inner
            .live
            .read()
            .await
            .get(container_id)
            .map(|sandbox| sandbox.env.clone())
    }

    /// Snapshots of live sandboxes, optionally for one user, oldest first
    pub async fn list(&self, user_id: Option<&str>) -> Vec<SandboxInfo> {
        let mut infos: Vec<SandboxInfo> = self
            .inner
            .live
            .read()
            .await
            .values()
            .filter(|sandbox| user_id.map_or(true, |user| sandbox.env.user_id == user))
            .map(|sandbox| sandbox.env.info())
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }
}

fn labeled_created_at(labels: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    let raw = labels.get(LABEL_CREATED)?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
