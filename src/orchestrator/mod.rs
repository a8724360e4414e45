//! Execution orchestrator
//!
//! Drives one request through
//! `Sanitize → SizeCheck → SecurityCheck → Acquire → Inject → Execute →
//! Stats → Cleanup → Log`. Screening failures end the call before a
//! sandbox exists; once one is acquired it is always torn down. Every call
//! yields exactly one `ExecutionResult` and one audit entry.

mod preamble;

pub use preamble::Preamble;

use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, AuditLogEntry};
use crate::config::Config;
use crate::core::{ExecutionRequest, ExecutionResult, ResourceUsage};
use crate::error::Result;
use crate::sandbox::{ContainerRuntime, ContainerSandboxManager, ExecOutput};
use crate::tools::ToolInvoker;
use crate::validator::{CodeValidator, RuleSet, ValidationResult};

/// Teardown attempts before escalating
const MAX_CLEANUP_ATTEMPTS: u32 = 5;

/// Validates, runs and audits untrusted code
pub struct ExecutionOrchestrator {
    manager: ContainerSandboxManager,
    validator: CodeValidator,
    audit: Arc<AuditLog>,
    tools: Arc<dyn ToolInvoker>,
    preamble: Preamble,
    cleanup_retry: Duration,
}

impl ExecutionOrchestrator {
    /// Create an orchestrator from its parts
    pub fn new(
        manager: ContainerSandboxManager,
        validator: CodeValidator,
        audit: Arc<AuditLog>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<Self> {
        let cleanup_retry = manager.config().cleanup_retry;
        Ok(ExecutionOrchestrator {
            manager,
            validator,
            audit,
            tools,
            preamble: Preamble::new()?,
            cleanup_retry,
        })
    }

    /// Assemble everything from configuration over the given runtime
    pub fn from_config(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<Self> {
        let rules = RuleSet::with_extensions(
            &config.validator.extra_rules,
            &config.validator.extra_allowed_imports,
        )?;

        ExecutionOrchestrator::new(
            ContainerSandboxManager::new(runtime, config.sandbox.clone()),
            CodeValidator::new(rules),
            Arc::new(AuditLog::new(config.audit.capacity)),
            tools,
        )
    }

    pub fn manager(&self) -> &ContainerSandboxManager {
        &self.manager
    }

    pub fn validator(&self) -> &CodeValidator {
        &self.validator
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub async fn user_audit_logs(&self, user_id: &str) -> Vec<AuditLogEntry> {
        self.audit.for_user(user_id).await
    }

    pub async fn all_audit_logs(&self) -> Vec<AuditLogEntry> {
        self.audit.all().await
    }

    /// Run one request to completion. Never fails: every problem is
    /// reported in the returned result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        let result = match self.run(&request, started).await {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(e.to_string(), elapsed_ms(started)),
        };

        self.audit
            .append(AuditLogEntry {
                user_id: request.user_id.clone(),
                code: request.code.clone(),
                language: request.language,
                execution_time_ms: result.execution_time_ms,
                success: result.success,
                error: result.error.clone(),
                timestamp: Utc::now(),
                resources_used: result.resources_used,
            })
            .await;

        result
    }

    async fn run(&self, request: &ExecutionRequest, started: Instant) -> Result<ExecutionResult> {
        request.validate()?;

        let sanitized = self.validator.sanitize(&request.code);

        let size = self.validator.validate_size(&sanitized);
        if !size.valid {
            let message = screening_message(size, false);
            debug!(user_id = %request.user_id, "Rejected: {}", message);
            return Ok(ExecutionResult::failure(message, elapsed_ms(started)));
        }

        let security = self.validator.validate(&sanitized, request.language);
        if !security.valid {
            let message = screening_message(security, true);
            debug!(user_id = %request.user_id, "Rejected: {}", message);
            return Ok(ExecutionResult::failure(message, elapsed_ms(started)));
        }

        let sandbox = self
            .manager
            .create_container(&request.user_id, request.sandbox_options())
            .await?;
        let container_id = sandbox.container_id().to_string();

        let outcome = self.execute_in(&container_id, &sanitized, request).await;

        // Sampled before teardown; best effort either way
        let resources = if outcome.is_ok() {
            self.manager.get_container_stats(&container_id).await
        } else {
            None
        };

        self.cleanup_with_retry(&container_id).await;

        let output = outcome?;
        let elapsed = elapsed_ms(started);

        info!(
            container_id = %container_id,
            user_id = %request.user_id,
            elapsed_ms = elapsed,
            "Execution finished"
        );

        Ok(into_result(output, elapsed, resources))
    }

    async fn execute_in(
        &self,
        container_id: &str,
        code: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecOutput> {
        let source = self.preamble.inject(code, &self.tools.tool_names())?;
        self.manager
            .execute_code(
                container_id,
                &source,
                request.language,
                Some(&request.auth_token),
            )
            .await
    }

    /// Tear down with exponential backoff; a sandbox that still cannot be
    /// removed is escalated and left to the forced-cleanup timer.
    async fn cleanup_with_retry(&self, container_id: &str) {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(self.cleanup_retry))
            .build();
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let manager = &self.manager;

        let result = backoff::future::retry(policy, move || async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            manager
                .cleanup_container(container_id)
                .await
                .map_err(|e| {
                    if e.is_retryable() && attempt < MAX_CLEANUP_ATTEMPTS {
                        debug!(container_id, attempt, "Cleanup failed, retrying: {}", e);
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await;

        if let Err(e) = result {
            error!(
                target: "execbox::alert",
                container_id,
                attempts = attempts.load(Ordering::SeqCst),
                "Sandbox cleanup failed: {}",
                e
            );
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn screening_message(result: ValidationResult, security: bool) -> String {
    let reason = result
        .reason
        .unwrap_or_else(|| "Code validation failed".to_string());

    if !security {
        return reason;
    }

    let mut message = format!("Security validation failed: {}", reason);
    if !result.violations.is_empty() {
        message.push_str("\nViolations:");
        for violation in &result.violations {
            message.push_str("\n  - ");
            message.push_str(violation);
        }
    }
    message
}

fn into_result(
    output: ExecOutput,
    elapsed: u64,
    resources: Option<ResourceUsage>,
) -> ExecutionResult {
    match output.error {
        Some(error) => {
            warn!(elapsed_ms = elapsed, "Code exited with an error");
            ExecutionResult {
                success: false,
                output: output.output,
                error: Some(error),
                execution_time_ms: elapsed,
                resources_used: resources,
            }
        }
        None => ExecutionResult::success(output.output, elapsed).with_resources(resources),
    }
}
