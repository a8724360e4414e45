//! Scripted in-memory runtime for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sandbox::runtime::{
    ContainerRuntime, ContainerSpec, ExecSession, ExecSpec, LabeledContainer, OutputFrame,
    RawStats, StopOutcome,
};
use crate::sandbox::manager::{LABEL_APP, LABEL_CREATED, LABEL_INSTANCE};

/// What running a file does
#[derive(Debug, Clone)]
pub enum RunBehavior {
    Output {
        frames: Vec<OutputFrame>,
        exit_code: i64,
    },
    /// Never produces output or exits
    Hang,
}

type BehaviorFn = Arc<dyn Fn(&str) -> RunBehavior + Send + Sync>;

#[derive(Default)]
struct FakeContainer {
    running: bool,
    labels: HashMap<String, String>,
    files: HashMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    orphans: Vec<LabeledContainer>,
    specs: Vec<ContainerSpec>,
    runs: Vec<ExecSpec>,
    writes: Vec<String>,
    exit_codes: HashMap<String, i64>,
    remove_calls: HashMap<String, usize>,
    create_error: Option<String>,
    failing_removals: usize,
    stats_fail: bool,
}

/// Runtime double that keeps containers in memory and "runs" code by
/// interpreting a few literal statements.
///
/// By default `console.log('x')` writes `x` to stdout, `console.error('x')`
/// writes to stderr, `throw new Error('x')` fails with exit code 1, and an
/// infinite loop hangs.
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    behavior: Mutex<BehaviorFn>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        FakeRuntime {
            state: Mutex::new(FakeState::default()),
            behavior: Mutex::new(Arc::new(interpret)),
        }
    }

    pub fn set_behavior<F>(&self, f: F)
    where
        F: Fn(&str) -> RunBehavior + Send + Sync + 'static,
    {
        *self.behavior.lock().unwrap() = Arc::new(f);
    }

    pub fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().create_error = Some(message.to_string());
    }

    pub fn fail_removals(&self, count: usize) {
        self.state.lock().unwrap().failing_removals = count;
    }

    pub fn fail_stats(&self) {
        self.state.lock().unwrap().stats_fail = true;
    }

    /// A stopped container from another manager instance
    pub fn add_orphan(&self, id: &str, instance: &str, created_at: DateTime<Utc>) {
        let labels = HashMap::from([
            (LABEL_APP.to_string(), "execbox".to_string()),
            (LABEL_INSTANCE.to_string(), instance.to_string()),
            (LABEL_CREATED.to_string(), created_at.to_rfc3339()),
        ]);
        self.state.lock().unwrap().orphans.push(LabeledContainer {
            id: id.to_string(),
            labels,
        });
    }

    pub fn mark_stopped(&self, id: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.running = false;
        }
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    pub fn last_run(&self) -> Option<ExecSpec> {
        self.state.lock().unwrap().runs.last().cloned()
    }

    /// Every source file written into any container, in order
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn remove_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .remove_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }
}

fn interpret(code: &str) -> RunBehavior {
    if code.contains("while (true)") || code.contains("for(;;)") {
        return RunBehavior::Hang;
    }

    let statement =
        Regex::new(r#"(console\.log|print|console\.error|throw new Error)\(\s*['"]([^'"]*)['"]\s*\)"#)
            .unwrap();

    let mut frames = Vec::new();
    for caps in statement.captures_iter(code) {
        let text = &caps[2];
        match &caps[1] {
            "console.log" | "print" => frames.push(OutputFrame::stdout(format!("{}\n", text))),
            "console.error" => frames.push(OutputFrame::stderr(format!("{}\n", text))),
            _ => {
                frames.push(OutputFrame::stderr(format!("Error: {}\n", text)));
                return RunBehavior::Output {
                    frames,
                    exit_code: 1,
                };
            }
        }
    }

    RunBehavior::Output {
        frames,
        exit_code: 0,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.create_error {
            return Err(Error::Container(message.clone()));
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.specs.push(spec.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                labels: spec.labels.clone(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| Error::Container(format!("no such container: {}", container_id)))?;
        container.running = true;
        Ok(())
    }

    async fn exec(&self, container_id: &str, spec: ExecSpec) -> Result<ExecSession> {
        let behavior = self.behavior.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let exec_id = format!("exec-{}", state.next_id);

        let container = state
            .containers
            .get_mut(container_id)
            .filter(|c| c.running)
            .ok_or_else(|| Error::Container(format!("container not running: {}", container_id)))?;

        if let Some(stdin) = &spec.stdin {
            // `sh -c "cat > <path>"`
            let path = spec
                .command
                .last()
                .and_then(|cmd| cmd.strip_prefix("cat > "))
                .unwrap_or_default()
                .to_string();
            let source = String::from_utf8_lossy(stdin).into_owned();
            container.files.insert(path, source.clone());
            state.writes.push(source);
            state.exit_codes.insert(exec_id.clone(), 0);
            return Ok(ExecSession {
                exec_id,
                output: stream::empty().boxed(),
            });
        }

        let code = spec
            .command
            .last()
            .and_then(|path| container.files.get(path))
            .cloned()
            .unwrap_or_default();
        state.runs.push(spec);

        match behavior(&code) {
            RunBehavior::Output { frames, exit_code } => {
                state.exit_codes.insert(exec_id.clone(), exit_code);
                Ok(ExecSession {
                    exec_id,
                    output: stream::iter(frames.into_iter().map(Ok)).boxed(),
                })
            }
            RunBehavior::Hang => Ok(ExecSession {
                exec_id,
                output: stream::pending().boxed(),
            }),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().unwrap().exit_codes.get(exec_id).copied())
    }

    async fn stop_container(&self, container_id: &str, _grace: Duration) -> Result<StopOutcome> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(container_id) {
            Some(container) if container.running => {
                container.running = false;
                Ok(StopOutcome::Stopped)
            }
            _ => Ok(StopOutcome::AlreadyStopped),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_removals > 0 {
            state.failing_removals -= 1;
            return Err(Error::Container("device or resource busy".to_string()));
        }
        *state
            .remove_calls
            .entry(container_id.to_string())
            .or_insert(0) += 1;
        state.containers.remove(container_id);
        state.orphans.retain(|orphan| orphan.id != container_id);
        Ok(())
    }

    async fn stats(&self, container_id: &str) -> Result<RawStats> {
        let state = self.state.lock().unwrap();
        if state.stats_fail || !state.containers.contains_key(container_id) {
            return Err(Error::Container("stats unavailable".to_string()));
        }
        Ok(RawStats {
            cpu_total: 300_000_000,
            precpu_total: 100_000_000,
            system_total: Some(2_000_000_000),
            presystem_total: Some(1_000_000_000),
            memory_usage: Some(64 * 1024 * 1024),
            io_service_bytes: vec![1024 * 1024],
        })
    }

    async fn list_labeled(&self, key: &str, value: &str) -> Result<Vec<LabeledContainer>> {
        let state = self.state.lock().unwrap();
        let containers = state.containers.iter().map(|(id, c)| LabeledContainer {
            id: id.clone(),
            labels: c.labels.clone(),
        });
        Ok(containers
            .chain(state.orphans.iter().cloned())
            .filter(|c| c.labels.get(key).map(String::as_str) == Some(value))
            .collect())
    }
}
