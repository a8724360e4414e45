//! Output demultiplexing
//!
//! Frames are appended to per-stream byte buffers and decoded only once the
//! command has finished, so a multi-byte character split across two frames
//! of the same stream is reassembled correctly.

use futures::StreamExt;

use crate::error::Result;
use crate::sandbox::runtime::{OutputFrame, OutputStream, StreamKind};

/// Accumulates stdout and stderr separately
#[derive(Debug, Default)]
pub struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a frame to the buffer named by its stream kind
    pub fn push(&mut self, frame: OutputFrame) {
        match frame.stream {
            StreamKind::Stdout => self.stdout.extend_from_slice(&frame.data),
            StreamKind::Stderr => self.stderr.extend_from_slice(&frame.data),
        }
    }

    /// Decode both buffers as (stdout, stderr)
    pub fn finish(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }

    /// Drain a stream to completion.
    ///
    /// A read error ends collection with that error; partial output is
    /// discarded along with it.
    pub async fn collect(mut stream: OutputStream) -> Result<(String, String)> {
        let mut collector = OutputCollector::new();
        while let Some(frame) = stream.next().await {
            collector.push(frame?);
        }
        Ok(collector.finish())
    }
}

/// What a finished command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Trimmed standard output
    pub output: String,
    /// Trimmed standard error, or an exit-status message when the command
    /// failed silently
    pub error: Option<String>,
    /// Exit status, when the runtime reported one
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn new(stdout: &str, stderr: &str, exit_code: Option<i64>) -> Self {
        let stderr = stderr.trim();
        let error = if !stderr.is_empty() {
            Some(stderr.to_string())
        } else {
            match exit_code {
                Some(code) if code != 0 => Some(format!("Process exited with code {}", code)),
                _ => None,
            }
        };

        ExecOutput {
            output: stdout.trim().to_string(),
            error,
            exit_code,
        }
    }
}
