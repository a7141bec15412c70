//! Container runtime layer
//!
//! The scheduler drives containers exclusively through the
//! [`ContainerRuntime`] trait: pull, create, start, wait, logs, remove.
//! [`CliRuntime`] implements it on top of a docker-compatible CLI.

mod podman;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use podman::CliRuntime;

/// Chunks of process output, terminated by the sender hanging up.
///
/// An `Err` item means the producing operation failed; the stream must not be
/// considered complete in that case.
pub type OutputStream = mpsc::Receiver<Result<String, RuntimeError>>;

/// Errors reported by a [`ContainerRuntime`] or by the deadline guarding it
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{op} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        op: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{op}: unexpected output '{output}'")]
    UnexpectedOutput { op: &'static str, output: String },

    #[error("{op} timed out after {after:?}")]
    TimedOut { op: &'static str, after: Duration },

    #[error("{op} cancelled")]
    Cancelled { op: &'static str },

    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Handle to a created container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to create a job container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// Full argv, already wrapped in a shell invocation
    pub command: Vec<String>,
    /// CPU quota in billionths of a core
    pub nano_cpus: u64,
    /// Hard memory ceiling in bytes
    pub memory_bytes: u64,
}

const NANOS_PER_CPU: u64 = 1_000_000_000;

impl ContainerSpec {
    /// Builds a spec running `command` through `sh -c` with the given limits
    pub fn new(image: &str, command: &str, cpu: u32, memory: u64) -> Self {
        Self {
            image: image.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
            nano_cpus: u64::from(cpu) * NANOS_PER_CPU,
            memory_bytes: memory,
        }
    }

    /// The CPU quota expressed as a decimal core count, as `--cpus` expects
    pub fn cpus(&self) -> String {
        let whole = self.nano_cpus / NANOS_PER_CPU;
        let frac = self.nano_cpus % NANOS_PER_CPU;
        if frac == 0 {
            whole.to_string()
        } else {
            let digits = format!("{:09}", frac);
            format!("{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

/// Container lifecycle operations used to execute a job
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts fetching an image
    ///
    /// The image is only guaranteed to be available once the returned stream
    /// has been drained without an error item.
    async fn pull_image(&self, image: &str) -> Result<OutputStream, RuntimeError>;

    /// Creates (but does not start) a container
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError>;

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Blocks until the container leaves the running state and returns its exit code
    async fn wait_for_exit(&self, id: &ContainerId) -> Result<i64, RuntimeError>;

    /// Combined stdout/stderr of an exited container
    async fn fetch_logs(&self, id: &ContainerId) -> Result<OutputStream, RuntimeError>;

    async fn remove_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;
}
