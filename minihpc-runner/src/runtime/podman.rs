//! Container CLI runtime
//!
//! Drives a docker-compatible CLI (podman by default) for job execution:
//! - Checking the CLI is available
//! - Pulling images and streaming pull progress
//! - Creating, starting and waiting on containers
//! - Streaming combined container logs
//! - Removing containers

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ContainerId, ContainerRuntime, ContainerSpec, OutputStream, RuntimeError};

const STREAM_BUFFER: usize = 64;

/// `sh -c` script that execs its arguments with stderr sent to stdout
const MERGE_STDERR: &str = r#"exec "$0" "$@" 2>&1"#;

/// Runtime backed by the `podman` or `docker` command line
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    /// Checks that `binary` is installed and working
    pub async fn connect(binary: impl Into<String>) -> Result<Self> {
        let binary = binary.into();

        let output = Command::new(&binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| {
                format!(
                    "Failed to execute '{} --version'. Is {} installed?",
                    binary, binary
                )
            })?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", binary);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Container runtime is available: {}", version.trim());

        Ok(Self { binary })
    }

    /// Runs a command to completion and returns its trimmed stdout
    async fn run(&self, op: &'static str, args: &[String]) -> Result<String, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Io { op, source })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stdout.is_empty() {
            debug!("{} stdout: {}", op, stdout);
        }
        if !stderr.is_empty() {
            debug!("{} stderr: {}", op, stderr);
        }

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                op,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(stdout)
    }

    /// Spawns a command and forwards its combined output, line by line, into
    /// one stream. A non-zero exit is delivered as the final stream item.
    ///
    /// stderr is redirected into stdout by a wrapping `sh`, so both land on a
    /// single pipe in the order the command wrote them.
    fn spawn_stream(&self, op: &'static str, args: &[String]) -> Result<OutputStream, RuntimeError> {
        debug!("{} {} 2>&1", self.binary, args.join(" "));

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(MERGE_STDERR)
            .arg(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Io { op, source })?;

        let Some(output) = child.stdout.take() else {
            return Err(RuntimeError::Io {
                op,
                source: std::io::Error::other("child process stdout unavailable"),
            });
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let last_line = forward_lines(op, output, tx.clone()).await;

            // Reader hung up early, nobody is left to observe the result
            if tx.is_closed() {
                let _ = child.kill().await;
                return;
            }

            let failure = match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(RuntimeError::CommandFailed {
                    op,
                    code: status.code(),
                    stderr: last_line,
                }),
                Err(source) => Some(RuntimeError::Io { op, source }),
            };

            if let Some(err) = failure {
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(rx)
    }
}

/// Forwards `pipe` into `tx` one line at a time, keeping line endings.
///
/// Returns the last non-empty line seen, used as the error summary.
async fn forward_lines<R>(
    op: &'static str,
    pipe: R,
    tx: mpsc::Sender<Result<String, RuntimeError>>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut last_line = String::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read,
            _ = tx.closed() => break,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                let chunk = String::from_utf8_lossy(&buf).into_owned();
                let trimmed = chunk.trim();
                if !trimmed.is_empty() {
                    last_line = trimmed.to_string();
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("{}: failed to read output: {}", op, e);
                break;
            }
        }
    }

    last_line
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--pull=never".to_string(),
        format!("--cpus={}", spec.cpus()),
        format!("--memory={}b", spec.memory_bytes),
        spec.image.clone(),
    ];
    args.extend(spec.command.iter().cloned());
    args
}

fn parse_exit_code(output: &str) -> Result<i64, RuntimeError> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<i64>().ok())
        .ok_or_else(|| RuntimeError::UnexpectedOutput {
            op: "wait",
            output: output.to_string(),
        })
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn pull_image(&self, image: &str) -> Result<OutputStream, RuntimeError> {
        info!("Pulling image {}", image);
        self.spawn_stream("pull", &["pull".to_string(), image.to_string()])
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let stdout = self.run("create", &create_args(spec)).await?;

        let id = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| RuntimeError::UnexpectedOutput {
                op: "create",
                output: stdout.clone(),
            })?;

        info!("Created container {} from image {}", id, spec.image);
        Ok(ContainerId(id.to_string()))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.run("start", &["start".to_string(), id.0.clone()])
            .await?;
        debug!("Container {} started", id);
        Ok(())
    }

    async fn wait_for_exit(&self, id: &ContainerId) -> Result<i64, RuntimeError> {
        let stdout = self.run("wait", &["wait".to_string(), id.0.clone()]).await?;
        parse_exit_code(&stdout)
    }

    async fn fetch_logs(&self, id: &ContainerId) -> Result<OutputStream, RuntimeError> {
        self.spawn_stream("logs", &["logs".to_string(), id.0.clone()])
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.run("remove", &["rm".to_string(), "-f".to_string(), id.0.clone()])
            .await?;
        debug!("Container {} removed", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args() {
        let spec = ContainerSpec::new("docker.io/alpine:latest", "echo hi | wc -c", 2, 1048576);
        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--pull=never",
                "--cpus=2",
                "--memory=1048576b",
                "docker.io/alpine:latest",
                "sh",
                "-c",
                "echo hi | wc -c",
            ]
        );
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("0").unwrap(), 0);
        assert_eq!(parse_exit_code("137\n").unwrap(), 137);
        assert_eq!(parse_exit_code("warning: something\n1\n").unwrap(), 1);
        assert!(parse_exit_code("").is_err());
        assert!(parse_exit_code("not-a-number").is_err());
    }

    #[tokio::test]
    async fn test_connect_missing_binary_fails() {
        let err = CliRuntime::connect("minihpc-definitely-not-a-runtime")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Is minihpc-definitely-not-a-runtime installed?"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_keeps_interleaved_output_order() {
        let runtime = CliRuntime {
            binary: "sh".to_string(),
        };
        let mut rx = runtime
            .spawn_stream(
                "logs",
                &[
                    "-c".to_string(),
                    "echo one; echo two >&2; echo three; echo four >&2; exit 3".to_string(),
                ],
            )
            .unwrap();

        let mut chunks = Vec::new();
        let mut failure = None;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => failure = Some(e),
            }
        }

        assert_eq!(chunks.concat(), "one\ntwo\nthree\nfour\n");
        match failure {
            Some(RuntimeError::CommandFailed { op, code, stderr }) => {
                assert_eq!(op, "logs");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "four");
            }
            other => panic!("expected command failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_success_has_no_error_item() {
        let runtime = CliRuntime {
            binary: "sh".to_string(),
        };
        let mut rx = runtime
            .spawn_stream("pull", &["-c".to_string(), "echo done".to_string()])
            .unwrap();

        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item.unwrap());
        }
        assert_eq!(items, vec!["done\n".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_returns_trimmed_stdout() {
        let runtime = CliRuntime {
            binary: "sh".to_string(),
        };
        let out = runtime
            .run("wait", &["-c".to_string(), "echo 0".to_string()])
            .await
            .unwrap();
        assert_eq!(parse_exit_code(&out).unwrap(), 0);
    }
}
