//! External tool invocation
//!
//! Every vendor tool runs under a hard timeout. A timed-out child is killed
//! and waited for before the probe returns, so it never lingers as a zombie.
//! `kill_on_drop` covers probes cancelled mid-run.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use super::ProbeError;

/// Captured output of a finished tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Whether the tool exited with status 0
    pub success: bool,
    /// Exit code, if the tool exited normally
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// A successful run with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Launches external tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, giving up after `timeout`.
    ///
    /// A missing program yields [`ProbeError::ToolMissing`], an expired
    /// timeout yields [`ProbeError::Timeout`]. A non-zero exit is not an
    /// error; callers inspect [`ToolOutput::success`].
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError>;
}

/// Runs real processes through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ProbeError> {
        trace!(program = program, args = ?args, "Spawning tool");

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProbeError::ToolMissing(program.to_string()));
            }
            Err(e) => return Err(ProbeError::IoError(e)),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = tokio::time::timeout(timeout, async {
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
        })
        .await;

        match finished {
            Ok(Ok((status, stdout, stderr))) => Ok(ToolOutput {
                success: status.success(),
                code: status.code(),
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            }),
            Ok(Err(e)) => Err(ProbeError::IoError(e)),
            Err(_) => {
                // Kill and reap
                if let Err(e) = child.kill().await {
                    debug!(program = program, error = %e, "Failed to kill timed-out tool");
                }
                debug!(
                    program = program,
                    timeout = %humantime::format_duration(timeout),
                    "Tool timed out, child killed"
                );
                Err(ProbeError::Timeout {
                    tool: program.to_string(),
                    timeout,
                })
            }
        }
    }
}

async fn read_pipe(pipe: Option<impl AsyncRead + Unpin>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool() {
        let result = SystemToolRunner
            .run("hwdetect-no-such-tool", &[], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProbeError::ToolMissing(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_output() {
        let output = SystemToolRunner
            .run("sh", &["-c", "echo hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let output = SystemToolRunner
            .run("sh", &["-c", "exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let result = SystemToolRunner
            .run("sleep", &["10"], Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ProbeError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_child_is_reaped() {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 10", pid_file.display());

        let result = SystemToolRunner
            .run("sh", &["-c", &script], Duration::from_millis(500))
            .await;
        assert!(matches!(result, Err(ProbeError::Timeout { .. })));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    }
}
