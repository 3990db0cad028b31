//! Builder for running external tools with a bounded timeout

use crate::probe::ProbeError;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Default command timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Output captured from a tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Standard output, lossy UTF-8
    pub stdout: String,
    /// Standard error, lossy UTF-8
    pub stderr: String,
}

/// An external tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Sets the maximum run time
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Runs the command and captures its output.
    ///
    /// A non-zero exit status is an error carrying stderr. The child is
    /// killed when the timeout elapses.
    pub async fn execute(&self) -> Result<ToolOutput, ProbeError> {
        let tool = self.tool_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ProbeError::Tool {
            tool: tool.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProbeError::Tool {
                    tool,
                    message: format!("I/O error waiting for process: {e}"),
                })
            }
            Err(_elapsed) => {
                return Err(ProbeError::Timeout {
                    tool,
                    timeout: self.timeout,
                })
            }
        };

        let result = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.status.success() {
            return Err(ProbeError::Tool {
                tool,
                message: format!("exited with status {}: {}", result.status, result.stderr.trim()),
            });
        }

        Ok(result)
    }

    /// Runs the command from synchronous code.
    ///
    /// Uses a private current-thread runtime, on a scoped thread when the
    /// caller is already inside a runtime.
    pub fn execute_blocking(&self) -> Result<ToolOutput, ProbeError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::scope(|scope| {
                scope
                    .spawn(|| self.run_on_own_runtime())
                    .join()
                    .unwrap_or_else(|_| {
                        Err(ProbeError::Tool {
                            tool: self.tool_name(),
                            message: "probe thread panicked".into(),
                        })
                    })
            })
        } else {
            self.run_on_own_runtime()
        }
    }

    fn run_on_own_runtime(&self) -> Result<ToolOutput, ProbeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProbeError::Tool {
                tool: self.tool_name(),
                message: format!("failed to create tokio runtime: {e}"),
            })?;
        runtime.block_on(self.execute())
    }
}
