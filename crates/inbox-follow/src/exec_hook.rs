//! Per-record external command hook with a bounded timeout and an explicit
//! fatal/non-fatal failure policy.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::follow_error::FollowError;

pub const DEFAULT_EXEC_HOOK_TIMEOUT: Duration = Duration::from_secs(30);
const EXEC_HOOK_STDERR_TAIL_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecHookFailurePolicy {
    /// Log the failure and keep following.
    #[default]
    Warn,
    /// Propagate the failure and end the session.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHookConfig {
    /// Shell command line; the record is written to its stdin as one JSON line.
    pub command: String,
    /// `None` or zero falls back to [`DEFAULT_EXEC_HOOK_TIMEOUT`].
    pub timeout: Option<Duration>,
    pub failure_policy: ExecHookFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecHookOutcome {
    Succeeded,
    FailedNonFatal { message: String },
}

#[derive(Debug, Clone)]
pub struct ExecHook {
    command: String,
    timeout: Duration,
    failure_policy: ExecHookFailurePolicy,
}

impl ExecHook {
    pub fn new(config: ExecHookConfig) -> Result<Self, FollowError> {
        let command = config.command.trim().to_string();
        if command.is_empty() {
            return Err(FollowError::Config(
                "exec hook command must not be empty".to_string(),
            ));
        }
        Ok(Self {
            command,
            timeout: config
                .timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(DEFAULT_EXEC_HOOK_TIMEOUT),
            failure_policy: config.failure_policy,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the hook for one emitted record. `Err` is returned only under the
    /// fatal policy; non-fatal failures are logged and reported in the outcome.
    pub async fn run(&self, record: &Value) -> Result<ExecHookOutcome, FollowError> {
        let message = match self.invoke(record).await {
            Ok(()) => return Ok(ExecHookOutcome::Succeeded),
            Err(message) => message,
        };
        match self.failure_policy {
            ExecHookFailurePolicy::Fatal => Err(FollowError::ExecHook {
                message,
                fatal: true,
            }),
            ExecHookFailurePolicy::Warn => {
                tracing::warn!(command = %self.command, error = %message, "exec hook failed");
                Ok(ExecHookOutcome::FailedNonFatal { message })
            }
        }
    }

    async fn invoke(&self, record: &Value) -> Result<(), String> {
        let mut payload = serde_json::to_string(record)
            .map_err(|error| format!("failed to encode record: {error}"))?;
        payload.push('\n');

        let mut command = shell_command(&self.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|error| format!("failed to spawn '{}': {error}", self.command))?;

        let timeout = self.timeout;
        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(error) = stdin.write_all(payload.as_bytes()).await {
                    // A hook that ignores stdin may exit before reading it.
                    if error.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(format!("failed to write record to hook stdin: {error}"));
                    }
                }
            }
            child
                .wait_with_output()
                .await
                .map_err(|error| format!("failed while waiting for hook: {error}"))
        };
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(format!(
                    "'{}' timed out after {} ms",
                    self.command,
                    timeout.as_millis()
                ))
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let status = output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if stderr.is_empty() {
            Err(format!("'{}' exited with status {status}", self.command))
        } else {
            Err(format!(
                "'{}' exited with status {status}: {}",
                self.command,
                tail_chars(stderr, EXEC_HOOK_STDERR_TAIL_CHARS)
            ))
        }
    }
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

fn tail_chars(value: &str, max_chars: usize) -> String {
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    value.chars().skip(count - max_chars).collect()
}
