use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::InvokeResponse;

const COMMAND_KEY: &str = "command";

/// Outcome of running one job
#[derive(Debug)]
pub struct ExecutionResult {
    pub target: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Successful runs yield their stdout as the response payload.
    pub fn into_response(self) -> Result<InvokeResponse> {
        if self.success {
            Ok(InvokeResponse::new(self.stdout))
        } else {
            Err(SchedulerError::Invocation(format!(
                "{}: {}",
                self.target,
                self.error.unwrap_or_else(|| "unknown failure".to_string())
            )))
        }
    }
}

/// Runs a job's `command` through the configured shell.
///
/// The command sees the job as JSON in `RELAY_JOB` and the target name in
/// `RELAY_TARGET`. Whatever it prints on stdout is treated as follow-on jobs.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor {
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, job: &Value, target: &str) -> ExecutionResult {
        let Some(command) = job.get(COMMAND_KEY).and_then(Value::as_str) else {
            tracing::warn!(stage = target, "Job has no command");
            return ExecutionResult {
                target: target.to_string(),
                success: false,
                exit_code: None,
                stdout: Vec::new(),
                error: Some("job has no command".to_string()),
            };
        };

        tracing::debug!(stage = target, command, "Executing job");

        let result = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .env("RELAY_TARGET", target)
            .env("RELAY_JOB", job.to_string())
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(target, result)
    }

    fn process_output(
        target: &str,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let exit_code = output.status.code();
                let success = output.status.success();
                let error = if success {
                    None
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    Some(if stderr.is_empty() {
                        format!("Exit code: {:?}", exit_code)
                    } else {
                        stderr
                    })
                };

                tracing::debug!(stage = target, success, exit_code = ?exit_code, "Job finished");

                ExecutionResult {
                    target: target.to_string(),
                    success,
                    exit_code,
                    stdout: output.stdout,
                    error,
                }
            }
            Err(e) => {
                tracing::error!(stage = target, error = %e, "Job execution failed");
                ExecutionResult {
                    target: target.to_string(),
                    success: false,
                    exit_code: None,
                    stdout: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
