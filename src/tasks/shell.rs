//! Shell and argv execution under a bounded wall clock.

use crate::error::TaskError;
use crate::util::truncate_with_marker;
use std::time::Duration;
use tokio::process::Command;

/// Maximum task command execution time before the process is killed.
pub const SHELL_TIMEOUT_SECS: u64 = 30;
/// Cap on combined captured output.
pub const MAX_OUTPUT_BYTES: usize = 4096;
/// Cap on the failure detail carried in the error field.
const ERROR_DETAIL_CAP: usize = 1024;

/// Run a command line through the platform shell.
pub async fn run_shell(command: &str) -> Result<String, TaskError> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    cmd.kill_on_drop(true);
    run(cmd, Duration::from_secs(SHELL_TIMEOUT_SECS)).await
}

/// Run a program with explicit arguments, no shell in between.
pub async fn run_argv(program: &str, args: &[String]) -> Result<String, TaskError> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    run(cmd, Duration::from_secs(SHELL_TIMEOUT_SECS)).await
}

/// Execute and capture. Timeout and non-zero exit are failures with empty
/// output; success returns combined stdout+stderr, truncated.
async fn run(mut cmd: Command, timeout: Duration) -> Result<String, TaskError> {
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| TaskError::Timeout(timeout.as_secs()))?
        .map_err(TaskError::Io)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let detail = combined.trim();
        let message = if detail.is_empty() {
            output.status.to_string()
        } else {
            format!(
                "{}: {}",
                output.status,
                truncate_with_marker(detail, ERROR_DETAIL_CAP)
            )
        };
        return Err(TaskError::Exec(message));
    }

    Ok(truncate_with_marker(&combined, MAX_OUTPUT_BYTES))
}
