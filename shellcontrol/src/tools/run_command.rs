//! Run-command executor: one command string, run as a throwaway shell script.

use std::io::Write;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::core::error::{ToolErrorKind, ToolExecutionError};
use crate::core::types::ToolResult;
use crate::io::process::{CommandOutput, RunError, RunLimits, run_command_with_timeout};

const SCRIPT_HEADER: &str = "# Note: this file contains the command to be executed by the LLM.";

/// Settings shared by every run-command invocation.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub shell: String,
    pub output_limit_bytes: usize,
    pub grace: Duration,
}

/// Run `command` under `settings.shell`, killing it after `timeout` or on cancellation.
///
/// Blocks the calling thread; run it on a blocking pool.
#[instrument(skip_all, fields(shell = %settings.shell, timeout_secs = timeout.as_secs()))]
pub fn run_command(
    command: &str,
    settings: &CommandSettings,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ToolResult, ToolExecutionError> {
    let mut script = tempfile::Builder::new()
        .prefix("shellcontrol-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| ToolExecutionError::spawn(format!("create script file: {e}")))?;
    writeln!(script, "{SCRIPT_HEADER}\n{command}")
        .and_then(|()| script.flush())
        .map_err(|e| ToolExecutionError::spawn(format!("write script file: {e}")))?;
    debug!(script = %script.path().display(), "wrote command script");

    let mut cmd = Command::new(&settings.shell);
    cmd.arg(script.path());
    let limits = RunLimits {
        timeout,
        output_limit_bytes: settings.output_limit_bytes,
        grace: settings.grace,
    };
    let output = run_command_with_timeout(cmd, limits, cancel)
        .map_err(|e| execution_error(e, &settings.shell))?;
    Ok(into_tool_result(&output, &settings.shell))
}

/// Keep whatever the command printed before the run failed.
fn execution_error(err: RunError, shell: &str) -> ToolExecutionError {
    let failure = ToolExecutionError::spawn(err.message);
    if err.stdout.is_empty() && err.stderr.is_empty() {
        return failure;
    }
    failure.with_partial(ToolResult {
        ok: false,
        stdout: String::from_utf8_lossy(&err.stdout).into_owned(),
        stderr: clean_stderr(&String::from_utf8_lossy(&err.stderr), shell),
        ..ToolResult::default()
    })
}

fn into_tool_result(output: &CommandOutput, shell: &str) -> ToolResult {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = clean_stderr(&String::from_utf8_lossy(&output.stderr), shell);

    let mut notes = Vec::new();
    if output.timed_out {
        notes.push("timeout".to_string());
    } else if output.cancelled {
        notes.push("cancelled".to_string());
    }
    notes.extend(output.notices());

    let error = if output.cancelled {
        Some(ToolErrorKind::Cancelled)
    } else if output.timed_out {
        Some(ToolErrorKind::Timeout)
    } else if !output.status.success() {
        Some(ToolErrorKind::NonZeroExit)
    } else {
        None
    };

    ToolResult {
        ok: error.is_none(),
        stdout,
        stderr,
        exit_code: output.exit_code(),
        error,
        additional_error: (!notes.is_empty()).then(|| notes.join("\n")),
    }
}

/// Replace the temporary script path in shell diagnostics with the shell name.
fn clean_stderr(stderr: &str, shell: &str) -> String {
    static SCRIPT_PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^\S+\.sh: line \d+: ").unwrap());
    let shell_name = shell.rsplit('/').next().unwrap_or(shell);
    SCRIPT_PREFIX_RE
        .replace_all(stderr, format!("{shell_name}: ").as_str())
        .into_owned()
}
