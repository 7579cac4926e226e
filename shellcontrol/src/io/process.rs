//! Helpers for running child processes with timeouts, cancellation and bounded output.
//!
//! Children run in their own process group. A timeout or cancellation kills the
//! whole group, so commands started by a shell script die with it.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    /// The pipe was still open when the grace period ran out.
    pub stdout_incomplete: bool,
    pub stderr_incomplete: bool,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    /// Exit code, only when the child exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out || self.cancelled {
            None
        } else {
            self.status.code()
        }
    }

    /// Truncation and lost-output notes, stdout first.
    pub fn notices(&self) -> Vec<String> {
        let streams = [
            ("stdout", self.stdout_truncated, self.stdout_incomplete),
            ("stderr", self.stderr_truncated, self.stderr_incomplete),
        ];
        let mut notes = Vec::new();
        for (label, truncated, incomplete) in streams {
            if truncated > 0 {
                notes.push(format!("[{label} truncated {truncated} bytes]"));
            }
            if incomplete {
                notes.push(format!(
                    "[{label} may be incomplete: still open after the process ended]"
                ));
            }
        }
        notes
    }
}

/// A run that failed after the child was spawned.
///
/// Carries whatever output was read before the failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RunError {
    pub message: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunError {
    fn without_output(err: anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

/// Limits applied to a single child process.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// How long to keep draining pipes after the child is gone.
    pub grace: Duration,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child's process group is killed when the timeout elapses or `cancel` fires.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    limits: RunLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(RunError::without_output(
                anyhow::Error::new(e).context("spawn command"),
            ));
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_group(&mut child);
        reap(&mut child);
        return Err(RunError::without_output(anyhow!(
            "stdout/stderr were not piped"
        )));
    };

    let limit = limits.output_limit_bytes;
    let stdout_reader = StreamReader::spawn(stdout, limit);
    let stderr_reader = StreamReader::spawn(stderr, limit);

    let waited = wait_for_exit(&mut child, limits.timeout, cancel);
    if waited.is_err() {
        kill_group(&mut child);
        reap(&mut child);
    }

    // Orphaned grandchildren may keep the pipes open; stop waiting after the grace period.
    let stdout = stdout_reader.collect(limits.grace, "stdout");
    let stderr = stderr_reader.collect(limits.grace, "stderr");

    let exit = match waited {
        Ok(exit) => exit,
        Err(err) => {
            error!(err = %format!("{err:#}"), "waiting for command failed");
            return Err(RunError {
                message: format!("{err:#}"),
                stdout: stdout.bytes,
                stderr: stderr.bytes,
            });
        }
    };

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(
        exit_code = ?exit.status.code(),
        timed_out = exit.timed_out,
        cancelled = exit.cancelled,
        "command finished"
    );
    Ok(CommandOutput {
        status: exit.status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        stdout_incomplete: !stdout.complete,
        stderr_incomplete: !stderr.complete,
        timed_out: exit.timed_out,
        cancelled: exit.cancelled,
    })
}

struct Exit {
    status: ExitStatus,
    timed_out: bool,
    cancelled: bool,
}

fn wait_for_exit(child: &mut Child, timeout: Duration, cancel: &CancellationToken) -> Result<Exit> {
    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    loop {
        let slice = deadline
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok(Exit {
                status,
                timed_out,
                cancelled,
            });
        }
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            cancelled = true;
        } else if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
        } else {
            continue;
        }
        kill_group(child);
        let status = child.wait().context("wait command after kill")?;
        return Ok(Exit {
            status,
            timed_out,
            cancelled,
        });
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL the child's process group, falling back to the child alone.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(pid) => match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => return,
            Err(err) => warn!(err = %err, "failed to kill process group"),
        },
        Err(_) => warn!(pid = child.id(), "pid out of range for a process group"),
    }
    if let Err(e) = child.kill() {
        warn!(err = %e, "failed to kill command");
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(err = %e, "failed to kill command");
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.wait() {
        warn!(err = %e, "failed to reap command");
    }
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: usize,
}

struct StreamOutput {
    bytes: Vec<u8>,
    truncated: usize,
    complete: bool,
}

/// Background reader filling a shared buffer, so a caller that stops waiting
/// still gets everything read so far.
struct StreamReader {
    capture: Arc<Mutex<Capture>>,
    done: mpsc::Receiver<std::io::Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let shared = Arc::clone(&capture);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &shared));
        });
        Self { capture, done }
    }

    fn collect(self, grace: Duration, label: &str) -> StreamOutput {
        let complete = match self.done.recv_timeout(grace) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(stream = label, err = %e, "reading output failed");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(stream = label, "output pipe still open after grace period");
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(stream = label, "output reader thread panicked");
                false
            }
        };
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        StreamOutput {
            bytes: std::mem::take(&mut capture.bytes),
            truncated: capture.truncated,
            complete,
        }
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    capture: &Mutex<Capture>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(capture.bytes.len());
        let keep = n.min(remaining);
        capture.bytes.extend_from_slice(&chunk[..keep]);
        capture.truncated += n - keep;
    }
}
