//! Running the agent process under a deadline with bounded output capture.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Parameters for one process invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// The process is killed once this elapses.
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory (the rest is drained and dropped).
    pub output_limit_bytes: usize,
}

/// Captured output of a process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn truncated_notice(&self) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        notice
    }
}

/// Why a process did not produce a [`ProcessOutput`].
#[derive(Debug)]
pub enum ProcessError {
    /// Deadline expired; the process was killed. Carries what it printed so far.
    Timeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    /// The executable could not be started.
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    /// Waiting on or collecting from a started process failed.
    Io { message: String },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Timeout { timeout, .. } => {
                write!(f, "timeout after {}ms", timeout.as_millis())
            }
            ProcessError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {source}", program.display())
            }
            ProcessError::Io { message } => write!(f, "process i/o failed: {message}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Abstraction over process execution so the scheduler can be tested without spawning.
pub trait ProcessRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, ProcessError>;
}

/// Runs real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args).current_dir(&request.workdir);
        run_command_with_timeout(cmd, &request.program, request.timeout, request.output_limit_bytes)
    }
}

/// How long output readers may keep draining once the child is gone.
///
/// Background processes the agent left behind can hold the pipes open
/// indefinitely; after this grace the readers are abandoned with whatever they
/// captured.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// On unix the child leads its own process group and the whole group is killed at the deadline.
#[instrument(skip_all, fields(program = %program.display(), timeout_secs = timeout.as_secs()))]
fn run_command_with_timeout(
    mut cmd: Command,
    program: &std::path::Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(ProcessError::Spawn {
                program: program.to_path_buf(),
                source: e,
            });
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| io_error("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| io_error("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child
        .wait_timeout(timeout)
        .map_err(|e| io_error(format!("wait for command: {e}")))?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(&mut child)?;
            child
                .wait()
                .map_err(|e| io_error(format!("wait command after kill: {e}")))?
        }
    };

    await_readers(&done_rx, 2, Instant::now() + OUTPUT_DRAIN_GRACE)?;
    let (stdout, stdout_truncated) = stdout_capture.take();
    let (stderr, stderr_truncated) = stderr_capture.take();
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    if timed_out {
        return Err(ProcessError::Timeout {
            timeout,
            stdout,
            stderr,
        });
    }

    debug!(exit_code = ?status.code(), duration_ms, "command finished");
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        duration_ms,
    })
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<(), ProcessError> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).map_err(|_| io_error("child pid out of range"))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(errno) => {
            warn!(err = %errno, "killing process group failed; killing child only");
            child
                .kill()
                .map_err(|e| io_error(format!("kill command: {e}")))
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<(), ProcessError> {
    child
        .kill()
        .map_err(|e| io_error(format!("kill command: {e}")))
}

fn io_error(message: impl Into<String>) -> ProcessError {
    ProcessError::Io {
        message: message.into(),
    }
}

/// Bytes kept from one stream plus the count of bytes dropped past the limit.
#[derive(Debug, Default)]
struct StreamCapture {
    kept: Vec<u8>,
    truncated: usize,
}

/// Capture shared with a reader thread so it can be read without joining it.
#[derive(Debug, Clone, Default)]
struct SharedCapture(Arc<Mutex<StreamCapture>>);

impl SharedCapture {
    fn push(&self, chunk: &[u8], limit: usize) {
        let mut capture = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(capture.kept.len());
        let keep = chunk.len().min(remaining);
        capture.kept.extend_from_slice(&chunk[..keep]);
        capture.truncated += chunk.len() - keep;
    }

    fn take(&self) -> (Vec<u8>, usize) {
        let mut capture = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let taken = std::mem::take(&mut *capture);
        (taken.kept, taken.truncated)
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    done: Sender<std::io::Result<()>>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let sink = capture.clone();
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit, &sink);
        // The receiver is gone once the readers were abandoned.
        let _ = done.send(result);
    });
    capture
}

/// Wait for `count` readers to hit EOF, giving up at `deadline`.
fn await_readers(
    done: &Receiver<std::io::Result<()>>,
    count: usize,
    deadline: Instant,
) -> Result<(), ProcessError> {
    for _ in 0..count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(io_error(format!("read output: {e}"))),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_secs = OUTPUT_DRAIN_GRACE.as_secs(),
                    "output pipes still held by background processes; abandoning readers"
                );
                return Ok(());
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io_error("output reader thread panicked"));
            }
        }
    }
    Ok(())
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    capture: &SharedCapture,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        capture.push(&chunk[..n], limit);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration, limit: usize) -> ProcessRequest {
        ProcessRequest {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: std::env::temp_dir(),
            timeout,
            output_limit_bytes: limit,
        }
    }

    #[test]
    fn captures_exit_code_and_streams() {
        let output = SystemProcessRunner
            .run(&sh("echo out; echo err >&2; exit 3", Duration::from_secs(10), 1000))
            .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = SystemProcessRunner
            .run(&sh("printf 0123456789", Duration::from_secs(10), 4))
            .expect("run");
        assert_eq!(output.stdout, "0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.truncated_notice().contains("stdout truncated 6 bytes"));
    }

    #[test]
    fn kills_process_after_timeout() {
        let err = SystemProcessRunner
            .run(&sh("echo early; exec sleep 5", Duration::from_millis(200), 1000))
            .unwrap_err();
        match err {
            ProcessError::Timeout { stdout, .. } => assert_eq!(stdout, "early\n"),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[test]
    fn timeout_kills_background_children_too() {
        let started = Instant::now();
        let err = SystemProcessRunner
            .run(&sh(
                "sleep 4 & echo started; sleep 30",
                Duration::from_millis(300),
                1000,
            ))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        match err {
            ProcessError::Timeout { stdout, .. } => assert_eq!(stdout, "started\n"),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[test]
    fn background_process_holding_pipes_does_not_block_exit() {
        let started = Instant::now();
        let output = SystemProcessRunner
            .run(&sh(
                "sleep 5 & echo shipped the server; exit 0",
                Duration::from_secs(30),
                1000,
            ))
            .expect("run");
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "shipped the server\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let request = ProcessRequest {
            program: PathBuf::from("/definitely/not/a/real/binary"),
            ..sh("true", Duration::from_secs(1), 10)
        };
        let err = SystemProcessRunner.run(&request).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
