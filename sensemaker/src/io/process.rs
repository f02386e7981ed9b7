//! Helpers for running child processes with timeouts and bounded output.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Time allowed after the deadline for output pipes to close.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last `limit` characters of stderr, lossily decoded.
    pub fn stderr_tail(&self, limit: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(limit);
        text.chars().skip(skip).collect()
    }
}

/// Kills and reaps the child if it is still running when dropped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let status = self.child.wait_timeout(timeout)?;
        self.reaped = status.is_some();
        Ok(status)
    }

    fn kill_and_wait(&mut self) -> io::Result<ExitStatus> {
        self.child.kill()?;
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is written and output is read on separate threads while the child runs.
/// `output_limit_bytes` bounds the amount of stdout/stderr stored in memory (bytes
/// beyond this are discarded while still draining the pipe). A child that exits
/// before reading its input is not an error.
///
/// `timeout` is a wall-clock bound on the whole call. Output still arriving from
/// processes the child left behind is abandoned and reported as `timed_out`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let mut guard = ChildGuard {
        child,
        reaped: false,
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = guard
                .child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || write_stdin(&mut child_stdin, &input)))
        }
        None => None,
    };

    let stdout = guard
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = guard
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let started = Instant::now();
    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match guard.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            guard.kill_and_wait().context("kill command")?
        }
    };

    // Grandchildren may still hold the pipes after the child is reaped. Readers
    // get until the deadline plus a short grace, then they are abandoned.
    let drain_deadline = (started + timeout).max(Instant::now()) + DRAIN_GRACE;
    let stdout = collect_output(&stdout_rx, drain_deadline).context("read stdout")?;
    let stderr = collect_output(&stderr_rx, drain_deadline).context("read stderr")?;
    if stdout.is_none() || stderr.is_none() {
        warn!("output pipes still open after the command exited, abandoning readers");
        timed_out = true;
    }
    let (stdout, stdout_truncated) = stdout.unwrap_or_default();
    let (stderr, stderr_truncated) = stderr.unwrap_or_default();

    if let Some(handle) = stdin_handle {
        if handle.is_finished() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(err = %err, "failed to write stdin"),
                Err(_) => return Err(anyhow!("stdin writer thread panicked")),
            }
        } else {
            debug!("stdin writer still blocked, detaching");
        }
    }

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn write_stdin<W: Write>(writer: &mut W, input: &[u8]) -> io::Result<()> {
    match writer.write_all(input).and_then(|()| writer.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed stdin early");
            Ok(())
        }
        other => other,
    }
}

type Captured = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> mpsc::Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the reader has been abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait for a reader until `deadline`. `None` means the pipe was still open.
fn collect_output(
    rx: &mpsc::Receiver<Captured>,
    deadline: Instant,
) -> Result<Option<(Vec<u8>, usize)>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(captured) => captured.map(Some),
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn echoes_stdin_and_bounds_output() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"0123456789".to_vec()),
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(!output.timed_out);
    }

    #[test]
    fn times_out_and_kills_the_child() {
        let output =
            run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 1024)
                .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn timeout_is_not_extended_by_grandchildren_holding_the_pipes() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6; echo late"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        let elapsed = started.elapsed();
        assert!(output.timed_out);
        assert!(elapsed < Duration::from_secs(3), "returned after {elapsed:?}");
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn lingering_background_output_counts_as_timeout() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6 & echo early"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let input = vec![b'x'; 1 << 20];
        let output =
            run_command_with_timeout(sh("echo done"), Some(input), Duration::from_secs(5), 1024)
                .expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "done");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/nonexistent/sensemaker-binary"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let output = run_command_with_timeout(
            sh("echo 'first line' >&2; echo 'last' >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(4), "last");
    }
}
