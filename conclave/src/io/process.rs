//! Child process execution with timeouts, bounded capture, and live
//! mirroring.
//!
//! Output is drained line-by-line on reader threads while the child runs,
//! so large outputs cannot deadlock the pipes. Each captured stream is
//! bounded by a byte limit; bytes past the limit are discarded while the
//! pipe keeps draining. On timeout the child gets SIGTERM, a short grace
//! window, then SIGKILL.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::live::LiveLog;

/// Grace window between SIGTERM and SIGKILL on timeout.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Live-mirroring settings for one invocation.
#[derive(Debug, Clone)]
pub struct StreamSink<'a> {
    pub live: &'a LiveLog,
    /// Prefix for mirrored lines, e.g. the agent name.
    pub prefix: String,
    /// Capture stderr but do not mirror it.
    pub suppress_stderr: bool,
}

/// Run `cmd`, writing `stdin` to the child and draining both pipes.
///
/// With a timeout set and exceeded, the child is terminated gracefully then
/// forcefully; the returned output has `timed_out` set, `status` of the
/// killed child, and whatever was captured before the cutoff.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub fn run_streamed(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
    sink: Option<&StreamSink<'_>>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_sink = sink.map(|s| (s.live.clone(), s.prefix.clone()));
    let stderr_sink = sink
        .filter(|s| !s.suppress_stderr)
        .map(|s| (s.live.clone(), format!("{} [stderr]", s.prefix)));

    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, stdout_sink));
    let stderr_handle =
        thread::spawn(move || read_lines_limited(stderr, output_limit_bytes, stderr_sink));

    // Readers are running before stdin is written, so a child that talks
    // while reading cannot fill a pipe and deadlock against us.
    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => Some(status),
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, terminating");
                timed_out = true;
                Some(terminate(&mut child)?)
            }
        },
        None => Some(child.wait().context("wait for command")?),
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let elapsed = started.elapsed();
    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

/// SIGTERM, wait up to the grace window, then SIGKILL.
fn terminate(child: &mut Child) -> Result<ExitStatus> {
    send_sigterm(child);
    if let Some(status) = child.wait_timeout(TERM_GRACE).context("wait after sigterm")? {
        return Ok(status);
    }
    warn!("child ignored graceful termination, killing");
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    // SAFETY: kill(2) with a pid we own and a valid signal number has no
    // memory-safety preconditions.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid = child.id(), "failed to deliver SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line-by-line with a byte limit, optionally mirroring each
/// line to the live log as it arrives.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    sink: Option<(LiveLog, String)>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some((live, prefix)) = &sink {
            let text = String::from_utf8_lossy(&line);
            live.prefixed(prefix, text.trim_end_matches(['\n', '\r']));
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
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
    fn captures_stdout_and_stderr() {
        let output = run_streamed(
            sh("echo out; echo err >&2"),
            None,
            Some(Duration::from_secs(10)),
            100_000,
            None,
        )
        .expect("run");
        assert_eq!(output.stdout_text(), "out\n");
        assert_eq!(output.stderr_text(), "err\n");
        assert!(!output.timed_out);
        assert!(output.status.expect("status").success());
    }

    #[test]
    fn stdin_is_fed_to_the_child() {
        let output = run_streamed(
            sh("cat"),
            Some(b"prompt body"),
            Some(Duration::from_secs(10)),
            100_000,
            None,
        )
        .expect("run");
        assert_eq!(output.stdout_text(), "prompt body");
    }

    #[test]
    fn timeout_terminates_and_reports() {
        let output = run_streamed(
            sh("echo early; sleep 30; echo late"),
            None,
            Some(Duration::from_millis(300)),
            100_000,
            None,
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.stdout_text(), "early\n");
        assert!(output.elapsed < Duration::from_secs(20));
    }

    #[test]
    fn output_beyond_limit_is_discarded_but_drained() {
        let output = run_streamed(
            sh("yes abcdefgh | head -c 5000"),
            None,
            Some(Duration::from_secs(10)),
            100,
            None,
        )
        .expect("run");
        assert!(output.stdout.len() <= 100);
        assert!(output.stdout_truncated > 0);
    }

    #[test]
    fn lines_are_mirrored_to_live_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let live = LiveLog::open(&temp.path().join("live.log")).expect("live");
        let sink = StreamSink {
            live: &live,
            prefix: "agent-a".to_string(),
            suppress_stderr: true,
        };

        run_streamed(
            sh("echo visible; echo hidden >&2"),
            None,
            Some(Duration::from_secs(10)),
            100_000,
            Some(&sink),
        )
        .expect("run");

        let contents = std::fs::read_to_string(temp.path().join("live.log")).expect("read");
        assert!(contents.contains("agent-a: visible"));
        assert!(!contents.contains("hidden"));
    }
}
