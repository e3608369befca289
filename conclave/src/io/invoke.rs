//! Agent invocation seam.
//!
//! The [`Invoker`] trait decouples the state machine from the actual agent
//! CLIs. Production uses [`CliInvoker`]; tests use scripted invokers that
//! return predetermined outputs without spawning processes.

use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::model::{Agent, Envelope};
use crate::core::parse::parse_envelope;
use crate::io::live::LiveLog;
use crate::io::process::{StreamSink, run_streamed};

/// Sentinel exit code reported for timed-out invocations, distinct from any
/// real child exit code.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when the child was killed by a signal and no code is
/// available.
pub const SIGNALED_EXIT_CODE: i32 = -2;

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Human-readable failure note (timeout description etc).
    pub error: Option<String>,
}

impl InvokeOutput {
    /// Successful invocation with the given stdout (test construction aid).
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.exit_code != 0
    }
}

/// One unit of fan-out work: which agent, what prompt, how to label output.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub agent: Agent,
    pub prompt: String,
    /// Prefix for live-mirrored lines; `None` disables mirroring.
    pub live_prefix: Option<String>,
}

/// Abstraction over agent execution backends.
pub trait Invoker: Sync {
    fn invoke(&self, request: &InvokeRequest, live: Option<&LiveLog>) -> Result<InvokeOutput>;
}

/// Invoker that spawns the agent's configured command, writes the prompt to
/// stdin, and captures output with the configured byte limit.
pub struct CliInvoker {
    pub output_limit_bytes: usize,
}

impl Default for CliInvoker {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Invoker for CliInvoker {
    #[instrument(skip_all, fields(agent = %request.agent.name))]
    fn invoke(&self, request: &InvokeRequest, live: Option<&LiveLog>) -> Result<InvokeOutput> {
        let agent = &request.agent;
        let mut parts = agent.cmd.iter();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("agent '{}' has an empty command", agent.name))?;
        let mut cmd = Command::new(program);
        cmd.args(parts);

        info!(agent = %agent.name, timeout_secs = ?agent.timeout_secs, "invoking agent");

        let sink = match (live, &request.live_prefix) {
            (Some(live), Some(prefix)) => Some(StreamSink {
                live,
                prefix: prefix.clone(),
                suppress_stderr: agent.suppress_stderr,
            }),
            _ => None,
        };

        let timeout = agent.timeout_secs.map(Duration::from_secs);
        let output = run_streamed(
            cmd,
            Some(request.prompt.as_bytes()),
            timeout,
            self.output_limit_bytes,
            sink.as_ref(),
        )
        .with_context(|| format!("run agent '{}'", agent.name))?;

        if output.timed_out {
            return Ok(InvokeOutput {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                timed_out: true,
                error: Some(format!(
                    "timed out after {:.0}s",
                    output.elapsed.as_secs_f64()
                )),
            });
        }

        let exit_code = output
            .status
            .and_then(|s| s.code())
            .unwrap_or(SIGNALED_EXIT_CODE);
        Ok(InvokeOutput {
            exit_code,
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            timed_out: false,
            error: None,
        })
    }
}

/// Fan out a batch of invocations and wait for all of them.
///
/// Requests run concurrently on scoped threads; the call returns only when
/// every member has finished (fan-out/fan-in barrier). Results come back in
/// request order; no ordering is guaranteed between the invocations
/// themselves.
pub fn run_batch<I: Invoker + ?Sized>(
    invoker: &I,
    live: Option<&LiveLog>,
    requests: &[InvokeRequest],
) -> Vec<Result<InvokeOutput>> {
    if requests.len() == 1 {
        return vec![invoker.invoke(&requests[0], live)];
    }
    thread::scope(|scope| {
        let handles: Vec<_> = requests
            .iter()
            .map(|request| scope.spawn(move || invoker.invoke(request, live)))
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("invocation thread panicked")),
            })
            .collect()
    })
}

/// Interpret an invocation as a conversational envelope.
///
/// Timeouts and silent failures become error envelopes; a non-zero exit
/// with output is logged and parsed anyway (some CLIs exit non-zero after
/// printing a usable reply).
pub fn envelope_from_invoke(agent: &Agent, output: &InvokeOutput) -> Envelope {
    if output.timed_out {
        return Envelope::error(
            output
                .error
                .clone()
                .unwrap_or_else(|| "invocation timed out".to_string()),
        );
    }
    if output.failed() && output.stdout.trim().is_empty() {
        let stderr: String = output.stderr.chars().take(500).collect();
        return Envelope::error(format!("Exit code {}: {stderr}", output.exit_code));
    }
    if output.failed() {
        warn!(agent = %agent.name, exit_code = output.exit_code, "agent exited non-zero but produced output");
    }
    parse_envelope(&output.stdout, agent.kind)
}
