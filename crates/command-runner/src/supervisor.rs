//! Invocation orchestration: validate, spawn, tick, shut down.
//!
//! The supervisor owns the child for the whole invocation. Every failure
//! path converges on the same shutdown sequence: terminate the process
//! tree, give the pumps a bounded drain, close the sinks, reap, classify.

use cr_core::{Captured, CommandSpec, ExecMethod, OutputDecoding, RunnerError};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::options::{self, RunOptions, SinkSpec};
use crate::pump::{self, StreamDecoder};
use crate::sink::{self, StdioDirective};
use crate::{monitor, spawn};

/// Grace between the polite terminate and the forceful kill. Short, so
/// the timeout bound holds with the default tick.
pub(crate) const KILL_GRACE: Duration = Duration::from_millis(200);
const REAP_DEADLINE: Duration = Duration::from_millis(500);

/// Terminal state of one invocation, consumed by the classifier.
#[derive(Debug)]
pub(crate) enum Outcome {
    Exited(ExitStatus),
    Timeout,
    Stopped,
    Interrupted,
    Failed(RunnerError),
}

pub(crate) struct EngineOutput {
    pub outcome: Outcome,
    pub stdout: Captured,
    pub stderr: Option<Captured>,
}

impl EngineOutput {
    /// Pre-spawn failure: the error text is the captured output, so the
    /// caller always has something to show.
    fn failed(error: RunnerError, decoding: OutputDecoding, split_streams: bool) -> Self {
        let message = error.to_string();
        let stdout = match decoding {
            OutputDecoding::Raw => Captured::Bytes(message.into_bytes()),
            OutputDecoding::Text(_) => Captured::Text(message),
        };
        Self {
            outcome: Outcome::Failed(error),
            stdout,
            stderr: split_streams.then(|| Captured::empty(decoding)),
        }
    }
}

enum Verdict {
    Exited(ExitStatus),
    Abort(Outcome),
}

pub(crate) async fn execute(command: CommandSpec, mut opts: RunOptions) -> EngineOutput {
    let decoding = opts.encoding;
    let split_streams = opts.split_streams;

    if let Err(e) = options::validate(&opts) {
        return EngineOutput::failed(e, decoding, split_streams);
    }
    let argv = match spawn::resolve_argv(&command, opts.shell) {
        Ok(argv) => argv,
        Err(e) => return EngineOutput::failed(e, decoding, split_streams),
    };

    let stdout_spec = std::mem::replace(&mut opts.stdout, SinkSpec::Discard);
    let stderr_spec = std::mem::take(&mut opts.stderr);
    let mut streams = match sink::resolve_streams(
        stdout_spec,
        stderr_spec,
        decoding,
        opts.live_output,
        split_streams,
    ) {
        Ok(streams) => streams,
        Err(e) => return EngineOutput::failed(e, decoding, split_streams),
    };

    let (stdin_io, stdin_payload) = spawn::stdin_parts(std::mem::take(&mut opts.stdin));
    let stdout_io = streams.stdout_io.take().unwrap_or(StdioDirective::Null);
    let stderr_io = streams.stderr_io.take().unwrap_or(StdioDirective::Null);
    let cmd = spawn::build_command(&argv, &opts, stdout_io, stderr_io, stdin_io);

    let mut child = match spawn::spawn_child(cmd, &command.display_line(), stdin_payload).await {
        Ok(child) => child,
        Err(e) => return EngineOutput::failed(e, decoding, split_streams),
    };
    let root_pid = child.id();
    debug!(pid = root_pid, command = %command, "spawned child");

    if let Some(callback) = opts.process_callback.take() {
        callback(&child);
    }

    // Keyboard interrupts are latched by a one-shot watcher and observed
    // at tick granularity, so a handler that cannot install never spins
    // the supervisor loop.
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_flag = interrupted.clone();
    let interrupt_watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_flag.store(true, Ordering::SeqCst);
        }
    });

    let mut pumps: Vec<JoinHandle<()>> = Vec::new();
    if opts.method == ExecMethod::Poller {
        if let (Some(stdout), Some(sinks)) = (child.stdout.take(), streams.stdout_sinks.clone()) {
            pumps.push(pump::spawn_pump(
                stdout,
                "stdout",
                opts.bufsize,
                StreamDecoder::new(decoding),
                sinks,
            ));
        }
        if let (Some(stderr), Some(sinks)) = (child.stderr.take(), streams.stderr_sinks.clone()) {
            pumps.push(pump::spawn_pump(
                stderr,
                "stderr",
                opts.bufsize,
                StreamDecoder::new(decoding),
                sinks,
            ));
        }
    }

    let started = Instant::now();
    let verdict = supervise(&mut child, &pumps, &opts, &interrupted, started).await;
    interrupt_watcher.abort();

    let outcome = match verdict {
        Verdict::Exited(status) => {
            let mut outcome = Outcome::Exited(status);
            if opts.method == ExecMethod::Monitor {
                // Bound the drain by the remaining timeout budget (at
                // least one drain window) so a pipe-holding grandchild
                // cannot stall a configured deadline indefinitely.
                let deadline = opts.timeout.map(|t| {
                    (started + t)
                        .saturating_duration_since(Instant::now())
                        .max(drain_deadline(&opts))
                });
                if monitor::drain_once(&mut child, &streams, decoding, deadline).await {
                    // The drain outlived the configured deadline; the
                    // wall-clock bound wins over the native code.
                    outcome = Outcome::Timeout;
                }
            }
            outcome
        }
        Verdict::Abort(outcome) => {
            shutdown_tree(&mut child, root_pid, opts.silent).await;
            if opts.method == ExecMethod::Monitor {
                monitor::drain_once(&mut child, &streams, decoding, Some(drain_deadline(&opts)))
                    .await;
            } else {
                abandon_pumps(pumps, drain_deadline(&opts), opts.silent).await;
            }
            outcome
        }
    };

    streams.close_sinks().await;
    let (stdout, stderr) = streams.take_captured(decoding);
    EngineOutput {
        outcome,
        stdout,
        stderr,
    }
}

fn drain_deadline(opts: &RunOptions) -> Duration {
    opts.check_interval
}

/// The tick loop. Completion requires both the child's exit and pump
/// EOF; timeout, stop predicate, and keyboard interrupt keep being
/// polled while pumps drain, so a blocked sink never outlives a
/// configured deadline.
async fn supervise(
    child: &mut Child,
    pumps: &[JoinHandle<()>],
    opts: &RunOptions,
    interrupted: &AtomicBool,
    started: Instant,
) -> Verdict {
    let deadline = opts.timeout.map(|t| started + t);
    let mut next_heartbeat = opts.heartbeat.map(|h| started + h);
    let mut exit_status: Option<ExitStatus> = None;

    loop {
        if exit_status.is_none() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(?status, "child exited");
                    exit_status = Some(status);
                }
                Ok(None) => {}
                Err(e) => return Verdict::Abort(Outcome::Failed(RunnerError::StreamIo(e))),
            }
        }

        if let Some(status) = exit_status {
            if pumps.iter().all(JoinHandle::is_finished) {
                return Verdict::Exited(status);
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            return Verdict::Abort(Outcome::Interrupted);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Verdict::Abort(Outcome::Timeout);
        }
        if opts.stop_on.as_ref().is_some_and(|stop| stop()) {
            return Verdict::Abort(Outcome::Stopped);
        }

        if let (Some(at), Some(every)) = (next_heartbeat, opts.heartbeat) {
            let now = Instant::now();
            if now >= at {
                if !opts.silent {
                    info!(
                        elapsed_secs = started.elapsed().as_secs(),
                        "child still running"
                    );
                }
                // Catch up past missed intervals without a burst.
                let mut next = at + every;
                while next <= now {
                    next += every;
                }
                next_heartbeat = Some(next);
            }
        }

        tokio::time::sleep(opts.check_interval).await;
    }
}

/// Failure-path teardown: terminate the whole tree rooted at the child,
/// then reap so no zombie outlives the invocation.
async fn shutdown_tree(child: &mut Child, root_pid: Option<u32>, silent: bool) {
    match root_pid {
        Some(pid) => {
            let report = cr_proctree::terminate_tree(pid, KILL_GRACE).await;
            if report.escalated && !silent {
                warn!(
                    pid,
                    killed = report.killed,
                    "escalated to forceful kill for process tree"
                );
            }
            if !report.survivors.is_empty() {
                debug!(pid, survivors = ?report.survivors, "processes survived kill escalation");
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
    let _ = tokio::time::timeout(REAP_DEADLINE, child.wait()).await;
}

/// Give each pump a bounded window to finish delivering already-available
/// bytes, then abandon it and let the descriptor close.
async fn abandon_pumps(pumps: Vec<JoinHandle<()>>, deadline: Duration, silent: bool) {
    for mut handle in pumps {
        if handle.is_finished() {
            continue;
        }
        if tokio::time::timeout(deadline, &mut handle).await.is_err() {
            handle.abort();
            if !silent {
                warn!("abandoned a blocked stream pump during shutdown");
            }
        }
    }
}
