//! Invocation options and their validation.

use cr_core::{ExecMethod, OutputChunk, OutputDecoding, Priority, RunnerError, ValidExitCodes};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::Reply;

/// Chunk consumer invoked synchronously by the stream pump.
///
/// Must not re-enter the engine with the same child handle.
pub type ChunkCallback = Box<dyn FnMut(&OutputChunk) + Send>;

/// External abort predicate, polled once per supervisor tick.
pub type StopPredicate = Box<dyn Fn() -> bool + Send>;

/// Invoked once with the child handle, after spawn and before the first
/// supervisor tick.
pub type ProcessCallback = Box<dyn FnOnce(&tokio::process::Child) + Send>;

/// Invoked with the classified result, after classification and before
/// the engine returns.
pub type ExitCallback = Box<dyn FnOnce(&Reply) + Send>;

/// Destination for one output stream.
pub enum SinkSpec {
    /// Capture into the returned output (an anonymous pipe).
    Capture,
    /// Discard at the OS level.
    Discard,
    /// Pass the parent's own descriptor through.
    Inherit,
    /// Write live to a file, created and truncated by the engine.
    File(PathBuf),
    /// Deliver each chunk to a bounded queue; the channel closing is the
    /// end-of-stream sentinel. A full queue applies backpressure to the
    /// pump.
    Queue(mpsc::Sender<OutputChunk>),
    /// Deliver each chunk to a callback.
    Callback(ChunkCallback),
}

impl SinkSpec {
    /// Whether this sink needs a live reader task.
    pub(crate) fn needs_pump(&self) -> bool {
        matches!(self, Self::Capture | Self::Queue(_) | Self::Callback(_))
    }

    pub(crate) fn is_live_delivery(&self) -> bool {
        matches!(self, Self::Queue(_) | Self::Callback(_))
    }
}

impl fmt::Debug for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("Capture"),
            Self::Discard => f.write_str("Discard"),
            Self::Inherit => f.write_str("Inherit"),
            Self::File(path) => write!(f, "File({})", path.display()),
            Self::Queue(_) => f.write_str("Queue"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Destination for the stderr stream.
///
/// The default merges stderr into stdout's destination at read-chunk
/// granularity. Under `split_streams` a `Merged` stderr is captured
/// separately instead, so the triple shape is always well-formed.
#[derive(Debug, Default)]
pub enum StderrSpec {
    #[default]
    Merged,
    Sink(SinkSpec),
}

/// What the child reads on stdin.
///
/// `Bytes` writes a one-shot payload from a detached writer task and then
/// closes the pipe; it is not incremental stdin scripting.
#[derive(Default)]
pub enum StdinSpec {
    #[default]
    Null,
    Inherit,
    Handle(Stdio),
    Bytes(Vec<u8>),
}

impl fmt::Debug for StdinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Inherit => f.write_str("Inherit"),
            Self::Handle(_) => f.write_str("Handle"),
            Self::Bytes(payload) => write!(f, "Bytes({} bytes)", payload.len()),
        }
    }
}

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_BUFSIZE: usize = 16_384;

/// Options for one engine invocation.
///
/// Read-only to the engine; consumed by the call (handles and closures
/// move in).
pub struct RunOptions {
    /// Upper bound on total wall time; `None` disables.
    pub timeout: Option<Duration>,
    /// Run through the platform shell (`/bin/sh -c` or `cmd.exe /c`).
    pub shell: bool,
    /// Text codec for child output, or raw byte passthrough.
    pub encoding: OutputDecoding,
    pub stdin: StdinSpec,
    pub stdout: SinkSpec,
    pub stderr: StderrSpec,
    /// Return (exit, stdout, stderr) instead of (exit, merged).
    pub split_streams: bool,
    /// Duplicate captured output to the parent's stdout as it arrives.
    pub live_output: bool,
    pub method: ExecMethod,
    /// Supervisor tick.
    pub check_interval: Duration,
    /// Abort with the stop-request code when this returns true.
    pub stop_on: Option<StopPredicate>,
    pub process_callback: Option<ProcessCallback>,
    pub on_exit: Option<ExitCallback>,
    /// Exit codes that must not produce ERROR log events.
    pub valid_exit_codes: ValidExitCodes,
    /// Suppress the engine's non-debug log emission.
    pub silent: bool,
    pub priority: Option<Priority>,
    pub io_priority: Option<Priority>,
    /// Seconds between "still running" observability events.
    pub heartbeat: Option<Duration>,
    /// Suppress the console window on Windows.
    pub windows_no_window: bool,
    /// Pipe read size.
    pub bufsize: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            shell: false,
            encoding: OutputDecoding::default(),
            stdin: StdinSpec::default(),
            stdout: SinkSpec::Capture,
            stderr: StderrSpec::default(),
            split_streams: false,
            live_output: false,
            method: ExecMethod::default(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            stop_on: None,
            process_callback: None,
            on_exit: None,
            valid_exit_codes: ValidExitCodes::default(),
            silent: false,
            priority: None,
            io_priority: None,
            heartbeat: None,
            windows_no_window: false,
            bufsize: DEFAULT_BUFSIZE,
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("shell", &self.shell)
            .field("encoding", &self.encoding)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("split_streams", &self.split_streams)
            .field("live_output", &self.live_output)
            .field("method", &self.method)
            .field("check_interval", &self.check_interval)
            .field("valid_exit_codes", &self.valid_exit_codes)
            .field("silent", &self.silent)
            .field("heartbeat", &self.heartbeat)
            .field("bufsize", &self.bufsize)
            .finish_non_exhaustive()
    }
}

/// Reject option combinations the engine cannot honor.
pub(crate) fn validate(opts: &RunOptions) -> Result<(), RunnerError> {
    if opts.bufsize == 0 {
        return Err(RunnerError::InvalidOptions("bufsize must be positive".into()));
    }
    if opts.check_interval.is_zero() {
        return Err(RunnerError::InvalidOptions(
            "check_interval must be positive".into(),
        ));
    }
    if opts.method == ExecMethod::Monitor {
        let stderr_live = match &opts.stderr {
            StderrSpec::Sink(spec) => spec.is_live_delivery(),
            StderrSpec::Merged => false,
        };
        if opts.stdout.is_live_delivery() || stderr_live {
            return Err(RunnerError::InvalidOptions(
                "queue and callback sinks require the poller method".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = RunOptions::default();
        assert_eq!(opts.check_interval, Duration::from_millis(50));
        assert_eq!(opts.bufsize, 16_384);
        assert!(matches!(opts.stdout, SinkSpec::Capture));
        assert!(matches!(opts.stderr, StderrSpec::Merged));
        assert!(!opts.split_streams);
        assert_eq!(opts.method, ExecMethod::Poller);
    }

    #[test]
    fn monitor_rejects_queue_sink() {
        let (tx, _rx) = mpsc::channel(8);
        let opts = RunOptions {
            method: ExecMethod::Monitor,
            stdout: SinkSpec::Queue(tx),
            ..Default::default()
        };
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn monitor_rejects_callback_stderr() {
        let opts = RunOptions {
            method: ExecMethod::Monitor,
            stderr: StderrSpec::Sink(SinkSpec::Callback(Box::new(|_| {}))),
            ..Default::default()
        };
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn monitor_accepts_capture() {
        let opts = RunOptions {
            method: ExecMethod::Monitor,
            ..Default::default()
        };
        assert!(validate(&opts).is_ok());
    }

    #[test]
    fn zero_bufsize_is_invalid() {
        let opts = RunOptions {
            bufsize: 0,
            ..Default::default()
        };
        assert!(validate(&opts).is_err());
    }
}
