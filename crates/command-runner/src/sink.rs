//! Uniform sink objects behind the caller-facing sink specifiers.
//!
//! Pump-serviced streams get a [`SinkSet`]: an ordered fan-out of
//! accumulator, queue, callback, and live echo. File, discard, and
//! inherit specifiers never traverse the pump; they become OS-level
//! descriptors at spawn time.

use cr_core::{Captured, OutputChunk, OutputDecoding, RunnerError};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::options::{ChunkCallback, SinkSpec, StderrSpec};

/// Shared accumulator for one captured stream. Appends never suspend, so
/// the lock is a plain mutex held only for the copy.
pub(crate) type BufferHandle = Arc<Mutex<Captured>>;

pub(crate) type SharedSinks = Arc<tokio::sync::Mutex<SinkSet>>;

pub(crate) enum SinkTarget {
    Buffer(BufferHandle),
    Queue(mpsc::Sender<OutputChunk>),
    Callback(ChunkCallback),
    /// `live_output`: duplicate to the parent's stdout as chunks arrive.
    Echo,
}

/// Ordered fan-out of sink targets for one logical stream.
pub(crate) struct SinkSet {
    targets: Vec<SinkTarget>,
}

impl SinkSet {
    /// Deliver one chunk to every target, in registration order.
    ///
    /// A full queue blocks here, which is the backpressure contract: the
    /// pump stalls, the supervisor keeps ticking.
    pub(crate) async fn dispatch(&mut self, chunk: &OutputChunk) {
        for target in &mut self.targets {
            match target {
                SinkTarget::Buffer(buffer) => {
                    if let Ok(mut buffer) = buffer.lock() {
                        buffer.push(chunk);
                    }
                }
                SinkTarget::Queue(tx) => {
                    // A dropped consumer is not an engine failure.
                    let _ = tx.send(chunk.clone()).await;
                }
                SinkTarget::Callback(callback) => callback(chunk),
                SinkTarget::Echo => echo(chunk),
            }
        }
    }

    /// Close every target. Dropping a queue sender closes the channel,
    /// which is the end-of-stream sentinel the consumer observes exactly
    /// once; callbacks are simply never invoked again.
    pub(crate) fn close(&mut self) {
        self.targets.clear();
    }
}

fn echo(chunk: &OutputChunk) {
    use std::io::Write;
    let mut out = std::io::stdout().lock();
    let _ = match chunk {
        OutputChunk::Text(text) => out.write_all(text.as_bytes()),
        OutputChunk::Bytes(bytes) => out.write_all(bytes),
    };
    let _ = out.flush();
}

/// How the spawner should wire one child descriptor.
pub(crate) enum StdioDirective {
    Piped,
    Null,
    Inherit,
    File(std::fs::File),
}

impl StdioDirective {
    pub(crate) fn into_stdio(self) -> Stdio {
        match self {
            Self::Piped => Stdio::piped(),
            Self::Null => Stdio::null(),
            Self::Inherit => Stdio::inherit(),
            Self::File(file) => Stdio::from(file),
        }
    }
}

/// The per-invocation stream wiring produced from the sink specifiers.
pub(crate) struct ResolvedStreams {
    pub stdout_io: Option<StdioDirective>,
    pub stderr_io: Option<StdioDirective>,
    pub stdout_sinks: Option<SharedSinks>,
    pub stderr_sinks: Option<SharedSinks>,
    pub stdout_buffer: Option<BufferHandle>,
    pub stderr_buffer: Option<BufferHandle>,
    /// True when stderr feeds stdout's sink set.
    pub merged: bool,
}

impl ResolvedStreams {
    /// Close sink sets in the deterministic order: stdout first, then
    /// stderr. A merged stderr shares stdout's set and is closed with it.
    pub(crate) async fn close_sinks(&mut self) {
        if let Some(sinks) = &self.stdout_sinks {
            sinks.lock().await.close();
        }
        if !self.merged {
            if let Some(sinks) = &self.stderr_sinks {
                sinks.lock().await.close();
            }
        }
    }

    pub(crate) fn take_captured(&self, decoding: OutputDecoding) -> (Captured, Option<Captured>) {
        let stdout = take_buffer(&self.stdout_buffer, decoding);
        let stderr = self
            .stderr_buffer
            .as_ref()
            .map(|_| take_buffer(&self.stderr_buffer, decoding));
        (stdout, stderr)
    }
}

fn take_buffer(buffer: &Option<BufferHandle>, decoding: OutputDecoding) -> Captured {
    buffer
        .as_ref()
        .and_then(|b| b.lock().ok().map(|mut b| std::mem::replace(&mut *b, Captured::empty(decoding))))
        .unwrap_or_else(|| Captured::empty(decoding))
}

/// Resolve the caller's sink specifiers once, at entry.
pub(crate) fn resolve_streams(
    stdout: SinkSpec,
    stderr: StderrSpec,
    decoding: OutputDecoding,
    live_output: bool,
    split_streams: bool,
) -> Result<ResolvedStreams, RunnerError> {
    let (stdout_io, stdout_sinks, stdout_buffer) = resolve_one(stdout, decoding, live_output)?;

    // Under split_streams a "merged" stderr still needs its own capture
    // so the returned triple is well-formed.
    let stderr_spec = match (stderr, split_streams) {
        (StderrSpec::Merged, true) => Some(SinkSpec::Capture),
        (StderrSpec::Merged, false) => None,
        (StderrSpec::Sink(spec), _) => Some(spec),
    };

    let mut resolved = match stderr_spec {
        Some(spec) => {
            let (stderr_io, stderr_sinks, stderr_buffer) =
                resolve_one(spec, decoding, live_output)?;
            ResolvedStreams {
                stdout_io: Some(stdout_io),
                stderr_io: Some(stderr_io),
                stdout_sinks,
                stderr_sinks,
                stdout_buffer,
                stderr_buffer,
                merged: false,
            }
        }
        None => merge_into_stdout(stdout_io, stdout_sinks, stdout_buffer)?,
    };

    // A split invocation always reports a stderr capture, even when the
    // stream itself went to an OS-level destination.
    if split_streams && resolved.stderr_buffer.is_none() {
        resolved.stderr_buffer = Some(Arc::new(Mutex::new(Captured::empty(decoding))));
    }
    Ok(resolved)
}

fn resolve_one(
    spec: SinkSpec,
    decoding: OutputDecoding,
    live_output: bool,
) -> Result<(StdioDirective, Option<SharedSinks>, Option<BufferHandle>), RunnerError> {
    let pumped = |extra: Option<SinkTarget>| {
        let buffer: BufferHandle = Arc::new(Mutex::new(Captured::empty(decoding)));
        let mut targets = vec![SinkTarget::Buffer(buffer.clone())];
        if let Some(extra) = extra {
            targets.push(extra);
        }
        if live_output {
            targets.push(SinkTarget::Echo);
        }
        let sinks: SharedSinks = Arc::new(tokio::sync::Mutex::new(SinkSet { targets }));
        (StdioDirective::Piped, Some(sinks), Some(buffer))
    };

    Ok(match spec {
        SinkSpec::Capture => pumped(None),
        SinkSpec::Queue(tx) => pumped(Some(SinkTarget::Queue(tx))),
        SinkSpec::Callback(callback) => pumped(Some(SinkTarget::Callback(callback))),
        SinkSpec::Discard => (StdioDirective::Null, None, None),
        SinkSpec::Inherit => (StdioDirective::Inherit, None, None),
        SinkSpec::File(path) => {
            let file = std::fs::File::create(&path)
                .map_err(|source| RunnerError::Redirect { path, source })?;
            (StdioDirective::File(file), None, None)
        }
    })
}

/// `stderr = merge into stdout`: share the pump sink set when stdout is
/// pumped, otherwise mirror stdout's OS-level descriptor.
fn merge_into_stdout(
    stdout_io: StdioDirective,
    stdout_sinks: Option<SharedSinks>,
    stdout_buffer: Option<BufferHandle>,
) -> Result<ResolvedStreams, RunnerError> {
    let (stdout_io, stderr_io, merged) = match (&stdout_sinks, stdout_io) {
        (Some(_), io) => (io, StdioDirective::Piped, true),
        (None, StdioDirective::Null) => (StdioDirective::Null, StdioDirective::Null, false),
        (None, StdioDirective::Inherit) => {
            (StdioDirective::Inherit, StdioDirective::Inherit, false)
        }
        (None, StdioDirective::File(file)) => {
            let clone = file.try_clone().map_err(RunnerError::StreamIo)?;
            (StdioDirective::File(file), StdioDirective::File(clone), false)
        }
        // Unreachable: a pumped directive always has a sink set.
        (None, StdioDirective::Piped) => (StdioDirective::Piped, StdioDirective::Null, false),
    };
    Ok(ResolvedStreams {
        stdout_io: Some(stdout_io),
        stderr_io: Some(stderr_io),
        stderr_sinks: if merged { stdout_sinks.clone() } else { None },
        stdout_sinks,
        stdout_buffer,
        stderr_buffer: None,
        merged,
    })
}
