//! Bounded execution of external commands.
//!
//! One call spawns a child, consumes its output streams while it runs,
//! enforces a wall-clock deadline and an external stop predicate, kills
//! the whole process subtree on failure paths, and always returns a
//! classified exit code with the captured output. The entry never panics
//! and never returns an error: faults map onto a reserved negative
//! exit-code range disjoint from anything a child can produce.
//!
//! ```no_run
//! use command_runner::{run, RunOptions};
//!
//! let reply = run("echo hello", RunOptions::default());
//! assert_eq!(reply.exit_code, 0);
//! ```

use serde::Serialize;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

mod classify;
mod defer;
pub mod elevate;
mod monitor;
mod options;
mod pump;
mod sink;
mod spawn;
mod supervisor;

pub use cr_core::{
    Captured, CommandSpec, ExecMethod, OutputChunk, OutputDecoding, Priority, ValidExitCodes,
    EXIT_INTERNAL_FAILURE, EXIT_INTERRUPTED, EXIT_INVALID_OPTIONS, EXIT_IO_FAILURE,
    EXIT_STOP_REQUESTED, EXIT_TIMEOUT,
};
pub use defer::deferred_command;
pub use options::{
    ChunkCallback, ExitCallback, ProcessCallback, RunOptions, SinkSpec, StderrSpec, StdinSpec,
    StopPredicate, DEFAULT_BUFSIZE, DEFAULT_CHECK_INTERVAL,
};

/// The classified result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    /// Native child exit code, or a reserved negative code.
    pub exit_code: i32,
    /// Captured stdout; the merged stream unless streams were split.
    pub stdout: Captured,
    /// Captured stderr when it was captured separately.
    pub stderr: Option<Captured>,
}

impl Reply {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The common (exit, output) pair.
    pub fn into_tuple(self) -> (i32, Captured) {
        (self.exit_code, self.stdout)
    }

    /// The split-stream (exit, stdout, stderr) triple.
    pub fn into_triple(self) -> (i32, Captured, Captured) {
        let stderr = self.stderr.unwrap_or_else(|| Captured::Text(String::new()));
        (self.exit_code, self.stdout, stderr)
    }
}

/// Execute a command and block until it resolves.
///
/// Infallible by contract: spawn failures, timeouts, stop requests,
/// interrupts, and internal faults all come back as reserved exit codes,
/// never as panics or errors.
pub fn run(command: impl Into<CommandSpec>, options: RunOptions) -> Reply {
    let command: CommandSpec = command.into();
    let decoding = options.encoding;
    let split_streams = options.split_streams;

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(run_async(command, options)),
            Err(e) => internal_failure(
                format!("failed to start the execution runtime: {e}"),
                decoding,
                split_streams,
            ),
        }
    }));

    result.unwrap_or_else(|_| {
        internal_failure(
            "execution engine panicked".to_string(),
            decoding,
            split_streams,
        )
    })
}

/// The engine itself, for callers already inside a tokio runtime.
pub async fn run_async(command: impl Into<CommandSpec>, mut options: RunOptions) -> Reply {
    let command: CommandSpec = command.into();
    let silent = options.silent;
    let valid_exit_codes = options.valid_exit_codes.clone();
    let on_exit = options.on_exit.take();

    if !silent {
        info!(command = %command, timeout = ?options.timeout, "running command");
    }

    let output = supervisor::execute(command, options).await;
    let exit_code = classify::classify(&output.outcome);
    let reply = Reply {
        exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    };

    if !silent {
        if valid_exit_codes.covers(exit_code) {
            info!(exit_code, "command finished");
        } else {
            error!(exit_code, "command failed");
        }
    }
    if let Some(on_exit) = on_exit {
        on_exit(&reply);
    }
    reply
}

/// Run the engine on a worker thread and return immediately; joining the
/// handle yields the same [`Reply`] as [`run`]. Lets queue-consuming
/// callers drain their sink while the command executes.
pub fn run_threaded(
    command: impl Into<CommandSpec>,
    options: RunOptions,
) -> std::thread::JoinHandle<Reply> {
    let command: CommandSpec = command.into();
    std::thread::spawn(move || run(command, options))
}

fn internal_failure(message: String, decoding: OutputDecoding, split_streams: bool) -> Reply {
    let stdout = match decoding {
        OutputDecoding::Raw => Captured::Bytes(message.into_bytes()),
        OutputDecoding::Text(_) => Captured::Text(message),
    };
    Reply {
        exit_code: EXIT_INTERNAL_FAILURE,
        stdout,
        stderr: split_streams.then(|| Captured::empty(decoding)),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
