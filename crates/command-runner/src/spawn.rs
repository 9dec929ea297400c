//! Child construction and launch.

use cr_core::{CommandSpec, RunnerError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::warn;

use crate::options::{RunOptions, StdinSpec};
use crate::sink::StdioDirective;

pub(crate) const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve a command spec into an argv per the shell flag.
///
/// Without the shell, a single line is tokenized with POSIX shell-lexing
/// rules; with it, an argv is re-joined with shell quoting and handed to
/// the platform shell verbatim.
pub(crate) fn resolve_argv(spec: &CommandSpec, shell: bool) -> Result<Vec<String>, RunnerError> {
    if shell {
        let line = match spec {
            CommandSpec::Line(line) => line.clone(),
            CommandSpec::Argv(argv) => shell_words::join(argv),
        };
        #[cfg(windows)]
        return Ok(vec!["cmd.exe".into(), "/c".into(), line]);
        #[cfg(not(windows))]
        return Ok(vec!["/bin/sh".into(), "-c".into(), line]);
    }

    let argv = match spec {
        CommandSpec::Line(line) => shell_words::split(line).map_err(|e| {
            RunnerError::InvalidOptions(format!("cannot tokenize command line: {e}"))
        })?,
        CommandSpec::Argv(argv) => argv.clone(),
    };
    if argv.is_empty() {
        return Err(RunnerError::InvalidOptions("empty command".into()));
    }
    Ok(argv)
}

pub(crate) fn stdin_parts(spec: StdinSpec) -> (Stdio, Option<Vec<u8>>) {
    match spec {
        StdinSpec::Null => (Stdio::null(), None),
        StdinSpec::Inherit => (Stdio::inherit(), None),
        StdinSpec::Handle(stdio) => (stdio, None),
        StdinSpec::Bytes(data) => (Stdio::piped(), Some(data)),
    }
}

/// Build the launchable command: argv, stdio wiring, process attributes.
pub(crate) fn build_command(
    argv: &[String],
    opts: &RunOptions,
    stdout_io: StdioDirective,
    stderr_io: StdioDirective,
    stdin_io: Stdio,
) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.stdout(stdout_io.into_stdio());
    cmd.stderr(stderr_io.into_stdio());
    cmd.stdin(stdin_io);
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so the whole group can
    // later be signalled, and apply scheduling priority.
    #[cfg(unix)]
    {
        let nice = opts.priority.map(cr_proctree::priority::nice_level);
        let io_priority = opts.io_priority;
        // SAFETY: setsid and the priority syscalls are async-signal-safe
        // and run between fork and exec. Priority application is
        // best-effort; lowering niceness without privilege fails with
        // EPERM and must not abort the spawn.
        unsafe {
            cmd.pre_exec(move || {
                libc::setsid();
                if let Some(nice) = nice {
                    let _ = cr_proctree::priority::apply_niceness(nice);
                }
                if let Some(io_priority) = io_priority {
                    let _ = cr_proctree::priority::apply_io_priority(io_priority);
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;

        let mut flags = CREATE_NEW_PROCESS_GROUP;
        if opts.windows_no_window {
            flags |= CREATE_NO_WINDOW;
        }
        if let Some(priority) = opts.priority {
            flags |= cr_proctree::priority::priority_class_flag(priority);
        }
        cmd.creation_flags(flags);
    }

    cmd
}

/// Launch the child and, when a stdin payload was supplied, write it from
/// a detached task with a deadline so a child that never reads cannot
/// wedge the engine.
pub(crate) async fn spawn_child(
    mut cmd: Command,
    command_line: &str,
    stdin_payload: Option<Vec<u8>>,
) -> Result<Child, RunnerError> {
    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        command: command_line.to_string(),
        source,
    })?;

    if let Some(data) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                match tokio::time::timeout(STDIN_WRITE_TIMEOUT, async {
                    stdin.write_all(&data).await?;
                    stdin.shutdown().await?;
                    Ok::<_, std::io::Error>(())
                })
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("stdin write error: {e}"),
                    Err(_) => warn!(
                        timeout_secs = STDIN_WRITE_TIMEOUT.as_secs(),
                        "stdin write timed out"
                    ),
                }
            });
        } else {
            warn!("stdin payload requested but no piped stdin handle was available");
        }
    }

    Ok(child)
}
