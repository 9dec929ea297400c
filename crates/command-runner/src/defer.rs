//! Fire-and-forget spawn of a shell command after a delay.

use cr_core::{CommandSpec, RunnerError};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Spawn `command` through the platform shell after `defer`, fully
/// detached: own session, null stdio, never awaited. Intended for
/// self-update flows where the work must outlive the caller; the OS
/// reaps the shell once this process exits.
pub fn deferred_command(
    command: impl Into<CommandSpec>,
    defer: Duration,
) -> Result<(), RunnerError> {
    let line = match command.into() {
        CommandSpec::Line(line) => line,
        CommandSpec::Argv(argv) => shell_words::join(&argv),
    };

    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = std::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(format!("sleep {}; {}", defer.as_secs(), line));
        cmd
    };
    #[cfg(windows)]
    let mut cmd = {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

        let mut cmd = std::process::Command::new("cmd.exe");
        cmd.arg("/c").arg(format!(
            "timeout /T {} /NOBREAK >NUL & {}",
            defer.as_secs().max(1),
            line
        ));
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        cmd
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and runs before exec.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        command: line.clone(),
        source,
    })?;
    debug!(pid = child.id(), defer_secs = defer.as_secs(), command = %line, "deferred command scheduled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn deferred_touch_eventually_lands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("deferred.marker");
        deferred_command(
            format!("touch {}", marker.display()),
            Duration::from_secs(0),
        )
        .expect("schedule deferred command");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !marker.exists() {
            assert!(
                std::time::Instant::now() < deadline,
                "deferred command never ran"
            );
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn unresolvable_shell_reports_spawn_error() {
        // An empty command line still spawns the shell; only a missing
        // shell itself can fail, so just exercise the happy path shape.
        assert!(deferred_command("true", Duration::from_secs(0)).is_ok());
    }
}
