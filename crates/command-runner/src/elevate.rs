//! Privilege-elevation collaborator.
//!
//! A sibling utility with no contract on the engine: it relaunches the
//! current executable with administrator/root rights, forwards the
//! original argument vector, and terminates the un-elevated parent with
//! the elevated child's exit code.

use cr_core::{CommandSpec, EXIT_IO_FAILURE};
use tracing::error;

use crate::options::{RunOptions, SinkSpec, StderrSpec, StdinSpec};

/// Whether the current process already holds administrator/root rights.
pub fn is_admin() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no failure mode.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(windows)]
    {
        // Enumerating server sessions requires an elevated token.
        std::process::Command::new("net")
            .arg("session")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Run `main` with elevated rights.
///
/// Already elevated: `main` runs in-process and its return value becomes
/// the exit code. Otherwise the current executable is relaunched under
/// `sudo` (POSIX) or a RunAs prompt (Windows) with the original argv, its
/// stdio inherited, and this process exits with the child's code.
pub fn elevate<F: FnOnce() -> i32>(main: F) -> ! {
    if is_admin() {
        std::process::exit(main());
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!("cannot resolve the current executable: {e}");
            std::process::exit(EXIT_IO_FAILURE);
        }
    };
    let forwarded: Vec<String> = std::env::args().skip(1).collect();

    #[cfg(unix)]
    let argv = {
        let mut argv = vec!["sudo".to_string(), exe.to_string_lossy().into_owned()];
        argv.extend(forwarded);
        argv
    };
    #[cfg(windows)]
    let argv = {
        let arg_list = shell_words::join(&forwarded);
        let script = format!(
            "$p = Start-Process -FilePath '{}' -ArgumentList '{}' -Verb RunAs -Wait -PassThru; exit $p.ExitCode",
            exe.display(),
            arg_list
        );
        vec![
            "powershell".to_string(),
            "-NoProfile".to_string(),
            "-Command".to_string(),
            script,
        ]
    };

    let options = RunOptions {
        stdin: StdinSpec::Inherit,
        stdout: SinkSpec::Inherit,
        stderr: StderrSpec::Sink(SinkSpec::Inherit),
        ..Default::default()
    };
    let reply = crate::run(CommandSpec::Argv(argv), options);
    std::process::exit(reply.exit_code);
}
