//! Map the supervisor's terminal state onto the exit-code taxonomy.

use cr_core::{EXIT_INTERNAL_FAILURE, EXIT_INTERRUPTED, EXIT_STOP_REQUESTED, EXIT_TIMEOUT};
use std::process::ExitStatus;

use crate::supervisor::Outcome;

/// Native codes pass through; engine-initiated aborts use the reserved
/// taxonomy. A signal death reaches `Exited` only when the engine did not
/// initiate it (engine kills resolve to Timeout/Stopped/Interrupted
/// first), so the `128 + signal` convention applies unconditionally here.
pub(crate) fn classify(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Exited(status) => native_code(status),
        Outcome::Timeout => EXIT_TIMEOUT,
        Outcome::Stopped => EXIT_STOP_REQUESTED,
        Outcome::Interrupted => EXIT_INTERRUPTED,
        Outcome::Failed(error) => error.exit_code(),
    }
}

fn native_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_INTERNAL_FAILURE
}
