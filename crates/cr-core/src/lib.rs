//! Core vocabulary for the command-runner engine: the reserved exit-code
//! taxonomy, command and option value types, and the typed error enum.

pub mod error;
pub mod types;

pub use error::RunnerError;
pub use types::{
    Captured, CommandSpec, ExecMethod, OutputChunk, OutputDecoding, Priority, ValidExitCodes,
    EXIT_INTERNAL_FAILURE, EXIT_INTERRUPTED, EXIT_INVALID_OPTIONS, EXIT_IO_FAILURE,
    EXIT_STOP_REQUESTED, EXIT_TIMEOUT,
};
