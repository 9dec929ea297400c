use crate::types::{EXIT_INTERNAL_FAILURE, EXIT_INVALID_OPTIONS, EXIT_IO_FAILURE};

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure on child stream: {0}")]
    StreamIo(#[from] std::io::Error),

    #[error("failed to open redirect target `{path}`: {source}")]
    Redirect {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to terminate process tree rooted at PID {pid}: {detail}")]
    KillFailed { pid: u32, detail: String },
}

impl RunnerError {
    /// The reserved exit code this failure classifies to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidOptions(_) => EXIT_INVALID_OPTIONS,
            Self::Spawn { .. } | Self::StreamIo(_) | Self::Redirect { .. } => EXIT_IO_FAILURE,
            Self::KillFailed { .. } => EXIT_INTERNAL_FAILURE,
        }
    }
}
