use serde::Serialize;
use std::fmt;

/// Reserved exit codes produced when the child yields no native code.
///
/// All reserved codes are negative so they stay disjoint from the 0-255
/// range children use on the supported platforms.
pub const EXIT_INVALID_OPTIONS: i32 = -250;
pub const EXIT_STOP_REQUESTED: i32 = -251;
pub const EXIT_INTERRUPTED: i32 = -252;
pub const EXIT_IO_FAILURE: i32 = -253;
pub const EXIT_TIMEOUT: i32 = -254;
pub const EXIT_INTERNAL_FAILURE: i32 = -255;

/// A command to execute: either a single line or pre-split argument tokens.
///
/// A `Line` run without the shell is tokenized with POSIX shell-lexing
/// rules before spawn; with the shell it is handed to `/bin/sh -c` (or
/// `cmd.exe /c`) verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Human-readable form for log events.
    pub fn display_line(&self) -> String {
        match self {
            Self::Line(line) => line.clone(),
            Self::Argv(argv) => {
                let mut out = String::new();
                for (i, arg) in argv.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    if arg.contains(' ') {
                        out.push('"');
                        out.push_str(arg);
                        out.push('"');
                    } else {
                        out.push_str(arg);
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}

impl From<&str> for CommandSpec {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl From<String> for CommandSpec {
    fn from(line: String) -> Self {
        Self::Line(line)
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(argv: Vec<String>) -> Self {
        Self::Argv(argv)
    }
}

impl From<&[&str]> for CommandSpec {
    fn from(argv: &[&str]) -> Self {
        Self::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandSpec {
    fn from(argv: [&str; N]) -> Self {
        Self::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// Stream-consumption strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMethod {
    /// One reader task per captured pipe; chunks are delivered live.
    #[default]
    Poller,
    /// No reader tasks; pipes are drained once after the child exits.
    Monitor,
}

/// Text codec applied to child output, or raw byte passthrough.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum OutputDecoding {
    /// Decode with the given codec; malformed input is replaced, never fatal.
    Text(&'static encoding_rs::Encoding),
    /// No decoding; sinks and the captured result carry raw bytes.
    Raw,
}

impl OutputDecoding {
    /// Resolve a codec by WHATWG label ("utf-8", "windows-1252", ...).
    pub fn for_label(label: &str) -> Option<Self> {
        encoding_rs::Encoding::for_label(label.as_bytes()).map(Self::Text)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl Default for OutputDecoding {
    fn default() -> Self {
        #[cfg(windows)]
        {
            // The OEM console code page is not part of the web encoding
            // set; windows-1252 is the closest total single-byte codec.
            Self::Text(encoding_rs::WINDOWS_1252)
        }
        #[cfg(not(windows))]
        {
            Self::Text(encoding_rs::UTF_8)
        }
    }
}

impl fmt::Debug for OutputDecoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(enc) => write!(f, "Text({})", enc.name()),
            Self::Raw => f.write_str("Raw"),
        }
    }
}

/// One unit of output as read from a child pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Text(String),
    Bytes(Vec<u8>),
}

impl OutputChunk {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accumulated output of one logical stream, shape-consistent with the
/// configured decoding: either a decoded string or raw bytes, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Captured {
    Text(String),
    Bytes(Vec<u8>),
}

impl Captured {
    pub fn empty(decoding: OutputDecoding) -> Self {
        match decoding {
            OutputDecoding::Text(_) => Self::Text(String::new()),
            OutputDecoding::Raw => Self::Bytes(Vec::new()),
        }
    }

    pub fn push(&mut self, chunk: &OutputChunk) {
        match (self, chunk) {
            (Self::Text(acc), OutputChunk::Text(s)) => acc.push_str(s),
            (Self::Bytes(acc), OutputChunk::Bytes(b)) => acc.extend_from_slice(b),
            // Shape mismatch cannot happen: pump and buffer are built from
            // the same decoding mode.
            (Self::Text(acc), OutputChunk::Bytes(b)) => {
                acc.push_str(&String::from_utf8_lossy(b));
            }
            (Self::Bytes(acc), OutputChunk::Text(s)) => acc.extend_from_slice(s.as_bytes()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
        }
    }

    /// Decoded view for display and log events (lossy for raw captures).
    pub fn to_text_lossy(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Exit codes that must not produce ERROR log events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidExitCodes {
    /// Only 0 is valid (default).
    #[default]
    Success,
    /// Every exit code is valid.
    All,
    /// Exactly the listed codes are valid.
    Listed(Vec<i32>),
}

impl ValidExitCodes {
    pub fn covers(&self, code: i32) -> bool {
        match self {
            Self::Success => code == 0,
            Self::All => true,
            Self::Listed(codes) => codes.contains(&code),
        }
    }
}

/// Scheduling priority for the child (CPU or I/O).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    /// Raw POSIX niceness; clamped to `[-20, 19]` before use.
    Nice(i32),
}
