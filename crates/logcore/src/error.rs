//! Error taxonomy. Every fallible boundary returns one of these instead of
//! a bare string, following the pattern the donor agent's `ParseError`/
//! `FilterError`/`ConfigError` set: a `thiserror` enum per concern,
//! aggregated here for the binary's top-level match.

use thiserror::Error;

/// A directive or the token it failed to extract (§4.2 error signaling).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("missing token for directive {directive}")]
    MissingToken { directive: String },

    #[error("invalid token {token:?} for directive {directive}")]
    InvalidToken { directive: String, token: String },

    #[error("malformed {{...}} directive spec")]
    MalformedSpec,

    #[error("input exhausted before format")]
    LineExhausted,

    #[error("required field {field} missing after parse")]
    MissingRequiredField { field: &'static str },
}

/// Format-string verification failures, fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unknown directive %{0}")]
    UnknownDirective(char),

    #[error("unterminated {{...}} directive spec")]
    UnterminatedBraces,

    #[error("format string must not be empty")]
    EmptyFormat,

    #[error("format string is missing required directive %{0}")]
    MissingRequiredDirective(char),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),
}

#[derive(Debug, Error)]
pub enum LogIoError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read error on {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ResumeStoreError {
    #[error("failed to read resume store {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse resume store {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist resume store {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error the binary matches on to pick an exit code. Per §7,
/// only format verification, I/O-on-open, and thread/task-spawn failures
/// are fatal; per-line failures never reach this type.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    LogIo(#[from] LogIoError),

    #[error(transparent)]
    ResumeStore(#[from] ResumeStoreError),

    #[error("worker task panicked or was cancelled: {0}")]
    WorkerFailed(String),
}

impl RunError {
    /// Process exit code, matching the spec's "format verification /
    /// I/O-on-open / allocation failure are fatal" surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Format(_) => 3,
            RunError::LogIo(_) => 4,
            RunError::ResumeStore(_) => 5,
            RunError::WorkerFailed(_) => 6,
        }
    }
}
