//! CLI-specific error types and exit code mapping

use honeyflow_core::error::HoneyflowError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The control port could not be reached.
    #[error("daemon not reachable: {0}")]
    DaemonUnavailable(String),

    /// The daemon answered, but not with what the command expected.
    #[error("daemon rejected request: {0}")]
    Rejected(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from honeyflow-core.
    #[error("{0}")]
    Core(#[from] HoneyflowError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                   |
    /// |------|---------------------------|
    /// | 0    | Success                   |
    /// | 1    | General / command error   |
    /// | 2    | Configuration error       |
    /// | 3    | Daemon unreachable        |
    /// | 4    | Daemon rejected request   |
    /// | 10   | IO error                  |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Core(HoneyflowError::Config(_)) => 2,
            Self::DaemonUnavailable(_) => 3,
            Self::Rejected(_) => 4,
            Self::Io(_) => 10,
            Self::Json(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}
