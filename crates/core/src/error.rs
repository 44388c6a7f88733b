//! Error types, one enum per domain, folded into [`HoneyflowError`].

/// Top-level honeyflow error.
#[derive(Debug, thiserror::Error)]
pub enum HoneyflowError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Pipeline lifecycle and channel errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    #[error("pipeline already running")]
    AlreadyRunning,

    #[error("pipeline not running")]
    NotRunning,
}

/// Classification and verdict errors.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// The external oracle failed or answered garbage.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// The oracle did not answer within its deadline.
    #[error("oracle timed out after {timeout_ms}ms")]
    OracleTimeout { timeout_ms: u64 },

    #[error("rule error: {0}")]
    Rule(String),
}

/// Wire and frame parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },

    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}
