//! Flow engine error type.
//!
//! [`FlowEngineError`] converts into [`HoneyflowError`] so callers above the
//! engine can propagate with `?`.

use honeyflow_core::error::{
    ConfigError, DetectionError, HoneyflowError, ParseError, PipelineError,
};

#[derive(Debug, thiserror::Error)]
pub enum FlowEngineError {
    /// Frame too short or malformed.
    #[error("frame error at offset {offset}: {reason}")]
    Frame { offset: usize, reason: String },

    #[error("config error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("oracle timed out after {timeout_ms}ms")]
    OracleTimeout { timeout_ms: u64 },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowEngineError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<FlowEngineError> for HoneyflowError {
    fn from(err: FlowEngineError) -> Self {
        match err {
            FlowEngineError::Frame { offset, reason } => {
                HoneyflowError::Parse(ParseError::Failed { offset, reason })
            }
            FlowEngineError::Config { field, reason } => {
                HoneyflowError::Config(ConfigError::InvalidValue { field, reason })
            }
            FlowEngineError::Oracle(msg) => HoneyflowError::Detection(DetectionError::Oracle(msg)),
            FlowEngineError::OracleTimeout { timeout_ms } => {
                HoneyflowError::Detection(DetectionError::OracleTimeout { timeout_ms })
            }
            FlowEngineError::Channel(msg) => {
                HoneyflowError::Pipeline(PipelineError::ChannelSend(msg))
            }
            FlowEngineError::Io(e) => HoneyflowError::Io(e),
            FlowEngineError::Json(e) => {
                HoneyflowError::Parse(ParseError::UnsupportedFormat(e.to_string()))
            }
        }
    }
}
