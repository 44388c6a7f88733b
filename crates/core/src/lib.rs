//! Shared building blocks for honeyflow.
//!
//! Domain types ([`types`]), southbound events and controller commands
//! ([`event`]), the `honeyflow.toml` model ([`config`]), the error hierarchy
//! ([`error`]), module lifecycle traits ([`pipeline`]) and metric names
//! ([`metrics`]).

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// errors
pub use error::{ConfigError, DetectionError, HoneyflowError, ParseError, PipelineError};

// config
pub use config::HoneyflowConfig;

// events and commands
pub use event::{
    ClassificationFeedback, ControlRequest, ControlResponse, ControllerCommand, FlowAction,
    FlowInstall, FlowMatch, OracleRequest, OracleResponse, OutputPort, PacketIn, PacketOut,
    PacketOutData, SouthboundEvent,
};

// pipeline traits
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// domain types
pub use types::{
    Classification, ClassificationLevel, ControllerStats, FiveTuple, MacAddr, PortNo, SwitchId,
};
