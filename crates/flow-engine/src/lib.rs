//! Honeyflow flow engine.
//!
//! Turns southbound events into controller commands. Hosts are learned per
//! switch, virtual addresses are answered by proxy-ARP, and every IPv4 source
//! is classified from its recent activity. Flagged sources are redirected to
//! a honeypot tier, traffic for the virtual IP is spread round-robin over a
//! backend pool, and everything else is switched at L2.
//!
//! # Modules
//!
//! - [`packet`]: frame decoding and ARP synthesis
//! - [`learning`]: MAC learning and host location
//! - [`responder`]: proxy-ARP for the VIP and honeypots
//! - [`activity`]: rate and port-scan windows
//! - [`classifier`]: sticky classification and feedback
//! - [`balancer`]: round-robin backend pool
//! - [`flow`]: rule builders, priorities, issued-flow ledger
//! - [`redirect`]: honeypot redirection plans
//! - [`oracle`]: asynchronous verdict oracle
//! - [`decision`]: per-event intake
//! - [`engine`]: [`Pipeline`](honeyflow_core::pipeline::Pipeline) lifecycle

pub mod activity;
pub mod balancer;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod flow;
pub mod learning;
pub mod oracle;
pub mod packet;
pub mod redirect;
pub mod responder;

pub use activity::{ActivityMonitor, ActivitySnapshot};
pub use balancer::{Assignment, LoadBalancerPool};
pub use classifier::{ClassificationEngine, OracleVerdict};
pub use config::FlowEngineConfig;
pub use decision::{Decision, DecisionAction, FlowDecisionEngine, SweepReport};
pub use engine::{FlowEngine, FlowEngineBuilder, handle_event};
pub use error::FlowEngineError;
pub use learning::{AddressLearningTable, HostLocator};
pub use oracle::{ClassificationOracle, OracleHandle, TcpOracleClient};
pub use redirect::{RedirectPlan, RedirectionManager};
pub use responder::{ArpOutcome, HoneypotTier, VirtualIpResponder};
