//! Events and commands exchanged across the controller boundary.
//!
//! The southbound adapter delivers [`SouthboundEvent`]s (decoded packet-ins and
//! switch lifecycle) and receives [`ControllerCommand`]s (flow installs and
//! packet-outs). Honeypots push [`ClassificationFeedback`], operators issue
//! [`ControlRequest`]s, and the verdict oracle speaks [`OracleRequest`] /
//! [`OracleResponse`]. Every type here is newline-delimited JSON on the wire.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{
    ClassificationLevel, ControllerStats, FiveTuple, MacAddr, PortNo, SwitchId, protocol_name,
};

// --- module names ---

/// Flow engine module name
pub const MODULE_FLOW_ENGINE: &str = "flow-engine";
/// Southbound adapter listener module name
pub const MODULE_SOUTHBOUND: &str = "southbound";
/// Control (feedback/stats) listener module name
pub const MODULE_CONTROL: &str = "control";

/// A packet punted to the controller by a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketIn {
    pub switch_id: SwitchId,
    pub in_port: PortNo,
    /// Switch-side buffer holding the packet, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<u32>,
    /// Raw Ethernet frame.
    pub data: Bytes,
}

impl PacketIn {
    pub fn new(switch_id: SwitchId, in_port: PortNo, data: impl Into<Bytes>) -> Self {
        Self {
            switch_id,
            in_port,
            buffer_id: None,
            data: data.into(),
        }
    }

    pub fn with_buffer_id(mut self, buffer_id: u32) -> Self {
        self.buffer_id = Some(buffer_id);
        self
    }
}

/// Everything the southbound adapter may report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SouthboundEvent {
    SwitchConnected { switch_id: SwitchId },
    SwitchDisconnected { switch_id: SwitchId },
    PacketIn(PacketIn),
}

impl SouthboundEvent {
    pub fn switch_id(&self) -> SwitchId {
        match self {
            Self::SwitchConnected { switch_id } | Self::SwitchDisconnected { switch_id } => {
                *switch_id
            }
            Self::PacketIn(p) => p.switch_id,
        }
    }
}

/// Match fields of a flow rule. `None` is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_dst_port: Option<u16>,
}

impl FlowMatch {
    /// Match-everything (table-miss) match.
    pub fn any() -> Self {
        Self::default()
    }

    /// Exact IPv4 5-tuple match. Ports are only set for TCP/UDP.
    pub fn five_tuple(tuple: &FiveTuple) -> Self {
        let (l4_src_port, l4_dst_port) = if tuple.has_ports() {
            (Some(tuple.src_port), Some(tuple.dst_port))
        } else {
            (None, None)
        };
        Self {
            eth_type: Some(crate::types::ETHERTYPE_IPV4),
            ipv4_src: Some(tuple.src_ip),
            ipv4_dst: Some(tuple.dst_ip),
            ip_proto: Some(tuple.protocol),
            l4_src_port,
            l4_dst_port,
            ..Self::default()
        }
    }

    pub fn in_port(mut self, port: PortNo) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    pub fn ipv4_dst(mut self, ip: Ipv4Addr) -> Self {
        self.ipv4_dst = Some(ip);
        self
    }

    pub fn ip_proto(mut self, protocol: u8) -> Self {
        self.ip_proto = Some(protocol);
        self
    }

    pub fn l4_dst_port(mut self, port: u16) -> Self {
        self.l4_dst_port = Some(port);
        self
    }
}

/// Where an output action sends the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPort {
    Physical(PortNo),
    Flood,
    Controller,
    InPort,
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical(p) => write!(f, "{p}"),
            Self::Flood => f.write_str("flood"),
            Self::Controller => f.write_str("controller"),
            Self::InPort => f.write_str("in_port"),
        }
    }
}

/// Rewrite or forward action, applied in list order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    SetEthSrc(MacAddr),
    SetEthDst(MacAddr),
    SetIpv4Src(Ipv4Addr),
    SetIpv4Dst(Ipv4Addr),
    Output(OutputPort),
}

/// Install (or refresh) a flow rule on a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstall {
    pub switch_id: SwitchId,
    pub priority: u16,
    #[serde(rename = "match")]
    pub flow_match: FlowMatch,
    pub actions: Vec<FlowAction>,
    /// Seconds without a hit before removal, 0 = never.
    #[serde(default)]
    pub idle_timeout: u16,
    /// Seconds after install before removal, 0 = never.
    #[serde(default)]
    pub hard_timeout: u16,
}

/// Packet payload carried by a packet-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketOutData {
    /// Release a packet the switch buffered.
    Buffered(u32),
    /// Send these bytes.
    Raw(Bytes),
}

/// Emit a single packet from a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketOut {
    pub switch_id: SwitchId,
    /// Port the packet arrived on, `None` for controller-originated packets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    pub data: PacketOutData,
    pub actions: Vec<FlowAction>,
}

/// A command for the southbound adapter to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerCommand {
    InstallFlow(FlowInstall),
    PacketOut(PacketOut),
}

impl ControllerCommand {
    pub fn switch_id(&self) -> SwitchId {
        match self {
            Self::InstallFlow(f) => f.switch_id,
            Self::PacketOut(p) => p.switch_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InstallFlow(_) => "install_flow",
            Self::PacketOut(_) => "packet_out",
        }
    }
}

/// Highest risk score a honeypot may report.
pub const RISK_SCORE_MAX: f64 = 100.0;

/// Verdict pushed back by a honeypot after observing a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationFeedback {
    pub source_ip: Ipv4Addr,
    pub classification: ClassificationLevel,
    /// 0 to 100. Honeypot models report fractional scores.
    #[serde(deserialize_with = "deserialize_risk_score")]
    pub risk_score: f64,
    /// 1 when the honeypot's model flagged the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_prediction: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honeypot_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ClassificationFeedback {
    pub fn new(
        source_ip: Ipv4Addr,
        classification: ClassificationLevel,
        risk_score: impl Into<f64>,
    ) -> Self {
        Self {
            source_ip,
            classification,
            risk_score: risk_score.into(),
            ml_prediction: None,
            honeypot_type: None,
            timestamp: None,
        }
    }

    /// Check a record built in code; decoded records are checked on decode.
    pub fn validate(&self) -> Result<(), ParseError> {
        check_risk_score(self.risk_score).map(|_| ())
    }
}

/// Accept a risk score inside `0..=100`. NaN is rejected.
pub fn check_risk_score(score: f64) -> Result<f64, ParseError> {
    if (0.0..=RISK_SCORE_MAX).contains(&score) {
        Ok(score)
    } else {
        Err(ParseError::InvalidField {
            field: "risk_score".to_owned(),
            reason: format!("{score} is outside 0..={RISK_SCORE_MAX}"),
        })
    }
}

fn deserialize_risk_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let score = f64::deserialize(deserializer)?;
    check_risk_score(score).map_err(serde::de::Error::custom)
}

/// Request to the external verdict oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// `"TCP"`, `"UDP"`, `"ICMP"` or `"OTHER"`.
    pub protocol: String,
}

impl From<&FiveTuple> for OracleRequest {
    fn from(tuple: &FiveTuple) -> Self {
        Self {
            src_ip: tuple.src_ip,
            dst_ip: tuple.dst_ip,
            src_port: tuple.src_port,
            dst_port: tuple.dst_port,
            protocol: protocol_name(tuple.protocol).to_owned(),
        }
    }
}

/// Oracle answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub is_suspicious: bool,
    #[serde(default)]
    pub confidence: f64,
}

/// Request on the control listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Feedback(ClassificationFeedback),
    Stats,
}

/// Reply on the control listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Ack { source_ip: Ipv4Addr },
    Stats(ControllerStats),
    Error { message: String },
}
