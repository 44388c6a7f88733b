//! Domain types shared by every honeyflow crate.
//!
//! Addresses, flow keys, classification levels and the stats snapshot
//! live here so the engine, the daemon and the CLI agree on one wire shape.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;

/// Datapath (switch) identifier.
pub type SwitchId = u64;

/// Switch port number.
pub type PortNo = u32;

/// IANA protocol number for ICMP.
pub const IP_PROTO_ICMP: u8 = 1;
/// IANA protocol number for TCP.
pub const IP_PROTO_TCP: u8 = 6;
/// IANA protocol number for UDP.
pub const IP_PROTO_UDP: u8 = 17;

/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType for ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// EtherType for LLDP.
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

/// 48-bit Ethernet hardware address.
///
/// Serialized as the usual colon-separated lowercase hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// `ff:ff:ff:ff:ff:ff`
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    /// `00:00:00:00:00:00`
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (broadcast included).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for (i, slot) in bytes.iter_mut().enumerate() {
            let part = parts.next().ok_or_else(|| ParseError::Failed {
                offset: i,
                reason: format!("mac address '{s}' has fewer than 6 octets"),
            })?;
            if part.len() != 2 {
                return Err(ParseError::Failed {
                    offset: i,
                    reason: format!("octet '{part}' must be two hex digits"),
                });
            }
            *slot = u8::from_str_radix(part, 16).map_err(|e| ParseError::Failed {
                offset: i,
                reason: format!("octet '{part}': {e}"),
            })?;
        }
        if parts.next().is_some() {
            return Err(ParseError::Failed {
                offset: 6,
                reason: format!("mac address '{s}' has more than 6 octets"),
            });
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// IPv4 5-tuple of an observed packet.
///
/// ICMP and non-first fragments carry port 0 on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FiveTuple {
    /// The same flow seen from the other endpoint.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Whether the protocol carries L4 ports.
    pub fn has_ports(&self) -> bool {
        matches!(self.protocol, IP_PROTO_TCP | IP_PROTO_UDP)
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// Human-readable protocol name used in oracle requests and logs.
pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        IP_PROTO_TCP => "TCP",
        IP_PROTO_UDP => "UDP",
        IP_PROTO_ICMP => "ICMP",
        _ => "OTHER",
    }
}

/// Traffic classification level.
///
/// `Ord` follows severity: `Normal < Suspicious < Malicious`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationLevel {
    #[default]
    Normal,
    Suspicious,
    Malicious,
}

impl ClassificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
        }
    }

    /// Suspicious or worse.
    pub fn is_flagged(&self) -> bool {
        *self >= Self::Suspicious
    }
}

impl fmt::Display for ClassificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "benign" => Ok(Self::Normal),
            "suspicious" => Ok(Self::Suspicious),
            "malicious" => Ok(Self::Malicious),
            other => Err(ParseError::UnsupportedFormat(format!(
                "unknown classification '{other}'"
            ))),
        }
    }
}

/// Result of classifying one packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub level: ClassificationLevel,
    /// Every condition that contributed, in evaluation order.
    pub reasons: Vec<String>,
    /// Heuristic risk score, 0-100.
    pub risk_score: u8,
    /// Oracle confidence when a verdict was folded in.
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn normal() -> Self {
        Self {
            level: ClassificationLevel::Normal,
            reasons: Vec::new(),
            risk_score: 0,
            confidence: None,
        }
    }

    /// Reasons joined for display, `"normal"` when there are none.
    pub fn reason(&self) -> String {
        if self.reasons.is_empty() {
            self.level.as_str().to_owned()
        } else {
            self.reasons.join(", ")
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (risk={}): {}",
            self.level,
            self.risk_score,
            self.reason()
        )
    }
}

/// Point-in-time controller state returned by the stats query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStats {
    /// Sources with a live activity record.
    pub active_sources: Vec<Ipv4Addr>,
    pub suspicious_ips: Vec<Ipv4Addr>,
    pub malicious_ips: Vec<Ipv4Addr>,
    /// Flows issued by the controller that have not yet timed out.
    pub installed_flows: usize,
    pub learned_macs: usize,
    pub packets_processed: u64,
    pub redirects: u64,
    pub load_balanced: u64,
    pub proxy_arp_replies: u64,
    pub oracle_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display_and_parse() {
        let mac: MacAddr = "00:00:00:00:00:0A".parse().unwrap();
        assert_eq!(mac, MacAddr([0, 0, 0, 0, 0, 0x0a]));
        assert_eq!(mac.to_string(), "00:00:00:00:00:0a");

        let dashed: MacAddr = "02-00-00-00-00-01".parse().unwrap();
        assert_eq!(dashed.octets(), [2, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn mac_parse_rejects_malformed() {
        assert!("00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("zz:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("000:00:00:00:00:0".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_serde_as_string() {
        let mac = MacAddr([0xde, 0xad, 0xbe, 0xef, 0, 1]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"de:ad:be:ef:00:01\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn mac_flags() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(MacAddr([0x01, 0, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!MacAddr([0x02, 0, 0, 0, 0, 1]).is_multicast());
    }

    #[test]
    fn five_tuple_reversed() {
        let t = FiveTuple {
            src_ip: Ipv4Addr::new(10, 0, 0, 6),
            dst_ip: Ipv4Addr::new(10, 0, 0, 1),
            protocol: IP_PROTO_TCP,
            src_port: 40000,
            dst_port: 80,
        };
        let r = t.reversed();
        assert_eq!(r.src_ip, t.dst_ip);
        assert_eq!(r.dst_port, 40000);
        assert_eq!(r.reversed(), t);
        assert!(t.has_ports());
    }

    #[test]
    fn classification_level_ordering() {
        assert!(ClassificationLevel::Normal < ClassificationLevel::Suspicious);
        assert!(ClassificationLevel::Suspicious < ClassificationLevel::Malicious);
        assert!(ClassificationLevel::Malicious.is_flagged());
        assert!(!ClassificationLevel::Normal.is_flagged());
    }

    #[test]
    fn classification_level_parse() {
        assert_eq!(
            "MALICIOUS".parse::<ClassificationLevel>().unwrap(),
            ClassificationLevel::Malicious
        );
        assert_eq!(
            "benign".parse::<ClassificationLevel>().unwrap(),
            ClassificationLevel::Normal
        );
        assert!("evil".parse::<ClassificationLevel>().is_err());
    }

    #[test]
    fn classification_reason_joins() {
        let c = Classification {
            level: ClassificationLevel::Suspicious,
            reasons: vec![
                "Port Scan (5 ports to 10.0.0.3)".to_owned(),
                "High Request Rate".to_owned(),
            ],
            risk_score: 70,
            confidence: None,
        };
        assert_eq!(
            c.reason(),
            "Port Scan (5 ports to 10.0.0.3), High Request Rate"
        );
        assert_eq!(Classification::normal().reason(), "normal");
    }
}
