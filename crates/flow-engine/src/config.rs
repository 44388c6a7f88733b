//! Typed engine configuration.
//!
//! [`FlowEngineConfig::from_core`] turns the string-typed sections of
//! `honeyflow.toml` into addresses, durations and lookup sets once, at build
//! time, so the packet path never parses.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::types::{
    ClassificationLevel, IP_PROTO_TCP, IP_PROTO_UDP, MacAddr, PortNo, SwitchId,
};

use crate::error::FlowEngineError;

/// Sliding windows of the activity monitor.
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    pub rate_window: Duration,
    pub high_rate_threshold: usize,
    pub scan_window: Duration,
    pub port_scan_threshold: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            rate_window: Duration::from_secs(5),
            high_rate_threshold: 20,
            scan_window: Duration::from_secs(10),
            port_scan_threshold: 5,
        }
    }
}

/// A `(protocol, destination port)` pair that is suspicious on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspiciousCombo {
    pub protocol: u8,
    pub port: u16,
    pub reason: String,
}

/// Classification heuristics and gates.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub known_bad: HashSet<Ipv4Addr>,
    pub known_bad_level: ClassificationLevel,
    pub combos: Vec<SuspiciousCombo>,
    /// Empty means every port is monitored.
    pub monitored_ports: HashSet<u16>,
    pub malicious_threshold: u8,
    pub suspicious_threshold: u8,
}

impl ClassifierConfig {
    pub fn is_monitored(&self, dst_port: u16) -> bool {
        self.monitored_ports.is_empty() || self.monitored_ports.contains(&dst_port)
    }

    pub fn combo_for(&self, protocol: u8, dst_port: u16) -> Option<&SuspiciousCombo> {
        self.combos
            .iter()
            .find(|c| c.protocol == protocol && c.port == dst_port)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            known_bad: HashSet::new(),
            known_bad_level: ClassificationLevel::Suspicious,
            combos: Vec::new(),
            monitored_ports: HashSet::new(),
            malicious_threshold: 70,
            suspicious_threshold: 40,
        }
    }
}

/// Round-robin virtual IP.
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    pub vip: Ipv4Addr,
    pub vip_mac: Option<MacAddr>,
    pub backends: Vec<Ipv4Addr>,
    pub idle_timeout: u16,
    pub pending_timeout: Duration,
}

/// One honeypot tier target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoneypotTarget {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddr>,
}

/// Triage and deep honeypot targets.
#[derive(Debug, Clone)]
pub struct HoneypotTiers {
    pub triage: HoneypotTarget,
    pub deep: HoneypotTarget,
    pub hard_timeout: u16,
}

impl Default for HoneypotTiers {
    fn default() -> Self {
        Self {
            triage: HoneypotTarget {
                ip: Ipv4Addr::new(10, 0, 0, 4),
                mac: None,
            },
            deep: HoneypotTarget {
                ip: Ipv4Addr::new(10, 0, 0, 5),
                mac: None,
            },
            hard_timeout: 300,
        }
    }
}

/// Plain forwarding and ARP probing.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    pub learned_idle_timeout: u16,
    pub static_idle_timeout: u16,
    pub probe_mac: MacAddr,
    pub probe_ip: Ipv4Addr,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            learned_idle_timeout: 15,
            static_idle_timeout: 30,
            probe_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0xfe]),
            probe_ip: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// A host pinned to a switch port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticHost {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddr>,
    pub switch_id: SwitchId,
    pub port: PortNo,
}

/// Oracle client settings.
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub addr: String,
    pub timeout: Duration,
    pub queue_capacity: usize,
}

/// Everything the flow engine needs, typed.
#[derive(Debug, Clone)]
pub struct FlowEngineConfig {
    pub workers: usize,
    pub event_channel_capacity: usize,
    pub sweep_interval: Duration,
    pub activity: ActivityConfig,
    pub classifier: ClassifierConfig,
    /// `None` when the load balancer is disabled.
    pub balancer: Option<BalancerConfig>,
    pub honeypots: HoneypotTiers,
    pub forwarding: ForwardingConfig,
    pub static_hosts: Vec<StaticHost>,
    /// `None` when the oracle is disabled.
    pub oracle: Option<OracleSettings>,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_channel_capacity: 4096,
            sweep_interval: Duration::from_secs(30),
            activity: ActivityConfig::default(),
            classifier: ClassifierConfig::default(),
            balancer: None,
            honeypots: HoneypotTiers::default(),
            forwarding: ForwardingConfig::default(),
            static_hosts: Vec::new(),
            oracle: None,
        }
    }
}

impl FlowEngineConfig {
    /// Build from the core config. Fails on any address that does not parse.
    pub fn from_core(core: &HoneyflowConfig) -> Result<Self, FlowEngineError> {
        let activity = ActivityConfig {
            rate_window: Duration::from_secs(core.detection.rate_window_secs),
            high_rate_threshold: core.detection.high_rate_threshold,
            scan_window: Duration::from_secs(core.detection.scan_window_secs),
            port_scan_threshold: core.detection.port_scan_threshold,
        };

        let c = &core.classification;
        let known_bad = c
            .known_bad_ips
            .iter()
            .map(|ip| parse_ip("classification.known_bad_ips", ip))
            .collect::<Result<HashSet<_>, _>>()?;
        let known_bad_level = c
            .known_bad_level
            .parse::<ClassificationLevel>()
            .map_err(|e| FlowEngineError::config("classification.known_bad_level", e.to_string()))?;
        let combos = c
            .suspicious_combos
            .iter()
            .map(|combo| {
                let protocol = match combo.protocol.to_ascii_lowercase().as_str() {
                    "tcp" => IP_PROTO_TCP,
                    "udp" => IP_PROTO_UDP,
                    other => {
                        return Err(FlowEngineError::config(
                            "classification.suspicious_combos",
                            format!("unsupported protocol '{other}'"),
                        ));
                    }
                };
                Ok(SuspiciousCombo {
                    protocol,
                    port: combo.port,
                    reason: combo.reason.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let classifier = ClassifierConfig {
            known_bad,
            known_bad_level,
            combos,
            monitored_ports: core.detection.monitored_ports.iter().copied().collect(),
            malicious_threshold: c.malicious_risk_threshold,
            suspicious_threshold: c.suspicious_risk_threshold,
        };

        let lb = &core.load_balancer;
        let balancer = if lb.enabled {
            let backends = lb
                .backends
                .iter()
                .map(|ip| parse_ip("load_balancer.backends", ip))
                .collect::<Result<Vec<_>, _>>()?;
            if backends.is_empty() {
                return Err(FlowEngineError::config(
                    "load_balancer.backends",
                    "at least one backend is required",
                ));
            }
            Some(BalancerConfig {
                vip: parse_ip("load_balancer.vip", &lb.vip)?,
                vip_mac: lb
                    .vip_mac
                    .as_deref()
                    .map(|m| parse_mac("load_balancer.vip_mac", m))
                    .transpose()?,
                backends,
                idle_timeout: lb.idle_timeout_secs,
                pending_timeout: Duration::from_secs(lb.pending_timeout_secs),
            })
        } else {
            None
        };

        let hp = &core.honeypots;
        let honeypots = HoneypotTiers {
            triage: HoneypotTarget {
                ip: parse_ip("honeypots.triage.ip", &hp.triage.ip)?,
                mac: hp
                    .triage
                    .mac
                    .as_deref()
                    .map(|m| parse_mac("honeypots.triage.mac", m))
                    .transpose()?,
            },
            deep: HoneypotTarget {
                ip: parse_ip("honeypots.deep.ip", &hp.deep.ip)?,
                mac: hp
                    .deep
                    .mac
                    .as_deref()
                    .map(|m| parse_mac("honeypots.deep.mac", m))
                    .transpose()?,
            },
            hard_timeout: hp.hard_timeout_secs,
        };

        let fw = &core.forwarding;
        let forwarding = ForwardingConfig {
            learned_idle_timeout: fw.learned_idle_timeout_secs,
            static_idle_timeout: fw.static_idle_timeout_secs,
            probe_mac: parse_mac("forwarding.probe_mac", &fw.probe_mac)?,
            probe_ip: parse_ip("forwarding.probe_ip", &fw.probe_ip)?,
        };

        let static_hosts = core
            .topology
            .hosts
            .iter()
            .map(|h| {
                Ok(StaticHost {
                    ip: parse_ip("topology.hosts.ip", &h.ip)?,
                    mac: h
                        .mac
                        .as_deref()
                        .map(|m| parse_mac("topology.hosts.mac", m))
                        .transpose()?,
                    switch_id: h.switch_id,
                    port: h.port,
                })
            })
            .collect::<Result<Vec<_>, FlowEngineError>>()?;

        let oracle = core.oracle.enabled.then(|| OracleSettings {
            addr: core.oracle.addr.clone(),
            timeout: Duration::from_millis(core.oracle.timeout_ms),
            queue_capacity: core.oracle.queue_capacity,
        });

        Ok(Self {
            workers: core.engine.workers.max(1),
            event_channel_capacity: core.engine.event_channel_capacity,
            sweep_interval: Duration::from_secs(core.engine.sweep_interval_secs),
            activity,
            classifier,
            balancer,
            honeypots,
            forwarding,
            static_hosts,
            oracle,
        })
    }
}

fn parse_ip(field: &str, value: &str) -> Result<Ipv4Addr, FlowEngineError> {
    value
        .parse()
        .map_err(|e| FlowEngineError::config(field, format!("'{value}': {e}")))
}

fn parse_mac(field: &str, value: &str) -> Result<MacAddr, FlowEngineError> {
    value
        .parse()
        .map_err(|e| FlowEngineError::config(field, format!("'{value}': {e}")))
}
