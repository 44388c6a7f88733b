//! Configuration: `honeyflow.toml` parsing and runtime settings.
//!
//! [`HoneyflowConfig`] is the top-level struct holding every section.
//!
//! # Precedence
//! 1. CLI arguments (daemon only: log level, log format, PID file)
//! 2. Environment variables (`HONEYFLOW_ORACLE_TIMEOUT_MS=500`)
//! 3. Config file (`honeyflow.toml`)
//! 4. Defaults (`Default` impls)
//!
//! ```no_run
//! # async fn example() -> Result<(), honeyflow_core::error::HoneyflowError> {
//! use honeyflow_core::config::HoneyflowConfig;
//!
//! let config = HoneyflowConfig::load("honeyflow.toml").await?;
//! let config = HoneyflowConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, HoneyflowError};
use crate::types::{MacAddr, PortNo, SwitchId};

/// Honeyflow configuration.
///
/// Addresses stay strings here; consumers parse them into typed values and
/// [`validate`](Self::validate) guarantees they parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoneyflowConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub southbound: SouthboundConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub honeypots: HoneypotsConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl HoneyflowConfig {
    /// Load from a TOML file, apply env overrides, then validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HoneyflowError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file without env overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, HoneyflowError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HoneyflowError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                HoneyflowError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string. Does not validate.
    pub fn parse(toml_str: &str) -> Result<Self, HoneyflowError> {
        toml::from_str(toml_str).map_err(|e| {
            HoneyflowError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Apply `HONEYFLOW_{SECTION}_{FIELD}` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        // general
        override_string(&mut self.general.log_level, "HONEYFLOW_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "HONEYFLOW_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "HONEYFLOW_GENERAL_PID_FILE");

        // listeners
        override_bool(&mut self.southbound.enabled, "HONEYFLOW_SOUTHBOUND_ENABLED");
        override_string(&mut self.southbound.bind, "HONEYFLOW_SOUTHBOUND_BIND");
        override_usize(
            &mut self.southbound.max_connections,
            "HONEYFLOW_SOUTHBOUND_MAX_CONNECTIONS",
        );
        override_bool(&mut self.control.enabled, "HONEYFLOW_CONTROL_ENABLED");
        override_string(&mut self.control.bind, "HONEYFLOW_CONTROL_BIND");

        // engine
        override_usize(&mut self.engine.workers, "HONEYFLOW_ENGINE_WORKERS");
        override_u64(
            &mut self.engine.sweep_interval_secs,
            "HONEYFLOW_ENGINE_SWEEP_INTERVAL_SECS",
        );

        // detection
        override_u64(
            &mut self.detection.rate_window_secs,
            "HONEYFLOW_DETECTION_RATE_WINDOW_SECS",
        );
        override_usize(
            &mut self.detection.high_rate_threshold,
            "HONEYFLOW_DETECTION_HIGH_RATE_THRESHOLD",
        );
        override_u64(
            &mut self.detection.scan_window_secs,
            "HONEYFLOW_DETECTION_SCAN_WINDOW_SECS",
        );
        override_usize(
            &mut self.detection.port_scan_threshold,
            "HONEYFLOW_DETECTION_PORT_SCAN_THRESHOLD",
        );

        // classification
        override_csv(
            &mut self.classification.known_bad_ips,
            "HONEYFLOW_CLASSIFICATION_KNOWN_BAD_IPS",
        );
        override_string(
            &mut self.classification.known_bad_level,
            "HONEYFLOW_CLASSIFICATION_KNOWN_BAD_LEVEL",
        );
        override_u8(
            &mut self.classification.malicious_risk_threshold,
            "HONEYFLOW_CLASSIFICATION_MALICIOUS_RISK_THRESHOLD",
        );
        override_u8(
            &mut self.classification.suspicious_risk_threshold,
            "HONEYFLOW_CLASSIFICATION_SUSPICIOUS_RISK_THRESHOLD",
        );

        // load balancer
        override_bool(
            &mut self.load_balancer.enabled,
            "HONEYFLOW_LOAD_BALANCER_ENABLED",
        );
        override_string(&mut self.load_balancer.vip, "HONEYFLOW_LOAD_BALANCER_VIP");
        override_csv(
            &mut self.load_balancer.backends,
            "HONEYFLOW_LOAD_BALANCER_BACKENDS",
        );

        // honeypots
        override_string(
            &mut self.honeypots.triage.ip,
            "HONEYFLOW_HONEYPOTS_TRIAGE_IP",
        );
        override_string(&mut self.honeypots.deep.ip, "HONEYFLOW_HONEYPOTS_DEEP_IP");
        override_u16(
            &mut self.honeypots.hard_timeout_secs,
            "HONEYFLOW_HONEYPOTS_HARD_TIMEOUT_SECS",
        );

        // oracle
        override_bool(&mut self.oracle.enabled, "HONEYFLOW_ORACLE_ENABLED");
        override_string(&mut self.oracle.addr, "HONEYFLOW_ORACLE_ADDR");
        override_u64(&mut self.oracle.timeout_ms, "HONEYFLOW_ORACLE_TIMEOUT_MS");

        // metrics
        override_bool(&mut self.metrics.enabled, "HONEYFLOW_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "HONEYFLOW_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "HONEYFLOW_METRICS_PORT");
    }

    /// Check every value a consumer will rely on.
    pub fn validate(&self) -> Result<(), HoneyflowError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.engine.workers == 0 {
            return Err(invalid("engine.workers", "must be at least 1"));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(invalid(
                "engine.event_channel_capacity",
                "must be greater than 0",
            ));
        }
        if self.engine.sweep_interval_secs == 0 {
            return Err(invalid("engine.sweep_interval_secs", "must be greater than 0"));
        }
        if self.southbound.command_channel_capacity == 0 {
            return Err(invalid(
                "southbound.command_channel_capacity",
                "must be greater than 0",
            ));
        }

        self.validate_detection()?;
        self.validate_classification()?;
        self.validate_addresses()?;

        if self.oracle.enabled {
            if self.oracle.addr.is_empty() {
                return Err(invalid(
                    "oracle.addr",
                    "must not be empty when the oracle is enabled",
                ));
            }
            if self.oracle.timeout_ms == 0 {
                return Err(invalid("oracle.timeout_ms", "must be greater than 0"));
            }
            if self.oracle.queue_capacity == 0 {
                return Err(invalid("oracle.queue_capacity", "must be greater than 0"));
            }
        }

        if self.metrics.enabled && !self.metrics.endpoint.starts_with('/') {
            return Err(invalid("metrics.endpoint", "must start with '/'"));
        }

        Ok(())
    }

    fn validate_detection(&self) -> Result<(), HoneyflowError> {
        let d = &self.detection;
        if d.rate_window_secs == 0 {
            return Err(invalid("detection.rate_window_secs", "must be greater than 0"));
        }
        if d.scan_window_secs == 0 {
            return Err(invalid("detection.scan_window_secs", "must be greater than 0"));
        }
        if d.high_rate_threshold == 0 {
            return Err(invalid(
                "detection.high_rate_threshold",
                "must be greater than 0",
            ));
        }
        if d.port_scan_threshold == 0 {
            return Err(invalid(
                "detection.port_scan_threshold",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_classification(&self) -> Result<(), HoneyflowError> {
        let c = &self.classification;
        if !["suspicious", "malicious"].contains(&c.known_bad_level.as_str()) {
            return Err(invalid(
                "classification.known_bad_level",
                "must be one of: suspicious, malicious",
            ));
        }
        if c.malicious_risk_threshold > 100 {
            return Err(invalid(
                "classification.malicious_risk_threshold",
                "must be at most 100",
            ));
        }
        if c.suspicious_risk_threshold >= c.malicious_risk_threshold {
            return Err(invalid(
                "classification.suspicious_risk_threshold",
                "must be lower than malicious_risk_threshold",
            ));
        }
        for (i, combo) in c.suspicious_combos.iter().enumerate() {
            if !["tcp", "udp"].contains(&combo.protocol.to_ascii_lowercase().as_str()) {
                return Err(invalid(
                    &format!("classification.suspicious_combos[{i}].protocol"),
                    "must be one of: tcp, udp",
                ));
            }
        }
        for ip in &c.known_bad_ips {
            check_ipv4("classification.known_bad_ips", ip)?;
        }
        Ok(())
    }

    fn validate_addresses(&self) -> Result<(), HoneyflowError> {
        let lb = &self.load_balancer;
        if lb.enabled {
            let vip = check_ipv4("load_balancer.vip", &lb.vip)?;
            if lb.backends.is_empty() {
                return Err(invalid(
                    "load_balancer.backends",
                    "must not be empty when the load balancer is enabled",
                ));
            }
            for backend in &lb.backends {
                if check_ipv4("load_balancer.backends", backend)? == vip {
                    return Err(invalid(
                        "load_balancer.backends",
                        "the virtual IP cannot also be a backend",
                    ));
                }
            }
            if let Some(mac) = &lb.vip_mac {
                check_mac("load_balancer.vip_mac", mac)?;
            }
        }

        let triage = check_ipv4("honeypots.triage.ip", &self.honeypots.triage.ip)?;
        let deep = check_ipv4("honeypots.deep.ip", &self.honeypots.deep.ip)?;
        if triage == deep {
            return Err(invalid(
                "honeypots.deep.ip",
                "triage and deep honeypots must use different addresses",
            ));
        }
        if let Some(mac) = &self.honeypots.triage.mac {
            check_mac("honeypots.triage.mac", mac)?;
        }
        if let Some(mac) = &self.honeypots.deep.mac {
            check_mac("honeypots.deep.mac", mac)?;
        }

        check_mac("forwarding.probe_mac", &self.forwarding.probe_mac)?;
        check_ipv4("forwarding.probe_ip", &self.forwarding.probe_ip)?;

        for (i, host) in self.topology.hosts.iter().enumerate() {
            check_ipv4(&format!("topology.hosts[{i}].ip"), &host.ip)?;
            if let Some(mac) = &host.mac {
                check_mac(&format!("topology.hosts[{i}].mac"), mac)?;
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> HoneyflowError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn check_ipv4(field: &str, value: &str) -> Result<Ipv4Addr, HoneyflowError> {
    value
        .parse::<Ipv4Addr>()
        .map_err(|e| invalid(field, format!("'{value}' is not an IPv4 address: {e}")))
}

fn check_mac(field: &str, value: &str) -> Result<MacAddr, HoneyflowError> {
    value
        .parse::<MacAddr>()
        .map_err(|e| invalid(field, format!("'{value}' is not a MAC address: {e}")))
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/honeyflow.pid".to_owned(),
        }
    }
}

/// Southbound adapter listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SouthboundConfig {
    pub enabled: bool,
    pub bind: String,
    pub max_connections: usize,
    /// Queue between the engine and the adapter connections.
    pub command_channel_capacity: usize,
}

impl Default for SouthboundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:6653".to_owned(),
            max_connections: 64,
            command_channel_capacity: 4096,
        }
    }
}

/// Control listener (honeypot feedback and stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub bind: String,
    pub max_connections: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8080".to_owned(),
            max_connections: 32,
        }
    }
}

/// Flow engine runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Packet-in worker tasks.
    pub workers: usize,
    pub event_channel_capacity: usize,
    /// Period of the housekeeping sweep.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_channel_capacity: 4096,
            sweep_interval_secs: 30,
        }
    }
}

/// Per-source activity windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub rate_window_secs: u64,
    /// Requests within the rate window that make a source high-rate.
    pub high_rate_threshold: usize,
    pub scan_window_secs: u64,
    /// Distinct ports to one destination within the scan window that make a port scan.
    pub port_scan_threshold: usize,
    /// Destination ports subject to classification. Empty means all.
    pub monitored_ports: Vec<u16>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: 5,
            high_rate_threshold: 20,
            scan_window_secs: 10,
            port_scan_threshold: 5,
            monitored_ports: Vec::new(),
        }
    }
}

/// A protocol/port pair that is suspicious on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousComboConfig {
    /// tcp or udp
    pub protocol: String,
    pub port: u16,
    pub reason: String,
}

impl SuspiciousComboConfig {
    fn new(protocol: &str, port: u16, reason: &str) -> Self {
        Self {
            protocol: protocol.to_owned(),
            port,
            reason: reason.to_owned(),
        }
    }
}

/// Classification heuristics and gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub known_bad_ips: Vec<String>,
    /// Level a known-bad source is raised to: suspicious or malicious.
    pub known_bad_level: String,
    pub suspicious_combos: Vec<SuspiciousComboConfig>,
    /// Risk score strictly above which a source is malicious.
    pub malicious_risk_threshold: u8,
    /// Risk score strictly above which a source is suspicious.
    pub suspicious_risk_threshold: u8,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        let web = [80, 443, 8080, 8443]
            .into_iter()
            .map(|port| SuspiciousComboConfig::new("udp", port, "UDP to Web Port"));
        let mut suspicious_combos: Vec<_> = web.collect();
        suspicious_combos.push(SuspiciousComboConfig::new("tcp", 53, "TCP to DNS Port"));

        Self {
            known_bad_ips: Vec::new(),
            known_bad_level: "suspicious".to_owned(),
            suspicious_combos,
            malicious_risk_threshold: 70,
            suspicious_risk_threshold: 40,
        }
    }
}

/// Round-robin virtual IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub enabled: bool,
    pub vip: String,
    /// MAC answered for the VIP. Unset: adopt the first learned backend MAC.
    pub vip_mac: Option<String>,
    pub backends: Vec<String>,
    pub idle_timeout_secs: u16,
    /// How long an unresolved backend assignment is kept for retries.
    pub pending_timeout_secs: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vip: "10.0.0.100".to_owned(),
            vip_mac: None,
            backends: vec![
                "10.0.0.1".to_owned(),
                "10.0.0.2".to_owned(),
                "10.0.0.3".to_owned(),
            ],
            idle_timeout_secs: 60,
            pending_timeout_secs: 30,
        }
    }
}

/// One honeypot tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotConfig {
    pub ip: String,
    /// Known MAC. Unset: learned from traffic.
    #[serde(default)]
    pub mac: Option<String>,
}

/// Honeypot tiers: triage for suspicious, deep for malicious.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoneypotsConfig {
    pub triage: HoneypotConfig,
    pub deep: HoneypotConfig,
    pub hard_timeout_secs: u16,
}

impl Default for HoneypotsConfig {
    fn default() -> Self {
        Self {
            triage: HoneypotConfig {
                ip: "10.0.0.4".to_owned(),
                mac: None,
            },
            deep: HoneypotConfig {
                ip: "10.0.0.5".to_owned(),
                mac: None,
            },
            hard_timeout_secs: 300,
        }
    }
}

/// Plain forwarding and address discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    pub learned_idle_timeout_secs: u16,
    pub static_idle_timeout_secs: u16,
    /// Source MAC of controller-originated ARP probes.
    pub probe_mac: String,
    /// Sender IP of ARP probes. `0.0.0.0` makes them RFC 5227 probes.
    pub probe_ip: String,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            learned_idle_timeout_secs: 15,
            static_idle_timeout_secs: 30,
            probe_mac: "02:00:00:00:00:fe".to_owned(),
            probe_ip: "0.0.0.0".to_owned(),
        }
    }
}

/// A host pinned to a switch port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticHostConfig {
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
    pub switch_id: SwitchId,
    pub port: PortNo,
}

/// Static topology mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub hosts: Vec<StaticHostConfig>,
}

/// External verdict oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    /// host:port of the JSON-lines oracle endpoint.
    pub addr: String,
    pub timeout_ms: u64,
    /// Pending requests beyond this are dropped.
    pub queue_capacity: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:50051".to_owned(),
            timeout_ms: 1000,
            queue_capacity: 1024,
        }
    }
}

/// Prometheus exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- env override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u8(target: &mut u8, env_key: &str) {
    override_parsed(target, env_key, "u8");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
