//! honeyflow.toml integration tests
//!
//! - the shipped example parses and validates
//! - example values match code defaults where they should
//! - partial files merge with defaults
//! - env vars take precedence over the file

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::error::{ConfigError, HoneyflowError};

const EXAMPLE: &str = include_str!("../../../honeyflow.toml.example");

// =============================================================================
// example config
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = HoneyflowConfig::parse(EXAMPLE).expect("example config should parse");
    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.pid_file, "/var/run/honeyflow/honeyflow.pid");
}

#[test]
fn example_config_passes_validation() {
    let config = HoneyflowConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_code_defaults() {
    let example = HoneyflowConfig::parse(EXAMPLE).expect("should parse");
    let defaults = HoneyflowConfig::default();

    assert_eq!(example.detection.rate_window_secs, defaults.detection.rate_window_secs);
    assert_eq!(
        example.detection.high_rate_threshold,
        defaults.detection.high_rate_threshold
    );
    assert_eq!(example.detection.scan_window_secs, defaults.detection.scan_window_secs);
    assert_eq!(
        example.detection.port_scan_threshold,
        defaults.detection.port_scan_threshold
    );
    assert_eq!(
        example.classification.suspicious_combos,
        defaults.classification.suspicious_combos
    );
    assert_eq!(example.load_balancer.backends, defaults.load_balancer.backends);
    assert_eq!(example.oracle.timeout_ms, defaults.oracle.timeout_ms);
    assert_eq!(example.engine.sweep_interval_secs, defaults.engine.sweep_interval_secs);
}

#[test]
fn example_config_pins_honeypot_macs() {
    let config = HoneyflowConfig::parse(EXAMPLE).expect("should parse");
    assert_eq!(config.honeypots.triage.mac.as_deref(), Some("00:00:00:00:00:04"));
    assert_eq!(config.honeypots.deep.mac.as_deref(), Some("00:00:00:00:00:05"));
    assert!(config.topology.hosts.is_empty());
}

// =============================================================================
// partial configs
// =============================================================================

#[test]
fn partial_config_oracle_only() {
    let config = HoneyflowConfig::parse(
        r#"
[oracle]
enabled = true
addr = "10.9.0.1:7000"
"#,
    )
    .expect("should parse");

    assert!(config.oracle.enabled);
    assert_eq!(config.oracle.addr, "10.9.0.1:7000");
    assert_eq!(config.oracle.timeout_ms, 1000);
    assert_eq!(config.general.log_format, "json");
    config.validate().expect("should validate");
}

#[test]
fn partial_config_topology_hosts() {
    let config = HoneyflowConfig::parse(
        r#"
[[topology.hosts]]
ip = "10.0.0.1"
mac = "00:00:00:00:00:01"
switch_id = 4
port = 1

[[topology.hosts]]
ip = "10.0.0.6"
switch_id = 4
port = 2
"#,
    )
    .expect("should parse");

    assert_eq!(config.topology.hosts.len(), 2);
    assert_eq!(config.topology.hosts[1].switch_id, 4);
    config.validate().expect("should validate");
}

#[test]
fn partial_config_with_bad_host_ip_fails_validation() {
    let config = HoneyflowConfig::parse(
        r#"
[[topology.hosts]]
ip = "h1"
switch_id = 1
port = 1
"#,
    )
    .expect("should parse");

    let err = config.validate().expect_err("should reject non-IPv4 host");
    assert!(matches!(
        err,
        HoneyflowError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "topology.hosts[0].ip"
    ));
}

#[test]
fn wrong_field_type_is_parse_error() {
    let err = HoneyflowConfig::parse("[detection]\nrate_window_secs = \"five\"\n")
        .expect_err("should fail");
    assert!(matches!(
        err,
        HoneyflowError::Config(ConfigError::ParseFailed { .. })
    ));
}

// =============================================================================
// env precedence
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let original = std::env::var("HONEYFLOW_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serialized test
    unsafe {
        std::env::set_var("HONEYFLOW_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = HoneyflowConfig::parse("[general]\nlog_level = \"debug\"\n").expect("parse");
    config.apply_env_overrides();

    // SAFETY: serialized test
    unsafe {
        match original {
            Some(val) => std::env::set_var("HONEYFLOW_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("HONEYFLOW_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(config.general.log_level, "error");
}

#[test]
#[serial_test::serial]
fn env_override_bool_and_csv_fields() {
    let original_enabled = std::env::var("HONEYFLOW_ORACLE_ENABLED").ok();
    let original_bad = std::env::var("HONEYFLOW_CLASSIFICATION_KNOWN_BAD_IPS").ok();
    // SAFETY: serialized test
    unsafe {
        std::env::set_var("HONEYFLOW_ORACLE_ENABLED", "true");
        std::env::set_var(
            "HONEYFLOW_CLASSIFICATION_KNOWN_BAD_IPS",
            "203.0.113.5, 198.51.100.7",
        );
    }

    let mut config = HoneyflowConfig::default();
    config.apply_env_overrides();

    // SAFETY: serialized test
    unsafe {
        match original_enabled {
            Some(val) => std::env::set_var("HONEYFLOW_ORACLE_ENABLED", val),
            None => std::env::remove_var("HONEYFLOW_ORACLE_ENABLED"),
        }
        match original_bad {
            Some(val) => std::env::set_var("HONEYFLOW_CLASSIFICATION_KNOWN_BAD_IPS", val),
            None => std::env::remove_var("HONEYFLOW_CLASSIFICATION_KNOWN_BAD_IPS"),
        }
    }

    assert!(config.oracle.enabled);
    assert_eq!(
        config.classification.known_bad_ips,
        vec!["203.0.113.5", "198.51.100.7"]
    );
    config.validate().expect("overridden config should validate");
}
