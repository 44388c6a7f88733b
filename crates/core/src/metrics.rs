//! Metric names, label keys and descriptions.
//!
//! Every Prometheus metric is named here so the engine and the daemon record
//! against the same constants through `metrics::counter!()`, `metrics::gauge!()`
//! and `metrics::histogram!()`.
//!
//! # Naming
//!
//! - prefix: `honeyflow_`
//! - module: `flow_engine_`, `oracle_`, `southbound_`, `control_`, `daemon_`
//! - suffix: `_total` (counter), `_seconds` (histogram), none (gauge)
//!
//! ```ignore
//! metrics::counter!(honeyflow_core::metrics::FLOW_ENGINE_REDIRECTS_TOTAL, "tier" => "deep")
//!     .increment(1);
//! ```

// ─── label keys ─────────────────────────────────────────────────────

/// Decision taken for a packet-in (redirect, load_balance, unicast, ...)
pub const LABEL_DECISION: &str = "decision";

/// Classification level (normal, suspicious, malicious)
pub const LABEL_LEVEL: &str = "level";

/// Honeypot tier (triage, deep)
pub const LABEL_TIER: &str = "tier";

/// Flow rule kind (redirect, load_balance, static, unicast, bootstrap)
pub const LABEL_KIND: &str = "kind";

/// Outcome (success, failure, timeout, dropped)
pub const LABEL_RESULT: &str = "result";

// ─── flow engine ────────────────────────────────────────────────────

/// Packet-in events processed (counter, label: decision)
pub const FLOW_ENGINE_PACKET_IN_TOTAL: &str = "honeyflow_flow_engine_packet_in_total";

/// Flow-install commands issued (counter, label: kind)
pub const FLOW_ENGINE_FLOWS_INSTALLED_TOTAL: &str = "honeyflow_flow_engine_flows_installed_total";

/// Honeypot redirections (counter, label: tier)
pub const FLOW_ENGINE_REDIRECTS_TOTAL: &str = "honeyflow_flow_engine_redirects_total";

/// Load-balancer backend assignments (counter)
pub const FLOW_ENGINE_LB_ASSIGNMENTS_TOTAL: &str = "honeyflow_flow_engine_lb_assignments_total";

/// Proxy-ARP replies sent (counter)
pub const FLOW_ENGINE_PROXY_ARP_REPLIES_TOTAL: &str =
    "honeyflow_flow_engine_proxy_arp_replies_total";

/// Classification results (counter, label: level)
pub const FLOW_ENGINE_CLASSIFICATIONS_TOTAL: &str = "honeyflow_flow_engine_classifications_total";

/// Commands dropped because the southbound queue was full (counter)
pub const FLOW_ENGINE_COMMANDS_DROPPED_TOTAL: &str =
    "honeyflow_flow_engine_commands_dropped_total";

/// Honeypot feedback messages applied (counter)
pub const FLOW_ENGINE_FEEDBACK_TOTAL: &str = "honeyflow_flow_engine_feedback_total";

/// Packet-in decision latency (histogram, seconds)
pub const FLOW_ENGINE_PROCESSING_DURATION_SECONDS: &str =
    "honeyflow_flow_engine_processing_duration_seconds";

/// Sources with a live activity record (gauge)
pub const FLOW_ENGINE_ACTIVE_SOURCES: &str = "honeyflow_flow_engine_active_sources";

/// Sticky suspicious set size (gauge)
pub const FLOW_ENGINE_SUSPICIOUS_IPS: &str = "honeyflow_flow_engine_suspicious_ips";

/// Sticky malicious set size (gauge)
pub const FLOW_ENGINE_MALICIOUS_IPS: &str = "honeyflow_flow_engine_malicious_ips";

/// Flows believed installed and not yet expired (gauge)
pub const FLOW_ENGINE_INSTALLED_FLOWS: &str = "honeyflow_flow_engine_installed_flows";

// ─── oracle ─────────────────────────────────────────────────────────

/// Oracle requests (counter, label: result)
pub const ORACLE_REQUESTS_TOTAL: &str = "honeyflow_oracle_requests_total";

/// Oracle round-trip latency (histogram, seconds)
pub const ORACLE_LATENCY_SECONDS: &str = "honeyflow_oracle_latency_seconds";

// ─── daemon listeners ───────────────────────────────────────────────

/// Connected southbound adapters (gauge)
pub const SOUTHBOUND_CONNECTIONS: &str = "honeyflow_southbound_connections";

/// Control requests served (counter, label: result)
pub const CONTROL_REQUESTS_TOTAL: &str = "honeyflow_control_requests_total";

// ─── daemon ─────────────────────────────────────────────────────────

/// Daemon uptime (gauge, seconds)
pub const DAEMON_UPTIME_SECONDS: &str = "honeyflow_daemon_uptime_seconds";

/// Registered modules (gauge)
pub const DAEMON_MODULES_REGISTERED: &str = "honeyflow_daemon_modules_registered";

/// Build info (gauge, always 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "honeyflow_daemon_build_info";

// ─── histogram buckets ──────────────────────────────────────────────

/// Packet-in decision latency buckets, 10us ~ 100ms.
pub const PROCESSING_DURATION_BUCKETS: [f64; 9] = [
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
];

/// Oracle latency buckets, 1ms ~ 2s. The oracle deadline sits inside the range.
pub const ORACLE_LATENCY_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0];

/// Register HELP text for every metric.
///
/// Call once, after the global recorder is installed.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // flow engine
    describe_counter!(
        FLOW_ENGINE_PACKET_IN_TOTAL,
        "Packet-in events processed, by decision"
    );
    describe_counter!(
        FLOW_ENGINE_FLOWS_INSTALLED_TOTAL,
        "Flow-install commands issued, by rule kind"
    );
    describe_counter!(
        FLOW_ENGINE_REDIRECTS_TOTAL,
        "Flows redirected to a honeypot, by tier"
    );
    describe_counter!(
        FLOW_ENGINE_LB_ASSIGNMENTS_TOTAL,
        "Client flows assigned to a load-balancer backend"
    );
    describe_counter!(
        FLOW_ENGINE_PROXY_ARP_REPLIES_TOTAL,
        "ARP replies synthesized for virtual addresses"
    );
    describe_counter!(
        FLOW_ENGINE_CLASSIFICATIONS_TOTAL,
        "Packet classifications, by level"
    );
    describe_counter!(
        FLOW_ENGINE_COMMANDS_DROPPED_TOTAL,
        "Controller commands dropped on a full southbound queue"
    );
    describe_counter!(
        FLOW_ENGINE_FEEDBACK_TOTAL,
        "Honeypot classification feedback messages applied"
    );
    describe_histogram!(
        FLOW_ENGINE_PROCESSING_DURATION_SECONDS,
        "Packet-in decision latency in seconds"
    );
    describe_gauge!(
        FLOW_ENGINE_ACTIVE_SOURCES,
        "Source IPs with a live activity record"
    );
    describe_gauge!(FLOW_ENGINE_SUSPICIOUS_IPS, "Sources in the suspicious set");
    describe_gauge!(FLOW_ENGINE_MALICIOUS_IPS, "Sources in the malicious set");
    describe_gauge!(
        FLOW_ENGINE_INSTALLED_FLOWS,
        "Flows issued by the controller and not yet timed out"
    );

    // oracle
    describe_counter!(ORACLE_REQUESTS_TOTAL, "Verdict oracle requests, by result");
    describe_histogram!(
        ORACLE_LATENCY_SECONDS,
        "Verdict oracle round-trip latency in seconds"
    );

    // listeners
    describe_gauge!(
        SOUTHBOUND_CONNECTIONS,
        "Connected southbound protocol adapters"
    );
    describe_counter!(CONTROL_REQUESTS_TOTAL, "Control requests served, by result");

    // daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Honeyflow daemon uptime in seconds");
    describe_gauge!(
        DAEMON_MODULES_REGISTERED,
        "Number of modules registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        FLOW_ENGINE_PACKET_IN_TOTAL,
        FLOW_ENGINE_FLOWS_INSTALLED_TOTAL,
        FLOW_ENGINE_REDIRECTS_TOTAL,
        FLOW_ENGINE_LB_ASSIGNMENTS_TOTAL,
        FLOW_ENGINE_PROXY_ARP_REPLIES_TOTAL,
        FLOW_ENGINE_CLASSIFICATIONS_TOTAL,
        FLOW_ENGINE_COMMANDS_DROPPED_TOTAL,
        FLOW_ENGINE_FEEDBACK_TOTAL,
        FLOW_ENGINE_PROCESSING_DURATION_SECONDS,
        FLOW_ENGINE_ACTIVE_SOURCES,
        FLOW_ENGINE_SUSPICIOUS_IPS,
        FLOW_ENGINE_MALICIOUS_IPS,
        FLOW_ENGINE_INSTALLED_FLOWS,
        ORACLE_REQUESTS_TOTAL,
        ORACLE_LATENCY_SECONDS,
        SOUTHBOUND_CONNECTIONS,
        CONTROL_REQUESTS_TOTAL,
        DAEMON_UPTIME_SECONDS,
        DAEMON_MODULES_REGISTERED,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_honeyflow_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("honeyflow_"),
                "Metric '{}' does not start with 'honeyflow_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_DECISION, LABEL_LEVEL, LABEL_TIER, LABEL_KIND, LABEL_RESULT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn buckets_are_sorted() {
        for buckets in [
            &PROCESSING_DURATION_BUCKETS[..],
            &ORACLE_LATENCY_BUCKETS[..],
        ] {
            for i in 1..buckets.len() {
                assert!(buckets[i] > buckets[i - 1]);
            }
        }
    }
}
