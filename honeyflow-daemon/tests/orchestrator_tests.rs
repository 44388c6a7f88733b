//! Orchestrator assembly tests.

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::pipeline::HealthStatus;
use honeyflow_daemon::orchestrator::Orchestrator;

fn quiet_config() -> HoneyflowConfig {
    let mut config = HoneyflowConfig::default();
    config.southbound.bind = "127.0.0.1:0".to_owned();
    config.control.bind = "127.0.0.1:0".to_owned();
    config.general.pid_file = String::new();
    config
}

#[tokio::test]
async fn default_config_registers_three_modules() {
    // When
    let orchestrator = Orchestrator::build_from_config(quiet_config()).unwrap();

    // Then
    assert_eq!(orchestrator.module_count(), 3);
    assert_eq!(orchestrator.decision_engine().stats().packets_processed, 0);
}

#[tokio::test]
async fn disabled_listeners_are_not_registered() {
    let mut config = quiet_config();
    config.southbound.enabled = false;
    config.control.enabled = false;

    let orchestrator = Orchestrator::build_from_config(config).unwrap();

    assert_eq!(orchestrator.module_count(), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    // Given: no workers to drain the event channel
    let mut config = quiet_config();
    config.engine.workers = 0;

    // When
    let result = Orchestrator::build_from_config(config);

    // Then
    assert!(result.is_err());
}

#[tokio::test]
async fn health_before_start_is_unhealthy() {
    let orchestrator = Orchestrator::build_from_config(quiet_config()).unwrap();

    let health = orchestrator.health().await;

    assert_eq!(health.modules.len(), 3);
    let HealthStatus::Unhealthy(reason) = health.status else {
        panic!("expected Unhealthy, got {:?}", health.status);
    };
    assert!(reason.contains("flow-engine: not started"), "got: {reason}");
}

#[tokio::test]
async fn shutdown_without_start_is_clean() {
    let mut orchestrator = Orchestrator::build_from_config(quiet_config()).unwrap();

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn build_loads_a_config_file() {
    // Given
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("honeyflow.toml");
    std::fs::write(
        &path,
        r#"
[general]
pid_file = ""

[southbound]
bind = "127.0.0.1:0"

[control]
enabled = false
"#,
    )
    .unwrap();

    // When
    let orchestrator = Orchestrator::build(&path).await.unwrap();

    // Then
    assert_eq!(orchestrator.module_count(), 2);
    assert!(!orchestrator.config().control.enabled);
}
