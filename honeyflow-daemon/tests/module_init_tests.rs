//! Module initialization and registry ordering.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::error::{HoneyflowError, PipelineError};
use honeyflow_core::pipeline::{HealthStatus, Pipeline};
use honeyflow_daemon::modules::{self, ModuleHandle, ModuleRegistry};

// =============================================================================
// init functions
// =============================================================================

#[tokio::test]
async fn flow_engine_init_returns_shared_decision_engine() {
    // Given
    let config = HoneyflowConfig::default();
    let (_event_tx, event_rx) = mpsc::channel(16);
    let (_feedback_tx, feedback_rx) = mpsc::channel(16);
    let (command_tx, _command_rx) = mpsc::channel(16);

    // When
    let (handle, decision) =
        modules::flow_engine::init(&config, event_rx, feedback_rx, command_tx).unwrap();

    // Then
    assert_eq!(handle.name, "flow-engine");
    assert!(handle.enabled);
    assert_eq!(decision.stats().packets_processed, 0);
    assert!(decision.pool().is_some(), "default config enables the VIP pool");
}

#[tokio::test]
async fn flow_engine_init_rejects_bad_addresses() {
    // Given: a honeypot address that is not an IPv4 address
    let mut config = HoneyflowConfig::default();
    config.honeypots.triage.ip = "honeypot.local".to_owned();
    let (_event_tx, event_rx) = mpsc::channel(16);
    let (_feedback_tx, feedback_rx) = mpsc::channel(16);
    let (command_tx, _command_rx) = mpsc::channel(16);

    // When
    let result = modules::flow_engine::init(&config, event_rx, feedback_rx, command_tx);

    // Then
    let err = result.err().expect("init should fail").to_string();
    assert!(err.contains("honeypots.triage"), "got: {err}");
}

#[tokio::test]
async fn southbound_init_respects_enabled_flag() {
    let mut config = HoneyflowConfig::default();
    let (event_tx, _event_rx) = mpsc::channel(16);
    let (_command_tx, command_rx) = mpsc::channel(16);

    config.southbound.enabled = false;
    assert!(modules::southbound::init(&config, event_tx.clone(), command_rx).is_none());

    config.southbound.enabled = true;
    let (_command_tx, command_rx) = mpsc::channel(16);
    let handle = modules::southbound::init(&config, event_tx, command_rx).unwrap();
    assert_eq!(handle.name, "southbound");
}

#[tokio::test]
async fn control_init_respects_enabled_flag() {
    let mut config = HoneyflowConfig::default();
    let (_event_tx, event_rx) = mpsc::channel(16);
    let (feedback_tx, feedback_rx) = mpsc::channel(16);
    let (command_tx, _command_rx) = mpsc::channel(16);
    let (_engine, decision) =
        modules::flow_engine::init(&config, event_rx, feedback_rx, command_tx).unwrap();

    config.control.enabled = false;
    assert!(modules::control::init(&config, Arc::clone(&decision), feedback_tx.clone()).is_none());

    config.control.enabled = true;
    let handle = modules::control::init(&config, decision, feedback_tx).unwrap();
    assert_eq!(handle.name, "control");
}

// =============================================================================
// registry
// =============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    journal: Journal,
    running: bool,
    fail_start: bool,
}

impl Recorder {
    fn handle(name: &'static str, journal: &Journal, enabled: bool) -> ModuleHandle {
        Self::build(name, journal, enabled, false)
    }

    fn build(name: &'static str, journal: &Journal, enabled: bool, fail_start: bool) -> ModuleHandle {
        ModuleHandle::new(
            name,
            enabled,
            Box::new(Self {
                name,
                journal: Arc::clone(journal),
                running: false,
                fail_start,
            }),
        )
    }
}

impl Pipeline for Recorder {
    async fn start(&mut self) -> Result<(), HoneyflowError> {
        if self.fail_start {
            return Err(PipelineError::InitFailed("bind failed".to_owned()).into());
        }
        self.journal.lock().unwrap().push(format!("start {}", self.name));
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HoneyflowError> {
        if !self.running {
            return Err(PipelineError::NotRunning.into());
        }
        self.journal.lock().unwrap().push(format!("stop {}", self.name));
        self.running = false;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.running {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy("not started".to_owned())
        }
    }
}

#[tokio::test]
async fn registry_starts_in_order_and_stops_in_reverse() {
    // Given
    let journal = Journal::default();
    let mut registry = ModuleRegistry::new();
    registry.register(Recorder::handle("flow-engine", &journal, true));
    registry.register(Recorder::handle("southbound", &journal, true));
    registry.register(Recorder::handle("control", &journal, true));

    // When
    registry.start_all().await.unwrap();
    registry.stop_all().await.unwrap();

    // Then
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "start flow-engine",
            "start southbound",
            "start control",
            "stop control",
            "stop southbound",
            "stop flow-engine",
        ]
    );
}

#[tokio::test]
async fn registry_skips_disabled_modules() {
    let journal = Journal::default();
    let mut registry = ModuleRegistry::new();
    registry.register(Recorder::handle("flow-engine", &journal, true));
    registry.register(Recorder::handle("control", &journal, false));

    registry.start_all().await.unwrap();

    assert_eq!(registry.count(), 2);
    assert_eq!(registry.enabled_count(), 1);
    assert_eq!(*journal.lock().unwrap(), vec!["start flow-engine"]);

    let statuses = registry.health_statuses().await;
    assert!(statuses.iter().all(|(_, _, s)| s.is_healthy()));
}

#[tokio::test]
async fn failed_start_can_be_rolled_back() {
    // Given: the second module cannot bind
    let journal = Journal::default();
    let mut registry = ModuleRegistry::new();
    registry.register(Recorder::handle("flow-engine", &journal, true));
    registry.register(Recorder::build("southbound", &journal, true, true));
    registry.register(Recorder::handle("control", &journal, true));

    // When
    let err = registry.start_all().await.unwrap_err().to_string();

    // Then: the error names the module, and stop_all only stops what started
    assert!(err.contains("southbound"), "got: {err}");
    registry.stop_all().await.unwrap();
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["start flow-engine", "stop flow-engine"]
    );
}
