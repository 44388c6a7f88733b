//! End-to-end: a fake southbound adapter and a honeypot client talk to a
//! running flow engine over TCP.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use etherparse::PacketBuilder;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use honeyflow_core::config::HoneyflowConfig;
use honeyflow_core::event::{
    ControlResponse, ControllerCommand, FlowAction, OutputPort, PacketIn, SouthboundEvent,
};
use honeyflow_core::pipeline::Pipeline;
use honeyflow_core::types::{ClassificationLevel, MacAddr};
use honeyflow_daemon::modules::control::ControlListener;
use honeyflow_daemon::modules::flow_engine;
use honeyflow_daemon::modules::southbound::SouthboundListener;
use honeyflow_flow_engine::FlowDecisionEngine;
use honeyflow_flow_engine::packet::{ArpOperation, ArpPacket, encode_arp};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

struct Harness {
    engine: honeyflow_daemon::modules::ModuleHandle,
    southbound: SouthboundListener,
    control: ControlListener,
    decision: Arc<FlowDecisionEngine>,
}

impl Harness {
    async fn start() -> Self {
        // single worker keeps command order equal to event order
        let config = HoneyflowConfig::parse(
            r#"
[engine]
workers = 1

[honeypots.triage]
ip = "10.0.0.4"
mac = "00:00:00:00:00:04"

[honeypots.deep]
ip = "10.0.0.5"
mac = "00:00:00:00:00:05"
"#,
        )
        .unwrap();

        let (event_tx, event_rx) = mpsc::channel(256);
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(256);

        let (mut engine, decision) =
            flow_engine::init(&config, event_rx, feedback_rx, command_tx).unwrap();
        engine.pipeline.start().await.unwrap();

        let mut southbound = SouthboundListener::new("127.0.0.1:0", 4, event_tx, command_rx);
        southbound.start().await.unwrap();

        let mut control =
            ControlListener::new("127.0.0.1:0", 4, Arc::clone(&decision), feedback_tx);
        control.start().await.unwrap();

        Self {
            engine,
            southbound,
            control,
            decision,
        }
    }

    fn southbound_addr(&self) -> SocketAddr {
        self.southbound.local_addr().unwrap()
    }

    fn control_addr(&self) -> SocketAddr {
        self.control.local_addr().unwrap()
    }

    async fn stop(mut self) {
        self.control.stop().await.unwrap();
        self.southbound.stop().await.unwrap();
        self.engine.pipeline.stop().await.unwrap();
    }
}

struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send<T: serde::Serialize>(&mut self, message: &T) {
        let mut line = serde_json::to_vec(message).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> T {
        let line = tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }
}

fn arp_request(sender_ip: [u8; 4], target_ip: [u8; 4]) -> Vec<u8> {
    encode_arp(
        MacAddr::BROADCAST,
        &ArpPacket {
            operation: ArpOperation::Request,
            sender_mac: MacAddr::new([0, 0, 0, 0, 0, sender_ip[3]]),
            sender_ip: Ipv4Addr::from(sender_ip),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr::from(target_ip),
        },
    )
    .to_vec()
}

fn tcp_frame(src: [u8; 4], dst: [u8; 4], dst_port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([0, 0, 0, 0, 0, src[3]], [0, 0, 0, 0, 0, dst[3]])
        .ipv4(src, dst, 64)
        .tcp(40000, dst_port, 1, 64240);
    let mut buf = Vec::with_capacity(builder.size(0));
    builder.write(&mut buf, &[]).unwrap();
    buf
}

// =============================================================================
// southbound
// =============================================================================

#[tokio::test]
async fn switch_connect_installs_base_rules() {
    // Given
    let harness = Harness::start().await;
    let mut adapter = Peer::connect(harness.southbound_addr()).await;

    // When
    adapter
        .send(&SouthboundEvent::SwitchConnected { switch_id: 7 })
        .await;

    // Then: table-miss and ARP-to-controller come back on the same connection
    let mut priorities = Vec::new();
    for _ in 0..2 {
        match adapter.recv::<ControllerCommand>().await {
            ControllerCommand::InstallFlow(install) => {
                assert_eq!(install.switch_id, 7);
                priorities.push(install.priority);
            }
            other => panic!("expected install_flow, got {other:?}"),
        }
    }
    priorities.sort_unstable();
    assert_eq!(priorities, vec![0, 10]);

    harness.stop().await;
}

#[tokio::test]
async fn arp_for_honeypot_is_answered_by_proxy() {
    // Given
    let harness = Harness::start().await;
    let mut adapter = Peer::connect(harness.southbound_addr()).await;
    adapter
        .send(&SouthboundEvent::SwitchConnected { switch_id: 1 })
        .await;
    for _ in 0..2 {
        let _: ControllerCommand = adapter.recv().await;
    }

    // When: 10.0.0.9 on port 3 asks who has the triage honeypot
    adapter
        .send(&SouthboundEvent::PacketIn(PacketIn::new(
            1,
            3,
            arp_request([10, 0, 0, 9], [10, 0, 0, 4]),
        )))
        .await;

    // Then
    let ControllerCommand::PacketOut(out) = adapter.recv::<ControllerCommand>().await else {
        panic!("expected packet_out");
    };
    assert_eq!(out.switch_id, 1);
    assert_eq!(out.actions, vec![FlowAction::Output(OutputPort::Physical(3))]);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_event_lines_are_skipped() {
    // Given
    let harness = Harness::start().await;
    let mut adapter = Peer::connect(harness.southbound_addr()).await;

    // When: garbage first, then a valid event
    adapter.send_raw("{\"type\":\"warp_drive\"}").await;
    adapter.send_raw("not json at all").await;
    adapter
        .send(&SouthboundEvent::SwitchConnected { switch_id: 2 })
        .await;

    // Then: the connection survives and the valid event is served
    let command: ControllerCommand = adapter.recv().await;
    assert_eq!(command.switch_id(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn closing_the_adapter_unbinds_its_switches() {
    // Given
    let harness = Harness::start().await;
    let router = harness.southbound.router();
    let mut adapter = Peer::connect(harness.southbound_addr()).await;
    adapter
        .send(&SouthboundEvent::SwitchConnected { switch_id: 5 })
        .await;
    let _: ControllerCommand = adapter.recv().await;
    assert_eq!(router.switches(), vec![5]);

    // When
    drop(adapter);

    // Then
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while !router.switches().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "switch never unbound");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.stop().await;
}

// =============================================================================
// control
// =============================================================================

#[tokio::test]
async fn feedback_then_stats_round_trip() {
    // Given
    let harness = Harness::start().await;
    let mut client = Peer::connect(harness.control_addr()).await;

    // When: a honeypot reports 10.0.0.77
    client
        .send_raw(
            r#"{"type":"feedback","source_ip":"10.0.0.77","classification":"malicious","risk_score":95}"#,
        )
        .await;

    // Then: acknowledged, and the engine applies it
    let ack: ControlResponse = client.recv().await;
    assert_eq!(
        ack,
        ControlResponse::Ack {
            source_ip: Ipv4Addr::new(10, 0, 0, 77)
        }
    );

    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    loop {
        client.send_raw(r#"{"type":"stats"}"#).await;
        let ControlResponse::Stats(stats) = client.recv::<ControlResponse>().await else {
            panic!("expected stats");
        };
        if stats.malicious_ips == vec![Ipv4Addr::new(10, 0, 0, 77)] {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "feedback never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        harness.decision.classifier().level_of(Ipv4Addr::new(10, 0, 0, 77)),
        ClassificationLevel::Malicious
    );

    harness.stop().await;
}

#[tokio::test]
async fn stats_reflect_southbound_traffic() {
    // Given
    let harness = Harness::start().await;
    let mut adapter = Peer::connect(harness.southbound_addr()).await;
    let mut client = Peer::connect(harness.control_addr()).await;

    // When: one TCP packet from 10.0.0.20
    adapter
        .send(&SouthboundEvent::PacketIn(PacketIn::new(
            1,
            2,
            tcp_frame([10, 0, 0, 20], [10, 0, 0, 1], 443),
        )))
        .await;
    let _: ControllerCommand = adapter.recv().await;

    // Then
    client.send_raw(r#"{"type":"stats"}"#).await;
    let ControlResponse::Stats(stats) = client.recv::<ControlResponse>().await else {
        panic!("expected stats");
    };
    assert_eq!(stats.packets_processed, 1);
    assert_eq!(stats.active_sources, vec![Ipv4Addr::new(10, 0, 0, 20)]);

    harness.stop().await;
}

#[tokio::test]
async fn bad_control_request_gets_error_line() {
    let harness = Harness::start().await;
    let mut client = Peer::connect(harness.control_addr()).await;

    client.send_raw(r#"{"type":"feedback","source_ip":"nope"}"#).await;

    let response: ControlResponse = client.recv().await;
    assert!(matches!(response, ControlResponse::Error { .. }));

    harness.stop().await;
}
