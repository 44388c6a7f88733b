#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use honeyflow_core::event::PacketIn;
use honeyflow_flow_engine::FlowDecisionEngine;
use honeyflow_flow_engine::config::FlowEngineConfig;

#[derive(Arbitrary, Debug)]
struct Punt {
    switch_id: u8,
    in_port: u8,
    /// milliseconds since the previous punt
    gap_ms: u16,
    frame: Vec<u8>,
}

fuzz_target!(|punts: Vec<Punt>| {
    let engine = FlowDecisionEngine::new(&FlowEngineConfig::default());
    let mut now = Instant::now();

    for punt in punts.iter().take(64) {
        now += Duration::from_millis(u64::from(punt.gap_ms));
        let event = PacketIn::new(
            u64::from(punt.switch_id),
            u32::from(punt.in_port),
            punt.frame.clone(),
        );
        let _ = engine.on_packet_in(&event, now);
    }
    let _ = engine.sweep(now + Duration::from_secs(3600));
    let _ = engine.stats();
});
