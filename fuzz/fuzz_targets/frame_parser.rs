#![no_main]

use honeyflow_flow_engine::packet::parse_frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Ok or Err, never a panic or an out-of-bounds slice
    let _ = parse_frame(data);
});
