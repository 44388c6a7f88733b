#![no_main]

use honeyflow_core::event::{ControlRequest, SouthboundEvent};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // both listeners feed untrusted lines straight into serde
    if let Ok(request) = serde_json::from_slice::<ControlRequest>(data) {
        if let ControlRequest::Feedback(feedback) = &request {
            assert!(feedback.validate().is_ok(), "decoded score out of range");
        }
        let encoded = serde_json::to_vec(&request).expect("decoded request re-encodes");
        let again: ControlRequest =
            serde_json::from_slice(&encoded).expect("re-encoded request decodes");
        assert_eq!(request, again);
    }
    let _ = serde_json::from_slice::<SouthboundEvent>(data);
});
