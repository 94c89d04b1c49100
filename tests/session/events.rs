use crate::common::{self, request, FakeEngine, Harness};
use serde_json::json;
use serial_test::serial;
use xrobot::debugger::{HEADER_ENDPOINT, REQUEST_ENDPOINT};

#[test]
#[serial]
fn test_events_follow_handshake() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let handshake = harness.debugger.handshake_completed_at().unwrap();

    harness.wait_event("initialized");
    for published in harness.kernel.published_at.lock().unwrap().iter() {
        assert!(*published >= handshake);
    }
}

#[test]
#[serial]
fn test_events_carry_parent_header() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    harness.wait_event("initialized");

    harness
        .debugger
        .set_parent_header(&json!({"msg_id": "abc", "msg_type": "debug_request"}))
        .unwrap();
    let reply = harness
        .debugger
        .handle_request(&request(5, "continue", json!({"threadId": 1})))
        .unwrap();
    assert_eq!(reply["success"], true);

    let stopped = harness.wait_event("stopped");
    assert_eq!(stopped.event["body"]["threadId"], 1);
    assert_eq!(stopped.header.unwrap()["msg_id"], "abc");
}

#[test]
#[serial]
fn test_trace_written() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    harness
        .debugger
        .handle_request(&request(1, "threads", json!({})))
        .unwrap();
    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();

    let log_dir = harness
        .temp
        .path()
        .join(format!("xrobot_debug_logs_{}", std::process::id()));
    let trace = std::fs::read_to_string(log_dir.join("dap.log")).unwrap();
    assert!(trace.contains("\"threads\""));
}
