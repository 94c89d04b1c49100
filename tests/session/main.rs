mod common;

mod events;
mod lifecycle;

use crate::common::{request, FakeEngine, Harness};
use serde_json::json;
use serial_test::serial;
use xrobot::debugger::{HEADER_ENDPOINT, REQUEST_ENDPOINT};

#[test]
#[serial]
fn test_forwarded_reply_matches_request_seq() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();

    for seq in [7, 8, 42] {
        let reply = harness
            .debugger
            .handle_request(&request(seq, "threads", json!({})))
            .unwrap();
        assert_eq!(reply["request_seq"], seq);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["command"], "threads");
    }

    let reply = harness
        .debugger
        .handle_request(&request(9, "stackTrace", json!({"threadId": 1})))
        .unwrap();
    assert_eq!(reply["body"]["stackFrames"][0]["name"], "Log");

    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
}

#[test]
#[serial]
fn test_failed_request_reaches_caller() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();

    let reply = harness
        .debugger
        .handle_request(&request(3, "evaluate", json!({"expression": "fail"})))
        .unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "boom");

    // the session survives a failed request
    let reply = harness
        .debugger
        .handle_request(&request(4, "evaluate", json!({"expression": "${x}"})))
        .unwrap();
    assert_eq!(reply["success"], true);
}

#[test]
#[serial]
fn test_local_requests_during_session() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();

    let reply = harness
        .debugger
        .handle_request(&request(11, "inspectVariables", json!({})))
        .unwrap();
    assert_eq!(
        reply["body"]["variables"],
        json!([
            {"name": "x", "value": "5", "variablesReference": 0},
            {"name": "suite", "value": "{\"name\":\"Smoke\"}", "variablesReference": 0},
        ])
    );

    let reply = harness
        .debugger
        .handle_request(&request(12, "debugInfo", json!({})))
        .unwrap();
    assert_eq!(reply["body"]["isStarted"], true);
    let prefix = reply["body"]["tmpFilePrefix"].as_str().unwrap();
    assert!(prefix.starts_with(harness.temp.path().to_str().unwrap()));

    let cell = harness.debugger.cell_temporary_file("Log    hello");
    assert!(cell.to_str().unwrap().starts_with(prefix));
    assert_eq!(harness.debugger.debugger_config()["justMyCode"], false);
}

#[test]
#[serial]
fn test_debug_info_tracks_session() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let cell = harness.debugger.cell_temporary_file("Log    hello");
    let cell = cell.to_str().unwrap();

    let reply = harness
        .debugger
        .handle_request(&request(
            1,
            "setBreakpoints",
            json!({"source": {"path": cell}, "breakpoints": [{"line": 1}]}),
        ))
        .unwrap();
    assert_eq!(reply["success"], true);

    let reply = harness
        .debugger
        .handle_request(&request(2, "continue", json!({"threadId": 1})))
        .unwrap();
    assert_eq!(reply["success"], true);
    harness.wait_event("stopped");

    let info = harness
        .debugger
        .handle_request(&request(3, "debugInfo", json!({})))
        .unwrap();
    assert_eq!(
        info["body"]["breakpoints"],
        json!([{"source": cell, "breakpoints": [{"line": 1}]}])
    );
    assert_eq!(info["body"]["stoppedThreads"], json!([1]));

    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let info = harness.debugger.debugger_info();
    assert!(info.breakpoints.is_empty());
    assert!(info.stopped_threads.is_empty());
}
