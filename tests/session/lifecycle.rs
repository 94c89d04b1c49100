use crate::common::{self, request, FakeEngine, Harness};
use serde_json::json;
use serial_test::serial;
use std::net::TcpListener;
use std::sync::Arc;
use xrobot::config::{EngineFailurePolicy, PortRange};
use xrobot::debugger::port::PortAllocator;
use xrobot::debugger::{SessionState, HEADER_ENDPOINT, REQUEST_ENDPOINT};
use xrobot::Error;

#[test]
#[serial]
fn test_start_stop() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    let request_endpoint = harness.endpoint(REQUEST_ENDPOINT);
    let header_endpoint = harness.endpoint(HEADER_ENDPOINT);

    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    assert_eq!(harness.debugger.state(), SessionState::Running);
    assert!(harness.debugger.engine_error().is_none());
    assert!(harness.hub.is_bound(&request_endpoint));
    assert!(harness.hub.is_bound(&header_endpoint));

    let port = harness.debugger.port().unwrap();
    assert!(harness.ports.range().contains(port));
    assert!(harness.ports.is_leased(port));

    let executed = harness.engine.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0]["port"], port.to_string());

    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    assert_eq!(harness.debugger.state(), SessionState::Idle);
    assert!(!harness.hub.is_bound(&request_endpoint));
    assert!(!harness.hub.is_bound(&header_endpoint));
    assert!(!harness.ports.is_leased(port));

    assert!(matches!(
        harness.debugger.stop(HEADER_ENDPOINT, REQUEST_ENDPOINT),
        Err(Error::InvalidState(_))
    ));
}

#[test]
#[serial]
fn test_restart_after_stop() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());

    for _ in 0..2 {
        harness
            .debugger
            .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
            .unwrap();
        let reply = harness
            .debugger
            .handle_request(&request(1, "threads", json!({})))
            .unwrap();
        assert_eq!(reply["success"], true);
        harness
            .debugger
            .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
            .unwrap();
    }
    assert_eq!(harness.engine.executed.lock().unwrap().len(), 2);
}

#[test]
#[serial]
fn test_start_twice() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();

    assert!(matches!(
        harness.debugger.start(HEADER_ENDPOINT, REQUEST_ENDPOINT),
        Err(Error::InvalidState(_))
    ));
    assert_eq!(harness.debugger.state(), SessionState::Running);
}

#[test]
#[serial]
fn test_drop_releases_session() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let port = harness.debugger.port().unwrap();
    let request_endpoint = harness.endpoint(REQUEST_ENDPOINT);

    let common::Harness {
        debugger, hub, ports, ..
    } = harness;
    drop(debugger);

    assert!(!hub.is_bound(&request_endpoint));
    assert!(!ports.is_leased(port));
}

#[test]
#[serial]
fn test_engine_import_error_degrades() {
    let engine = FakeEngine::failing(json!({
        "status": "error",
        "ename": "ImportError",
        "evalue": "no module",
        "traceback": ["line1"],
    }));
    let mut harness = Harness::new(engine, common::ports());

    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let report = harness.debugger.engine_error().unwrap().report_lines();
    assert!(report.contains(&"line1".to_string()));
    assert!(report.contains(&"ImportError - no module".to_string()));

    let reply = harness
        .debugger
        .handle_request(&request(2, "threads", json!({})))
        .unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["request_seq"], 2);

    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
}

#[test]
#[serial]
fn test_engine_import_error_fail_fast() {
    let engine = FakeEngine::failing(json!({
        "status": "error",
        "ename": "ImportError",
        "evalue": "no module",
        "traceback": ["line1"],
    }));
    let mut harness =
        Harness::with_policy(engine, common::ports(), EngineFailurePolicy::FailFast);

    let err = harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap_err();
    assert!(matches!(err, Error::EngineImport { .. }));
    assert!(!err.is_fatal());
    assert_eq!(harness.debugger.state(), SessionState::Idle);
    assert!(!harness.hub.is_bound(&harness.endpoint(REQUEST_ENDPOINT)));
}

#[test]
#[serial]
fn test_port_range_exhausted() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let ports = Arc::new(PortAllocator::tcp(PortRange::new(port, port), 5));

    let mut harness = Harness::new(FakeEngine::working(), ports);
    let err = harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap_err();

    assert!(matches!(err, Error::ResourceExhausted { .. }));
    assert!(err.is_fatal());
    assert_eq!(harness.debugger.state(), SessionState::Idle);
    assert!(!harness.hub.is_bound(&harness.endpoint(REQUEST_ENDPOINT)));
    assert!(!harness.hub.is_bound(&harness.endpoint(HEADER_ENDPOINT)));
    assert!(harness.engine.executed.lock().unwrap().is_empty());
}

#[test]
#[serial]
fn test_target_connects_to_kernel_port() {
    let mut harness = Harness::new(FakeEngine::working(), common::ports());
    harness
        .debugger
        .start(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    let port = harness.debugger.port().unwrap();

    // the kernel side holds the port, the target reached it
    assert!(TcpListener::bind(("127.0.0.1", port)).is_err());
    harness.wait_event("initialized");

    harness
        .debugger
        .stop(HEADER_ENDPOINT, REQUEST_ENDPOINT)
        .unwrap();
    TcpListener::bind(("127.0.0.1", port)).unwrap();
}
