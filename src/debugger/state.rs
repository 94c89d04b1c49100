//! Debug state the front end restores its view from (`debugInfo`).

use crate::dap::protocol::command_of;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub type SharedDebugState = Arc<Mutex<DebugState>>;

/// Breakpoints per source and threads stopped in the debug target.
#[derive(Debug, Default)]
pub struct DebugState {
    breakpoints: BTreeMap<String, Vec<Value>>,
    stopped_threads: BTreeSet<i64>,
}

fn thread_id(value: &Value) -> Option<i64> {
    value.get("threadId").and_then(Value::as_i64)
}

impl DebugState {
    pub fn shared() -> SharedDebugState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Update the state with a request that reached the adapter and its reply.
    pub fn on_reply(&mut self, request: &Value, reply: &Value) {
        if reply.get("success").and_then(Value::as_bool) != Some(true) {
            return;
        }
        let arguments = request.get("arguments").unwrap_or(&Value::Null);

        match command_of(request) {
            "setBreakpoints" => {
                let Some(source) = arguments.pointer("/source/path").and_then(Value::as_str)
                else {
                    return;
                };
                let breakpoints = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if breakpoints.is_empty() {
                    self.breakpoints.remove(source);
                } else {
                    self.breakpoints.insert(source.to_string(), breakpoints);
                }
            }
            // a continue reply without `allThreadsContinued: false` resumes every thread
            "continue" => {
                let all = reply
                    .pointer("/body/allThreadsContinued")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if all {
                    self.stopped_threads.clear();
                } else if let Some(id) = thread_id(arguments) {
                    self.stopped_threads.remove(&id);
                }
            }
            "next" | "stepIn" | "stepOut" | "stepBack" | "reverseContinue" => {
                if let Some(id) = thread_id(arguments) {
                    self.stopped_threads.remove(&id);
                }
            }
            "disconnect" | "terminate" => self.stopped_threads.clear(),
            _ => {}
        }
    }

    /// Update the state with an event of the adapter.
    pub fn on_event(&mut self, event: &Value) {
        let body = event.get("body").unwrap_or(&Value::Null);
        let all_threads = |field: &str| body.get(field).and_then(Value::as_bool) == Some(true);

        match event.get("event").and_then(Value::as_str).unwrap_or_default() {
            "stopped" => {
                if let Some(id) = thread_id(body) {
                    self.stopped_threads.insert(id);
                }
            }
            "continued" => {
                if all_threads("allThreadsContinued") {
                    self.stopped_threads.clear();
                } else if let Some(id) = thread_id(body) {
                    self.stopped_threads.remove(&id);
                }
            }
            "thread" => {
                if body.get("reason").and_then(Value::as_str) == Some("exited") {
                    if let Some(id) = thread_id(body) {
                        self.stopped_threads.remove(&id);
                    }
                }
            }
            "exited" | "terminated" => self.stopped_threads.clear(),
            _ => {}
        }
    }

    /// Breakpoints in the `debugInfo` shape: one `{source, breakpoints}` entry per source.
    pub fn breakpoints(&self) -> Vec<Value> {
        self.breakpoints
            .iter()
            .map(|(source, breakpoints)| json!({"source": source, "breakpoints": breakpoints}))
            .collect()
    }

    pub fn stopped_threads(&self) -> Vec<i64> {
        self.stopped_threads.iter().copied().collect()
    }
}
