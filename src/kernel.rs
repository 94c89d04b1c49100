//! Interfaces of the kernel pieces the debugger talks to.
//!
//! The messaging framework and the embedded interpreter live outside of this crate,
//! the debugger only sees them through [`KernelMessenger`] and [`ExecutionEngine`].

use serde_json::Value;
use std::sync::{mpsc, Arc, Mutex};

/// Value living in the engine global scope.
pub trait EngineValue: Send {
    /// JSON form of the value, may fail for values without one.
    fn to_json(&self) -> anyhow::Result<Value>;

    /// Textual representation, used when [`EngineValue::to_json`] fails.
    fn repr(&self) -> String;
}

impl EngineValue for Value {
    fn to_json(&self) -> anyhow::Result<Value> {
        Ok(self.clone())
    }

    fn repr(&self) -> String {
        self.to_string()
    }
}

/// Named binding of the engine global scope.
pub struct Binding {
    pub name: String,
    pub value: Box<dyn EngineValue>,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: impl EngineValue + 'static) -> Self {
        Self {
            name: name.into(),
            value: Box::new(value),
        }
    }
}

/// The embedded interpreter which runs user code.
pub trait ExecutionEngine: Send + Sync {
    /// Execute a control document (`{"port": .., "code": ..}`) and return the reply
    /// (`{"status": "ok"}` or `{"status": "error", "ename": .., "evalue": .., "traceback": [..]}`).
    fn execute(&self, request: &Value) -> anyhow::Result<Value>;

    /// Currently bound names of the global scope.
    fn globals(&self) -> Vec<Binding>;
}

/// Kernel messaging framework as seen by the debugger.
pub trait KernelMessenger: Send + Sync {
    /// Address of a named control endpoint (`debugger`, `debugger_header`).
    fn controller_end_point(&self, name: &str) -> String;

    /// Address of the channel where kernel events are published.
    fn publisher_end_point(&self) -> String;

    /// Send a message to the shell (execution engine) and block for its reply.
    fn send_to_shell(&self, message: &Value) -> anyhow::Result<Value>;

    /// Publish a debug event to the front end, under the parent `header` if known.
    fn publish_event(&self, header: Option<&Value>, event: Value);
}

/// Debug event as handed to the publish path.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub header: Option<Value>,
    pub event: Value,
}

/// In-process messenger: shell messages go straight to an engine,
/// events are queued into a channel drained by the kernel.
pub struct LocalKernel {
    id: String,
    engine: Arc<dyn ExecutionEngine>,
    publisher: Mutex<mpsc::Sender<PublishedEvent>>,
}

impl LocalKernel {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> (Self, mpsc::Receiver<PublishedEvent>) {
        let (publisher, events) = mpsc::channel();
        let kernel = Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            engine,
            publisher: Mutex::new(publisher),
        };
        (kernel, events)
    }

    pub fn engine(&self) -> Arc<dyn ExecutionEngine> {
        self.engine.clone()
    }
}

impl KernelMessenger for LocalKernel {
    fn controller_end_point(&self, name: &str) -> String {
        format!("inproc://xrobot-{}-{name}", self.id)
    }

    fn publisher_end_point(&self) -> String {
        format!("inproc://xrobot-{}-publisher", self.id)
    }

    fn send_to_shell(&self, message: &Value) -> anyhow::Result<Value> {
        self.engine.execute(message)
    }

    fn publish_event(&self, header: Option<&Value>, event: Value) {
        let published = PublishedEvent {
            header: header.cloned(),
            event,
        };
        if let Ok(publisher) = self.publisher.lock() {
            _ = publisher.send(published);
        }
    }
}
