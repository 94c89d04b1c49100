use serde_json::{json, Value};
use std::net::TcpStream;
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use xrobot::config::{DebuggerConfig, EngineFailurePolicy, PortRange};
use xrobot::dap::transport::{DapTransport, TcpTransport};
use xrobot::debugger::control::ControlHub;
use xrobot::debugger::port::PortAllocator;
use xrobot::debugger::Debugger;
use xrobot::kernel::{Binding, ExecutionEngine, KernelMessenger, LocalKernel, PublishedEvent};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ports shared by every session test, tests are serial so the range is never exhausted.
pub fn ports() -> Arc<PortAllocator> {
    static PORTS: OnceLock<Arc<PortAllocator>> = OnceLock::new();
    PORTS
        .get_or_init(|| Arc::new(PortAllocator::tcp(PortRange::new(47100, 47300), 100)))
        .clone()
}

/// Minimal debug adapter which connects to the kernel port, the way the
/// bootstrap code run by the engine does.
///
/// Sends `initialized` right after connect, answers `continue` with a `stopped`
/// event, fails `evaluate` of `fail` and answers `stackTrace` with one frame.
pub struct FakeTarget;

impl FakeTarget {
    pub fn connect(port: u16) -> std::io::Result<()> {
        let stream = TcpStream::connect(("127.0.0.1", port))?;
        thread::spawn(move || {
            _ = Self::serve(stream);
        });
        Ok(())
    }

    fn serve(stream: TcpStream) -> xrobot::Result<()> {
        let mut transport = TcpTransport::new(stream)?;
        let mut seq = 0;
        let mut next_seq = || {
            seq += 1;
            seq
        };

        let initialized = json!({"seq": next_seq(), "type": "event", "event": "initialized"});
        transport.write_message(&initialized)?;

        loop {
            let request = transport.read_message()?;
            let command = request["command"].as_str().unwrap_or_default().to_string();
            let mut response = json!({
                "seq": next_seq(),
                "type": "response",
                "request_seq": request["seq"],
                "success": true,
                "command": command,
                "body": {},
            });

            match command.as_str() {
                "stackTrace" => {
                    response["body"] = json!({
                        "stackFrames": [{"id": 1, "name": "Log", "line": 3}],
                        "totalFrames": 1,
                    });
                }
                "evaluate" if request["arguments"]["expression"] == "fail" => {
                    response["success"] = json!(false);
                    response["message"] = json!("boom");
                }
                _ => {}
            }
            transport.write_message(&response)?;

            if command == "continue" {
                transport.write_message(&json!({
                    "seq": next_seq(),
                    "type": "event",
                    "event": "stopped",
                    "body": {"reason": "breakpoint", "threadId": 1},
                }))?;
            }
        }
    }
}

/// Engine which connects a [`FakeTarget`] to the requested port,
/// or replies with a fixed error.
pub struct FakeEngine {
    error: Option<Value>,
    pub executed: Mutex<Vec<Value>>,
}

impl FakeEngine {
    pub fn working() -> Self {
        Self {
            error: None,
            executed: Mutex::default(),
        }
    }

    pub fn failing(reply: Value) -> Self {
        Self {
            error: Some(reply),
            executed: Mutex::default(),
        }
    }
}

impl ExecutionEngine for FakeEngine {
    fn execute(&self, request: &Value) -> anyhow::Result<Value> {
        self.executed.lock().unwrap().push(request.clone());
        if let Some(reply) = &self.error {
            return Ok(reply.clone());
        }
        // run what the bootstrap code does: connect to `robot_port`
        let code = request["code"].as_str().unwrap_or_default();
        anyhow::ensure!(
            code.contains("connect(int(robot_port))"),
            "bootstrap code does not connect the target"
        );
        let port: u16 = code
            .lines()
            .find_map(|line| line.strip_prefix("robot_port = "))
            .ok_or_else(|| anyhow::anyhow!("robot_port is missing"))?
            .parse()?;
        FakeTarget::connect(port)?;
        Ok(json!({"status": "ok"}))
    }

    fn globals(&self) -> Vec<Binding> {
        vec![
            Binding::new("x", json!(5)),
            Binding::new("suite", json!({"name": "Smoke"})),
        ]
    }
}

/// Local kernel which remembers when each event was published.
pub struct RecordingKernel {
    inner: LocalKernel,
    pub published_at: Mutex<Vec<Instant>>,
}

impl KernelMessenger for RecordingKernel {
    fn controller_end_point(&self, name: &str) -> String {
        self.inner.controller_end_point(name)
    }

    fn publisher_end_point(&self) -> String {
        self.inner.publisher_end_point()
    }

    fn send_to_shell(&self, message: &Value) -> anyhow::Result<Value> {
        self.inner.send_to_shell(message)
    }

    fn publish_event(&self, header: Option<&Value>, event: Value) {
        self.published_at.lock().unwrap().push(Instant::now());
        self.inner.publish_event(header, event);
    }
}

pub struct Harness {
    pub debugger: Debugger,
    pub kernel: Arc<RecordingKernel>,
    pub engine: Arc<FakeEngine>,
    pub hub: Arc<ControlHub>,
    pub ports: Arc<PortAllocator>,
    pub events: mpsc::Receiver<PublishedEvent>,
    pub temp: tempfile::TempDir,
}

impl Harness {
    pub fn new(engine: FakeEngine, ports: Arc<PortAllocator>) -> Self {
        Self::with_policy(engine, ports, EngineFailurePolicy::Degrade)
    }

    pub fn with_policy(
        engine: FakeEngine,
        ports: Arc<PortAllocator>,
        policy: EngineFailurePolicy,
    ) -> Self {
        let engine = Arc::new(engine);
        let (inner, events) = LocalKernel::new(engine.clone());
        let kernel = Arc::new(RecordingKernel {
            inner,
            published_at: Mutex::default(),
        });
        let hub = Arc::new(ControlHub::new());
        let temp = tempfile::tempdir().unwrap();

        let config = DebuggerConfig {
            engine_failure: policy,
            temp_root: Some(temp.path().to_path_buf()),
            trace_dap: true,
            ..DebuggerConfig::default()
        };
        let debugger = Debugger::new(config, kernel.clone(), engine.clone(), hub.clone(), ports.clone())
            .with_debugger_config(json!({"justMyCode": false}));

        Self {
            debugger,
            kernel,
            engine,
            hub,
            ports,
            events,
            temp,
        }
    }

    pub fn endpoint(&self, name: &str) -> String {
        self.kernel.controller_end_point(name)
    }

    /// Wait for a published event named `name`, skipping others.
    pub fn wait_event(&self, name: &str) -> PublishedEvent {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let published = self
                .events
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("no `{name}` event within {EVENT_TIMEOUT:?}"));
            if published.event["event"] == name {
                return published;
            }
        }
    }
}

pub fn request(seq: i64, command: &str, arguments: Value) -> Value {
    json!({"seq": seq, "type": "request", "command": command, "arguments": arguments})
}
