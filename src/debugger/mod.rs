pub mod bootstrap;
pub mod bridge;
pub mod control;
pub mod inspect;
pub mod port;
pub mod state;
pub mod traceback;

use crate::config::{DebuggerConfig, EngineFailurePolicy};
use crate::dap::protocol::{command_of, request_seq_of, seq_of, DapResponse};
use crate::dap::tracer::FileTracer;
use crate::dap::ClientOptions;
use crate::debugger::bootstrap::{bootstrap_code, SessionPaths, HASH_METHOD, HASH_SEED, TMP_FILE_SUFFIX};
use crate::debugger::bridge::{check_ack, Bridge, BridgeSpec, HANDSHAKE_TOKEN};
use crate::debugger::control::{ControlHub, ControlSocket};
use crate::debugger::inspect::inspect_variables_reply;
use crate::debugger::port::PortAllocator;
use crate::debugger::state::{DebugState, SharedDebugState};
use crate::debugger::traceback::EngineError;
use crate::error::{Error, Result};
use crate::kernel::{ExecutionEngine, KernelMessenger};
use crate::{weak_error, xr_error, xr_info, xr_warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the control endpoint carrying DAP requests.
pub const REQUEST_ENDPOINT: &str = "debugger";
/// Name of the control endpoint carrying parent headers.
pub const HEADER_ENDPOINT: &str = "debugger_header";

/// Extra time the controller waits for a forwarded reply on top of the
/// worker's own request timeout.
const REPLY_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Content of a `debugInfo` reply body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerInfo {
    pub is_started: bool,
    pub hash_method: &'static str,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: &'static str,
    pub breakpoints: Vec<Value>,
    pub stopped_threads: Vec<i64>,
}

struct LiveSession {
    port: u16,
    request: ControlSocket,
    header: ControlSocket,
    state: SharedDebugState,
    bridge: Bridge,
}

impl LiveSession {
    fn addresses(&self) -> [String; 2] {
        [
            self.header.address().to_string(),
            self.request.address().to_string(),
        ]
    }
}

/// Resources taken by a start in progress, released on drop unless disarmed.
struct StartGuard<'a> {
    hub: &'a ControlHub,
    ports: &'a PortAllocator,
    bound: Vec<String>,
    port: Option<u16>,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn new(hub: &'a ControlHub, ports: &'a PortAllocator) -> Self {
        Self {
            hub,
            ports,
            bound: vec![],
            port: None,
            armed: true,
        }
    }

    fn bind(&mut self, address: &str) -> Result<ControlSocket> {
        let socket = self.hub.bind(address)?;
        self.bound.push(address.to_string());
        Ok(socket)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for address in &self.bound {
            weak_error!(self.hub.unbind(address));
        }
        if let Some(port) = self.port {
            self.ports.release(port);
        }
    }
}

/// Debugger session controller of the kernel.
///
/// Owns the lifecycle of one debug session: port allocation, debug target
/// bootstrap inside the engine, the bridge worker and the control endpoints
/// between the kernel and that worker.
pub struct Debugger {
    config: DebuggerConfig,
    debugger_config: Value,
    messenger: Arc<dyn KernelMessenger>,
    engine: Arc<dyn ExecutionEngine>,
    hub: Arc<ControlHub>,
    ports: Arc<PortAllocator>,
    state: SessionState,
    session: Option<LiveSession>,
    engine_error: Option<EngineError>,
    /// Sequence numbers of forwarded requests which came without one.
    next_seq: AtomicI64,
}

impl Debugger {
    pub fn new(
        config: DebuggerConfig,
        messenger: Arc<dyn KernelMessenger>,
        engine: Arc<dyn ExecutionEngine>,
        hub: Arc<ControlHub>,
        ports: Arc<PortAllocator>,
    ) -> Self {
        Self {
            config,
            debugger_config: Value::Null,
            messenger,
            engine,
            hub,
            ports,
            state: SessionState::Idle,
            session: None,
            engine_error: None,
            next_seq: AtomicI64::new(1),
        }
    }

    /// Attach the opaque debugger configuration given by the kernel.
    pub fn with_debugger_config(mut self, debugger_config: Value) -> Self {
        self.debugger_config = debugger_config;
        self
    }

    pub fn debugger_config(&self) -> &Value {
        &self.debugger_config
    }

    pub fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Port of the running session.
    pub fn port(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.port)
    }

    /// Error the engine reported while setting up the last session.
    pub fn engine_error(&self) -> Option<&EngineError> {
        self.engine_error.as_ref()
    }

    /// Moment the bridge worker acknowledged the handshake of the running session.
    pub fn handshake_completed_at(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .and_then(|s| s.bridge.handshake_completed_at())
    }

    fn paths(&self) -> SessionPaths {
        SessionPaths::for_current_process(&self.config.temp_root())
    }

    /// File under which a cell with `code` is known to the debug target.
    pub fn cell_temporary_file(&self, code: &str) -> PathBuf {
        self.paths().cell_file(code)
    }

    pub fn debugger_info(&self) -> DebuggerInfo {
        let (breakpoints, stopped_threads) = match &self.session {
            Some(session) => {
                let state = session.state.lock().unwrap();
                (state.breakpoints(), state.stopped_threads())
            }
            None => (vec![], vec![]),
        };
        DebuggerInfo {
            is_started: self.state == SessionState::Running,
            hash_method: HASH_METHOD,
            hash_seed: HASH_SEED,
            tmp_file_prefix: self.paths().tmp_file_prefix(),
            tmp_file_suffix: TMP_FILE_SUFFIX,
            breakpoints,
            stopped_threads,
        }
    }

    /// Start a debug session.
    ///
    /// Binds the control endpoints named `header_name` and `request_name`, allocates
    /// a port and listens on it, asks the engine to bring up the debug target which
    /// connects to that port and spawns the bridge worker accepting it.
    /// Returns once the worker acknowledged the handshake.
    /// On failure every resource taken so far is released and the state is `Idle` again.
    pub fn start(&mut self, header_name: &str, request_name: &str) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "start requested while session is {}",
                self.state
            )));
        }

        self.state = SessionState::Starting;
        match self.start_session(header_name, request_name) {
            Ok(session) => {
                xr_info!(target: "debugger", "debugger started on port {}", session.port);
                self.session = Some(session);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    fn start_session(&mut self, header_name: &str, request_name: &str) -> Result<LiveSession> {
        let hub = self.hub.clone();
        let ports = self.ports.clone();
        let mut guard = StartGuard::new(&hub, &ports);

        let header = guard.bind(&self.messenger.controller_end_point(header_name))?;
        let request = guard.bind(&self.messenger.controller_end_point(request_name))?;

        let port = ports.allocate()?;
        guard.port = Some(port);

        let paths = self.paths();
        paths.create()?;

        // the target connects back as soon as the bootstrap code runs
        let target = format!("{}:{port}", self.config.host);
        let listener =
            TcpListener::bind(target.as_str()).map_err(|err| Error::connection(&target, err))?;

        let reply = self.bootstrap_target(port, &paths);
        self.engine_error = EngineError::from_reply(&reply);

        let listener = match &self.engine_error {
            None => Some(listener),
            Some(err) => {
                xr_error!(
                    target: "debugger",
                    "Exception raised when trying to import the debug adapter"
                );
                for line in err.report_lines() {
                    xr_error!(target: "debugger", "{line}");
                }
                if self.config.engine_failure == EngineFailurePolicy::FailFast {
                    return Err(Error::EngineImport {
                        ename: err.ename.clone(),
                        evalue: err.evalue.clone(),
                    });
                }
                None
            }
        };

        let tracer = if self.config.trace_dap {
            weak_error!(FileTracer::new(&paths.trace_log()), "DAP trace disabled:")
        } else {
            None
        };
        let detached_reason = match &self.engine_error {
            Some(err) => format!("debug target is not available: {} - {}", err.ename, err.evalue),
            None => "debug target is not available".to_string(),
        };

        let state = DebugState::shared();
        let bridge = Bridge::spawn(
            BridgeSpec {
                listener,
                detached_reason,
                request_endpoint: request.address().to_string(),
                header_endpoint: header.address().to_string(),
                publisher_endpoint: self.messenger.publisher_end_point(),
                client: ClientOptions::from_config(&self.config).with_tracer(tracer),
                poll_interval: self.config.poll_interval(),
                state: state.clone(),
            },
            hub.clone(),
            self.messenger.clone(),
        )?;

        request.send(HANDSHAKE_TOKEN)?;
        let ack = request
            .recv_timeout(self.config.handshake_timeout())
            .map_err(|err| match err {
                Error::Timeout { timeout, .. } => Error::timeout("debugger handshake", timeout),
                err => err,
            })?;
        check_ack(&ack, &target)?;

        guard.disarm();
        Ok(LiveSession {
            port,
            request,
            header,
            state,
            bridge,
        })
    }

    /// Ask the engine to run the debug target bootstrap. A shell failure is turned
    /// into an error reply, so it follows the engine failure policy.
    fn bootstrap_target(&self, port: u16, paths: &SessionPaths) -> Value {
        let control = json!({
            "port": port.to_string(),
            "code": bootstrap_code(port, &paths.engine_log()),
        });
        match self.messenger.send_to_shell(&control) {
            Ok(reply) => reply,
            Err(err) => json!({
                "status": "error",
                "ename": "ShellError",
                "evalue": format!("{err:#}"),
                "traceback": [],
            }),
        }
    }

    /// Stop the running session.
    ///
    /// The session is torn down even if the endpoint names don't match the ones
    /// given to [`Debugger::start`], in that case an error is returned afterwards.
    pub fn stop(&mut self, header_name: &str, request_name: &str) -> Result<()> {
        if self.state != SessionState::Running {
            return Err(Error::InvalidState(format!(
                "stop requested while session is {}",
                self.state
            )));
        }
        let Some(session) = self.session.take() else {
            self.state = SessionState::Idle;
            return Err(Error::InvalidState("running without a session".to_string()));
        };
        self.state = SessionState::Stopping;

        let expected = [
            self.messenger.controller_end_point(header_name),
            self.messenger.controller_end_point(request_name),
        ];
        let result = if expected == session.addresses() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "endpoints `{header_name}`, `{request_name}` are not the session endpoints"
            )))
        };

        self.teardown(session);
        self.state = SessionState::Idle;
        xr_info!(target: "debugger", "debugger stopped");
        result
    }

    fn teardown(&self, session: LiveSession) {
        let LiveSession {
            port,
            request,
            header,
            mut bridge,
            ..
        } = session;

        for address in [header.address(), request.address()] {
            weak_error!(self.hub.unbind(address));
        }
        drop(request);
        drop(header);
        bridge.join();

        if !self.ports.release(port) {
            xr_warn!(target: "debugger", "port {port} was not leased");
        }
    }

    /// Serve a DAP request of the front end.
    ///
    /// `inspectVariables` and `debugInfo` are answered locally, anything else is
    /// forwarded to the debug target and requires a running session.
    pub fn handle_request(&mut self, message: &Value) -> Result<Value> {
        match command_of(message) {
            "inspectVariables" => Ok(inspect_variables_reply(message, &self.engine.globals())),
            "debugInfo" => {
                let info = serde_json::to_value(self.debugger_info())?;
                Ok(DapResponse::success(message, info).into_value())
            }
            _ => self.forward(message),
        }
    }

    fn forward(&self, message: &Value) -> Result<Value> {
        let session = self.running_session()?;

        let mut message = message.clone();
        let seq = match seq_of(&message) {
            Some(seq) => seq,
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                message
                    .as_object_mut()
                    .ok_or_else(|| Error::Protocol("request must be a JSON object".to_string()))?
                    .insert("seq".to_string(), seq.into());
                seq
            }
        };
        session.request.send(serde_json::to_vec(&message)?)?;

        await_reply(
            &session.request,
            seq,
            command_of(&message),
            self.config.request_timeout() + REPLY_GRACE,
        )
    }

    /// Set the parent header under which debug events of the session are published.
    pub fn set_parent_header(&self, header: &Value) -> Result<()> {
        let session = self.running_session()?;
        session.header.send(serde_json::to_vec(header)?)
    }

    fn running_session(&self) -> Result<&LiveSession> {
        match (&self.state, &self.session) {
            (SessionState::Running, Some(session)) => Ok(session),
            _ => Err(Error::InvalidState(format!(
                "debugger is not started, session is {}",
                self.state
            ))),
        }
    }
}

/// Wait for the reply to the request `seq` on the request endpoint.
///
/// Replies to other requests are ones the controller already gave up on, they are dropped.
fn await_reply(
    socket: &ControlSocket,
    seq: i64,
    command: &str,
    timeout: Duration,
) -> Result<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let raw = socket.recv_timeout(remaining).map_err(|err| match err {
            Error::Timeout { .. } => Error::timeout(format!("`{command}` request"), timeout),
            err => err,
        })?;
        let reply: Value = serde_json::from_slice(&raw)?;
        if request_seq_of(&reply) != Some(seq) {
            xr_warn!(target: "debugger", "drop stale reply: {reply}");
            continue;
        }
        return Ok(reply);
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.teardown(session);
            self.state = SessionState::Idle;
        }
    }
}
