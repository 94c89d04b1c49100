//! Worker thread relaying between the control endpoints and the debug target.

use crate::dap::protocol::DapResponse;
use crate::dap::{ClientOptions, TransportClient};
use crate::debugger::control::{ControlHub, ControlSocket};
use crate::debugger::state::SharedDebugState;
use crate::error::{Error, Result};
use crate::kernel::KernelMessenger;
use crate::{muted_error, weak_error, xr_debug, xr_warn};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Token sent by the controller to start the handshake.
pub const HANDSHAKE_TOKEN: &[u8] = b"REQ";
/// Reply of a worker which is ready to relay.
pub const ACK_TOKEN: &[u8] = b"ACK";
/// Prefix of a reply of a worker which failed to reach the debug target.
pub const NAK_PREFIX: &[u8] = b"NAK:";

/// Where the worker takes the debug target from and how it relays.
pub struct BridgeSpec {
    /// Listener the debug target connects to, `None` when the engine failed to set it up.
    pub listener: Option<TcpListener>,
    /// Message of failure responses while no target is connected.
    pub detached_reason: String,
    pub request_endpoint: String,
    pub header_endpoint: String,
    pub publisher_endpoint: String,
    pub client: ClientOptions,
    pub poll_interval: Duration,
    /// Updated with adapter replies and events before they leave the worker.
    pub state: SharedDebugState,
}

/// Handle of a running worker. Dropping it stops and joins the worker.
pub struct Bridge {
    stop: Arc<AtomicBool>,
    handshake_at: Arc<OnceLock<Instant>>,
    thread: Option<JoinHandle<()>>,
}

impl Bridge {
    pub fn spawn(
        spec: BridgeSpec,
        hub: Arc<ControlHub>,
        messenger: Arc<dyn KernelMessenger>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handshake_at = Arc::new(OnceLock::new());

        let thread = thread::Builder::new().name("dap-bridge".to_string()).spawn({
            let worker = Worker {
                spec,
                hub,
                messenger,
                stop: stop.clone(),
                handshake_at: handshake_at.clone(),
            };
            move || worker.run()
        })?;

        Ok(Self {
            stop,
            handshake_at,
            thread: Some(thread),
        })
    }

    /// Moment the worker answered the handshake.
    pub fn handshake_completed_at(&self) -> Option<Instant> {
        self.handshake_at.get().copied()
    }

    pub fn join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                xr_warn!(target: "debugger", "bridge worker panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.join();
    }
}

/// Interpret the handshake reply.
pub fn check_ack(reply: &[u8], target: &str) -> Result<()> {
    if reply == ACK_TOKEN {
        return Ok(());
    }
    match reply.strip_prefix(NAK_PREFIX) {
        Some(reason) => Err(Error::connection(target, String::from_utf8_lossy(reason))),
        None => Err(Error::Protocol(format!(
            "unexpected handshake reply `{}`",
            String::from_utf8_lossy(reply)
        ))),
    }
}

struct Worker {
    spec: BridgeSpec,
    hub: Arc<ControlHub>,
    messenger: Arc<dyn KernelMessenger>,
    stop: Arc<AtomicBool>,
    handshake_at: Arc<OnceLock<Instant>>,
}

impl Worker {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(self) {
        let (events_tx, events) = mpsc::channel();

        let transport = match &self.spec.listener {
            Some(listener) => TransportClient::accept(
                listener,
                self.spec.client.clone(),
                events_tx,
                &|| self.stopped(),
            )
            .map(Some),
            None => Ok(None),
        };

        let Some(request) = weak_error!(self.hub.connect(&self.spec.request_endpoint)) else {
            return;
        };
        let Some(header) = weak_error!(self.hub.connect(&self.spec.header_endpoint)) else {
            return;
        };

        if !self.await_handshake(&request) {
            return;
        }
        let transport = match transport {
            Ok(transport) => {
                self.handshake_at.get_or_init(Instant::now);
                if request.send(ACK_TOKEN).is_err() {
                    return;
                }
                transport
            }
            Err(err) => {
                let mut nak = NAK_PREFIX.to_vec();
                nak.extend_from_slice(err.to_string().as_bytes());
                _ = request.send(nak);
                return;
            }
        };

        xr_debug!(
            target: "debugger",
            "bridge ready, publishing to {}",
            self.spec.publisher_endpoint
        );
        self.relay(transport, &request, &header, &events);
        xr_debug!(target: "debugger", "bridge stopped");
    }

    fn await_handshake(&self, request: &ControlSocket) -> bool {
        while !self.stopped() {
            match request.recv_timeout(self.spec.poll_interval) {
                Ok(token) if token == HANDSHAKE_TOKEN => return true,
                Ok(token) => {
                    xr_warn!(
                        target: "debugger",
                        "unexpected handshake token `{}`",
                        String::from_utf8_lossy(&token)
                    );
                }
                Err(Error::Timeout { .. }) => {}
                Err(_) => return false,
            }
        }
        false
    }

    fn relay(
        &self,
        mut transport: Option<TransportClient>,
        request: &ControlSocket,
        header: &ControlSocket,
        events: &mpsc::Receiver<Value>,
    ) {
        let mut parent_header: Option<Value> = None;

        while !self.stopped() {
            while let Ok(Some(raw)) = header.try_recv() {
                parent_header = muted_error!(serde_json::from_slice(&raw), "bad parent header:");
            }
            while let Ok(event) = events.try_recv() {
                self.spec.state.lock().unwrap().on_event(&event);
                self.messenger.publish_event(parent_header.as_ref(), event);
            }

            match request.recv_timeout(self.spec.poll_interval) {
                Ok(raw) => {
                    let reply = self.forward(transport.as_ref(), &raw);
                    if request.send(reply).is_err() {
                        break;
                    }
                }
                Err(Error::Timeout { .. }) => {}
                Err(_) => break,
            }
        }

        if let Some(transport) = transport.as_mut() {
            transport.shutdown();
        }
    }

    fn forward(&self, transport: Option<&TransportClient>, raw: &[u8]) -> Vec<u8> {
        let reply = match serde_json::from_slice::<Value>(raw) {
            Err(err) => {
                DapResponse::failure(&json!({}), format!("malformed request: {err}")).into_value()
            }
            Ok(message) => match transport {
                None => DapResponse::failure(&message, self.spec.detached_reason.as_str())
                    .into_value(),
                Some(client) => match client.send_request(message.clone()) {
                    Ok(reply) => {
                        self.spec.state.lock().unwrap().on_reply(&message, &reply);
                        reply
                    }
                    Err(err) => DapResponse::failure(&message, err.to_string()).into_value(),
                },
            },
        };
        serde_json::to_vec(&reply).unwrap_or_default()
    }
}
