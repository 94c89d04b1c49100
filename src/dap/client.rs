use crate::config::DebuggerConfig;
use crate::dap::protocol::{command_of, request_seq_of, DapRequest, FrameKind};
use crate::dap::tracer::{Direction, FileTracer};
use crate::dap::transport::{read_frame, write_frame};
use crate::error::{Error, Result};
use crate::{xr_debug, xr_warn};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

type Waiters = Arc<Mutex<HashMap<i64, mpsc::SyncSender<Value>>>>;

/// Marks the reader as gone when the reader thread ends, panics included.
struct ReaderFinished {
    waiters: Waiters,
    reader_done: Arc<AtomicBool>,
}

impl Drop for ReaderFinished {
    fn drop(&mut self) {
        self.reader_done.store(true, Ordering::SeqCst);
        // dropping the senders wakes every pending request
        match self.waiters.lock() {
            Ok(mut waiters) => waiters.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Transport client settings.
#[derive(Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Socket read timeout, the reader checks for shutdown at this rate.
    pub poll_interval: Duration,
    pub tracer: Option<FileTracer>,
}

impl ClientOptions {
    pub fn from_config(config: &DebuggerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            poll_interval: config.poll_interval(),
            tracer: None,
        }
    }

    pub fn with_tracer(self, tracer: Option<FileTracer>) -> Self {
        Self { tracer, ..self }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&DebuggerConfig::default())
    }
}

/// Resolve `tcp://host:port` or `host:port` into a socket address.
pub fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    addr.to_socket_addrs()
        .map_err(|e| Error::connection(endpoint, e))?
        .next()
        .ok_or_else(|| Error::connection(endpoint, "address resolves to nothing"))
}

/// Client side of a persistent connection to a debug adapter.
///
/// A dedicated reader thread owns the inbound half of the socket. Event frames
/// go to the events channel given at connect time, responses go to the
/// [`TransportClient::send_request`] caller waiting for the matching `seq`.
pub struct TransportClient {
    addr: SocketAddr,
    writer: Mutex<TcpStream>,
    waiters: Waiters,
    next_seq: AtomicI64,
    shutdown: Arc<AtomicBool>,
    reader_done: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    request_timeout: Duration,
    tracer: Option<FileTracer>,
}

impl TransportClient {
    /// Connect to a debug adapter, retrying until `options.connect_timeout` elapses.
    pub fn connect(
        endpoint: &str,
        options: ClientOptions,
        events: mpsc::Sender<Value>,
    ) -> Result<Self> {
        let addr = resolve_endpoint(endpoint)?;
        let deadline = Instant::now() + options.connect_timeout;
        let attempt_timeout = CONNECT_ATTEMPT_TIMEOUT
            .min(options.connect_timeout)
            .max(Duration::from_millis(1));

        let stream = loop {
            match TcpStream::connect_timeout(&addr, attempt_timeout) {
                Ok(stream) => break stream,
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(Error::connection(addr, err));
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };
        Self::from_stream(stream, options, events)
    }

    /// Wait on `listener` for the debug adapter to connect.
    ///
    /// Gives up after `options.connect_timeout` or as soon as `cancelled` returns true.
    pub fn accept(
        listener: &TcpListener,
        options: ClientOptions,
        events: mpsc::Sender<Value>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Self> {
        let local = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + options.connect_timeout;

        let stream = loop {
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if cancelled() {
                        return Err(Error::connection(local, "cancelled while waiting for target"));
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::connection(
                            local,
                            format!(
                                "debug target did not connect within {:?}",
                                options.connect_timeout
                            ),
                        ));
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(err) => return Err(Error::connection(local, err)),
            }
        };
        stream.set_nonblocking(false)?;
        Self::from_stream(stream, options, events)
    }

    fn from_stream(
        stream: TcpStream,
        options: ClientOptions,
        events: mpsc::Sender<Value>,
    ) -> Result<Self> {
        let addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let read_half = stream.try_clone()?;
        read_half.set_read_timeout(Some(options.poll_interval))?;

        let waiters: Waiters = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader_done = Arc::new(AtomicBool::new(false));

        let reader = thread::Builder::new()
            .name("dap-reader".to_string())
            .spawn({
                let finished = ReaderFinished {
                    waiters: waiters.clone(),
                    reader_done: reader_done.clone(),
                };
                let shutdown = shutdown.clone();
                let tracer = options.tracer.clone();
                move || {
                    let finished = finished;
                    read_loop(
                        BufReader::new(read_half),
                        &finished.waiters,
                        &events,
                        &shutdown,
                        tracer,
                    );
                }
            })?;

        xr_debug!(target: "dap", "connected to debug target {addr}");

        Ok(Self {
            addr,
            writer: Mutex::new(stream),
            waiters,
            next_seq: AtomicI64::new(1),
            shutdown,
            reader_done,
            reader: Some(reader),
            request_timeout: options.request_timeout,
            tracer: options.tracer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// True while the reader thread is alive.
    pub fn is_connected(&self) -> bool {
        !self.reader_done.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    /// Send a request and block until the response with the same `seq` arrives.
    ///
    /// A payload without `seq` gets one from the client counter.
    pub fn send_request(&self, mut payload: Value) -> Result<Value> {
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| Error::Protocol("request must be a JSON object".to_string()))?;
        let seq = match obj.get("seq").and_then(Value::as_i64) {
            Some(seq) => seq,
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                obj.insert("seq".to_string(), seq.into());
                seq
            }
        };
        obj.entry("type").or_insert_with(|| "request".into());
        let command = command_of(&payload).to_string();

        if !self.is_connected() {
            return Err(Error::connection(self.addr, "connection closed"));
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        {
            let mut waiters = self.waiters.lock().unwrap();
            if waiters.contains_key(&seq) {
                return Err(Error::InvalidState(format!(
                    "request with seq {seq} is already in flight"
                )));
            }
            waiters.insert(seq, sender);
        }
        // the reader may have quit before the waiter was registered
        if self.reader_done.load(Ordering::SeqCst) {
            self.forget(seq);
            return Err(Error::connection(self.addr, "connection closed"));
        }

        if let Err(err) = self.write(&payload) {
            self.forget(seq);
            return Err(err);
        }

        match receiver.recv_timeout(self.request_timeout) {
            Ok(reply) => Ok(reply),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.forget(seq);
                Err(Error::timeout(
                    format!("`{command}` (seq {seq})"),
                    self.request_timeout,
                ))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::connection(
                self.addr,
                "connection closed while waiting for a reply",
            )),
        }
    }

    /// Request the stack of `thread_id` and return `body.stackFrames` as sent by the adapter.
    pub fn get_stack_frames(&self, thread_id: i64, seq: i64) -> Result<Vec<Value>> {
        let request = DapRequest::new(
            seq,
            "stackTrace",
            serde_json::json!({ "threadId": thread_id }),
        );
        let reply = self.send_request(serde_json::to_value(request)?)?;

        if reply.get("success").and_then(Value::as_bool) != Some(true) {
            let message = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::RequestFailed {
                command: "stackTrace".to_string(),
                message,
            });
        }

        let frames = reply
            .pointer("/body/stackFrames")
            .and_then(Value::as_array)
            .map(|frames| frames.iter().filter(|f| f.is_object()).cloned().collect())
            .unwrap_or_default();
        Ok(frames)
    }

    /// Close the connection and join the reader thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(stream) = self.writer.lock() {
            _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                xr_warn!(target: "dap", "DAP reader thread panicked");
            }
        }
    }

    fn write(&self, frame: &Value) -> Result<()> {
        if let Some(tracer) = &self.tracer {
            tracer.frame(Direction::Outgoing, frame);
        }
        let mut stream = self.writer.lock().unwrap();
        write_frame(&mut *stream, frame)
    }

    fn forget(&self, seq: i64) {
        self.waiters.lock().unwrap().remove(&seq);
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    mut reader: BufReader<TcpStream>,
    waiters: &Waiters,
    events: &mpsc::Sender<Value>,
    shutdown: &AtomicBool,
    tracer: Option<FileTracer>,
) {
    let cancelled = || shutdown.load(Ordering::SeqCst);
    loop {
        let frame = match read_frame(&mut reader, &cancelled) {
            Ok(frame) => frame,
            Err(err) => {
                if !cancelled() {
                    xr_warn!(target: "dap", "debug target connection lost: {err:#}");
                }
                return;
            }
        };
        if let Some(tracer) = &tracer {
            tracer.frame(Direction::Incoming, &frame);
        }

        match FrameKind::of(&frame) {
            FrameKind::Event => {
                if events.send(frame).is_err() {
                    xr_debug!(target: "dap", "event receiver is gone, event dropped");
                }
            }
            FrameKind::Response => {
                let waiter = request_seq_of(&frame)
                    .and_then(|seq| waiters.lock().unwrap().remove(&seq));
                match waiter {
                    Some(waiter) => {
                        _ = waiter.send(frame);
                    }
                    None => {
                        xr_debug!(target: "dap", "response without waiter dropped: {frame}");
                    }
                }
            }
            FrameKind::Request => {
                xr_debug!(target: "dap", "reverse request `{}` ignored", command_of(&frame));
            }
            FrameKind::Unknown => {
                xr_warn!(target: "dap", "frame without known type dropped: {frame}");
            }
        }
    }
}
