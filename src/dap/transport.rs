//! DAP framing over byte streams.
//! Messages are JSON documents prefixed with a `Content-Length` header block.

use crate::error::{Error, Result};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;

/// Trait for DAP message transport.
pub trait DapTransport: Send {
    /// Read a single DAP message (with Content-Length framing).
    fn read_message(&mut self) -> Result<Value>;

    /// Write a single DAP message (with Content-Length framing).
    fn write_message(&mut self, message: &Value) -> Result<()>;
}

/// Upper bound of a frame body, larger `Content-Length` values are rejected unread.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn closed() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "DAP connection closed",
    ))
}

/// Read one frame from `reader`.
///
/// Read timeouts on the underlying stream are retried until `cancelled` returns true,
/// partial headers and bodies survive the retry.
pub fn read_frame<R: BufRead>(reader: &mut R, cancelled: &dyn Fn() -> bool) -> Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = loop {
            match reader.read_line(&mut line) {
                Ok(n) => break n,
                Err(err) if is_timeout(&err) => {
                    if cancelled() {
                        return Err(closed());
                    }
                }
                Err(err) => return Err(err.into()),
            }
        };
        if read_n == 0 {
            return Err(closed());
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            let len = v
                .trim()
                .parse()
                .map_err(|_| Error::Protocol(format!("bad Content-Length `{}`", v.trim())))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| Error::Protocol("missing Content-Length".into()))?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Content-Length {len} exceeds {MAX_FRAME_SIZE} bytes"
        )));
    }
    let mut buf = vec![0u8; len];
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => return Err(closed()),
            Ok(n) => offset += n,
            Err(err) if is_timeout(&err) => {
                if cancelled() {
                    return Err(closed());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    let msg: Value = serde_json::from_slice(&buf)?;
    Ok(msg)
}

/// Serialize `message` and write it as one frame.
pub fn write_frame<W: Write>(writer: &mut W, message: &Value) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Blocking TCP transport for single-threaded peers, such as the debug adapter side.
pub struct TcpTransport {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }
}

impl DapTransport for TcpTransport {
    fn read_message(&mut self) -> Result<Value> {
        read_frame(&mut self.reader, &|| false)
    }

    fn write_message(&mut self, message: &Value) -> Result<()> {
        write_frame(&mut self.stream, message)
    }
}
