//! Debug Adapter Protocol plumbing: framing, envelopes and the TCP client.

pub mod client;
pub mod protocol;
pub mod tracer;
pub mod transport;

pub use client::{ClientOptions, TransportClient};
