use crate::config::PortRange;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;

/// Check whether a TCP port can be listened on.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probe a port by binding a loopback listener and dropping it right away.
///
/// The port is not reserved after the probe, another process may take it first.
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

impl<F: Fn(u16) -> bool + Send + Sync> PortProbe for F {
    fn is_free(&self, port: u16) -> bool {
        self(port)
    }
}

/// Hands out free ports from a range.
///
/// Ports stay leased until [`PortAllocator::release`], a leased port is never
/// handed out twice even if the probe reports it free again.
pub struct PortAllocator {
    range: PortRange,
    attempts: u32,
    probe: Box<dyn PortProbe>,
    leased: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRange, attempts: u32, probe: impl PortProbe + 'static) -> Self {
        Self {
            range,
            attempts,
            probe: Box::new(probe),
            leased: Mutex::default(),
        }
    }

    /// Allocator probing real loopback sockets.
    pub fn tcp(range: PortRange, attempts: u32) -> Self {
        Self::new(range, attempts, TcpProbe)
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Pick a random free port, probing at most `attempts` candidates.
    pub fn allocate(&self) -> Result<u16> {
        let mut rng = rand::thread_rng();
        let attempts = if self.range.is_empty() { 0 } else { self.attempts };
        for _ in 0..attempts {
            let port = rng.gen_range(self.range.start..=self.range.end);
            if self.leased.lock().unwrap().contains(&port) {
                continue;
            }
            if !self.probe.is_free(port) {
                continue;
            }
            // another thread may have leased it while probing
            if self.leased.lock().unwrap().insert(port) {
                return Ok(port);
            }
        }

        Err(Error::ResourceExhausted {
            start: self.range.start,
            end: self.range.end,
            attempts: self.attempts,
        })
    }

    /// Return a port to the pool. Returns `false` if it was not leased.
    pub fn release(&self, port: u16) -> bool {
        self.leased.lock().unwrap().remove(&port)
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.leased.lock().unwrap().contains(&port)
    }
}
