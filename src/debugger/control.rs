use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

/// One side of a bound control endpoint.
///
/// Messages are raw byte payloads, the bound side and the connected side
/// see each other's sends in order.
pub struct ControlSocket {
    address: String,
    sender: mpsc::Sender<Vec<u8>>,
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl ControlSocket {
    fn pair(address: &str) -> (ControlSocket, ControlSocket) {
        let (to_peer, from_bound) = mpsc::channel();
        let (to_bound, from_peer) = mpsc::channel();
        let bound = ControlSocket {
            address: address.to_string(),
            sender: to_peer,
            receiver: from_peer,
        };
        let peer = ControlSocket {
            address: address.to_string(),
            sender: to_bound,
            receiver: from_bound,
        };
        (bound, peer)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.sender
            .send(payload.into())
            .map_err(|_| Error::connection(&self.address, "control peer is gone"))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => {
                Error::timeout(format!("control endpoint {}", self.address), timeout)
            }
            mpsc::RecvTimeoutError::Disconnected => {
                Error::connection(&self.address, "control peer is gone")
            }
        })
    }

    /// Non-blocking receive, `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        match self.receiver.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                Err(Error::connection(&self.address, "control peer is gone"))
            }
        }
    }
}

enum Slot {
    /// Bound, the peer side waits for [`ControlHub::connect`].
    Waiting(ControlSocket),
    Connected,
}

/// Registry of locally bound control endpoints.
///
/// An address may be bound once until unbound. Unbinding drops the
/// registry entry, the peer notices once the bound side is dropped.
#[derive(Default)]
pub struct ControlHub {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ControlHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, address: &str) -> Result<ControlSocket> {
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(address) {
            return Err(Error::Bind(address.to_string()));
        }
        let (bound, peer) = ControlSocket::pair(address);
        slots.insert(address.to_string(), Slot::Waiting(peer));
        Ok(bound)
    }

    /// Connect to a bound address. Each binding accepts exactly one peer.
    pub fn connect(&self, address: &str) -> Result<ControlSocket> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(address) {
            None => Err(Error::connection(address, "endpoint is not bound")),
            Some(slot) => match std::mem::replace(slot, Slot::Connected) {
                Slot::Waiting(peer) => Ok(peer),
                Slot::Connected => Err(Error::connection(address, "endpoint already has a peer")),
            },
        }
    }

    pub fn unbind(&self, address: &str) -> Result<()> {
        match self.slots.lock().unwrap().remove(address) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidState(format!("endpoint `{address}` is not bound"))),
        }
    }

    pub fn is_bound(&self, address: &str) -> bool {
        self.slots.lock().unwrap().contains_key(address)
    }
}
