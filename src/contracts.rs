/// Contracts between a connection and the layer that owns it
///
/// The connection never touches a socket, a clock or the application
/// directly. It is driven by a [`Session`] that provides the time source,
/// ships finished datagrams and receives delivered messages.
use std::cell::Cell;
use std::net::SocketAddr;
use std::time::Instant;

use rkyv::{check_archived_root, to_bytes, AlignedVec, Archive, Deserialize, Serialize};

use crate::errors::{Result, RudpError};
use crate::message::Message;

/// Index of a connection inside its owning session
pub type PeerSlot = u8;

/// Monotonic time source in seconds
pub trait Clock {
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `Instant`, zeroed at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            now: Cell::new(start_secs),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.now.set(self.now.get() + secs);
    }

    pub fn set(&self, secs: f64) {
        self.now.set(secs);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.now.get()
    }
}

/// The owning layer of a set of connections
///
/// All calls happen synchronously from inside `Connection` methods, so an
/// implementation only has to serialize calls per connection.
pub trait Session: Clock {
    /// Session-wide minimum seconds between flushes
    fn tick_secs(&self) -> f64 {
        0.0
    }

    /// Hand a finished datagram to the transport
    fn send_datagram(&mut self, slot: PeerSlot, address: SocketAddr, bytes: &[u8]) -> Result<()>;

    /// Hand a fully received application message to the owner
    fn deliver(&mut self, slot: PeerSlot, message: &Message);

    /// Offer leftover packet space to the owner
    ///
    /// `budget` is the payload size an unreliable message may have and
    /// still fit. Returning `None` leaves the space unused.
    fn fill_spare(&mut self, _slot: PeerSlot, _budget: usize) -> Option<Message> {
        None
    }

    /// Called once when a connection goes away
    fn on_disconnected(&mut self, _slot: PeerSlot) {}
}

/// Keep-alive payload carried by heartbeat messages
///
/// Archived little-endian so peers agree on the bytes regardless of host.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Heartbeat {
    /// Sender's session clock in milliseconds
    pub session_time_ms: u64,
}

impl Heartbeat {
    pub fn new(session_time_ms: u64) -> Self {
        Self { session_time_ms }
    }

    /// Serialize to the archived byte form
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        to_bytes::<_, 64>(self)
            .map(|aligned_vec| aligned_vec.to_vec())
            .map_err(|_| RudpError::decode("failed to serialize heartbeat"))
    }

    /// Validate and read an archived heartbeat
    ///
    /// Payload bytes sit at arbitrary offsets inside a packet, so they are
    /// copied into an aligned buffer before validation.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut aligned = AlignedVec::with_capacity(payload.len());
        aligned.extend_from_slice(payload);

        let archived = check_archived_root::<Heartbeat>(&aligned[..])
            .map_err(|_| RudpError::decode("malformed heartbeat payload"))?;

        archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| RudpError::decode("failed to deserialize heartbeat"))
    }
}
