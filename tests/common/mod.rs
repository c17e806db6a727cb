//! Two connections wired back to back through an in-memory link
#![allow(dead_code)]

use std::net::SocketAddr;
use std::rc::Rc;

use rudp_core::{Clock, Connection, ConnectionConfig, ManualClock, Message, PeerSlot, Result, Session};

pub const SLOT_A: PeerSlot = 0;
pub const SLOT_B: PeerSlot = 1;

/// Session that records everything a connection hands it
pub struct TestSession {
    clock: Rc<ManualClock>,
    pub outbox: Vec<Vec<u8>>,
    pub delivered: Vec<Message>,
    pub disconnected: Vec<PeerSlot>,
}

impl TestSession {
    pub fn new(clock: Rc<ManualClock>) -> Self {
        Self {
            clock,
            outbox: Vec::new(),
            delivered: Vec::new(),
            disconnected: Vec::new(),
        }
    }

    /// Payloads of delivered messages, read as little-endian u32 indices
    pub fn delivered_indices(&self) -> Vec<u32> {
        self.delivered.iter().map(|message| index_of(message)).collect()
    }
}

impl Clock for TestSession {
    fn now_secs(&self) -> f64 {
        self.clock.now_secs()
    }
}

impl Session for TestSession {
    fn send_datagram(&mut self, _slot: PeerSlot, _address: SocketAddr, bytes: &[u8]) -> Result<()> {
        self.outbox.push(bytes.to_vec());
        Ok(())
    }

    fn deliver(&mut self, _slot: PeerSlot, message: &Message) {
        self.delivered.push(message.clone());
    }

    fn on_disconnected(&mut self, slot: PeerSlot) {
        self.disconnected.push(slot);
    }
}

pub fn indexed_payload(index: u32) -> Vec<u8> {
    index.to_le_bytes().to_vec()
}

pub fn index_of(message: &Message) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&message.payload()[..4]);
    u32::from_le_bytes(bytes)
}

/// Peer `a` talks to peer `b`; datagrams only move when a test says so
pub struct Link {
    pub clock: Rc<ManualClock>,
    pub a: Connection,
    pub a_session: TestSession,
    pub b: Connection,
    pub b_session: TestSession,
}

impl Link {
    pub fn new(config: ConnectionConfig) -> Self {
        let clock = Rc::new(ManualClock::new(0.0));
        let address_a: SocketAddr = "127.0.0.1:41000".parse().unwrap();
        let address_b: SocketAddr = "127.0.0.1:41001".parse().unwrap();

        let mut a = Connection::new(config.clone());
        a.bind(SLOT_B, address_b, 0.0);
        let mut b = Connection::new(config);
        b.bind(SLOT_A, address_a, 0.0);

        Self {
            a_session: TestSession::new(Rc::clone(&clock)),
            b_session: TestSession::new(Rc::clone(&clock)),
            clock,
            a,
            b,
        }
    }

    pub fn advance(&self, secs: f64) {
        self.clock.advance(secs);
    }

    pub fn flush_a(&mut self, force: bool) -> bool {
        self.a.flush(&mut self.a_session, force)
    }

    pub fn flush_b(&mut self, force: bool) -> bool {
        self.b.flush(&mut self.b_session, force)
    }

    /// Hand a's pending datagrams to b, skipping those `keep` rejects
    pub fn a_to_b(&mut self, mut keep: impl FnMut(usize) -> bool) -> usize {
        let datagrams = std::mem::take(&mut self.a_session.outbox);
        let mut handled = 0;
        for (index, datagram) in datagrams.iter().enumerate() {
            if keep(index) {
                handled += self.b.handle_datagram(&mut self.b_session, datagram).unwrap();
            }
        }
        handled
    }

    /// Hand b's pending datagrams to a, skipping those `keep` rejects
    pub fn b_to_a(&mut self, mut keep: impl FnMut(usize) -> bool) -> usize {
        let datagrams = std::mem::take(&mut self.b_session.outbox);
        let mut handled = 0;
        for (index, datagram) in datagrams.iter().enumerate() {
            if keep(index) {
                handled += self.a.handle_datagram(&mut self.a_session, datagram).unwrap();
            }
        }
        handled
    }
}
