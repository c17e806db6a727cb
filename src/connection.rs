/// Connection - per-peer reliability state
///
/// Owns everything needed to talk to one peer: the outgoing queues, the
/// packet tracker ring, the ack history, the reliable dedup window and
/// the in-order channels. It never blocks and never spawns; the owning
/// session calls `flush` once per tick and feeds inbound datagrams through
/// `handle_datagram` (or `on_receive` + `process`).
use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use crate::ack_manager::{acked_ids, AckManager};
use crate::channel::{Channel, ChannelReceive};
use crate::config::ConnectionConfig;
use crate::contracts::{Heartbeat, PeerSlot, Session};
use crate::cyclic::cyc_less;
use crate::errors::{Result, RudpError};
use crate::message::{Delivery, Message};
use crate::packet::{DecodedPacket, Packet, PacketHeader};
use crate::receive_window::ReceiveWindow;
use crate::tracker::PacketTracker;
use crate::HEARTBEAT_KIND;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Running counters for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub reliable_resends: u64,
    pub duplicates_dropped: u64,
    pub messages_delivered: u64,
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    slot: PeerSlot,
    address: SocketAddr,
}

/// Fires at most once per interval
#[derive(Debug, Clone, Copy)]
struct IntervalTimer {
    interval: f64,
    last_fired: f64,
}

impl IntervalTimer {
    fn new(interval: f64) -> Self {
        Self {
            interval,
            last_fired: 0.0,
        }
    }

    fn restart(&mut self, now: f64) {
        self.last_fired = now;
    }

    fn poll(&mut self, now: f64) -> bool {
        if now - self.last_fired < self.interval {
            return false;
        }
        self.last_fired = now;
        true
    }
}

#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    peer: Option<Peer>,

    channels: Vec<Channel>,
    unsent_reliable: VecDeque<Message>,
    // ordered by reliable id, oldest first
    sent_reliable: VecDeque<Message>,
    outbound_unreliable: VecDeque<Message>,
    next_reliable_id: u16,

    trackers: PacketTracker,
    acks: AckManager,
    receive_window: ReceiveWindow,
    next_ack: u16,
    last_rtt_ack: Option<u16>,

    rtt: Option<f64>,
    loss_rate: f32,
    heartbeat: IntervalTimer,
    tick_secs: f64,
    last_send_secs: f64,
    last_received_secs: f64,
    peer_session_time_ms: Option<u64>,
    stats: ConnectionStats,
}

impl Connection {
    /// Create an unbound connection
    pub fn new(config: ConnectionConfig) -> Self {
        let channels = (0..config.channel_count).map(|_| Channel::new()).collect();
        Self {
            state: ConnectionState::Disconnected,
            peer: None,
            channels,
            unsent_reliable: VecDeque::new(),
            sent_reliable: VecDeque::new(),
            outbound_unreliable: VecDeque::new(),
            next_reliable_id: 0,
            trackers: PacketTracker::new(config.tracker_ring_size),
            acks: AckManager::new(),
            receive_window: ReceiveWindow::new(config.receive_window),
            next_ack: 0,
            last_rtt_ack: None,
            rtt: None,
            loss_rate: 0.0,
            heartbeat: IntervalTimer::new(config.heartbeat_interval_secs),
            tick_secs: config.tick_interval_secs,
            last_send_secs: f64::NEG_INFINITY,
            last_received_secs: 0.0,
            peer_session_time_ms: None,
            stats: ConnectionStats::default(),
            config,
        }
    }

    /// Attach to a session slot once the peer handshake assigned one
    pub fn bind(&mut self, slot: PeerSlot, address: SocketAddr, now_secs: f64) {
        debug_assert!(!self.is_bound(), "connection bound twice");
        self.peer = Some(Peer { slot, address });
        self.heartbeat.restart(now_secs);
        self.last_received_secs = now_secs;
        self.set_state(ConnectionState::Connecting);
    }

    /// Reset to a blank, unbound connection so the slot can be reused
    pub fn invalidate(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn is_bound(&self) -> bool {
        self.peer.is_some()
    }

    pub fn slot(&self) -> Option<PeerSlot> {
        self.peer.map(|peer| peer.slot)
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.peer.map(|peer| peer.address)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(slot = ?self.slot(), from = ?self.state, to = ?state, "connection state changed");
            self.state = state;
        }
    }

    /// Smoothed round-trip time in seconds, once a sample exists
    pub fn rtt(&self) -> Option<f64> {
        self.rtt
    }

    /// Share of packets lost over the last full tracker cycle
    pub fn loss_rate(&self) -> f32 {
        self.loss_rate
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Session clock reported by the peer's last heartbeat
    pub fn peer_session_time_ms(&self) -> Option<u64> {
        self.peer_session_time_ms
    }

    pub fn last_received_secs(&self) -> f64 {
        self.last_received_secs
    }

    /// Reliable messages not yet confirmed, sent or not
    pub fn pending_reliable_count(&self) -> usize {
        self.sent_reliable.len() + self.unsent_reliable.len()
    }

    /// Reliable messages sent and awaiting confirmation
    pub fn in_flight_reliable_count(&self) -> usize {
        self.sent_reliable.len()
    }

    pub fn next_reliable_id(&self) -> u16 {
        self.next_reliable_id
    }

    /// Lowest reliable id still awaiting confirmation
    pub fn oldest_unconfirmed_reliable_id(&self) -> Option<u16> {
        self.sent_reliable.front().and_then(Message::reliable_id)
    }

    /// # Panics
    /// A zero or negative frequency is a programming error.
    pub fn set_heartbeat_frequency(&mut self, hz: f64) {
        assert!(hz > 0.0, "heartbeat frequency must be positive");
        self.heartbeat.interval = 1.0 / hz;
    }

    /// # Panics
    /// A zero or negative frequency is a programming error.
    pub fn set_tick_frequency(&mut self, hz: f64) -> f64 {
        assert!(hz > 0.0, "tick frequency must be positive");
        self.tick_secs = 1.0 / hz;
        self.tick_secs
    }

    /// Queue a message for the next flush
    ///
    /// In-order messages get their channel sequence id here; reliable ids
    /// are only assigned when a message first goes on the wire.
    pub fn send(&mut self, mut message: Message) -> Result<()> {
        debug_assert!(self.is_bound(), "send on an unbound connection");
        if !self.is_bound() {
            return Err(RudpError::NotBound);
        }
        debug_assert!(message.reliable_id().is_none(), "message was already sent");
        if message.kind() == HEARTBEAT_KIND {
            return Err(RudpError::ReservedKind(message.kind()));
        }

        let capacity = self.config.packet_body_capacity();
        if message.payload().len() > usize::from(u16::MAX) || message.encoded_len() > capacity {
            return Err(RudpError::MessageTooLarge {
                size: message.encoded_len(),
                capacity,
            });
        }

        if message.is_in_order() {
            let index = message.channel_index();
            let channel = self
                .channels
                .get_mut(usize::from(index))
                .ok_or(RudpError::InvalidChannel(index))?;
            message.set_sequence_id(channel.next_send_sequence());
        }

        if message.is_reliable() {
            self.unsent_reliable.push_back(message);
        } else {
            self.outbound_unreliable.push_back(message);
        }
        Ok(())
    }

    /// True while a new reliable id would keep the in-flight span inside
    /// the reliable window
    pub fn can_send_new_reliable(&self) -> bool {
        match self.oldest_unconfirmed_reliable_id() {
            None => true,
            Some(oldest) => self.next_reliable_id.wrapping_sub(oldest) < self.config.reliable_window,
        }
    }

    fn has_pending_traffic(&self) -> bool {
        !self.unsent_reliable.is_empty() || !self.outbound_unreliable.is_empty()
    }

    fn try_queue_heartbeat(&mut self, now: f64) -> bool {
        if !self.heartbeat.poll(now) || self.has_pending_traffic() {
            return false;
        }

        let heartbeat = Heartbeat::new((now * 1000.0) as u64);
        match heartbeat.to_payload() {
            Ok(payload) => {
                self.outbound_unreliable
                    .push_back(Message::new(HEARTBEAT_KIND, Delivery::UNRELIABLE, 0, payload));
                true
            }
            Err(err) => {
                warn!(error = %err, "heartbeat not queued");
                false
            }
        }
    }

    fn should_send_packet(&self, now: f64, session_tick_secs: f64) -> bool {
        now - self.last_send_secs > self.tick_secs.max(session_tick_secs)
    }

    /// Assemble and send at most one packet
    ///
    /// Returns false without sending when the connection is unbound, or
    /// when `force` is unset and the tick interval has not elapsed.
    pub fn flush<S: Session>(&mut self, session: &mut S, force: bool) -> bool {
        let Some(peer) = self.peer else {
            return false;
        };
        let now = session.now_secs();

        self.try_queue_heartbeat(now);
        if !force && !self.should_send_packet(now, session.tick_secs()) {
            return false;
        }

        let mut packet = Packet::new(self.config.mtu);

        self.append_resends(&mut packet, now);
        self.append_new_reliables(&mut packet, now);

        for message in &self.outbound_unreliable {
            if !packet.append(message) {
                trace!(slot = peer.slot, dropped = self.outbound_unreliable.len(), "unreliable overflow");
                break;
            }
        }

        self.append_spare(session, peer.slot, &mut packet);

        let ack = self.next_ack;
        if self.trackers.track(ack, now, packet.reliable_ids()) {
            self.stats.packets_lost += 1;
        }
        let message_count = packet.message_count();
        let bytes = packet.finish(PacketHeader {
            ack,
            last_received_ack: self.acks.largest_received(),
            ack_bitfield: self.acks.received_bitfield(),
        });

        trace!(slot = peer.slot, ack, messages = message_count, bytes = bytes.len(), "flush");
        if let Err(err) = session.send_datagram(peer.slot, peer.address, &bytes) {
            warn!(slot = peer.slot, ack, error = %err, "datagram send failed");
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        self.increase_ack();
        self.last_send_secs = now;
        self.outbound_unreliable.clear();
        true
    }

    /// Resend timed-out reliables, least recently sent first
    fn append_resends(&mut self, packet: &mut Packet, now: f64) {
        let mut order: Vec<usize> = (0..self.sent_reliable.len()).collect();
        order.sort_by(|&a, &b| {
            let a = self.sent_reliable[a].last_send_secs().unwrap_or(f64::NEG_INFINITY);
            let b = self.sent_reliable[b].last_send_secs().unwrap_or(f64::NEG_INFINITY);
            a.total_cmp(&b)
        });

        for index in order {
            let message = &mut self.sent_reliable[index];
            if message.secs_since_last_send(now) <= self.config.resend_timeout_secs {
                continue;
            }
            if packet.append(message) {
                message.mark_sent(now);
                self.stats.reliable_resends += 1;
            }
        }
    }

    /// Move unsent reliables onto the wire while the window allows
    fn append_new_reliables(&mut self, packet: &mut Packet, now: f64) {
        while self.can_send_new_reliable() {
            let Some(mut message) = self.unsent_reliable.pop_front() else {
                break;
            };

            message.set_reliable_id(Some(self.next_reliable_id));
            if !packet.append(&message) {
                message.set_reliable_id(None);
                self.unsent_reliable.push_front(message);
                break;
            }

            message.mark_sent(now);
            self.next_reliable_id = self.next_reliable_id.wrapping_add(1);
            self.sent_reliable.push_back(message);
        }
    }

    /// Let the session use whatever room is left
    fn append_spare<S: Session>(&mut self, session: &mut S, slot: PeerSlot, packet: &mut Packet) {
        let budget = packet
            .remaining()
            .saturating_sub(Delivery::UNRELIABLE.frame_overhead());
        if budget == 0 {
            return;
        }

        let Some(extra) = session.fill_spare(slot, budget) else {
            return;
        };
        if extra.is_reliable() {
            warn!(slot, kind = extra.kind(), "spare capacity only carries unreliable messages");
            return;
        }
        if !packet.append(&extra) {
            trace!(slot, size = extra.encoded_len(), budget, "spare message did not fit");
        }
    }

    fn increase_ack(&mut self) {
        self.next_ack = self.next_ack.wrapping_add(1);

        if usize::from(self.next_ack) % self.trackers.size() == 0 {
            self.loss_rate = self.trackers.take_loss_rate();
            debug!(slot = ?self.slot(), loss_rate = self.loss_rate, "loss rate updated");
        }
    }

    /// Decode a datagram and run it through `on_receive` and `process`
    ///
    /// Returns the number of messages newly handled. A datagram that fails
    /// to decode leaves the connection untouched.
    pub fn handle_datagram<S: Session>(&mut self, session: &mut S, data: &[u8]) -> Result<usize> {
        if !self.is_bound() {
            return Err(RudpError::NotBound);
        }
        let packet = DecodedPacket::decode(data).map_err(|err| {
            warn!(slot = ?self.slot(), error = %err, "datagram rejected");
            err
        })?;
        Ok(self.handle_packet(session, packet))
    }

    /// Run an already decoded packet through `on_receive` and `process`
    pub fn handle_packet<S: Session>(&mut self, session: &mut S, packet: DecodedPacket) -> usize {
        if !self.on_receive(session, &packet.header) {
            trace!(slot = ?self.slot(), ack = packet.header.ack, "duplicate packet skipped");
            return 0;
        }

        let mut handled = 0;
        for message in packet.messages {
            if self.process(session, message) {
                handled += 1;
            }
        }
        handled
    }

    /// Apply an incoming header
    ///
    /// Confirms every packet the peer reports, oldest first, and records
    /// the header's ack for our own next header. Returns false if the ack
    /// was already recorded.
    pub fn on_receive<S: Session>(&mut self, session: &S, header: &PacketHeader) -> bool {
        let now = session.now_secs();
        self.last_received_secs = now;
        self.stats.packets_received += 1;
        if self.state == ConnectionState::Connecting {
            self.set_state(ConnectionState::Connected);
        }

        if let Some(last_received) = header.last_received_ack {
            for ack in acked_ids(last_received, header.ack_bitfield) {
                self.confirm_received(ack, now);
            }
        }

        self.acks.record(header.ack)
    }

    /// Mark one of our packets as received by the peer
    ///
    /// No-op returning false unless the tracker slot still holds `ack`.
    pub fn confirm_received(&mut self, ack: u16, now_secs: f64) -> bool {
        let Some(record) = self.trackers.release(ack) else {
            return false;
        };

        let fresh = self.last_rtt_ack.map_or(true, |last| !cyc_less(ack, last));
        if fresh {
            self.fold_rtt(now_secs - record.send_secs);
            self.last_rtt_ack = Some(ack);
        }

        for &reliable_id in record.reliables() {
            if let Some(position) = self
                .sent_reliable
                .iter()
                .position(|message| message.reliable_id() == Some(reliable_id))
            {
                self.sent_reliable.remove(position);
            }
        }
        true
    }

    fn fold_rtt(&mut self, sample: f64) {
        let smoothing = self.config.rtt_smoothing;
        self.rtt = Some(match self.rtt {
            None => sample,
            Some(rtt) => rtt + (sample - rtt) * smoothing,
        });
    }

    /// Handle one incoming message
    ///
    /// Returns false when the message was already handled (duplicate
    /// reliable id) or cannot be handled at all.
    pub fn process<S: Session>(&mut self, session: &mut S, message: Message) -> bool {
        let Some(slot) = self.slot() else {
            return false;
        };

        if !message.is_reliable() {
            if message.kind() == HEARTBEAT_KIND {
                self.absorb_heartbeat(&message);
            } else {
                session.deliver(slot, &message);
                self.stats.messages_delivered += 1;
            }
            return true;
        }

        let Some(reliable_id) = message.reliable_id() else {
            return false;
        };
        let channel_index = usize::from(message.channel_index());
        if message.is_in_order() && channel_index >= self.channels.len() {
            warn!(slot, channel = channel_index, "message for unknown channel dropped");
            return false;
        }

        if !self.receive_window.insert(reliable_id) {
            self.stats.duplicates_dropped += 1;
            trace!(slot, reliable_id, "duplicate reliable dropped");
            return false;
        }

        if !message.is_in_order() {
            session.deliver(slot, &message);
            self.stats.messages_delivered += 1;
            return true;
        }

        match self.channels[channel_index].receive(message, |ready| session.deliver(slot, ready)) {
            ChannelReceive::Delivered { drained } => {
                self.stats.messages_delivered += 1 + drained as u64;
            }
            ChannelReceive::Buffered => {
                trace!(slot, channel = channel_index, reliable_id, "in-order message held for gap");
            }
            ChannelReceive::Stale => {}
        }
        true
    }

    fn absorb_heartbeat(&mut self, message: &Message) {
        match Heartbeat::from_payload(message.payload()) {
            Ok(heartbeat) => self.peer_session_time_ms = Some(heartbeat.session_time_ms),
            Err(err) => debug!(slot = ?self.slot(), error = %err, "bad heartbeat ignored"),
        }
    }

    /// Disconnect if the peer has been silent for longer than the timeout
    ///
    /// Returns true when the connection was torn down.
    pub fn check_peer_timeout<S: Session>(&mut self, session: &mut S) -> bool {
        if !self.is_bound() {
            return false;
        }
        let silent = session.now_secs() - self.last_received_secs;
        if silent <= self.config.peer_timeout_secs {
            return false;
        }

        warn!(slot = ?self.slot(), silent_secs = silent, "peer timed out");
        self.disconnect(session);
        true
    }

    /// Send one final packet, notify the session and release the slot
    pub fn disconnect<S: Session>(&mut self, session: &mut S) {
        let Some(peer) = self.peer else {
            return;
        };

        self.set_state(ConnectionState::Disconnected);
        self.flush(session, true);
        session.on_disconnected(peer.slot);
        self.invalidate();
    }
}
