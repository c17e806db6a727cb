mod common;

use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use rudp_core::cyclic::{cyc_greater, cyc_less};
use rudp_core::receiver::Receiver;
use rudp_core::transmitter::UdpTransmitter;
use rudp_core::{
    Clock, Connection, ConnectionConfig, ConnectionState, Message, MonotonicClock, PeerSlot,
    Result, RudpError, Session, PACKET_HEADER_SIZE, PACKET_TRAILER_SIZE,
};

use common::{index_of, indexed_payload, Link, SLOT_B};

/// Config whose packets hold exactly one small in-order or reliable frame
fn one_frame_per_packet() -> ConnectionConfig {
    ConnectionConfig::builder()
        .with_mtu(PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE + 18)
        .build()
        .unwrap()
}

#[test]
fn test_cyclic_comparator_properties() {
    assert!(cyc_less(65535, 0));
    assert!(!cyc_less(0, 65535));
    assert!(cyc_greater(0, 65535));
    assert!(cyc_less(65000, 100));

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..10_000 {
        let a: u16 = rng.gen();
        let b: u16 = rng.gen();
        let outcomes = [cyc_less(a, b), cyc_greater(a, b), a == b];
        assert_eq!(outcomes.iter().filter(|&&hit| hit).count(), 1, "a={a} b={b}");
        assert_eq!(cyc_less(a, b), cyc_greater(b, a));
    }

    println!("✓ Cyclic comparator: 10000 random pairs consistent");
}

#[test]
fn test_reliable_delivered_once_under_duplicates() {
    let mut link = Link::new(ConnectionConfig::default());
    let timeout = link.a.config().resend_timeout_secs;

    link.a.send(Message::reliable(7, &b"exactly once"[..])).unwrap();

    let mut copies = Vec::new();
    for _ in 0..50 {
        link.flush_a(true);
        copies.extend(link.a_session.outbox.drain(..));
        link.advance(timeout * 1.5);
    }
    assert!(copies.iter().all(|datagram| !datagram.is_empty()));
    assert_eq!(link.a.stats().reliable_resends, 49);

    // every resend arrives three times; b never gets to answer
    for datagram in &copies {
        for _ in 0..3 {
            link.b.handle_datagram(&mut link.b_session, datagram).unwrap();
        }
    }

    assert_eq!(link.b_session.delivered.len(), 1);
    assert_eq!(&link.b_session.delivered[0].payload()[..], b"exactly once");
    assert_eq!(link.b.stats().duplicates_dropped, 49);
    assert_eq!(link.b.stats().packets_received, 150);
}

#[test]
fn test_in_order_delivery_for_any_arrival_order() {
    const COUNT: u32 = 12;
    let mut rng = StdRng::seed_from_u64(42);

    for _round in 0..25 {
        let mut link = Link::new(one_frame_per_packet());
        for index in 0..COUNT {
            link.a
                .send(Message::in_order(3, 2, indexed_payload(index)))
                .unwrap();
        }
        for _ in 0..COUNT {
            link.flush_a(true);
        }
        let mut datagrams = std::mem::take(&mut link.a_session.outbox);
        assert_eq!(datagrams.len(), COUNT as usize);
        datagrams.shuffle(&mut rng);

        let mut arrived = HashSet::new();
        for datagram in &datagrams {
            let packet = rudp_core::DecodedPacket::decode(datagram).unwrap();
            arrived.insert(index_of(&packet.messages[0]));
            link.b.handle_datagram(&mut link.b_session, datagram).unwrap();

            let contiguous = (0..COUNT).take_while(|index| arrived.contains(index)).count();
            let delivered = link.b_session.delivered_indices();
            assert_eq!(delivered.len(), contiguous);
            assert!(delivered.iter().copied().eq(0..contiguous as u32));
        }

        assert_eq!(link.b_session.delivered_indices(), (0..COUNT).collect::<Vec<_>>());
    }

    println!("✓ In-order delivery: 25 shuffled arrival orders");
}

#[test]
fn test_gap_fill_releases_in_order() {
    let mut link = Link::new(one_frame_per_packet());
    for index in 0..3 {
        link.a.send(Message::in_order(1, 0, indexed_payload(index))).unwrap();
        link.flush_a(true);
    }
    let datagrams = std::mem::take(&mut link.a_session.outbox);

    link.b.handle_datagram(&mut link.b_session, &datagrams[0]).unwrap();
    assert_eq!(link.b_session.delivered_indices(), vec![0]);

    link.b.handle_datagram(&mut link.b_session, &datagrams[2]).unwrap();
    assert_eq!(link.b_session.delivered_indices(), vec![0]);

    link.b.handle_datagram(&mut link.b_session, &datagrams[1]).unwrap();
    assert_eq!(link.b_session.delivered_indices(), vec![0, 1, 2]);
    assert_eq!(link.b.stats().messages_delivered, 3);
}

#[test]
fn test_reliable_window_bound() {
    let config = ConnectionConfig::builder()
        .with_mtu(PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE + 18)
        .with_reliable_window(8)
        .build()
        .unwrap();
    let mut link = Link::new(config);

    for index in 0..20 {
        link.a.send(Message::reliable(1, indexed_payload(index))).unwrap();
    }
    for _ in 0..8 {
        assert!(link.a.can_send_new_reliable());
        link.flush_a(true);
    }
    assert!(!link.a.can_send_new_reliable());
    assert_eq!(link.a.in_flight_reliable_count(), 8);

    // window closed: further packets carry nothing new
    link.flush_a(true);
    assert_eq!(link.a.in_flight_reliable_count(), 8);
    assert_eq!(link.a.next_reliable_id(), 8);

    assert_eq!(link.a_to_b(|_| true), 8);
    link.flush_b(true);
    link.b_to_a(|_| true);

    assert!(link.a.can_send_new_reliable());
    assert_eq!(link.a.in_flight_reliable_count(), 0);
    assert_eq!(link.a.pending_reliable_count(), 12);
}

#[test]
fn test_rtt_converges_to_round_trip() {
    const ROUND_TRIP: f64 = 0.08;
    let mut link = Link::new(ConnectionConfig::default());

    fn round(link: &mut Link, delay: f64) {
        link.flush_a(true);
        link.a_to_b(|_| true);
        link.advance(delay);
        link.flush_b(true);
        link.b_to_a(|_| true);
    }

    round(&mut link, 1.0);
    assert!((link.a.rtt().unwrap() - 1.0).abs() < 1e-9);

    for _ in 0..40 {
        round(&mut link, ROUND_TRIP);
    }
    let rtt = link.a.rtt().unwrap();
    assert!((rtt - ROUND_TRIP).abs() < 0.01, "rtt {rtt} did not converge");

    println!("✓ RTT converged to {:.4}s", rtt);
}

#[test]
fn test_only_lost_reliable_is_resent() {
    let mut link = Link::new(one_frame_per_packet());
    let timeout = link.a.config().resend_timeout_secs;

    for index in 0..6 {
        link.a.send(Message::reliable(1, indexed_payload(index))).unwrap();
        link.flush_a(true);
    }
    // the packet carrying reliable id 3 never arrives
    link.a_to_b(|index| index != 3);
    assert_eq!(link.b_session.delivered_indices(), vec![0, 1, 2, 4, 5]);

    link.flush_b(true);
    link.b_to_a(|_| true);
    assert_eq!(link.a.pending_reliable_count(), 1);
    assert_eq!(link.a.oldest_unconfirmed_reliable_id(), Some(3));

    link.advance(timeout * 2.0);
    link.flush_a(true);
    let resend = rudp_core::DecodedPacket::decode(&link.a_session.outbox[0]).unwrap();
    assert_eq!(resend.messages.len(), 1);
    assert_eq!(resend.messages[0].reliable_id(), Some(3));

    link.a_to_b(|_| true);
    assert_eq!(link.b_session.delivered_indices(), vec![0, 1, 2, 4, 5, 3]);
    assert_eq!(link.a.stats().reliable_resends, 1);
}

#[test]
fn test_capacity_split_across_ticks() {
    let config = ConnectionConfig::builder()
        .with_mtu(PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE + 160)
        .build()
        .unwrap();
    let mut link = Link::new(config);
    let tick = link.a.config().tick_interval_secs;

    link.a.send(Message::reliable(1, vec![1u8; 100])).unwrap();
    link.a.send(Message::reliable(1, vec![2u8; 100])).unwrap();

    assert!(link.flush_a(false));
    assert_eq!(link.a_to_b(|_| true), 1);
    assert!(!link.flush_a(false));

    link.advance(tick * 1.5);
    assert!(link.flush_a(false));
    assert_eq!(link.a_to_b(|_| true), 1);

    let firsts: Vec<u8> = link
        .b_session
        .delivered
        .iter()
        .map(|message| message.payload()[0])
        .collect();
    assert_eq!(firsts, vec![1, 2]);
}

#[test]
fn test_lossy_link_delivers_everything_in_order() {
    const COUNT: u32 = 200;
    const LOSS: f64 = 0.3;
    let mut rng = StdRng::seed_from_u64(7);
    let mut link = Link::new(ConnectionConfig::default());
    let step = link.a.config().tick_interval_secs * 1.2;

    for index in 0..COUNT {
        link.a.send(Message::in_order(4, 1, indexed_payload(index))).unwrap();
        if index % 3 == 0 {
            link.a.send(Message::unreliable(5, indexed_payload(index))).unwrap();
        }
    }

    let mut ticks = 0;
    while link.a.pending_reliable_count() > 0 && ticks < 5_000 {
        link.advance(step);
        link.flush_a(false);
        link.flush_b(false);
        link.a_to_b(|_| rng.gen::<f64>() >= LOSS);
        link.b_to_a(|_| rng.gen::<f64>() >= LOSS);
        ticks += 1;
    }

    let ordered: Vec<u32> = link
        .b_session
        .delivered
        .iter()
        .filter(|message| message.is_in_order())
        .map(index_of)
        .collect();
    assert_eq!(ordered, (0..COUNT).collect::<Vec<_>>());
    assert_eq!(link.a.pending_reliable_count(), 0);
    assert!(link.a.stats().reliable_resends > 0);
    assert_eq!(link.b.state(), ConnectionState::Connected);

    println!(
        "✓ Lossy link: {} messages in {} ticks, {} resends, loss rate {:.2}",
        COUNT,
        ticks,
        link.a.stats().reliable_resends,
        link.a.loss_rate()
    );
}

#[test]
fn test_peer_timeout_disconnects() {
    let mut link = Link::new(ConnectionConfig::default());
    let timeout = link.a.config().peer_timeout_secs;

    link.flush_b(true);
    link.b_to_a(|_| true);
    assert_eq!(link.a.state(), ConnectionState::Connected);

    link.advance(timeout * 0.9);
    assert!(!link.a.check_peer_timeout(&mut link.a_session));

    link.advance(timeout * 0.2);
    assert!(link.a.check_peer_timeout(&mut link.a_session));
    assert_eq!(link.a_session.disconnected, vec![SLOT_B]);
    assert_eq!(link.a_session.outbox.len(), 1);
    assert!(!link.a.is_bound());
    assert_eq!(link.a.state(), ConnectionState::Disconnected);
}

#[test]
fn test_unbound_connection_rejects_datagrams() {
    let mut link = Link::new(ConnectionConfig::default());
    link.flush_a(true);
    let datagram = link.a_session.outbox.remove(0);

    let mut stranger = Connection::new(ConnectionConfig::default());
    assert!(matches!(
        stranger.handle_datagram(&mut link.b_session, &datagram),
        Err(RudpError::NotBound)
    ));

    let mut corrupted = datagram.clone();
    corrupted[0] ^= 0xFF;
    assert!(matches!(
        link.b.handle_datagram(&mut link.b_session, &corrupted),
        Err(RudpError::ChecksumMismatch { .. })
    ));
    assert_eq!(link.b.handle_datagram(&mut link.b_session, &datagram).unwrap(), 0);
    assert_eq!(link.b.state(), ConnectionState::Connected);
}

struct UdpSession {
    clock: MonotonicClock,
    transmitter: UdpTransmitter,
    delivered: Vec<Message>,
}

impl UdpSession {
    fn bind() -> Self {
        let transmitter = UdpTransmitter::bind("127.0.0.1:0", 1400).unwrap();
        transmitter
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self {
            clock: MonotonicClock::new(),
            transmitter,
            delivered: Vec::new(),
        }
    }
}

impl Clock for UdpSession {
    fn now_secs(&self) -> f64 {
        self.clock.now_secs()
    }
}

impl Session for UdpSession {
    fn send_datagram(&mut self, _slot: PeerSlot, address: std::net::SocketAddr, bytes: &[u8]) -> Result<()> {
        self.transmitter.send_raw(bytes, address).map(|_| ())
    }

    fn deliver(&mut self, _slot: PeerSlot, message: &Message) {
        self.delivered.push(message.clone());
    }
}

#[test]
fn test_udp_loopback_round_trip() {
    let mut session_a = UdpSession::bind();
    let mut session_b = UdpSession::bind();
    let address_a = session_a.transmitter.local_addr().unwrap();
    let address_b = session_b.transmitter.local_addr().unwrap();

    let mut a = Connection::new(ConnectionConfig::default());
    a.bind(1, address_b, session_a.now_secs());
    let mut b = Connection::new(ConnectionConfig::default());
    b.bind(0, address_a, session_b.now_secs());

    for index in 0..5 {
        a.send(Message::in_order(2, 0, indexed_payload(index))).unwrap();
    }
    assert!(a.flush(&mut session_a, true));

    let mut buffer = vec![0u8; 1500];
    let (packet, sender) = Receiver::receive_packet(session_b.transmitter.socket(), &mut buffer)
        .unwrap()
        .expect("datagram within timeout");
    assert_eq!(sender, address_a);
    assert_eq!(b.handle_packet(&mut session_b, packet), 5);
    assert_eq!(
        session_b.delivered.iter().map(index_of).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );

    assert!(b.flush(&mut session_b, true));
    let (reply, _) = Receiver::receive_packet(session_a.transmitter.socket(), &mut buffer)
        .unwrap()
        .expect("reply within timeout");
    a.handle_packet(&mut session_a, reply);

    assert_eq!(a.pending_reliable_count(), 0);
    assert!(a.rtt().is_some());
    assert_eq!(a.state(), ConnectionState::Connected);
}
