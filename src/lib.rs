/// RUDP Core - tick-driven reliable messaging over UDP
///
/// **Creator**: Shayan Golmezerji
/// **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
///
/// Each [`Connection`] batches queued messages into one MTU-sized packet per
/// tick. Packets carry an ack id plus the peer's ack history, so every
/// datagram doubles as an acknowledgement. On top of that sit three
/// delivery classes:
/// - unreliable: best effort, dropped if the tick's packet is full
/// - reliable: resent until a packet carrying it is confirmed, delivered once
/// - reliable in-order: reliable, and released per channel in send order
///
/// # Design Principles
/// - No threads, no timers: the owner drives `flush` and feeds datagrams
/// - All ids are 16-bit and compared cyclically
/// - Every datagram is CRC32-checked before any state changes

pub mod errors;
pub mod config;
pub mod cyclic;
pub mod contracts;
pub mod message;
pub mod packet;
pub mod ack_manager;
pub mod tracker;
pub mod receive_window;
pub mod channel;
pub mod connection;
pub mod transmitter;
pub mod receiver;

pub use config::{ConfigBuilder, ConnectionConfig};
pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use contracts::{Clock, Heartbeat, ManualClock, MonotonicClock, PeerSlot, Session};
pub use errors::{Result, RudpError};
pub use message::{Delivery, Message};
pub use packet::{DecodedPacket, PacketHeader, PACKET_HEADER_SIZE, PACKET_TRAILER_SIZE};

/// Reliable messages a single packet may carry
pub const MAX_RELIABLES_PER_PACKET: usize = 32;

/// Message kind reserved for connection keep-alives
pub const HEARTBEAT_KIND: u8 = 0xFF;
