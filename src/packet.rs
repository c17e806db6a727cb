/// Packet framing
///
/// A packet is the unit handed to the datagram transport: a fixed header,
/// a run of message frames, and a CRC32 trailer.
///
/// # Wire Layout (little-endian)
/// - ack: 2 bytes (u16), id of this packet
/// - last_received_ack: 2 bytes (u16), newest ack id received from the peer
/// - ack_bitfield: 2 bytes (u16), bit `i` set = `last_received_ack - 1 - i` received
/// - flags: 1 byte, bit0 set when `last_received_ack` is meaningful
/// - message_count: 1 byte (u8)
/// - frames: `message_count` message frames
/// - crc32: 4 bytes (u32) over every preceding byte
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{Result, RudpError};
use crate::message::Message;
use crate::MAX_RELIABLES_PER_PACKET;

pub const PACKET_HEADER_SIZE: usize = 2 + 2 + 2 + 1 + 1;
pub const PACKET_TRAILER_SIZE: usize = 4;

const FLAG_HAS_RECEIVED: u8 = 1 << 0;

/// Ack bookkeeping carried at the front of every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub ack: u16,
    /// `None` until the sender has received anything from us
    pub last_received_ack: Option<u16>,
    pub ack_bitfield: u16,
}

impl PacketHeader {
    fn write(&self, message_count: u8, mut buf: &mut [u8]) {
        buf.put_u16_le(self.ack);
        buf.put_u16_le(self.last_received_ack.unwrap_or_default());
        buf.put_u16_le(self.ack_bitfield);
        buf.put_u8(if self.last_received_ack.is_some() {
            FLAG_HAS_RECEIVED
        } else {
            0
        });
        buf.put_u8(message_count);
    }
}

/// Outgoing packet under assembly
///
/// The header slot is reserved up front and written last, once the
/// message count and ack state are known.
#[derive(Debug)]
pub struct Packet {
    buf: BytesMut,
    capacity: usize,
    message_count: u8,
    reliable_ids: Vec<u16>,
}

impl Packet {
    /// Start an empty packet bounded by `mtu` bytes in total
    pub fn new(mtu: usize) -> Self {
        debug_assert!(mtu > PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE);
        let mut buf = BytesMut::with_capacity(mtu);
        buf.put_bytes(0, PACKET_HEADER_SIZE);
        Self {
            buf,
            capacity: mtu - PACKET_TRAILER_SIZE,
            message_count: 0,
            reliable_ids: Vec::with_capacity(MAX_RELIABLES_PER_PACKET),
        }
    }

    /// Bytes still free for message frames
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn message_count(&self) -> u8 {
        self.message_count
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Reliable ids of the messages appended so far
    pub fn reliable_ids(&self) -> &[u16] {
        &self.reliable_ids
    }

    /// Append a message frame if it fits
    ///
    /// Returns false without touching the packet when the frame is larger
    /// than the remaining space, when the message count would overflow, or
    /// when the packet already carries `MAX_RELIABLES_PER_PACKET` reliables.
    pub fn append(&mut self, message: &Message) -> bool {
        if message.encoded_len() > self.remaining() || self.message_count == u8::MAX {
            return false;
        }
        if message.is_reliable() {
            if self.reliable_ids.len() >= MAX_RELIABLES_PER_PACKET {
                return false;
            }
            match message.reliable_id() {
                Some(id) => self.reliable_ids.push(id),
                None => {
                    debug_assert!(false, "reliable message appended without id");
                    return false;
                }
            }
        }

        message.encode(&mut self.buf);
        self.message_count += 1;
        true
    }

    /// Write the header into its reserved slot and seal with the checksum
    pub fn finish(mut self, header: PacketHeader) -> Bytes {
        header.write(self.message_count, &mut self.buf[..PACKET_HEADER_SIZE]);
        let crc = crc32fast::hash(&self.buf);
        self.buf.put_u32_le(crc);
        self.buf.freeze()
    }
}

/// A packet read off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub header: PacketHeader,
    pub messages: Vec<Message>,
}

impl DecodedPacket {
    /// Verify the checksum and parse every frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE {
            return Err(RudpError::decode(format!(
                "packet too small: {} bytes",
                data.len()
            )));
        }

        let (body, mut trailer) = data.split_at(data.len() - PACKET_TRAILER_SIZE);
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(RudpError::ChecksumMismatch { expected, actual });
        }

        let mut buf = body;
        let ack = buf.get_u16_le();
        let last_received_ack = buf.get_u16_le();
        let ack_bitfield = buf.get_u16_le();
        let flags = buf.get_u8();
        let message_count = buf.get_u8();

        let header = PacketHeader {
            ack,
            last_received_ack: (flags & FLAG_HAS_RECEIVED != 0).then_some(last_received_ack),
            ack_bitfield,
        };

        let mut messages = Vec::with_capacity(usize::from(message_count));
        for _ in 0..message_count {
            messages.push(Message::decode(&mut buf)?);
        }
        if buf.has_remaining() {
            return Err(RudpError::decode("packet trailing data"));
        }

        Ok(Self { header, messages })
    }
}
