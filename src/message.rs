/// Application message and its wire frame
///
/// # Frame layout (little-endian)
/// - payload_len: 2 bytes (u16)
/// - kind: 1 byte (u8)
/// - flags: 1 byte (bit0 reliable, bit1 in-order)
/// - reliable_id: 2 bytes (u16), reliable only
/// - channel_index: 1 byte (u8), in-order only
/// - sequence_id: 2 bytes (u16), in-order only
/// - payload: payload_len bytes
use bytes::{Buf, BufMut, Bytes};

use crate::errors::{Result, RudpError};

const FLAG_RELIABLE: u8 = 1 << 0;
const FLAG_IN_ORDER: u8 = 1 << 1;
const KNOWN_FLAGS: u8 = FLAG_RELIABLE | FLAG_IN_ORDER;

/// Fixed part of every frame
pub const FRAME_HEADER_SIZE: usize = 2 + 1 + 1;

/// Extra bytes carried by reliable frames
pub const RELIABLE_FIELDS_SIZE: usize = 2;

/// Extra bytes carried by in-order frames
pub const IN_ORDER_FIELDS_SIZE: usize = 1 + 2;

/// Smallest possible frame: unreliable, empty payload
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE;

/// Delivery semantics of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub reliable: bool,
    pub in_order: bool,
}

impl Delivery {
    pub const UNRELIABLE: Delivery = Delivery {
        reliable: false,
        in_order: false,
    };
    pub const RELIABLE: Delivery = Delivery {
        reliable: true,
        in_order: false,
    };
    pub const RELIABLE_IN_ORDER: Delivery = Delivery {
        reliable: true,
        in_order: true,
    };

    fn bits(self) -> u8 {
        let mut flags = 0;
        if self.reliable {
            flags |= FLAG_RELIABLE;
        }
        if self.in_order {
            flags |= FLAG_IN_ORDER;
        }
        flags
    }

    /// Bytes this delivery class adds on top of the payload
    pub fn frame_overhead(self) -> usize {
        let mut size = FRAME_HEADER_SIZE;
        if self.reliable {
            size += RELIABLE_FIELDS_SIZE;
        }
        if self.in_order {
            size += IN_ORDER_FIELDS_SIZE;
        }
        size
    }
}

/// A unit of application data
///
/// Reliable id and channel sequence id stay empty until the connection
/// assigns them. A message lives in exactly one queue at a time and is
/// moved, never shared, between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: u8,
    delivery: Delivery,
    channel_index: u8,
    payload: Bytes,
    reliable_id: Option<u16>,
    sequence_id: Option<u16>,
    last_send_secs: Option<f64>,
}

impl Message {
    /// Create a message with explicit delivery flags
    ///
    /// # Panics
    /// In-order delivery without reliability is a contradiction and panics.
    pub fn new(kind: u8, delivery: Delivery, channel_index: u8, payload: impl Into<Bytes>) -> Self {
        assert!(
            delivery.reliable || !delivery.in_order,
            "in-order delivery requires a reliable message"
        );
        Self {
            kind,
            delivery,
            channel_index,
            payload: payload.into(),
            reliable_id: None,
            sequence_id: None,
            last_send_secs: None,
        }
    }

    /// Fire-and-forget message
    pub fn unreliable(kind: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(kind, Delivery::UNRELIABLE, 0, payload)
    }

    /// At-least-once message, delivered as soon as it arrives
    pub fn reliable(kind: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(kind, Delivery::RELIABLE, 0, payload)
    }

    /// Reliable message delivered in sequence on `channel_index`
    pub fn in_order(kind: u8, channel_index: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(kind, Delivery::RELIABLE_IN_ORDER, channel_index, payload)
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn is_reliable(&self) -> bool {
        self.delivery.reliable
    }

    pub fn is_in_order(&self) -> bool {
        self.delivery.in_order
    }

    pub fn channel_index(&self) -> u8 {
        self.channel_index
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn reliable_id(&self) -> Option<u16> {
        self.reliable_id
    }

    pub fn sequence_id(&self) -> Option<u16> {
        self.sequence_id
    }

    pub fn last_send_secs(&self) -> Option<f64> {
        self.last_send_secs
    }

    pub(crate) fn set_reliable_id(&mut self, id: Option<u16>) {
        debug_assert!(self.delivery.reliable || id.is_none());
        self.reliable_id = id;
    }

    pub(crate) fn set_sequence_id(&mut self, id: u16) {
        debug_assert!(self.delivery.in_order);
        self.sequence_id = Some(id);
    }

    pub(crate) fn mark_sent(&mut self, now_secs: f64) {
        self.last_send_secs = Some(now_secs);
    }

    /// Seconds since the last send; infinite if never sent
    pub fn secs_since_last_send(&self, now_secs: f64) -> f64 {
        match self.last_send_secs {
            Some(sent) => now_secs - sent,
            None => f64::INFINITY,
        }
    }

    /// Size of this message's frame on the wire
    pub fn encoded_len(&self) -> usize {
        self.delivery.frame_overhead() + self.payload.len()
    }

    /// Write the frame
    ///
    /// Reliable messages must already carry a reliable id and in-order
    /// messages a sequence id.
    pub fn encode(&self, buf: &mut impl BufMut) {
        debug_assert!(self.payload.len() <= usize::from(u16::MAX));
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_u8(self.kind);
        buf.put_u8(self.delivery.bits());
        if self.delivery.reliable {
            debug_assert!(self.reliable_id.is_some(), "reliable message encoded without id");
            buf.put_u16_le(self.reliable_id.unwrap_or_default());
        }
        if self.delivery.in_order {
            debug_assert!(self.sequence_id.is_some(), "in-order message encoded without sequence");
            buf.put_u8(self.channel_index);
            buf.put_u16_le(self.sequence_id.unwrap_or_default());
        }
        buf.put_slice(&self.payload);
    }

    /// Read one frame from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < FRAME_HEADER_SIZE {
            return Err(RudpError::decode("message header truncated"));
        }
        let payload_len = usize::from(buf.get_u16_le());
        let kind = buf.get_u8();
        let flags = buf.get_u8();

        if flags & !KNOWN_FLAGS != 0 {
            return Err(RudpError::decode(format!("unknown message flags {:#04x}", flags)));
        }
        let delivery = Delivery {
            reliable: flags & FLAG_RELIABLE != 0,
            in_order: flags & FLAG_IN_ORDER != 0,
        };
        if delivery.in_order && !delivery.reliable {
            return Err(RudpError::decode("in-order message without reliable flag"));
        }

        let mut reliable_id = None;
        if delivery.reliable {
            if buf.remaining() < RELIABLE_FIELDS_SIZE {
                return Err(RudpError::decode("reliable id truncated"));
            }
            reliable_id = Some(buf.get_u16_le());
        }

        let mut channel_index = 0;
        let mut sequence_id = None;
        if delivery.in_order {
            if buf.remaining() < IN_ORDER_FIELDS_SIZE {
                return Err(RudpError::decode("channel fields truncated"));
            }
            channel_index = buf.get_u8();
            sequence_id = Some(buf.get_u16_le());
        }

        if buf.remaining() < payload_len {
            return Err(RudpError::decode("message payload truncated"));
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Self {
            kind,
            delivery,
            channel_index,
            payload,
            reliable_id,
            sequence_id,
            last_send_secs: None,
        })
    }
}
