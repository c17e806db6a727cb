/// ACK Manager module - packet-level acknowledgement state
///
/// Every outgoing packet carries the newest ack id we have received plus a
/// 16-bit history of the ones before it. The same structure read from an
/// incoming header tells us which of our own packets the peer has seen.
use crate::cyclic::cyc_less_eq;

/// Number of earlier acks reported alongside the newest one
pub const ACK_BITFIELD_BITS: u16 = 16;

/// Receive-side ack history
#[derive(Debug, Clone, Default)]
pub struct AckManager {
    largest_received: Option<u16>,
    received_bitfield: u16,
}

impl AckManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest ack id received, if any
    pub fn largest_received(&self) -> Option<u16> {
        self.largest_received
    }

    /// History bits for the acks preceding `largest_received`
    pub fn received_bitfield(&self) -> u16 {
        self.received_bitfield
    }

    /// Record an incoming packet's ack id
    ///
    /// Returns false if this ack is already recorded, i.e. the datagram is
    /// a duplicate. Acks too old to be represented are accepted but leave
    /// no trace.
    pub fn record(&mut self, ack: u16) -> bool {
        let Some(largest) = self.largest_received else {
            self.largest_received = Some(ack);
            self.received_bitfield = 0;
            return true;
        };

        if ack == largest {
            return false;
        }

        if cyc_less_eq(largest, ack) {
            let shift = ack.wrapping_sub(largest);
            self.received_bitfield = if shift > ACK_BITFIELD_BITS {
                0
            } else {
                // the old head becomes bit `shift - 1`
                let shifted = if shift == ACK_BITFIELD_BITS {
                    0
                } else {
                    self.received_bitfield << shift
                };
                shifted | (1 << (shift - 1))
            };
            self.largest_received = Some(ack);
            return true;
        }

        let back = largest.wrapping_sub(ack);
        if back > ACK_BITFIELD_BITS {
            return true;
        }
        let mask = 1u16 << (back - 1);
        if self.received_bitfield & mask != 0 {
            return false;
        }
        self.received_bitfield |= mask;
        true
    }
}

/// Ack ids reported by a peer header, oldest first
///
/// Bit `i` of `bitfield` stands for `last_received - 1 - i`; the head
/// itself is always included and comes last.
pub fn acked_ids(last_received: u16, bitfield: u16) -> impl Iterator<Item = u16> {
    (0..ACK_BITFIELD_BITS)
        .rev()
        .filter(move |bit| bitfield & (1u16 << *bit) != 0)
        .map(move |bit| last_received.wrapping_sub(bit + 1))
        .chain(std::iter::once(last_received))
}
