/// Ring of recently sent packets
///
/// Slot `ack % ring_size` remembers when packet `ack` left and which
/// reliable ids it carried. A confirmation frees the slot; a slot that is
/// still occupied when its index comes around again belonged to a lost
/// packet.
use tracing::debug;

use crate::MAX_RELIABLES_PER_PACKET;

/// Snapshot of one sent packet
#[derive(Debug, Clone, Copy)]
pub struct PacketRecord {
    pub ack: u16,
    pub send_secs: f64,
    reliables: [u16; MAX_RELIABLES_PER_PACKET],
    reliable_count: usize,
}

impl PacketRecord {
    fn new(ack: u16, send_secs: f64, reliable_ids: &[u16]) -> Self {
        assert!(
            reliable_ids.len() <= MAX_RELIABLES_PER_PACKET,
            "packet carries {} reliables, limit is {}",
            reliable_ids.len(),
            MAX_RELIABLES_PER_PACKET
        );
        let mut reliables = [0u16; MAX_RELIABLES_PER_PACKET];
        reliables[..reliable_ids.len()].copy_from_slice(reliable_ids);
        Self {
            ack,
            send_secs,
            reliables,
            reliable_count: reliable_ids.len(),
        }
    }

    pub fn reliables(&self) -> &[u16] {
        &self.reliables[..self.reliable_count]
    }
}

/// Fixed-capacity table of in-flight packets
#[derive(Debug, Clone)]
pub struct PacketTracker {
    slots: Vec<Option<PacketRecord>>,
    lost_markers: Vec<bool>,
}

impl PacketTracker {
    /// `size` must be a power of two so slot indices stay stable across
    /// ack wraparound
    pub fn new(size: usize) -> Self {
        debug_assert!(size.is_power_of_two() && size <= 0x8000);
        Self {
            slots: vec![None; size],
            lost_markers: vec![false; size],
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, ack: u16) -> usize {
        usize::from(ack) % self.slots.len()
    }

    /// Register a sent packet
    ///
    /// Returns true when the slot still held an unconfirmed packet, which
    /// is counted as lost.
    pub fn track(&mut self, ack: u16, send_secs: f64, reliable_ids: &[u16]) -> bool {
        let index = self.index(ack);
        let previous = self.slots[index].replace(PacketRecord::new(ack, send_secs, reliable_ids));

        match previous {
            Some(lost) => {
                debug!(ack = lost.ack, reliables = lost.reliable_count, "packet presumed lost");
                self.lost_markers[index] = true;
                true
            }
            None => false,
        }
    }

    /// Take the record for `ack` and free its slot
    ///
    /// `None` if the slot is empty or has moved on to another packet.
    pub fn release(&mut self, ack: u16) -> Option<PacketRecord> {
        let index = self.index(ack);
        match self.slots[index] {
            Some(record) if record.ack == ack => self.slots[index].take(),
            _ => None,
        }
    }

    /// Fraction of slots marked lost since the last call, then clear
    pub fn take_loss_rate(&mut self) -> f32 {
        let lost = self.lost_markers.iter().filter(|&&marker| marker).count();
        self.lost_markers.fill(false);
        lost as f32 / self.lost_markers.len() as f32
    }
}
