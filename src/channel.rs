/// In-order delivery channel
///
/// Each channel numbers its outgoing in-order messages and, on the receive
/// side, holds back messages that arrive ahead of a gap until the gap is
/// filled.
use std::collections::HashMap;

use tracing::debug;

use crate::cyclic::{cyc_greater, cyc_less};
use crate::message::Message;

/// What happened to a message handed to [`Channel::receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelReceive {
    /// Delivered together with this many previously buffered messages
    Delivered { drained: usize },
    /// Ahead of the expected sequence, held back
    Buffered,
    /// Behind the expected sequence, thrown away
    Stale,
}

#[derive(Debug, Default)]
pub struct Channel {
    next_send_sequence_id: u16,
    next_expect_receive_sequence_id: u16,
    out_of_order: HashMap<u16, Message>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next outgoing sequence id
    pub fn next_send_sequence(&mut self) -> u16 {
        let id = self.next_send_sequence_id;
        self.next_send_sequence_id = self.next_send_sequence_id.wrapping_add(1);
        id
    }

    pub fn next_expected(&self) -> u16 {
        self.next_expect_receive_sequence_id
    }

    /// Messages waiting for an earlier sequence id
    pub fn buffered(&self) -> usize {
        self.out_of_order.len()
    }

    /// Accept an in-order message, delivering whatever became contiguous
    ///
    /// `deliver` is called in strictly increasing sequence order.
    pub fn receive(&mut self, message: Message, mut deliver: impl FnMut(&Message)) -> ChannelReceive {
        let Some(sequence) = message.sequence_id() else {
            debug_assert!(false, "in-order message without sequence id");
            return ChannelReceive::Stale;
        };
        let expected = self.next_expect_receive_sequence_id;

        if cyc_less(sequence, expected) {
            debug!(sequence, expected, "stale in-order message discarded");
            return ChannelReceive::Stale;
        }

        if cyc_greater(sequence, expected) {
            self.out_of_order.insert(sequence, message);
            return ChannelReceive::Buffered;
        }

        deliver(&message);
        self.next_expect_receive_sequence_id = expected.wrapping_add(1);

        let mut drained = 0;
        while let Some(next) = self.out_of_order.remove(&self.next_expect_receive_sequence_id) {
            deliver(&next);
            self.next_expect_receive_sequence_id = self.next_expect_receive_sequence_id.wrapping_add(1);
            drained += 1;
        }

        ChannelReceive::Delivered { drained }
    }
}
