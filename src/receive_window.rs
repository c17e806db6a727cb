/// Deduplication window for incoming reliable ids
///
/// Remembers which of the last `window` reliable ids (counting back from
/// the highest one seen) have arrived. Anything older than the window is
/// assumed delivered; anything newer than the highest id is new.
use crate::cyclic::{cyc_greater, cyc_less};

const ID_SPACE: usize = 1 << 16;
const WORD_BITS: usize = 64;

#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    window: u16,
    highest: u16,
    bits: Vec<u64>,
}

impl ReceiveWindow {
    pub fn new(window: u16) -> Self {
        debug_assert!(window > 0 && window < 0x8000);
        Self {
            window,
            // one step behind the first id a sender hands out
            highest: u16::MAX,
            bits: vec![0; ID_SPACE / WORD_BITS],
        }
    }

    fn lowest(&self) -> u16 {
        self.highest.wrapping_sub(self.window).wrapping_add(1)
    }

    fn test(&self, id: u16) -> bool {
        let id = usize::from(id);
        self.bits[id / WORD_BITS] & (1 << (id % WORD_BITS)) != 0
    }

    fn set(&mut self, id: u16, value: bool) {
        let id = usize::from(id);
        let mask = 1u64 << (id % WORD_BITS);
        if value {
            self.bits[id / WORD_BITS] |= mask;
        } else {
            self.bits[id / WORD_BITS] &= !mask;
        }
    }

    /// Whether `id` has already been handled
    pub fn contains(&self, id: u16) -> bool {
        if cyc_less(id, self.lowest()) {
            return true;
        }
        if cyc_greater(id, self.highest) {
            return false;
        }
        self.test(id)
    }

    /// Mark `id` received, sliding the window forward if it is the newest
    ///
    /// Returns false for duplicates and ids that fell out of the window.
    pub fn insert(&mut self, id: u16) -> bool {
        if self.contains(id) {
            return false;
        }

        if cyc_greater(id, self.highest) {
            let old_lowest = self.lowest();
            let stale_end = self.highest.wrapping_add(1);
            self.highest = id;
            let new_lowest = self.lowest();

            // forget ids that slid out; only the old window can hold set bits
            let mut stale = old_lowest;
            let mut cleared = 0;
            while stale != new_lowest && stale != stale_end && cleared < self.window {
                self.set(stale, false);
                stale = stale.wrapping_add(1);
                cleared += 1;
            }
        }

        self.set(id, true);
        true
    }
}
