/// Wraparound-safe comparison of 16-bit sequence numbers
///
/// Ack ids, reliable ids and channel sequence ids all wrap at `u16::MAX`.
/// Ordering is defined by the sign of the wrapped difference, so two values
/// compare sensibly as long as they are within half the id space of each
/// other. Plain `<` on these ids is wrong near the wrap and must not be used.

/// Signed distance from `b` to `a`, in `[-32768, 32767]`
#[inline]
pub fn cyc_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

#[inline]
pub fn cyc_less(a: u16, b: u16) -> bool {
    cyc_diff(a, b) < 0
}

#[inline]
pub fn cyc_greater(a: u16, b: u16) -> bool {
    cyc_diff(a, b) > 0
}

#[inline]
pub fn cyc_less_eq(a: u16, b: u16) -> bool {
    cyc_diff(a, b) <= 0
}
