//! Modular 32-bit sequence-number arithmetic.
//!
//! Sequence numbers are elements of Z mod 2^32 and wrap around to 0 after
//! 2^32 - 1, so raw `<` gives the wrong answer near the wraparound point.
//! Comparisons follow the RFC 1323 recommendation: `a` precedes `b` when
//! `a - b` is negative in 32-bit signed arithmetic.

/// Does `a` come strictly before `b` in circular order?
///
/// ```
/// use filewire::tcp::seq::precedes;
/// assert!(precedes(100, 200));
/// assert!(!precedes(200, 100));
/// // 10 comes after 4_294_967_290 in sequence space
/// assert!(precedes(4_294_967_290, 10));
/// ```
pub fn precedes(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a` precedes or equals `b` in circular order.
pub fn precedes_or_eq(a: u32, b: u32) -> bool {
    a == b || precedes(a, b)
}

/// Does `seq` lie inside `[left, left + len)` mod 2^32?
///
/// Used for both send-window and receive-window membership. A zero-length
/// window contains nothing.
pub fn in_window(seq: u32, left: u32, len: u32) -> bool {
    seq.wrapping_sub(left) < len
}
