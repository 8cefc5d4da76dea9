//! Configure serial matching.
//!
//! Serials are 32-bit and wrap around. A client echoes the serial of the
//! configure it is responding to; we consider the target reached once the
//! echoed value is at or past it, where "past" is judged modulo 2^32.

const HALF_RANGE: u32 = u32::MAX / 2;

/// Serial value the client reports before it has acked anything.
pub const UNACKNOWLEDGED: u32 = 0;

/// Whether `current` (the client's last acked serial) has reached `target`.
pub fn is_acknowledged(current: u32, target: u32) -> bool {
    if current == UNACKNOWLEDGED {
        return false;
    }

    // No wrap between target and current.
    if current >= target && current - target < HALF_RANGE {
        return true;
    }

    // Current wrapped past u32::MAX while target did not.
    target > current && target - current > HALF_RANGE
}
