//! Wall-clock helpers.
//!
//! Envelope expiry is carried on the wire as bare UNIX seconds in a
//! 32-bit field, so everything time-related in the workspace funnels
//! through [`unix_now`].

use chrono::Utc;

/// Current wall-clock time as UNIX seconds, saturated into `u32`.
///
/// The wire format allots 32 bits to expiry timestamps; saturation
/// keeps the arithmetic total rather than panicking on clock skew.
pub fn unix_now() -> u32 {
    let secs = Utc::now().timestamp();
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_now_is_recent() {
        // 2023-01-01 as a floor; catches a zeroed or wildly wrong clock.
        assert!(unix_now() > 1_672_531_200);
    }

    #[test]
    fn unix_now_is_monotonic_enough() {
        let a = unix_now();
        let b = unix_now();
        assert!(b >= a);
    }
}
