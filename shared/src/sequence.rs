//! Wrapping 32-bit counters.
//!
//! `snapshot_id` and `seq_num` roll over to zero after `u32::MAX`, so ordering
//! uses serial-number arithmetic: `a` is newer than `b` when the forward
//! distance from `b` to `a` is non-zero and less than half the counter space.

const HALF_RANGE: u32 = 1 << 31;

/// Returns true if `a` comes after `b` on the wrapping counter.
pub fn is_newer(a: u32, b: u32) -> bool {
    let distance = a.wrapping_sub(b);
    distance != 0 && distance < HALF_RANGE
}

/// Monotonic outbound counter that wraps instead of overflowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    current: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(current: u32) -> Self {
        Self { current }
    }

    /// Advances the counter and returns the new value.
    pub fn next(&mut self) -> u32 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer_basic() {
        assert!(is_newer(100, 50));
        assert!(!is_newer(50, 100));
        assert!(!is_newer(5, 5));
    }

    #[test]
    fn test_is_newer_across_wraparound() {
        assert!(is_newer(0, u32::MAX));
        assert!(is_newer(10, u32::MAX - 10));
        assert!(!is_newer(u32::MAX, 0));
    }

    #[test]
    fn test_is_newer_half_range_boundary() {
        assert!(is_newer(HALF_RANGE - 1, 0));
        assert!(!is_newer(HALF_RANGE, 0));
    }

    #[test]
    fn test_counter_wraps() {
        let mut counter = SequenceCounter::starting_at(u32::MAX - 1);
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn test_counter_values_are_always_newer() {
        let mut counter = SequenceCounter::starting_at(u32::MAX - 3);
        let mut previous = counter.current();
        for _ in 0..8 {
            let next = counter.next();
            assert!(is_newer(next, previous));
            previous = next;
        }
    }
}
