//! Per-direction anti-replay sequence counters.
//!
//! Each sub-frame carries the counter value held before the increment, so
//! a message consumes two values: `2n` for its header and `2n + 1` for its
//! payload frame. Both peers must count the same way or they desynchronize.

use crate::error::{ChannelError, FrameKind};

/// Strictly increasing 32-bit sequence counter.
///
/// The counter never wraps: once all 2^32 values are issued, further use
/// fails with [`ChannelError::SequenceExhausted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    /// Counter starting at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn starting_at(value: u32) -> Self {
        Self {
            next: u64::from(value),
        }
    }

    /// Next value to be issued or expected
    #[must_use]
    pub fn value(&self) -> u64 {
        self.next
    }

    /// Issue the current value and advance.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SequenceExhausted`] once `u32::MAX` has been issued.
    pub fn advance(&mut self) -> Result<u32, ChannelError> {
        let current = u32::try_from(self.next).map_err(|_| ChannelError::SequenceExhausted)?;
        self.next += 1;
        Ok(current)
    }

    /// Check an inbound sequence number against the expected value and
    /// advance on match.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Sequence`] if `actual` is not the expected
    /// value, or [`ChannelError::SequenceExhausted`] if none is left.
    pub fn expect(&mut self, frame: FrameKind, actual: u32) -> Result<(), ChannelError> {
        let expected = u32::try_from(self.next).map_err(|_| ChannelError::SequenceExhausted)?;
        if actual != expected {
            return Err(ChannelError::Sequence {
                frame,
                expected,
                actual,
            });
        }
        self.next += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_issues_pre_increment_value() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.advance().unwrap(), 0);
        assert_eq!(counter.advance().unwrap(), 1);
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_expect_accepts_in_order() {
        let mut counter = SequenceCounter::new();
        counter.expect(FrameKind::Header, 0).unwrap();
        counter.expect(FrameKind::Payload, 1).unwrap();
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_expect_rejects_replay() {
        let mut counter = SequenceCounter::new();
        counter.expect(FrameKind::Header, 0).unwrap();
        counter.expect(FrameKind::Payload, 1).unwrap();

        let err = counter.expect(FrameKind::Header, 0).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Sequence {
                frame: FrameKind::Header,
                expected: 2,
                actual: 0
            }
        ));
        // A rejected value does not advance the counter
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_expect_rejects_skip_ahead() {
        let mut counter = SequenceCounter::new();
        assert!(counter.expect(FrameKind::Header, 2).is_err());
    }

    #[test]
    fn test_last_value_then_exhausted() {
        let mut counter = SequenceCounter::starting_at(u32::MAX);
        assert_eq!(counter.advance().unwrap(), u32::MAX);
        assert!(matches!(
            counter.advance(),
            Err(ChannelError::SequenceExhausted)
        ));
        assert!(matches!(
            counter.expect(FrameKind::Header, 0),
            Err(ChannelError::SequenceExhausted)
        ));
    }
}
