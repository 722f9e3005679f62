//! # Completion Interrupt Latch
//!
//! One flag per 32-slot status group. The interrupt path raises a flag; the
//! worker consumes it before reading that group's status register.

use core::sync::atomic::{AtomicBool, Ordering};

use ember_core::{Error, Result, STATUS_GROUPS};

/// Pending completion interrupts, per status group
#[derive(Debug, Default)]
pub struct InterruptLatch {
    pending: [AtomicBool; STATUS_GROUPS],
}

impl InterruptLatch {
    /// Record an interrupt for `group`
    pub fn raise(&self, group: usize) -> Result<()> {
        let flag = self.pending.get(group).ok_or(Error::InvalidParameter)?;
        flag.store(true, Ordering::Release);
        Ok(())
    }

    /// Consume the interrupt for `group`, if any
    pub fn take(&self, group: usize) -> bool {
        self.pending
            .get(group)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    /// Whether an interrupt is pending for `group`
    pub fn is_pending(&self, group: usize) -> bool {
        self.pending
            .get(group)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes() {
        let latch = InterruptLatch::default();
        assert!(!latch.take(1));

        latch.raise(1).unwrap();
        assert!(latch.is_pending(1));
        assert!(!latch.is_pending(0));
        assert!(latch.take(1));
        assert!(!latch.take(1));
    }

    #[test]
    fn test_out_of_range_group() {
        let latch = InterruptLatch::default();
        assert_eq!(latch.raise(STATUS_GROUPS), Err(Error::InvalidParameter));
        assert!(!latch.take(STATUS_GROUPS));
    }
}
