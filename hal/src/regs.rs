//! # ERT Register Layout
//!
//! Fixed locations of the command queue and the control/status registers
//! on the kernel control bus, plus the CU control register bits.
//!
//! ```text
//!  csr_base + 0x00 .. 0x0C   completion status, one word per slot group
//!                            (clear on read)
//!  csr_base + 0x58 .. 0x64   CQ doorbell, one word per slot group
//!
//!  cq_base                   slot 0 │ slot 1 │ ... │ slot N-1
//!                            ◄────── cq_size ──────────────►
//! ```

use ember_core::{SlotIndex, MAX_SLOTS, STATUS_GROUPS, WORD_BYTES};
use static_assertions::const_assert;

/// Default command-queue base on the control bus
pub const ERT_CQ_BASE: u64 = 0x19_0000;

/// Default command-queue size in bytes
pub const ERT_CQ_SIZE: u64 = 0x1_0000;

/// Default control/status register block base
pub const ERT_CSR_BASE: u64 = 0x18_0000;

/// Offset of the first CQ doorbell register inside the CSR block
pub const CQ_DOORBELL_OFFSET: u64 = 0x58;

/// Offset of the first argument register of a CU
pub const CU_ARG_OFFSET: u64 = 0x4;

/// Register-map words of an EXEC_WRITE command before the first pair
pub const EXEC_WRITE_SKIP: usize = 4;

const_assert!(CQ_DOORBELL_OFFSET >= STATUS_GROUPS as u64 * WORD_BYTES);

bitflags::bitflags! {
    /// CU control register (offset 0 of every CU)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CuControl: u32 {
        /// Start the CU
        const START = 1 << 0;
        /// CU finished; cleared when read
        const DONE = 1 << 1;
        /// CU idle
        const IDLE = 1 << 2;
    }
}

/// Command queue and CSR placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErtLayout {
    /// Command-queue base
    pub cq_base: u64,
    /// Command-queue size in bytes
    pub cq_size: u64,
    /// CSR block base
    pub csr_base: u64,
}

impl Default for ErtLayout {
    fn default() -> Self {
        Self {
            cq_base: ERT_CQ_BASE,
            cq_size: ERT_CQ_SIZE,
            csr_base: ERT_CSR_BASE,
        }
    }
}

impl ErtLayout {
    /// Completion status register of slot group `group`
    pub const fn status_register(&self, group: usize) -> u64 {
        self.csr_base + group as u64 * WORD_BYTES
    }

    /// CQ doorbell register of slot group `group`
    pub const fn cq_doorbell_register(&self, group: usize) -> u64 {
        self.csr_base + CQ_DOORBELL_OFFSET + group as u64 * WORD_BYTES
    }

    /// Byte offset of `slot` on the control bus
    pub const fn slot_offset(&self, slot: SlotIndex, slot_size: u32) -> u64 {
        self.cq_base + slot.raw() as u64 * slot_size as u64
    }

    /// Number of slots the queue holds at `slot_size`
    pub fn slot_count(&self, slot_size: u32) -> usize {
        if slot_size == 0 {
            return 0;
        }
        let fits = (self.cq_size / slot_size as u64) as usize;
        fits.min(MAX_SLOTS)
    }

    /// Whether `offset` falls inside the command queue
    pub const fn in_queue(&self, offset: u64) -> bool {
        offset >= self.cq_base && offset < self.cq_base + self.cq_size
    }

    /// Slot group whose status register lives at `offset`
    pub const fn status_group_at(&self, offset: u64) -> Option<usize> {
        if offset < self.csr_base || offset % WORD_BYTES != 0 {
            return None;
        }
        let group = ((offset - self.csr_base) / WORD_BYTES) as usize;
        if group < STATUS_GROUPS {
            Some(group)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registers() {
        let layout = ErtLayout::default();
        assert_eq!(layout.status_register(0), 0x18_0000);
        assert_eq!(layout.status_register(3), 0x18_000C);
        assert_eq!(layout.cq_doorbell_register(1), 0x18_005C);
        assert_eq!(layout.slot_offset(SlotIndex::new(2), 0x4000), 0x19_8000);
    }

    #[test]
    fn test_slot_count_capped() {
        let layout = ErtLayout::default();
        assert_eq!(layout.slot_count(0x4000), 4);
        assert_eq!(layout.slot_count(0x1000), 16);
        // 0x10000 / 0x80 = 512, capped
        assert_eq!(layout.slot_count(0x80), MAX_SLOTS);
        assert_eq!(layout.slot_count(0), 0);
    }

    #[test]
    fn test_status_group_lookup() {
        let layout = ErtLayout::default();
        assert_eq!(layout.status_group_at(0x18_0008), Some(2));
        assert_eq!(layout.status_group_at(0x18_0010), None);
        assert_eq!(layout.status_group_at(0x18_0002), None);
        assert!(layout.in_queue(0x19_FFFC));
        assert!(!layout.in_queue(0x1A_0000));
    }
}
