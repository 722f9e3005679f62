//! # Ember Core Types
//!
//! Strong index types and the hardware limits they are bounded by.
//!
//! Slots and compute units are both addressed as bits in groups of 32-bit
//! words; the helpers here convert between a flat index and its
//! `(word, bit)` position.

use core::fmt;

use static_assertions::const_assert;

// =============================================================================
// HARDWARE LIMITS
// =============================================================================

/// Bits per bitmap / status-register word
pub const WORD_BITS: usize = 32;

/// Maximum number of command-queue slots
pub const MAX_SLOTS: usize = 128;

/// Maximum number of compute units, auxiliary CUs included
pub const MAX_CUS: usize = 128;

/// Number of 32-bit completion status register groups
pub const STATUS_GROUPS: usize = MAX_SLOTS / WORD_BITS;

/// Number of 32-bit words in the largest resource bitmap
pub const BITMAP_WORDS: usize = (if MAX_SLOTS > MAX_CUS { MAX_SLOTS } else { MAX_CUS }) / WORD_BITS;

/// Bytes per device register word
pub const WORD_BYTES: u64 = 4;

const_assert!(MAX_SLOTS % WORD_BITS == 0);
const_assert!(MAX_CUS % WORD_BITS == 0);
const_assert!(STATUS_GROUPS == 4);

/// Word that holds bit `index`
#[inline]
pub const fn word_of(index: usize) -> usize {
    index / WORD_BITS
}

/// Position of bit `index` inside its word
#[inline]
pub const fn bit_of(index: usize) -> usize {
    index % WORD_BITS
}

/// Flat index from a `(word, bit)` pair
#[inline]
pub const fn index_of(word: usize, bit: usize) -> usize {
    word * WORD_BITS + bit
}

// =============================================================================
// SLOT INDEX
// =============================================================================

/// Index of a command-queue slot
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Create a new slot index
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Status register group this slot reports in
    #[inline]
    pub const fn group(self) -> usize {
        word_of(self.0)
    }

    /// Bit position inside the status register group
    #[inline]
    pub const fn bit(self) -> usize {
        bit_of(self.0)
    }
}

impl fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CU INDEX
// =============================================================================

/// Index of a compute unit in the context's CU address table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CuIndex(usize);

impl CuIndex {
    /// Create a new CU index
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cu({})", self.0)
    }
}

impl fmt::Display for CuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// COMMAND ID
// =============================================================================

/// Scheduler-assigned identity of a submitted command
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Create a new command id
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cmd#{}", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
