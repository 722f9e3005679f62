//! # Device Access
//!
//! Register-level access to an accelerator card.
//!
//! Implementations must be safe to call from the worker thread while other
//! threads hold a reference, so every method takes `&self`.

use ember_core::{Result, WORD_BYTES};

/// Address space a register offset refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AddressSpace {
    /// Kernel control bus: command queue, CSRs and CU control registers
    KernelControl,
}

// ============================================================================
// Register Access Trait
// ============================================================================

/// Word-granular register access
pub trait RegisterAccess: Send + Sync {
    /// Read `buf.len()` consecutive words starting at byte `offset`
    fn read(&self, space: AddressSpace, offset: u64, buf: &mut [u32]) -> Result<()>;

    /// Write `data` as consecutive words starting at byte `offset`
    fn write(&self, space: AddressSpace, offset: u64, data: &[u32]) -> Result<()>;

    /// Read a single word
    fn read32(&self, space: AddressSpace, offset: u64) -> Result<u32> {
        let mut word = [0u32; 1];
        self.read(space, offset, &mut word)?;
        Ok(word[0])
    }

    /// Write a single word
    fn write32(&self, space: AddressSpace, offset: u64, value: u32) -> Result<()> {
        self.write(space, offset, &[value])
    }

    /// Write `(offset, value)` pairs relative to `base`
    fn write_pairs(&self, space: AddressSpace, base: u64, pairs: &[u32]) -> Result<()> {
        for pair in pairs.chunks_exact(2) {
            self.write32(space, base + pair[0] as u64, pair[1])?;
        }
        Ok(())
    }
}

// ============================================================================
// Capability Trait
// ============================================================================

/// Static properties of the device beyond its register map
pub trait DeviceCapability: Send + Sync {
    /// Control address of auxiliary (copy-engine) CU `index`, if present
    fn auxiliary_cu(&self, _index: usize) -> Option<u32> {
        None
    }
}

/// A device the scheduler can drive
pub trait Device: RegisterAccess + DeviceCapability {}

impl<T: RegisterAccess + DeviceCapability + ?Sized> Device for T {}

/// Byte offset of word `index` after `base`
#[inline]
pub const fn word_offset(base: u64, index: usize) -> u64 {
    base + index as u64 * WORD_BYTES
}
