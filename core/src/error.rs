//! # Ember Error Handling
//!
//! Error types for the scheduler stack.
//!
//! Errors are grouped into categories that decide how the worker reacts:
//!
//! | Category  | Recovery                         | Example                    |
//! |-----------|----------------------------------|----------------------------|
//! | Transient | retry on the next worker cycle   | register write failed      |
//! | Logic     | halt the execution context       | release of an unheld slot  |
//! | Invalid   | rejected at the API boundary     | truncated packet           |
//! | Lifecycle | reported to the caller           | enqueue after `stop()`     |
//!
//! Resource contention (no free slot or CU) is not an error at all; the
//! submission strategies report it as "not submitted this cycle".

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Ember Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR CATEGORY
// =============================================================================

/// How an error is handled by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Device access hiccup, retried next cycle
    Transient,
    /// Defect in the caller or configuration, halts the context
    Logic,
    /// Malformed input rejected before it reaches the worker
    Invalid,
    /// Scheduler lifecycle violation
    Lifecycle,
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Ember unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Device Access Errors
    // =========================================================================
    /// Register read failed
    RegisterRead {
        /// Byte offset that was read
        offset: u64,
    },
    /// Register write failed
    RegisterWrite {
        /// Byte offset that was written
        offset: u64,
    },
    /// Firmware did not answer a CONFIGURE command within the spin limit
    ConfigureTimeout,

    // =========================================================================
    // Resource Bookkeeping Errors
    // =========================================================================
    /// Bitmap index outside the declared size
    IndexOutOfRange {
        /// Offending index
        index: usize,
        /// Declared bitmap size
        len: usize,
    },
    /// Resource released while not held
    NotHeld {
        /// Offending index
        index: usize,
    },
    /// Resource acquired while already held
    AlreadyHeld {
        /// Offending index
        index: usize,
    },
    /// Packet does not fit in a command-queue slot
    PacketTooLarge {
        /// Packet size in bytes
        bytes: u64,
        /// Slot size in bytes
        slot_size: u32,
    },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Packet header and buffer disagree
    MalformedPacket,
    /// CONFIGURE payload is not usable
    InvalidConfiguration,
    /// Invalid parameter provided
    InvalidParameter,

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Scheduler has been stopped
    Stopped,
    /// Execution context halted after a logic error
    ContextHalted,
    /// Worker thread already running
    AlreadyRunning,
    /// Worker thread could not be spawned
    SpawnFailed,
}

impl Error {
    /// Category deciding the recovery policy
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::RegisterRead { .. } | Self::RegisterWrite { .. } | Self::ConfigureTimeout => {
                ErrorCategory::Transient
            },
            Self::IndexOutOfRange { .. }
            | Self::NotHeld { .. }
            | Self::AlreadyHeld { .. }
            | Self::PacketTooLarge { .. } => ErrorCategory::Logic,
            Self::MalformedPacket | Self::InvalidConfiguration | Self::InvalidParameter => {
                ErrorCategory::Invalid
            },
            Self::Stopped | Self::ContextHalted | Self::AlreadyRunning | Self::SpawnFailed => {
                ErrorCategory::Lifecycle
            },
        }
    }

    /// Whether the worker must stop touching the hardware after this error
    pub const fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Logic | ErrorCategory::Invalid)
    }

    /// Whether the failed step may simply be retried next cycle
    pub const fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Device access
            Self::RegisterRead { offset } => write!(f, "register read failed at {:#x}", offset),
            Self::RegisterWrite { offset } => write!(f, "register write failed at {:#x}", offset),
            Self::ConfigureTimeout => write!(f, "no response to CONFIGURE command"),

            // Bookkeeping
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {} out of range for bitmap of {}", index, len)
            },
            Self::NotHeld { index } => write!(f, "resource {} released while free", index),
            Self::AlreadyHeld { index } => write!(f, "resource {} acquired while busy", index),
            Self::PacketTooLarge { bytes, slot_size } => {
                write!(f, "packet of {} bytes exceeds slot size {}", bytes, slot_size)
            },

            // Input
            Self::MalformedPacket => write!(f, "malformed command packet"),
            Self::InvalidConfiguration => write!(f, "invalid CONFIGURE payload"),
            Self::InvalidParameter => write!(f, "invalid parameter"),

            // Lifecycle
            Self::Stopped => write!(f, "scheduler stopped"),
            Self::ContextHalted => write!(f, "execution context halted"),
            Self::AlreadyRunning => write!(f, "scheduler worker already running"),
            Self::SpawnFailed => write!(f, "failed to spawn scheduler worker"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(Error::RegisterWrite { offset: 0 }.is_transient());
        assert!(Error::NotHeld { index: 3 }.is_fatal());
        assert!(Error::MalformedPacket.is_fatal());
        assert!(!Error::Stopped.is_fatal());
        assert_eq!(Error::ContextHalted.category(), ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_display() {
        let msg = Error::IndexOutOfRange { index: 9, len: 4 }.to_string();
        assert!(msg.contains('9'));
        assert!(msg.contains('4'));
    }
}
