//! # Ember Hardware Abstraction Layer
//!
//! The scheduler never touches hardware directly. Everything it needs from
//! the device goes through the traits in [`device`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ember-execution                         │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ read / write 32-bit words
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                        ember-hal                            │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │ RegisterAccess + │  │  ErtLayout   │  │   SimDevice   │  │
//! │  │ DeviceCapability │  │  CuControl   │  │  (test model) │  │
//! │  └──────────────────┘  └──────────────┘  └───────────────┘  │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │
//!                   PCIe BAR / emulator / simulator
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod device;
pub mod regs;
pub mod sim;

pub use device::{AddressSpace, Device, DeviceCapability, RegisterAccess};
pub use regs::{CuControl, ErtLayout};
pub use sim::SimDevice;
