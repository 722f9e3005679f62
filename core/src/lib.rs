//! # Ember Core
//!
//! Foundational types shared by every layer of the Ember scheduler.
//!
//! ## Components
//!
//! - **Error**: typed, categorised error enum and `Result` alias
//! - **Types**: strong slot / CU / command indices and hardware limits
//! - **Bitmap**: word-grouped resource occupancy tracking
//! - **Packet**: decoding of the command-packet wire layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ember-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Error     │  │   Bitmap    │  │      Packet         │  │
//! │  │ (category,  │  │ (slots,     │  │  (header, opcode,   │  │
//! │  │  policy)    │  │  CUs)       │  │   CU masks, regmap) │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod bitmap;
pub mod error;
pub mod packet;
pub mod types;

// Re-exports for convenience
pub use bitmap::ResourceBitmap;
pub use error::{Error, ErrorCategory, Result};
pub use packet::{
    CommandState, CommandType, ConfigureFeatures, ConfigurePacket, Header, Opcode, Packet,
};
pub use types::*;
