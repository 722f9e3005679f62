//! # Ember Execution Subsystem
//!
//! Moves command packets from producers onto an accelerator's compute units
//! and retires each one exactly once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         EXECUTION SUBSYSTEM                          │
//! │                                                                      │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                       Scheduler (facade)                       │  │
//! │  │   enqueue · run_once · start · stop · register_client · stats  │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │                                   │
//! │  ┌───────────────────────────────▼────────────────────────────────┐  │
//! │  │                          Worker pass                           │  │
//! │  │   drain pending ─▶ submit QUEUED ─▶ query RUNNING ─▶ retire    │  │
//! │  └──────────┬───────────────────────────────────────┬─────────────┘  │
//! │             │                                       │                │
//! │  ┌──────────▼──────────┐                 ┌──────────▼─────────────┐  │
//! │  │  ExecutionContext   │                 │  SubmissionStrategy    │  │
//! │  │  slots · CUs ·      │◀────────────────│  Firmware │ Direct     │  │
//! │  │  submitted · usage  │                 └──────────┬─────────────┘  │
//! │  └─────────────────────┘                            │                │
//! └─────────────────────────────────────────────────────┼────────────────┘
//!                                                       ▼
//!                                              ember_hal::Device
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ember_core::{CommandType, ConfigurePacket, Opcode, Packet};
//! use ember_execution::{Scheduler, SchedulerConfig};
//! use ember_hal::SimDevice;
//!
//! let sched = Scheduler::attach(Arc::new(SimDevice::new()), SchedulerConfig::default());
//! sched.enqueue(ConfigurePacket::new(0x1000).to_packet().unwrap()).unwrap();
//! let cmd = sched
//!     .enqueue(Packet::new(Opcode::CuStat, CommandType::Ctrl, &[0]).unwrap())
//!     .unwrap();
//!
//! sched.run_once().unwrap();
//! assert!(cmd.is_completed());
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod command;
pub mod config;
pub mod context;
pub mod interrupt;
pub mod scheduler;
mod strategy;
pub mod waiter;
mod worker;

pub use command::CommandHandle;
pub use config::SchedulerConfig;
pub use context::{ConfigureOutcome, ExecutionContext, SubmissionMode};
pub use interrupt::InterruptLatch;
pub use scheduler::Scheduler;
pub use strategy::SubmitOutcome;
pub use waiter::{ClientHandle, ClientId, WaiterRegistry};
pub use worker::SchedulerStats;
