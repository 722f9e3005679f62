//! # Submission Strategies
//!
//! The two protocols that move a command QUEUED -> RUNNING -> COMPLETED.
//!
//! ```text
//!                   ┌───────────────────────┐   ┌───────────────────────┐
//!                   │   FirmwareStrategy    │   │    DirectStrategy     │
//!  submit           │ slot + packet write   │   │ CU regmap + START bit │
//!                   │ + optional doorbell   │   │ + slot bookkeeping    │
//!  query            │ status register bits  │   │ CU control DONE bit   │
//!                   └───────────────────────┘   └───────────────────────┘
//! ```
//!
//! Exactly one is active per context, chosen when it is configured.

mod direct;
mod firmware;

pub use direct::DirectStrategy;
pub use firmware::FirmwareStrategy;

use ember_core::Result;
use ember_hal::Device;

use crate::command::Command;
use crate::context::{ExecutionContext, SubmissionMode};
use crate::interrupt::InterruptLatch;

/// Result of a submit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The command is now RUNNING
    Submitted,
    /// No eligible resource this cycle; the command stays QUEUED
    NotSubmitted,
}

/// One device-interaction protocol
pub(crate) trait SubmissionStrategy {
    /// Try to dispatch a QUEUED command
    ///
    /// On error the command is still QUEUED and holds no resources.
    fn submit(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
    ) -> Result<SubmitOutcome>;

    /// Check a RUNNING command for completion
    ///
    /// May retire other commands whose completion is observed on the way.
    fn query(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
        latch: &InterruptLatch,
    ) -> Result<()>;
}

/// Strategy for a submission mode
pub(crate) fn strategy_for(mode: SubmissionMode) -> &'static dyn SubmissionStrategy {
    match mode {
        SubmissionMode::EmbeddedFirmware => &FirmwareStrategy,
        SubmissionMode::Direct => &DirectStrategy,
    }
}
