//! # Scheduler Configuration
//!
//! Host-side knobs. Everything the device decides arrives later through the
//! CONFIGURE command and lives in the execution context instead.

use core::time::Duration;

use ember_hal::ErtLayout;

/// Default interval between worker passes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Default number of status re-reads while waiting for a CONFIGURE response
pub const DEFAULT_CONFIGURE_SPIN_LIMIT: u32 = 100_000;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on the sleep between worker passes
    pub poll_interval: Duration,
    /// Command queue and CSR placement
    pub layout: ErtLayout,
    /// Status re-reads before a CONFIGURE response is declared late
    pub configure_spin_limit: u32,
    /// Allow the device firmware to schedule the command queue
    pub firmware_scheduling: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            layout: ErtLayout::default(),
            configure_spin_limit: DEFAULT_CONFIGURE_SPIN_LIMIT,
            firmware_scheduling: true,
        }
    }
}

impl SchedulerConfig {
    /// Set the worker poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the device register layout
    pub fn with_layout(mut self, layout: ErtLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the CONFIGURE response spin limit
    pub fn with_configure_spin_limit(mut self, limit: u32) -> Self {
        self.configure_spin_limit = limit;
        self
    }

    /// Permit or forbid firmware scheduling
    pub fn with_firmware_scheduling(mut self, enabled: bool) -> Self {
        self.firmware_scheduling = enabled;
        self
    }
}
