//! # Execution Context
//!
//! Per-device configuration and allocation state.
//!
//! ```text
//! ┌──────────────────────────── ExecutionContext ─────────────────────────────┐
//! │  configured once by the first CONFIGURE command                           │
//! │    slot_size, num_slots, cu_addrs[], mode, polling, interrupts            │
//! │                                                                           │
//! │  slot_busy ┌─┬─┬─┬─┐      submitted ┌────┬────┬────┬────┐                 │
//! │            │1│0│1│0│ ◄──────────────│cmd │ -- │cmd │ -- │                 │
//! │            └─┴─┴─┴─┘                └────┴────┴────┴────┘                 │
//! │  cu_busy   ┌─┬─┐        cu_usage    ┌────┬────┐                           │
//! │            │0│1│                    │ 12 │  7 │                           │
//! │            └─┴─┘                    └────┴────┘                           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the worker mutates a context. A held slot always has its command in
//! `submitted`, and a held CU is always recorded on that command.

use arrayvec::ArrayVec;

use ember_core::{
    ConfigureFeatures, ConfigurePacket, CuIndex, Error, Packet, ResourceBitmap, Result, SlotIndex,
    MAX_CUS,
};
use ember_hal::{Device, ErtLayout};

use crate::command::Command;
use crate::config::SchedulerConfig;

/// Auxiliary CUs queried from the device during configuration
pub const MAX_AUX_CUS: usize = 4;

/// Low bits of a CU address that carry flags rather than address
const CU_ADDR_FLAGS: u32 = 0xFF;

/// How commands reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Device firmware schedules packets written into queue slots
    EmbeddedFirmware,
    /// Host starts CUs through their control registers
    Direct,
}

/// Result of a configuration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// This CONFIGURE set up the context
    Applied,
    /// The context was configured earlier; nothing changed
    AlreadyConfigured,
}

/// Per-device scheduling state
#[derive(Debug)]
pub struct ExecutionContext {
    layout: ErtLayout,
    firmware_scheduling: bool,
    configure_spin_limit: u32,

    configured: bool,
    halted: bool,
    mode: SubmissionMode,
    polling: bool,
    interrupts_enabled: bool,

    slot_size: u32,
    num_slots: usize,
    cu_addrs: ArrayVec<u64, MAX_CUS>,

    slot_busy: ResourceBitmap,
    cu_busy: ResourceBitmap,
    submitted: Vec<Option<Command>>,
    cu_usage: Vec<u64>,
}

impl ExecutionContext {
    /// Create an unconfigured context
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            layout: config.layout,
            firmware_scheduling: config.firmware_scheduling,
            configure_spin_limit: config.configure_spin_limit,
            configured: false,
            halted: false,
            mode: SubmissionMode::Direct,
            polling: true,
            interrupts_enabled: false,
            slot_size: 0,
            num_slots: 0,
            cu_addrs: ArrayVec::new(),
            slot_busy: ResourceBitmap::default(),
            cu_busy: ResourceBitmap::default(),
            submitted: Vec::new(),
            cu_usage: Vec::new(),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Apply a CONFIGURE packet; only the first call has any effect
    pub fn configure(&mut self, packet: &Packet, device: &dyn Device) -> Result<ConfigureOutcome> {
        if self.configured {
            log::debug!("context already configured, ignoring CONFIGURE");
            return Ok(ConfigureOutcome::AlreadyConfigured);
        }

        let cfg = ConfigurePacket::parse(packet)?;
        let num_slots = self.layout.slot_count(cfg.slot_size);
        if num_slots == 0 {
            return Err(Error::InvalidConfiguration);
        }

        let mut cu_addrs = ArrayVec::new();
        for &addr in &cfg.cu_addrs {
            cu_addrs
                .try_push(u64::from(addr & !CU_ADDR_FLAGS))
                .map_err(|_| Error::InvalidConfiguration)?;
        }
        let configured_cus = cu_addrs.len();
        for aux in (0..MAX_AUX_CUS).filter_map(|i| device.auxiliary_cu(i)) {
            if cu_addrs.try_push(u64::from(aux & !CU_ADDR_FLAGS)).is_err() {
                log::warn!("CU table full, dropping auxiliary CU at {:#x}", aux);
                break;
            }
        }

        let mode = if self.firmware_scheduling && cfg.features.contains(ConfigureFeatures::ERT) {
            SubmissionMode::EmbeddedFirmware
        } else {
            SubmissionMode::Direct
        };

        self.slot_busy = ResourceBitmap::new(num_slots)?;
        self.cu_busy = ResourceBitmap::new(cu_addrs.len())?;
        self.submitted = vec![None; num_slots];
        self.cu_usage = vec![0; cu_addrs.len()];
        self.slot_size = cfg.slot_size;
        self.num_slots = num_slots;
        self.cu_addrs = cu_addrs;
        self.mode = mode;
        self.polling = cfg.features.contains(ConfigureFeatures::POLLING)
            || mode == SubmissionMode::Direct;
        self.interrupts_enabled = cfg.features.contains(ConfigureFeatures::CQ_INT);
        self.configured = true;

        log::info!(
            "context configured: {:?}, {} slots of {:#x} bytes, {} CUs ({} auxiliary), polling={}",
            mode,
            num_slots,
            cfg.slot_size,
            self.cu_addrs.len(),
            self.cu_addrs.len() - configured_cus,
            self.polling
        );
        Ok(ConfigureOutcome::Applied)
    }

    /// Whether a CONFIGURE has been applied
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Active submission mode
    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }

    /// Whether completion status is read every pass
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Whether the host rings the CQ doorbell after each submit
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Device register layout
    pub fn layout(&self) -> &ErtLayout {
        &self.layout
    }

    /// CONFIGURE response spin limit
    pub fn configure_spin_limit(&self) -> u32 {
        self.configure_spin_limit
    }

    /// Slot size in bytes
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Number of slots
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Number of CUs, auxiliary CUs included
    pub fn cu_count(&self) -> usize {
        self.cu_addrs.len()
    }

    /// Control-bus base of `cu`
    pub fn cu_address(&self, cu: CuIndex) -> Result<u64> {
        self.cu_addrs
            .get(cu.raw())
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index: cu.raw(),
                len: self.cu_addrs.len(),
            })
    }

    /// Per-CU dispatch counters
    pub fn cu_usage(&self) -> &[u64] {
        &self.cu_usage
    }

    /// Slot occupancy
    pub fn slot_busy(&self) -> &ResourceBitmap {
        &self.slot_busy
    }

    /// CU occupancy
    pub fn cu_busy(&self) -> &ResourceBitmap {
        &self.cu_busy
    }

    #[cfg(test)]
    pub(crate) fn cu_busy_mut(&mut self) -> &mut ResourceBitmap {
        &mut self.cu_busy
    }

    // =========================================================================
    // Halt
    // =========================================================================

    /// Stop scheduling after a logic error
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Whether the context has been halted
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Lowest free slot, without claiming it
    pub fn free_slot(&self) -> Option<SlotIndex> {
        self.slot_busy.first_clear_bit().map(SlotIndex::new)
    }

    /// Lowest free CU eligible under `mask`, without claiming it
    pub fn free_cu(&self, mask: &[u32]) -> Option<CuIndex> {
        self.cu_busy.first_set_bit_in(mask).map(CuIndex::new)
    }

    /// Claim a CU
    pub fn acquire_cu(&mut self, cu: CuIndex) -> Result<()> {
        self.cu_busy.set(cu.raw())
    }

    /// Give back a CU claimed for a submit that failed
    pub fn release_cu(&mut self, cu: CuIndex) -> Result<()> {
        self.cu_busy.clear(cu.raw())
    }

    /// Count a dispatch on `cu`
    pub fn record_cu_use(&mut self, cu: CuIndex) {
        if let Some(count) = self.cu_usage.get_mut(cu.raw()) {
            *count += 1;
        }
    }

    /// Claim a slot
    pub fn acquire_slot(&mut self, slot: SlotIndex) -> Result<()> {
        self.slot_busy.set(slot.raw())
    }

    /// Give back a slot claimed for a submit that failed
    pub fn release_slot(&mut self, slot: SlotIndex) -> Result<()> {
        self.slot_busy.clear(slot.raw())
    }

    /// Record `cmd` as running in `slot` (and on `cu`)
    pub(crate) fn occupy(&mut self, slot: SlotIndex, cu: Option<CuIndex>, cmd: &Command) -> Result<()> {
        let entry = self.submitted.get_mut(slot.raw()).ok_or(Error::IndexOutOfRange {
            index: slot.raw(),
            len: self.num_slots,
        })?;
        *entry = Some(cmd.clone());
        cmd.mark_running(slot, cu);
        Ok(())
    }

    /// Retire the command occupying `slot`
    ///
    /// Releases the command's CU before its slot. A slot with no recorded
    /// command (a stale status bit) is ignored.
    pub(crate) fn complete_slot(&mut self, slot: SlotIndex) -> Result<Option<Command>> {
        let Some(cmd) = self.submitted.get_mut(slot.raw()).and_then(Option::take) else {
            return Ok(None);
        };

        if let Some(cu) = cmd.cu() {
            self.cu_busy.clear(cu.raw())?;
        }
        self.slot_busy.clear(slot.raw())?;
        cmd.mark_completed();

        log::debug!("command {} completed in slot {}", cmd.id(), slot);
        Ok(Some(cmd))
    }

    /// Forget every in-flight command and free all resources
    pub(crate) fn reset_inflight(&mut self) {
        self.submitted.iter_mut().for_each(|entry| *entry = None);
        self.slot_busy.clear_all();
        self.cu_busy.clear_all();
    }
}
