//! # Simulated Device
//!
//! An in-memory register file with just enough firmware behaviour to drive
//! the scheduler end to end without hardware.
//!
//! ## Model
//!
//! - Plain registers read back whatever was last written (zero otherwise).
//! - Completion status registers are clear-on-read. Tests raise bits with
//!   [`SimDevice::complete_slot`].
//! - A single-word write to the start of a queue slot is a header commit.
//!   A CONFIGURE header teaches the firmware the slot size and completes
//!   at once; any other header is recorded as a started slot.
//! - A single-word write with `START` set to a 256-byte aligned address
//!   outside the queue and CSR block launches a CU. Reading the CU control
//!   register clears `DONE`.
//! - Reads and writes can be made to fail a given number of times.

use hashbrown::{HashMap, HashSet};
use spin::Mutex;

use ember_core::{Error, Header, Opcode, Result, SlotIndex, STATUS_GROUPS, WORD_BYTES};

use crate::device::{word_offset, AddressSpace, DeviceCapability, RegisterAccess};
use crate::regs::{CuControl, ErtLayout, CQ_DOORBELL_OFFSET};

/// CU control registers sit on 256-byte boundaries
const CU_ADDR_ALIGN_MASK: u64 = 0xFF;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct SimState {
    regs: HashMap<u64, u32>,
    status: [u32; STATUS_GROUPS],
    slot_size: Option<u32>,
    firmware_silent: bool,
    started_slots: Vec<SlotIndex>,
    cu_bases: HashSet<u64>,
    started_cus: Vec<u64>,
    doorbells: Vec<(usize, u32)>,
    fail_reads: usize,
    fail_writes: usize,
    aux_cus: Vec<u32>,
}

/// Simulated accelerator
#[derive(Debug)]
pub struct SimDevice {
    layout: ErtLayout,
    state: Mutex<SimState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// Simulator with the default register layout
    pub fn new() -> Self {
        Self::with_layout(ErtLayout::default())
    }

    /// Simulator with a custom register layout
    pub fn with_layout(layout: ErtLayout) -> Self {
        Self {
            layout,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Expose auxiliary CUs at the given control addresses
    pub fn with_auxiliary_cus(self, addrs: &[u32]) -> Self {
        self.state.lock().aux_cus = addrs.to_vec();
        self
    }

    /// Stop answering CONFIGURE commands
    pub fn with_silent_firmware(self) -> Self {
        self.state.lock().firmware_silent = true;
        self
    }

    // =========================================================================
    // Test Controls
    // =========================================================================

    /// Raise the completion status bit of `slot`
    pub fn complete_slot(&self, slot: usize) {
        let slot = SlotIndex::new(slot);
        let mut state = self.state.lock();
        if let Some(word) = state.status.get_mut(slot.group()) {
            *word |= 1 << slot.bit();
        }
    }

    /// Raise arbitrary bits in a status group
    pub fn raise_status(&self, group: usize, bits: u32) {
        if let Some(word) = self.state.lock().status.get_mut(group) {
            *word |= bits;
        }
    }

    /// Finish the CU whose control register is at `base`
    pub fn complete_cu(&self, base: u64) {
        self.state
            .lock()
            .regs
            .insert(base, (CuControl::DONE | CuControl::IDLE).bits());
    }

    /// Overwrite a register
    pub fn set_register(&self, offset: u64, value: u32) {
        self.state.lock().regs.insert(offset, value);
    }

    /// Current register value, without read side effects
    pub fn register(&self, offset: u64) -> u32 {
        self.state.lock().regs.get(&offset).copied().unwrap_or(0)
    }

    /// Fail the next `count` write calls
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().fail_writes = count;
    }

    /// Fail the next `count` read calls
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().fail_reads = count;
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// Slots whose header was committed, in commit order
    pub fn started_slots(&self) -> Vec<SlotIndex> {
        self.state.lock().started_slots.clone()
    }

    /// CU control addresses that were started, in start order
    pub fn started_cus(&self) -> Vec<u64> {
        self.state.lock().started_cus.clone()
    }

    /// Doorbell writes as `(group, value)`
    pub fn doorbells(&self) -> Vec<(usize, u32)> {
        self.state.lock().doorbells.clone()
    }

    /// Slot size learned from CONFIGURE
    pub fn slot_size(&self) -> Option<u32> {
        self.state.lock().slot_size
    }

    // =========================================================================
    // Firmware Model
    // =========================================================================

    fn doorbell_group(&self, offset: u64) -> Option<usize> {
        let first = self.layout.cq_doorbell_register(0);
        if offset < first || (offset - first) % WORD_BYTES != 0 {
            return None;
        }
        let group = ((offset - first) / WORD_BYTES) as usize;
        (group < STATUS_GROUPS).then_some(group)
    }

    fn in_csr_block(&self, offset: u64) -> bool {
        let end = self.layout.csr_base + CQ_DOORBELL_OFFSET + STATUS_GROUPS as u64 * WORD_BYTES;
        offset >= self.layout.csr_base && offset < end
    }

    fn is_cu_control(&self, offset: u64) -> bool {
        offset & CU_ADDR_ALIGN_MASK == 0 && !self.in_csr_block(offset)
    }

    fn commit_header(&self, state: &mut SimState, offset: u64, word: u32) {
        let rel = offset - self.layout.cq_base;
        let header = Header::from_raw(word);

        if header.opcode() == Opcode::Configure {
            let slot_size = state.regs.get(&(offset + WORD_BYTES)).copied().unwrap_or(0);
            if slot_size == 0 || rel % slot_size as u64 != 0 {
                return;
            }
            let slot = SlotIndex::new((rel / slot_size as u64) as usize);
            if slot.group() >= STATUS_GROUPS {
                return;
            }
            log::debug!("sim: firmware configured, slot size {:#x}", slot_size);
            state.slot_size = Some(slot_size);
            state.started_slots.push(slot);
            if !state.firmware_silent {
                state.status[slot.group()] |= 1 << slot.bit();
            }
            return;
        }

        if let Some(slot_size) = state.slot_size {
            if rel % slot_size as u64 == 0 {
                state.started_slots.push(SlotIndex::new((rel / slot_size as u64) as usize));
            }
        }
    }

    fn read_word(&self, state: &mut SimState, offset: u64) -> u32 {
        if let Some(group) = self.layout.status_group_at(offset) {
            return core::mem::take(&mut state.status[group]);
        }

        let value = state.regs.get(&offset).copied().unwrap_or(0);
        if state.cu_bases.contains(&offset) {
            state.regs.insert(offset, value & !CuControl::DONE.bits());
        }
        value
    }
}

impl RegisterAccess for SimDevice {
    fn read(&self, _space: AddressSpace, offset: u64, buf: &mut [u32]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(Error::RegisterRead { offset });
        }

        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read_word(&mut state, word_offset(offset, i));
        }
        Ok(())
    }

    fn write(&self, _space: AddressSpace, offset: u64, data: &[u32]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Error::RegisterWrite { offset });
        }

        for (i, &word) in data.iter().enumerate() {
            state.regs.insert(word_offset(offset, i), word);
        }

        if let &[word] = data {
            if self.layout.in_queue(offset) {
                self.commit_header(&mut state, offset, word);
            } else if let Some(group) = self.doorbell_group(offset) {
                state.doorbells.push((group, word));
            } else if self.is_cu_control(offset) && word & CuControl::START.bits() != 0 {
                state.cu_bases.insert(offset);
                state.started_cus.push(offset);
            }
        }
        Ok(())
    }
}

impl DeviceCapability for SimDevice {
    fn auxiliary_cu(&self, index: usize) -> Option<u32> {
        self.state.lock().aux_cus.get(index).copied()
    }
}
