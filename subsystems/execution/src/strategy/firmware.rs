//! Embedded-firmware submission: packets go into command-queue slots and
//! the firmware reports completion through the status registers.

use ember_core::{
    index_of, CommandState, CommandType, Error, Header, Opcode, Result, SlotIndex, WORD_BYTES,
};
use ember_hal::{AddressSpace, Device};

use super::{DirectStrategy, SubmissionStrategy, SubmitOutcome};
use crate::command::Command;
use crate::context::ExecutionContext;
use crate::interrupt::InterruptLatch;

const KC: AddressSpace = AddressSpace::KernelControl;

/// Firmware-scheduled command queue
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareStrategy;

impl SubmissionStrategy for FirmwareStrategy {
    fn submit(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
    ) -> Result<SubmitOutcome> {
        // Host-local commands never reach the firmware
        if cmd.kind() == CommandType::KdsLocal {
            return DirectStrategy.submit(ctx, device, cmd);
        }

        let Some(slot) = ctx.free_slot() else {
            return Ok(SubmitOutcome::NotSubmitted);
        };

        let slot_size = ctx.slot_size();
        let (bytes, words) = cmd.with_packet(|p| (p.byte_len(), p.words().to_vec()));
        if bytes > u64::from(slot_size) {
            return Err(Error::PacketTooLarge { bytes, slot_size });
        }

        let offset = ctx.layout().slot_offset(slot, slot_size);
        let header = Header::from_raw(words[0]).with_state(CommandState::New);

        ctx.acquire_slot(slot)?;
        if let Err(err) = write_packet(device, offset, header, &words[1..]) {
            ctx.release_slot(slot)?;
            return Err(err);
        }
        ctx.occupy(slot, None, cmd)?;

        if ctx.interrupts_enabled() {
            let doorbell = ctx.layout().cq_doorbell_register(slot.group());
            if let Err(err) = device.write32(KC, doorbell, 1 << slot.bit()) {
                // The header is committed; the firmware still finds it by polling
                log::warn!("doorbell for slot {} failed: {}", slot, err);
            }
        }

        log::debug!("command {} ({:?}) written to slot {}", cmd.id(), cmd.opcode(), slot);
        Ok(SubmitOutcome::Submitted)
    }

    fn query(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
        latch: &InterruptLatch,
    ) -> Result<()> {
        if cmd.kind() == CommandType::KdsLocal {
            return DirectStrategy.query(ctx, device, cmd, latch);
        }

        let Some(slot) = cmd.slot() else {
            return Ok(());
        };
        let group = slot.group();
        let configure = cmd.opcode() == Opcode::Configure;

        if !(ctx.is_polling() || configure || latch.take(group)) {
            return Ok(());
        }

        if let Err(err) = drain_status(ctx, device, group) {
            if !ctx.is_polling() {
                let _ = latch.raise(group);
            }
            return Err(err);
        }

        // Later sizing depends on the CONFIGURE result, so wait for it here
        if configure {
            let mut spins = 0;
            while !cmd.is_completed() {
                if spins >= ctx.configure_spin_limit() {
                    log::warn!("no CONFIGURE response after {} status reads", spins);
                    return Err(Error::ConfigureTimeout);
                }
                spins += 1;
                core::hint::spin_loop();
                drain_status(ctx, device, group)?;
            }
        }

        Ok(())
    }
}

/// Body first, header last: the header write hands the slot to the firmware
fn write_packet(device: &dyn Device, offset: u64, header: Header, body: &[u32]) -> Result<()> {
    if !body.is_empty() {
        device.write(KC, offset + WORD_BYTES, body)?;
    }
    device.write32(KC, offset, header.raw())
}

/// Read a clear-on-read status group and retire every reported slot
fn drain_status(ctx: &mut ExecutionContext, device: &dyn Device, group: usize) -> Result<()> {
    let mut bits = device.read32(KC, ctx.layout().status_register(group))?;

    while bits != 0 {
        let slot = SlotIndex::new(index_of(group, bits.trailing_zeros() as usize));
        bits &= bits - 1;

        if slot.raw() >= ctx.num_slots() {
            log::trace!("ignoring status bit for unconfigured slot {}", slot);
            continue;
        }
        ctx.complete_slot(slot)?;
    }
    Ok(())
}
