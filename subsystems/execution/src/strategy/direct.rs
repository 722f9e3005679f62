//! Direct submission: the host writes CU register maps and toggles the
//! start bit itself. Slots are bookkeeping only and never touch the queue.

use ember_core::{Opcode, Result};
use ember_hal::regs::{CU_ARG_OFFSET, EXEC_WRITE_SKIP};
use ember_hal::{AddressSpace, CuControl, Device};

use super::{SubmissionStrategy, SubmitOutcome};
use crate::command::Command;
use crate::context::ExecutionContext;
use crate::interrupt::InterruptLatch;

const KC: AddressSpace = AddressSpace::KernelControl;

/// Host-driven CU control
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStrategy;

impl SubmissionStrategy for DirectStrategy {
    fn submit(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
    ) -> Result<SubmitOutcome> {
        if !ctx.is_configured() {
            return Ok(SubmitOutcome::NotSubmitted);
        }

        if !cmd.is_cu_invocation() {
            let Some(slot) = ctx.free_slot() else {
                return Ok(SubmitOutcome::NotSubmitted);
            };
            ctx.acquire_slot(slot)?;
            ctx.occupy(slot, None, cmd)?;
            log::debug!("control command {} ({:?}) in slot {}", cmd.id(), cmd.opcode(), slot);
            return Ok(SubmitOutcome::Submitted);
        }

        let (opcode, masks, regmap) =
            cmd.with_packet(|p| (p.opcode(), p.cu_masks().to_vec(), p.regmap().to_vec()));

        // Nothing is claimed until both resources are known to be free
        let Some(cu) = ctx.free_cu(&masks) else {
            return Ok(SubmitOutcome::NotSubmitted);
        };
        let Some(slot) = ctx.free_slot() else {
            return Ok(SubmitOutcome::NotSubmitted);
        };
        let base = ctx.cu_address(cu)?;

        ctx.acquire_cu(cu)?;
        if let Err(err) = start_cu(device, base, opcode, &regmap) {
            ctx.release_cu(cu)?;
            return Err(err);
        }
        ctx.record_cu_use(cu);
        ctx.acquire_slot(slot)?;
        ctx.occupy(slot, Some(cu), cmd)?;

        log::debug!("command {} started on CU {} at {:#x}", cmd.id(), cu, base);
        Ok(SubmitOutcome::Submitted)
    }

    fn query(
        &self,
        ctx: &mut ExecutionContext,
        device: &dyn Device,
        cmd: &Command,
        _latch: &InterruptLatch,
    ) -> Result<()> {
        let Some(slot) = cmd.slot() else {
            return Ok(());
        };

        if let Some(cu) = cmd.cu() {
            let base = ctx.cu_address(cu)?;
            let ctrl = CuControl::from_bits_truncate(device.read32(KC, base)?);
            // IDLE without DONE is not a completion
            if !ctrl.contains(CuControl::DONE) {
                return Ok(());
            }
        } else if cmd.opcode() == Opcode::CuStat {
            let usage = ctx.cu_usage();
            cmd.with_packet_mut(|p| {
                for (word, &count) in p.payload_mut().iter_mut().zip(usage) {
                    *word = count as u32;
                }
            });
        }

        ctx.complete_slot(slot)?;
        Ok(())
    }
}

/// Program a CU's register map and set its start bit
fn start_cu(device: &dyn Device, base: u64, opcode: Opcode, regmap: &[u32]) -> Result<()> {
    match opcode {
        Opcode::ExecWrite => {
            if let Some(pairs) = regmap.get(EXEC_WRITE_SKIP..) {
                device.write_pairs(KC, base, pairs)?;
            }
        },
        _ => {
            // regmap[0] shadows the control register
            if let Some(args) = regmap.get(1..).filter(|args| !args.is_empty()) {
                device.write(KC, base + CU_ARG_OFFSET, args)?;
            }
        },
    }
    device.write32(KC, base, CuControl::START.bits())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{CommandId, CommandState, CommandType, ConfigurePacket, CuIndex, Packet};
    use ember_hal::SimDevice;

    use super::*;
    use crate::command::CommandShared;
    use crate::config::SchedulerConfig;

    const CU0: u64 = 0x1000_0000;
    const CU1: u64 = 0x1001_0000;

    fn configured(sim: &SimDevice) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(&SchedulerConfig::default());
        let packet = ConfigurePacket::new(0x1000)
            .with_cus(&[CU0 as u32, CU1 as u32])
            .to_packet()
            .unwrap();
        ctx.configure(&packet, sim).unwrap();
        ctx
    }

    fn queued(id: u64, packet: Packet) -> Command {
        let cmd = Arc::new(CommandShared::new(CommandId::new(id), packet));
        cmd.mark_queued();
        cmd
    }

    #[test]
    fn test_unconfigured_not_submitted() {
        let sim = SimDevice::new();
        let mut ctx = ExecutionContext::new(&SchedulerConfig::default());
        let cmd = queued(1, Packet::start_cu(&[1], &[0]).unwrap());
        assert_eq!(
            DirectStrategy.submit(&mut ctx, &sim, &cmd).unwrap(),
            SubmitOutcome::NotSubmitted
        );
    }

    #[test]
    fn test_start_cu_writes_regmap() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);
        let cmd = queued(1, Packet::start_cu(&[0b10], &[0, 0x11, 0x22]).unwrap());

        DirectStrategy.submit(&mut ctx, &sim, &cmd).unwrap();
        assert_eq!(cmd.cu(), Some(CuIndex::new(1)));
        assert_eq!(sim.register(CU1 + 4), 0x11);
        assert_eq!(sim.register(CU1 + 8), 0x22);
        assert_eq!(sim.started_cus(), vec![CU1]);
        assert_eq!(ctx.cu_usage(), &[0, 1]);
    }

    #[test]
    fn test_exec_write_pairs() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);
        let regmap = [0, 0, 0, 0, 0x10, 0xAB, 0x18, 0xCD];
        let cmd = queued(1, Packet::exec_write(&[0b01], &regmap).unwrap());

        DirectStrategy.submit(&mut ctx, &sim, &cmd).unwrap();
        assert_eq!(sim.register(CU0 + 0x10), 0xAB);
        assert_eq!(sim.register(CU0 + 0x18), 0xCD);
        assert_eq!(sim.started_cus(), vec![CU0]);
    }

    #[test]
    fn test_idle_is_not_done() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);
        let latch = InterruptLatch::default();
        let cmd = queued(1, Packet::start_cu(&[0b01], &[0]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &cmd).unwrap();

        sim.set_register(CU0, CuControl::IDLE.bits());
        DirectStrategy.query(&mut ctx, &sim, &cmd, &latch).unwrap();
        assert_eq!(cmd.state(), CommandState::Running);

        sim.complete_cu(CU0);
        DirectStrategy.query(&mut ctx, &sim, &cmd, &latch).unwrap();
        assert!(cmd.is_completed());
        assert_eq!(ctx.cu_busy().count_set(), 0);
        assert_eq!(ctx.slot_busy().count_set(), 0);
    }

    #[test]
    fn test_failed_start_releases_cu() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);
        let cmd = queued(1, Packet::start_cu(&[0b01], &[0, 5]).unwrap());

        sim.fail_next_writes(1);
        assert!(DirectStrategy.submit(&mut ctx, &sim, &cmd).is_err());
        assert_eq!(cmd.state(), CommandState::Queued);
        assert_eq!(ctx.cu_busy().count_set(), 0);
        assert_eq!(ctx.slot_busy().count_set(), 0);
        assert_eq!(ctx.cu_usage(), &[0, 0]);
    }

    #[test]
    fn test_cu_stat_reports_usage() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);
        let latch = InterruptLatch::default();

        let start = queued(1, Packet::start_cu(&[0b10], &[0]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &start).unwrap();

        let stat = queued(2, Packet::new(Opcode::CuStat, CommandType::Ctrl, &[9, 9]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &stat).unwrap();
        DirectStrategy.query(&mut ctx, &sim, &stat, &latch).unwrap();

        assert!(stat.is_completed());
        assert_eq!(stat.with_packet(|p| p.payload().to_vec()), vec![0, 1]);
    }

    #[test]
    fn test_copy_engine_only_runs_when_masked() {
        const COPY_CU: u64 = 0x2000_0000;
        let sim = SimDevice::new().with_auxiliary_cus(&[COPY_CU as u32]);
        let mut ctx = configured(&sim);
        let latch = InterruptLatch::default();
        assert_eq!(ctx.cu_count(), 3);

        // a copy packet is moved, not interpreted
        let copy = queued(1, Packet::new(Opcode::StartCopyBo, CommandType::Ctrl, &[0; 4]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &copy).unwrap();
        DirectStrategy.query(&mut ctx, &sim, &copy, &latch).unwrap();
        assert!(copy.is_completed());
        assert_eq!(copy.cu(), None);
        assert!(sim.started_cus().is_empty());

        let routed = queued(2, Packet::start_cu(&[0b100], &[0, 0x40]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &routed).unwrap();
        assert_eq!(routed.cu(), Some(CuIndex::new(2)));
        assert_eq!(sim.started_cus(), vec![COPY_CU]);
        assert_eq!(sim.register(COPY_CU + 4), 0x40);
    }

    #[test]
    fn test_ineligible_free_cu_not_used() {
        let sim = SimDevice::new();
        let mut ctx = configured(&sim);

        let first = queued(1, Packet::start_cu(&[0b10], &[0]).unwrap());
        let second = queued(2, Packet::start_cu(&[0b10], &[0]).unwrap());
        DirectStrategy.submit(&mut ctx, &sim, &first).unwrap();

        assert_eq!(
            DirectStrategy.submit(&mut ctx, &sim, &second).unwrap(),
            SubmitOutcome::NotSubmitted
        );
        assert_eq!(ctx.cu_busy().count_set(), 1);
        assert_eq!(ctx.slot_busy().count_set(), 1);
    }
}
