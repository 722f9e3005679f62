//! # Worker Pass
//!
//! One iteration of the scheduler:
//!
//! ```text
//!   pending ──drain──▶ working queue (FIFO)
//!                        │
//!                        ├─ QUEUED  ──submit──▶ RUNNING   (or stays QUEUED)
//!                        ├─ RUNNING ──query───▶ COMPLETED (or stays RUNNING)
//!                        └─ COMPLETED ──▶ removed, waiters notified
//! ```
//!
//! Transient device errors are logged and the pass moves on to the next
//! command. A logic error stops the pass and halts the context.

use std::collections::VecDeque;

use ember_core::{CommandState, Error, Opcode, Result};
use ember_hal::Device;

use crate::command::Command;
use crate::config::SchedulerConfig;
use crate::context::{ConfigureOutcome, ExecutionContext};
use crate::interrupt::InterruptLatch;
use crate::strategy::{strategy_for, SubmitOutcome};
use crate::waiter::WaiterRegistry;

// =============================================================================
// STATISTICS
// =============================================================================

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Commands moved to RUNNING
    pub submitted: u64,
    /// Commands retired
    pub completed: u64,
    /// Submit attempts that found no free resource
    pub retries: u64,
    /// Transient register access failures
    pub io_failures: u64,
    /// Completed worker passes
    pub passes: u64,
    /// Per-CU dispatch counters
    pub cu_usage: Vec<u64>,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    retries: u64,
    io_failures: u64,
    passes: u64,
}

// =============================================================================
// SCHEDULER CORE
// =============================================================================

/// Worker-owned state: the context and the working queue
#[derive(Debug)]
pub(crate) struct SchedulerCore {
    pub(crate) context: ExecutionContext,
    pub(crate) working: VecDeque<Command>,
    counters: Counters,
}

impl SchedulerCore {
    pub(crate) fn new(config: &SchedulerConfig) -> Self {
        Self {
            context: ExecutionContext::new(config),
            working: VecDeque::new(),
            counters: Counters::default(),
        }
    }

    /// Take ownership of newly enqueued commands
    pub(crate) fn admit(&mut self, commands: impl IntoIterator<Item = Command>) {
        for cmd in commands {
            cmd.mark_queued();
            self.working.push_back(cmd);
        }
    }

    /// Advance every command by at most one transition
    ///
    /// Returns the number of commands retired.
    pub(crate) fn run_pass(
        &mut self,
        device: &dyn Device,
        latch: &InterruptLatch,
        waiters: &WaiterRegistry,
    ) -> Result<usize> {
        if self.context.is_halted() {
            return Err(Error::ContextHalted);
        }

        let mut fatal = None;
        for cmd in &self.working {
            match advance(&mut self.context, &mut self.counters, device, latch, cmd) {
                Ok(()) => {},
                Err(err) if err.is_transient() => {
                    self.counters.io_failures += 1;
                    log::warn!("command {}: {}, retrying next pass", cmd.id(), err);
                },
                Err(err) => {
                    log::error!("command {}: {}, halting context", cmd.id(), err);
                    fatal = Some(err);
                    break;
                },
            }
        }

        let before = self.working.len();
        self.working.retain(|cmd| !cmd.is_completed());
        let retired = before - self.working.len();

        self.counters.completed += retired as u64;
        self.counters.passes += 1;
        waiters.notify(retired as u64);

        if let Some(err) = fatal {
            self.context.halt();
            return Err(err);
        }
        Ok(retired)
    }

    /// Drop every queued and in-flight command
    pub(crate) fn drain(&mut self) -> usize {
        let dropped = self.working.len();
        self.working.clear();
        self.context.reset_inflight();
        dropped
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted,
            completed: self.counters.completed,
            retries: self.counters.retries,
            io_failures: self.counters.io_failures,
            passes: self.counters.passes,
            cu_usage: self.context.cu_usage().to_vec(),
        }
    }
}

fn advance(
    ctx: &mut ExecutionContext,
    counters: &mut Counters,
    device: &dyn Device,
    latch: &InterruptLatch,
    cmd: &Command,
) -> Result<()> {
    if cmd.state() == CommandState::Queued {
        if cmd.opcode() == Opcode::Configure {
            let outcome = cmd.with_packet(|p| ctx.configure(p, device))?;
            if outcome == ConfigureOutcome::AlreadyConfigured {
                log::debug!("command {}: repeated CONFIGURE has no effect", cmd.id());
            }
        }

        match strategy_for(ctx.mode()).submit(ctx, device, cmd)? {
            SubmitOutcome::Submitted => counters.submitted += 1,
            SubmitOutcome::NotSubmitted => {
                counters.retries += 1;
                return Ok(());
            },
        }
    }

    if cmd.state() == CommandState::Running {
        strategy_for(ctx.mode()).query(ctx, device, cmd, latch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{CommandId, CommandType, ConfigureFeatures, ConfigurePacket, Packet};
    use ember_hal::SimDevice;

    use super::*;
    use crate::command::CommandShared;

    struct Harness {
        sim: SimDevice,
        core: SchedulerCore,
        latch: InterruptLatch,
        waiters: Arc<WaiterRegistry>,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                sim: SimDevice::new(),
                core: SchedulerCore::new(&SchedulerConfig::default()),
                latch: InterruptLatch::default(),
                waiters: Arc::new(WaiterRegistry::default()),
                next_id: 0,
            }
        }

        fn push(&mut self, packet: Packet) -> Command {
            self.next_id += 1;
            let cmd = Arc::new(CommandShared::new(CommandId::new(self.next_id), packet));
            self.core.admit([cmd.clone()]);
            cmd
        }

        fn pass(&mut self) -> Result<usize> {
            self.core.run_pass(&self.sim, &self.latch, &self.waiters)
        }

        fn running(&self) -> usize {
            self.core
                .working
                .iter()
                .filter(|c| c.state() == CommandState::Running)
                .count()
        }
    }

    fn configure(slot_size: u32, cus: &[u32], features: ConfigureFeatures) -> Packet {
        ConfigurePacket::new(slot_size)
            .with_cus(cus)
            .with_features(features)
            .to_packet()
            .unwrap()
    }

    fn control() -> Packet {
        Packet::new(Opcode::StartCopyBo, CommandType::Ctrl, &[0, 0]).unwrap()
    }

    #[test]
    fn test_commands_wait_for_configure() {
        let mut h = Harness::new();
        let cmd = h.push(control());
        h.pass().unwrap();
        assert_eq!(cmd.state(), CommandState::Queued);

        // the CONFIGURE arrives behind the waiting command
        h.push(configure(0x1000, &[], ConfigureFeatures::empty()));
        assert_eq!(h.pass().unwrap(), 1);
        assert_eq!(cmd.state(), CommandState::Queued);

        // direct mode control commands finish in the pass they start
        assert_eq!(h.pass().unwrap(), 1);
        assert!(cmd.is_completed());
        assert!(h.core.working.is_empty());
        assert_eq!(h.waiters.total(), 2);
    }

    #[test]
    fn test_embedded_five_commands_four_slots() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        let config = h.push(configure(0x4000, &[], features));
        assert_eq!(h.pass().unwrap(), 1);
        assert!(config.is_completed());
        assert_eq!(h.core.context.num_slots(), 4);

        let cmds: Vec<_> = (0..5).map(|_| h.push(control())).collect();
        h.pass().unwrap();
        for (i, cmd) in cmds.iter().take(4).enumerate() {
            assert_eq!(cmd.state(), CommandState::Running);
            assert_eq!(cmd.slot().map(|s| s.raw()), Some(i));
        }
        assert_eq!(cmds[4].state(), CommandState::Queued);
        assert_eq!(h.core.context.slot_busy().count_set(), h.running());

        h.sim.complete_slot(2);
        assert_eq!(h.pass().unwrap(), 1);
        assert!(cmds[2].is_completed());
        assert_eq!(cmds[4].slot().map(|s| s.raw()), Some(2));
        assert_eq!(h.core.context.slot_busy().count_set(), h.running());
        assert_eq!(h.core.working.len(), 4);
    }

    #[test]
    fn test_status_bits_complete_together() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();

        let cmds: Vec<_> = (0..3).map(|_| h.push(control())).collect();
        h.pass().unwrap();
        let before = h.waiters.total();

        h.sim.raise_status(0, 0b101);
        assert_eq!(h.pass().unwrap(), 2);
        assert!(cmds[0].is_completed());
        assert_eq!(cmds[1].state(), CommandState::Running);
        assert!(cmds[2].is_completed());
        assert_eq!(h.waiters.total(), before + 2);
    }

    #[test]
    fn test_direct_eligibility_mask() {
        let mut h = Harness::new();
        let (cu0, cu1) = (0x1000_0000u32, 0x1001_0000u32);
        h.push(configure(0x1000, &[cu0, cu1], ConfigureFeatures::empty()));
        h.pass().unwrap();

        let first = h.push(Packet::start_cu(&[0b10], &[0]).unwrap());
        let second = h.push(Packet::start_cu(&[0b10], &[0]).unwrap());
        h.pass().unwrap();
        assert_eq!(first.cu().map(|c| c.raw()), Some(1));
        assert_eq!(second.state(), CommandState::Queued);
        assert!(!h.core.context.cu_busy().is_set(0).unwrap());

        h.sim.complete_cu(u64::from(cu1));
        h.pass().unwrap();
        assert!(first.is_completed());
        assert_eq!(second.cu().map(|c| c.raw()), Some(1));
        assert_eq!(h.core.context.cu_busy().count_set(), 1);
        assert_eq!(h.core.stats().cu_usage, vec![0, 2]);
    }

    #[test]
    fn test_transient_write_failure_retried() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();

        let cmd = h.push(control());
        h.sim.fail_next_writes(1);
        assert_eq!(h.pass().unwrap(), 0);
        assert_eq!(cmd.state(), CommandState::Queued);
        assert_eq!(h.core.context.slot_busy().count_set(), 0);
        assert_eq!(h.core.stats().io_failures, 1);

        h.pass().unwrap();
        assert_eq!(cmd.state(), CommandState::Running);
        assert_eq!(cmd.slot().map(|s| s.raw()), Some(0));
    }

    #[test]
    fn test_transient_failure_does_not_stop_pass() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();

        let first = h.push(control());
        let second = h.push(control());
        h.sim.fail_next_writes(1);
        h.pass().unwrap();
        assert_eq!(first.state(), CommandState::Queued);
        assert_eq!(second.state(), CommandState::Running);
    }

    #[test]
    fn test_configure_timeout_is_transient() {
        let mut h = Harness::new();
        h.sim = SimDevice::new().with_silent_firmware();
        h.core = SchedulerCore::new(&SchedulerConfig::default().with_configure_spin_limit(8));

        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        let config = h.push(configure(0x1000, &[], features));
        assert_eq!(h.pass().unwrap(), 0);
        assert_eq!(config.state(), CommandState::Running);
        assert_eq!(h.core.stats().io_failures, 1);

        h.sim.complete_slot(0);
        assert_eq!(h.pass().unwrap(), 1);
        assert!(config.is_completed());
    }

    #[test]
    fn test_interrupt_mode_reads_only_after_signal() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::CQ_INT;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();
        assert!(!h.core.context.is_polling());

        let cmd = h.push(control());
        h.pass().unwrap();
        assert_eq!(h.sim.doorbells().last(), Some(&(0, 1)));

        h.sim.complete_slot(0);
        h.pass().unwrap();
        assert_eq!(cmd.state(), CommandState::Running);

        h.latch.raise(0).unwrap();
        h.pass().unwrap();
        assert!(cmd.is_completed());
    }

    #[test]
    fn test_logic_error_halts_context() {
        let mut h = Harness::new();
        let cu0 = 0x1000_0000u32;
        h.push(configure(0x1000, &[cu0], ConfigureFeatures::empty()));
        h.pass().unwrap();

        let cmd = h.push(Packet::start_cu(&[1], &[0]).unwrap());
        h.pass().unwrap();
        assert_eq!(cmd.state(), CommandState::Running);

        // CU bookkeeping lost behind the scheduler's back
        h.core.context.cu_busy_mut().clear(0).unwrap();
        h.sim.complete_cu(u64::from(cu0));

        assert_eq!(h.pass(), Err(Error::NotHeld { index: 0 }));
        assert!(h.core.context.is_halted());
        assert_eq!(h.pass(), Err(Error::ContextHalted));
    }

    #[test]
    fn test_packet_too_large_halts() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x20, &[], features));
        h.pass().unwrap();

        h.push(Packet::new(Opcode::StartCopyBo, CommandType::Ctrl, &[0; 10]).unwrap());
        assert_eq!(
            h.pass(),
            Err(Error::PacketTooLarge {
                bytes: 44,
                slot_size: 0x20
            })
        );
        assert!(h.core.context.is_halted());
    }

    #[test]
    fn test_kds_local_runs_on_host() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();
        let commits = h.sim.started_slots().len();

        let cmd = h.push(Packet::new(Opcode::CuStat, CommandType::KdsLocal, &[0]).unwrap());
        h.pass().unwrap();
        assert!(cmd.is_completed());
        assert_eq!(h.sim.started_slots().len(), commits);
    }

    #[test]
    fn test_drain_releases_everything() {
        let mut h = Harness::new();
        let features = ConfigureFeatures::ERT | ConfigureFeatures::POLLING;
        h.push(configure(0x1000, &[], features));
        h.pass().unwrap();
        h.push(control());
        h.push(control());
        h.pass().unwrap();

        assert_eq!(h.core.drain(), 2);
        assert_eq!(h.core.context.slot_busy().count_set(), 0);
    }
}
