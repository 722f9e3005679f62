//! # Scheduler
//!
//! Public face of the execution subsystem: one scheduler per attached
//! device.
//!
//! ```text
//!  producer threads                     worker thread ("ember-sched")
//!  ────────────────                     ─────────────────────────────
//!  enqueue() ──▶ pending (parking_lot) ──▶ core (parking_lot): context + working
//!       │                    ▲                      │
//!       └── wake.notify ─────┘                      ├──▶ device registers
//!                                                   └──▶ waiters.notify()
//! ```
//!
//! The worker sleeps on `wake` for at most the poll interval between passes,
//! so a lost notification only costs latency.
//!
//! `stopped` and `halted` only flip while the pending lock is held, and
//! `enqueue` checks them under that same lock. Once either is set no new
//! command can reach the pending list.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use ember_core::{CommandId, Error, Packet, Result};
use ember_hal::Device;

use crate::command::{Command, CommandHandle, CommandShared};
use crate::config::SchedulerConfig;
use crate::context::SubmissionMode;
use crate::interrupt::InterruptLatch;
use crate::waiter::{ClientHandle, WaiterRegistry};
use crate::worker::{SchedulerCore, SchedulerStats};

/// Worker thread name
pub const WORKER_THREAD_NAME: &str = "ember-sched";

// =============================================================================
// SHARED STATE
// =============================================================================

struct SchedulerShared {
    device: Arc<dyn Device>,
    config: SchedulerConfig,
    pending: Mutex<Vec<Command>>,
    wake: Condvar,
    stopped: AtomicBool,
    halted: AtomicBool,
    next_id: AtomicU64,
    core: Mutex<SchedulerCore>,
    interrupts: InterruptLatch,
    waiters: Arc<WaiterRegistry>,
}

impl SchedulerShared {
    /// Drain pending commands and run one pass
    fn iterate(&self) -> Result<usize> {
        let mut state = self.core.lock();
        let arrived = std::mem::take(&mut *self.pending.lock());
        state.admit(arrived);

        let result = state.run_pass(self.device.as_ref(), &self.interrupts, &self.waiters);
        if result.as_ref().is_err_and(Error::is_fatal) {
            let _pending = self.pending.lock();
            self.halted.store(true, Ordering::Release);
            self.wake.notify_all();
        }
        result
    }

    /// Whether new commands may join the pending list
    fn accepting(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if self.halted.load(Ordering::Acquire) {
            return Err(Error::ContextHalted);
        }
        Ok(())
    }

    fn worker_loop(&self) {
        log::info!("scheduler worker started");

        while !self.stopped.load(Ordering::Acquire) {
            if let Err(err) = self.iterate() {
                log::error!("scheduler worker exiting: {}", err);
                break;
            }

            let mut pending = self.pending.lock();
            if pending.is_empty() && !self.stopped.load(Ordering::Acquire) {
                self.wake.wait_for(&mut pending, self.config.poll_interval);
            }
        }

        log::info!("scheduler worker stopped");
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Command scheduler for one device
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Attach a scheduler to `device`
    ///
    /// The execution context stays unconfigured until the first CONFIGURE
    /// command is processed.
    pub fn attach(device: Arc<dyn Device>, config: SchedulerConfig) -> Self {
        log::info!("attaching scheduler, poll interval {:?}", config.poll_interval);
        Self {
            shared: Arc::new(SchedulerShared {
                device,
                config,
                pending: Mutex::new(Vec::new()),
                wake: Condvar::new(),
                stopped: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                core: Mutex::new(SchedulerCore::new(&config)),
                interrupts: InterruptLatch::default(),
                waiters: Arc::new(WaiterRegistry::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Hand a command to the scheduler
    pub fn enqueue(&self, packet: Packet) -> Result<CommandHandle> {
        packet.validate()?;

        let mut pending = self.shared.pending.lock();
        self.shared.accepting()?;

        let id = CommandId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let cmd = Arc::new(CommandShared::new(id, packet));
        pending.push(cmd.clone());
        drop(pending);
        self.shared.wake.notify_one();

        log::trace!("enqueued command {}", id);
        Ok(CommandHandle(cmd))
    }

    /// Hand a raw packet buffer to the scheduler
    pub fn enqueue_words(&self, words: Vec<u32>) -> Result<CommandHandle> {
        self.enqueue(Packet::from_words(words)?)
    }

    /// Record a completion interrupt for status group `group`
    pub fn signal_interrupt(&self, group: usize) -> Result<()> {
        self.shared.interrupts.raise(group)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Register a completion waiter
    pub fn register_client(&self) -> ClientHandle {
        self.shared.waiters.register()
    }

    /// Completions since attach; grows by one per retired command
    pub fn waiter_notification_counter(&self) -> u64 {
        self.shared.waiters.total()
    }

    // =========================================================================
    // Worker
    // =========================================================================

    /// Run one scheduler pass on the calling thread
    ///
    /// Returns the number of commands retired.
    pub fn run_once(&self) -> Result<usize> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        self.shared.iterate()
    }

    /// Spawn the background worker
    pub fn start(&self) -> Result<()> {
        self.shared.accepting()?;

        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(Error::AlreadyRunning);
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                log::error!("scheduler worker panicked");
            }
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || shared.worker_loop())
            .map_err(|err| {
                log::error!("cannot spawn scheduler worker: {}", err);
                Error::SpawnFailed
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and drop every outstanding command
    ///
    /// Later calls to [`enqueue`](Self::enqueue) fail with
    /// [`Error::Stopped`]. Calling `stop` again has no effect.
    pub fn stop(&self) {
        {
            let _pending = self.shared.pending.lock();
            if self.shared.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("scheduler worker panicked");
            }
        }

        let mut state = self.shared.core.lock();
        let pending = std::mem::take(&mut *self.shared.pending.lock());
        let dropped = state.drain() + pending.len();
        log::info!("scheduler stopped, {} commands dropped", dropped);
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Commands not yet retired: pending plus working queue
    pub fn command_count(&self) -> usize {
        let state = self.shared.core.lock();
        state.working.len() + self.shared.pending.lock().len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> SchedulerStats {
        self.shared.core.lock().stats()
    }

    /// Whether a CONFIGURE has been applied
    pub fn is_configured(&self) -> bool {
        self.shared.core.lock().context.is_configured()
    }

    /// Active submission mode
    pub fn submission_mode(&self) -> SubmissionMode {
        self.shared.core.lock().context.mode()
    }

    /// Whether a logic error halted the context
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::Acquire)
    }

    /// Whether the background worker is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("stopped", &self.shared.stopped.load(Ordering::Relaxed))
            .field("halted", &self.shared.halted.load(Ordering::Relaxed))
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
