//! # Commands
//!
//! One submitted job and the handle its producer keeps.
//!
//! ```text
//!   enqueue()           drain            submit            query
//!  ──────────▶  NEW  ─────────▶ QUEUED ─────────▶ RUNNING ─────────▶ COMPLETED
//!                                  ▲                 │
//!                                  └─ not submitted ─┘ (stays QUEUED)
//! ```
//!
//! The command is shared between the working queue and the producer's
//! [`CommandHandle`]. Only the worker changes its state.

use std::sync::Arc;

use spin::Mutex;

use ember_core::{CommandId, CommandState, CommandType, CuIndex, Opcode, Packet, SlotIndex};

/// Worker-side reference to a command
pub(crate) type Command = Arc<CommandShared>;

#[derive(Debug)]
struct CommandInner {
    packet: Packet,
    state: CommandState,
    slot: Option<SlotIndex>,
    cu: Option<CuIndex>,
}

/// State shared by the worker and the producer handle
#[derive(Debug)]
pub struct CommandShared {
    id: CommandId,
    opcode: Opcode,
    inner: Mutex<CommandInner>,
}

impl CommandShared {
    pub(crate) fn new(id: CommandId, mut packet: Packet) -> Self {
        packet.set_state(CommandState::New);
        Self {
            id,
            opcode: packet.opcode(),
            inner: Mutex::new(CommandInner {
                packet,
                state: CommandState::New,
                slot: None,
                cu: None,
            }),
        }
    }

    /// Command id
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Packet opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Current command type (may be rewritten on drain)
    pub fn kind(&self) -> CommandType {
        self.inner.lock().packet.kind()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandState {
        self.inner.lock().state
    }

    /// Whether the command has finished
    pub fn is_completed(&self) -> bool {
        self.state() == CommandState::Completed
    }

    /// Slot held while running
    pub fn slot(&self) -> Option<SlotIndex> {
        self.inner.lock().slot
    }

    /// CU held while running
    pub fn cu(&self) -> Option<CuIndex> {
        self.inner.lock().cu
    }

    /// Whether the command launches a compute unit
    pub fn is_cu_invocation(&self) -> bool {
        self.inner.lock().packet.is_cu_invocation()
    }

    pub(crate) fn with_packet<R>(&self, f: impl FnOnce(&Packet) -> R) -> R {
        f(&self.inner.lock().packet)
    }

    pub(crate) fn with_packet_mut<R>(&self, f: impl FnOnce(&mut Packet) -> R) -> R {
        f(&mut self.inner.lock().packet)
    }

    /// NEW -> QUEUED; CU-starting opcodes are retyped as CU commands
    pub(crate) fn mark_queued(&self) {
        let mut inner = self.inner.lock();
        if inner.packet.opcode().starts_cu() {
            inner.packet.set_kind(CommandType::Cu);
        }
        inner.state = CommandState::Queued;
        inner.packet.set_state(CommandState::Queued);
    }

    /// QUEUED -> RUNNING
    pub(crate) fn mark_running(&self, slot: SlotIndex, cu: Option<CuIndex>) {
        let mut inner = self.inner.lock();
        inner.slot = Some(slot);
        inner.cu = cu;
        inner.state = CommandState::Running;
        inner.packet.set_state(CommandState::Running);
    }

    /// RUNNING -> COMPLETED; placement is only meaningful while running
    pub(crate) fn mark_completed(&self) {
        let mut inner = self.inner.lock();
        inner.slot = None;
        inner.cu = None;
        inner.state = CommandState::Completed;
        inner.packet.set_state(CommandState::Completed);
    }
}

// =============================================================================
// COMMAND HANDLE
// =============================================================================

/// Producer view of an enqueued command
#[derive(Debug, Clone)]
pub struct CommandHandle(pub(crate) Command);

impl CommandHandle {
    /// Command id
    pub fn id(&self) -> CommandId {
        self.0.id()
    }

    /// Packet opcode
    pub fn opcode(&self) -> Opcode {
        self.0.opcode()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandState {
        self.0.state()
    }

    /// Whether the command has finished
    pub fn is_completed(&self) -> bool {
        self.0.is_completed()
    }

    /// Slot held while running
    pub fn slot(&self) -> Option<SlotIndex> {
        self.0.slot()
    }

    /// CU held while running
    pub fn cu(&self) -> Option<CuIndex> {
        self.0.cu()
    }

    /// Snapshot of the packet, header included
    ///
    /// After completion this carries any results the scheduler wrote back,
    /// such as CU_STAT counters.
    pub fn packet_words(&self) -> Vec<u32> {
        self.0.with_packet(|p| p.words().to_vec())
    }
}
