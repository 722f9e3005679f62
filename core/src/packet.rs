//! # Command Packets
//!
//! Decoding of the command-packet wire layout consumed by the scheduler.
//!
//! ```text
//!  word 0: header
//!  ┌──────┬────────┬────────────┬───────┬──────────┬───────┐
//!  │ type │ opcode │   count    │custom │(extra CU │ state │
//!  │31..28│ 27..23 │  22..12    │ 11..4 │ masks    │ 3..0  │
//!  │      │        │            │       │ 11..10)  │       │
//!  └──────┴────────┴────────────┴───────┴──────────┴───────┘
//!  words 1..=N       CU eligibility masks (CU-invocation opcodes only,
//!                    N = 1 + extra CU masks)
//!  words N+1..=count register map, copied verbatim to the target CU
//! ```
//!
//! The scheduler only interprets the header, the CU masks, the register map
//! and the CONFIGURE payload. Everything else is moved as opaque words.

use core::fmt;

use crate::error::{Error, Result};
use crate::types::{MAX_CUS, WORD_BITS, WORD_BYTES};

// =============================================================================
// FIELD HELPERS
// =============================================================================

/// Extract bits `low..=high` of `value`
pub const fn extract_field(value: u32, low_bit: u8, high_bit: u8) -> u32 {
    let width = (high_bit - low_bit + 1) as u32;
    let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
    (value >> low_bit) & mask
}

/// Replace bits `low..=high` of `value` with `field`
pub const fn insert_field(value: u32, field: u32, low_bit: u8, high_bit: u8) -> u32 {
    let width = (high_bit - low_bit + 1) as u32;
    let mask = if width == 32 { u32::MAX } else { ((1u32 << width) - 1) << low_bit };
    (value & !mask) | ((field << low_bit) & mask)
}

// =============================================================================
// OPCODE
// =============================================================================

/// Command opcode, header bits 27..23
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Start a compute unit with an in-order register map
    StartCu,
    /// Configure the execution context
    Configure,
    /// Stop the embedded scheduler
    Exit,
    /// Abort a command
    Abort,
    /// Start a compute unit with (offset, value) register writes
    ExecWrite,
    /// Report per-CU usage counters
    CuStat,
    /// Copy between buffer objects
    StartCopyBo,
    /// Opcode the scheduler moves without interpreting
    Other(u8),
}

impl Opcode {
    /// Raw 5-bit opcode value
    pub const fn raw(self) -> u32 {
        match self {
            Self::StartCu => 0,
            Self::Configure => 2,
            Self::Exit => 3,
            Self::Abort => 4,
            Self::ExecWrite => 5,
            Self::CuStat => 6,
            Self::StartCopyBo => 7,
            Self::Other(raw) => raw as u32 & 0x1F,
        }
    }

    /// Decode a raw opcode value
    pub const fn from_raw(raw: u32) -> Self {
        match raw & 0x1F {
            0 => Self::StartCu,
            2 => Self::Configure,
            3 => Self::Exit,
            4 => Self::Abort,
            5 => Self::ExecWrite,
            6 => Self::CuStat,
            7 => Self::StartCopyBo,
            other => Self::Other(other as u8),
        }
    }

    /// Opcodes that launch a compute unit
    pub const fn starts_cu(self) -> bool {
        matches!(self, Self::StartCu | Self::ExecWrite)
    }
}

// =============================================================================
// COMMAND TYPE
// =============================================================================

/// Command type, header bits 31..28
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Default command type
    Default,
    /// Executed by the host scheduler itself
    KdsLocal,
    /// Control command using a reserved slot
    Ctrl,
    /// Compute unit command
    Cu,
    /// Soft compute unit command
    Scu,
    /// Type the scheduler does not interpret
    Other(u8),
}

impl CommandType {
    /// Raw 4-bit type value
    pub const fn raw(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::KdsLocal => 1,
            Self::Ctrl => 2,
            Self::Cu => 3,
            Self::Scu => 4,
            Self::Other(raw) => raw as u32 & 0xF,
        }
    }

    /// Decode a raw type value
    pub const fn from_raw(raw: u32) -> Self {
        match raw & 0xF {
            0 => Self::Default,
            1 => Self::KdsLocal,
            2 => Self::Ctrl,
            3 => Self::Cu,
            4 => Self::Scu,
            other => Self::Other(other as u8),
        }
    }
}

// =============================================================================
// COMMAND STATE
// =============================================================================

/// Lifecycle state of a command, mirrored into header bits 3..0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CommandState {
    /// Created by enqueue, still on the pending list
    New       = 1,
    /// Owned by the worker, waiting for resources
    Queued    = 2,
    /// Dispatched to the device
    Running   = 3,
    /// Finished; never transitions again
    Completed = 4,
}

impl CommandState {
    /// Decode the header state field
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::New),
            2 => Some(Self::Queued),
            3 => Some(Self::Running),
            4 => Some(Self::Completed),
            _ => None,
        }
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// Packet header word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Header(u32);

impl Header {
    /// Largest payload the 11-bit count field can describe
    pub const MAX_COUNT: usize = 0x7FF;

    /// Build a header for a fresh command
    pub const fn new(opcode: Opcode, kind: CommandType, count: u32) -> Self {
        let mut raw = insert_field(0, CommandState::New as u32, 0, 3);
        raw = insert_field(raw, count, 12, 22);
        raw = insert_field(raw, opcode.raw(), 23, 27);
        raw = insert_field(raw, kind.raw(), 28, 31);
        Self(raw)
    }

    /// Wrap a raw header word
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw header word
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// State field
    pub const fn state(self) -> Option<CommandState> {
        CommandState::from_raw(extract_field(self.0, 0, 3))
    }

    /// Extra CU masks of a start-CU command, bits 11..10
    pub const fn extra_cu_masks(self) -> usize {
        extract_field(self.0, 10, 11) as usize
    }

    /// Payload word count
    pub const fn count(self) -> usize {
        extract_field(self.0, 12, 22) as usize
    }

    /// Opcode
    pub const fn opcode(self) -> Opcode {
        Opcode::from_raw(extract_field(self.0, 23, 27))
    }

    /// Command type
    pub const fn kind(self) -> CommandType {
        CommandType::from_raw(extract_field(self.0, 28, 31))
    }

    /// Copy with a new state
    pub const fn with_state(self, state: CommandState) -> Self {
        Self(insert_field(self.0, state as u32, 0, 3))
    }

    /// Copy with a new command type
    pub const fn with_kind(self, kind: CommandType) -> Self {
        Self(insert_field(self.0, kind.raw(), 28, 31))
    }

    /// Copy with a new extra CU mask count
    pub const fn with_extra_cu_masks(self, extra: usize) -> Self {
        Self(insert_field(self.0, extra as u32, 10, 11))
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("opcode", &self.opcode())
            .field("type", &self.kind())
            .field("count", &self.count())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// PACKET
// =============================================================================

/// A command packet: header word followed by `count` payload words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    words: Vec<u32>,
}

impl Packet {
    /// Maximum number of CU eligibility mask words
    pub const MAX_CU_MASKS: usize = MAX_CUS / WORD_BITS;

    /// Wrap a producer-supplied buffer
    ///
    /// Trailing words beyond the header's count are dropped.
    pub fn from_words(mut words: Vec<u32>) -> Result<Self> {
        let header = Header::from_raw(*words.first().ok_or(Error::MalformedPacket)?);
        if words.len() < 1 + header.count() {
            return Err(Error::MalformedPacket);
        }
        words.truncate(1 + header.count());

        let packet = Self { words };
        packet.validate()?;
        Ok(packet)
    }

    /// Build a packet from an opcode, type and payload
    pub fn new(opcode: Opcode, kind: CommandType, payload: &[u32]) -> Result<Self> {
        if payload.len() > Header::MAX_COUNT {
            return Err(Error::MalformedPacket);
        }
        let mut words = Vec::with_capacity(1 + payload.len());
        words.push(Header::new(opcode, kind, payload.len() as u32).raw());
        words.extend_from_slice(payload);
        Self::from_words(words)
    }

    /// Build a start-CU command from its eligibility masks and register map
    pub fn start_cu(cu_masks: &[u32], regmap: &[u32]) -> Result<Self> {
        Self::cu_command(Opcode::StartCu, cu_masks, regmap)
    }

    /// Build an EXEC_WRITE command; `regmap` holds four reserved words then
    /// (offset, value) pairs
    pub fn exec_write(cu_masks: &[u32], regmap: &[u32]) -> Result<Self> {
        Self::cu_command(Opcode::ExecWrite, cu_masks, regmap)
    }

    fn cu_command(opcode: Opcode, cu_masks: &[u32], regmap: &[u32]) -> Result<Self> {
        if cu_masks.is_empty() || cu_masks.len() > Self::MAX_CU_MASKS {
            return Err(Error::MalformedPacket);
        }
        let count = cu_masks.len() + regmap.len();
        if count > Header::MAX_COUNT {
            return Err(Error::MalformedPacket);
        }

        let header = Header::new(opcode, CommandType::Cu, count as u32)
            .with_extra_cu_masks(cu_masks.len() - 1);
        let mut words = Vec::with_capacity(1 + count);
        words.push(header.raw());
        words.extend_from_slice(cu_masks);
        words.extend_from_slice(regmap);
        Self::from_words(words)
    }

    /// Check the structure the scheduler relies on
    pub fn validate(&self) -> Result<()> {
        if self.is_cu_invocation() && self.payload().len() < self.cu_mask_count() {
            return Err(Error::MalformedPacket);
        }
        if self.opcode() == Opcode::Configure {
            ConfigurePacket::parse(self)?;
        }
        Ok(())
    }

    /// Header word
    pub fn header(&self) -> Header {
        Header::from_raw(self.words[0])
    }

    /// Opcode
    pub fn opcode(&self) -> Opcode {
        self.header().opcode()
    }

    /// Command type
    pub fn kind(&self) -> CommandType {
        self.header().kind()
    }

    /// Whole packet, header first
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Payload words following the header
    pub fn payload(&self) -> &[u32] {
        &self.words[1..]
    }

    /// Mutable payload words
    pub fn payload_mut(&mut self) -> &mut [u32] {
        &mut self.words[1..]
    }

    /// Packet size in bytes, header included
    pub fn byte_len(&self) -> u64 {
        self.words.len() as u64 * WORD_BYTES
    }

    /// Record the lifecycle state in the header
    pub fn set_state(&mut self, state: CommandState) {
        self.words[0] = self.header().with_state(state).raw();
    }

    /// Override the command type
    pub fn set_kind(&mut self, kind: CommandType) {
        self.words[0] = self.header().with_kind(kind).raw();
    }

    /// Whether the command launches a compute unit
    pub fn is_cu_invocation(&self) -> bool {
        self.opcode().starts_cu() || self.kind() == CommandType::Cu
    }

    fn cu_mask_count(&self) -> usize {
        if self.is_cu_invocation() {
            1 + self.header().extra_cu_masks()
        } else {
            0
        }
    }

    /// CU eligibility mask words; empty for commands that start no CU
    pub fn cu_masks(&self) -> &[u32] {
        self.payload().get(..self.cu_mask_count()).unwrap_or(&[])
    }

    /// Register map following the CU masks
    pub fn regmap(&self) -> &[u32] {
        self.payload().get(self.cu_mask_count()..).unwrap_or(&[])
    }
}

// =============================================================================
// CONFIGURE PAYLOAD
// =============================================================================

bitflags::bitflags! {
    /// Feature word of a CONFIGURE command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigureFeatures: u32 {
        /// Device firmware schedules the command queue
        const ERT = 1 << 0;
        /// Poll for completions instead of waiting for interrupts
        const POLLING = 1 << 1;
        /// Firmware CU DMA module present
        const CU_DMA = 1 << 2;
        /// Firmware CU interrupt module present
        const CU_ISR = 1 << 3;
        /// Host raises a doorbell interrupt per submitted slot
        const CQ_INT = 1 << 4;
        /// Copy engines exposed as compute units
        const CDMA = 1 << 5;
    }
}

/// Decoded CONFIGURE payload
///
/// ```text
///  payload[0]  slot size in bytes
///  payload[1]  number of CUs
///  payload[2]  CU address shift
///  payload[3]  CU base address
///  payload[4]  feature word
///  payload[5..5 + num_cus]  per-CU control addresses
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurePacket {
    /// Command-queue slot size in bytes
    pub slot_size: u32,
    /// Shift converting a CU index to a CU address
    pub cu_shift: u32,
    /// Base added to CU addresses
    pub cu_base_addr: u32,
    /// Feature flags
    pub features: ConfigureFeatures,
    /// Per-CU control-bus addresses
    pub cu_addrs: Vec<u32>,
}

impl ConfigurePacket {
    const FIXED_WORDS: usize = 5;

    /// Create a configuration with no CUs and no features
    pub fn new(slot_size: u32) -> Self {
        Self {
            slot_size,
            cu_shift: 16,
            cu_base_addr: 0,
            features: ConfigureFeatures::empty(),
            cu_addrs: Vec::new(),
        }
    }

    /// Set the CU address table
    pub fn with_cus(mut self, cu_addrs: &[u32]) -> Self {
        self.cu_addrs = cu_addrs.to_vec();
        self
    }

    /// Set the feature flags
    pub fn with_features(mut self, features: ConfigureFeatures) -> Self {
        self.features = features;
        self
    }

    /// Number of CUs in the table
    pub fn num_cus(&self) -> usize {
        self.cu_addrs.len()
    }

    /// Decode the payload of a CONFIGURE packet
    pub fn parse(packet: &Packet) -> Result<Self> {
        if packet.opcode() != Opcode::Configure {
            return Err(Error::InvalidConfiguration);
        }

        let payload = packet.payload();
        if payload.len() < Self::FIXED_WORDS {
            return Err(Error::InvalidConfiguration);
        }

        let slot_size = payload[0];
        let num_cus = payload[1] as usize;
        if slot_size == 0 || slot_size as u64 % WORD_BYTES != 0 {
            return Err(Error::InvalidConfiguration);
        }
        if num_cus > MAX_CUS || payload.len() < Self::FIXED_WORDS + num_cus {
            return Err(Error::InvalidConfiguration);
        }

        Ok(Self {
            slot_size,
            cu_shift: payload[2],
            cu_base_addr: payload[3],
            features: ConfigureFeatures::from_bits_truncate(payload[4]),
            cu_addrs: payload[Self::FIXED_WORDS..Self::FIXED_WORDS + num_cus].to_vec(),
        })
    }

    /// Encode as a CONFIGURE packet
    pub fn to_packet(&self) -> Result<Packet> {
        let mut payload = Vec::with_capacity(Self::FIXED_WORDS + self.cu_addrs.len());
        payload.push(self.slot_size);
        payload.push(self.cu_addrs.len() as u32);
        payload.push(self.cu_shift);
        payload.push(self.cu_base_addr);
        payload.push(self.features.bits());
        payload.extend_from_slice(&self.cu_addrs);
        Packet::new(Opcode::Configure, CommandType::Default, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let header = Header::new(Opcode::ExecWrite, CommandType::Cu, 17).with_extra_cu_masks(2);
        assert_eq!(header.opcode(), Opcode::ExecWrite);
        assert_eq!(header.kind(), CommandType::Cu);
        assert_eq!(header.count(), 17);
        assert_eq!(header.extra_cu_masks(), 2);
        assert_eq!(header.state(), Some(CommandState::New));

        let running = header.with_state(CommandState::Running);
        assert_eq!(running.state(), Some(CommandState::Running));
        assert_eq!(running.count(), 17);
    }

    #[test]
    fn test_header_raw_layout() {
        // START_CU, type CU, count 3, state NEW
        let header = Header::new(Opcode::StartCu, CommandType::Cu, 3);
        assert_eq!(header.raw(), 0x3000_3001);
        assert_eq!(Header::from_raw(0x0100_5001).opcode(), Opcode::Configure);
    }

    #[test]
    fn test_unknown_opcode_preserved() {
        let op = Opcode::from_raw(19);
        assert_eq!(op, Opcode::Other(19));
        assert_eq!(op.raw(), 19);
    }

    #[test]
    fn test_start_cu_layout() {
        let packet = Packet::start_cu(&[0b10, 0], &[0, 0xA, 0xB]).unwrap();
        assert!(packet.is_cu_invocation());
        assert_eq!(packet.cu_masks(), &[0b10, 0]);
        assert_eq!(packet.regmap(), &[0, 0xA, 0xB]);
        assert_eq!(packet.header().count(), 5);
        assert_eq!(packet.byte_len(), 24);
    }

    #[test]
    fn test_control_packet_has_no_masks() {
        let packet = Packet::new(Opcode::StartCopyBo, CommandType::Default, &[1, 2, 3]).unwrap();
        assert!(!packet.is_cu_invocation());
        assert!(packet.cu_masks().is_empty());
        assert_eq!(packet.regmap(), &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let header = Header::new(Opcode::StartCu, CommandType::Cu, 4).raw();
        assert_eq!(Packet::from_words(vec![header, 1]), Err(Error::MalformedPacket));
        assert_eq!(Packet::from_words(Vec::new()), Err(Error::MalformedPacket));

        // masks declared but no payload
        let header = Header::new(Opcode::StartCu, CommandType::Cu, 0).raw();
        assert_eq!(Packet::from_words(vec![header]), Err(Error::MalformedPacket));
    }

    #[test]
    fn test_trailing_words_dropped() {
        let header = Header::new(Opcode::Exit, CommandType::Default, 1).raw();
        let packet = Packet::from_words(vec![header, 7, 8, 9]).unwrap();
        assert_eq!(packet.words(), &[header, 7]);
    }

    #[test]
    fn test_state_written_to_header() {
        let mut packet = Packet::new(Opcode::Exit, CommandType::Default, &[]).unwrap();
        packet.set_state(CommandState::Completed);
        assert_eq!(packet.header().state(), Some(CommandState::Completed));
        assert_eq!(packet.opcode(), Opcode::Exit);
    }

    #[test]
    fn test_configure_encode_decode() {
        let cfg = ConfigurePacket::new(0x1000)
            .with_cus(&[0x1000_0000, 0x1001_0000])
            .with_features(ConfigureFeatures::ERT | ConfigureFeatures::POLLING);
        let packet = cfg.to_packet().unwrap();
        assert_eq!(packet.opcode(), Opcode::Configure);
        assert_eq!(ConfigurePacket::parse(&packet).unwrap(), cfg);
    }

    #[test]
    fn test_configure_discards_unknown_features() {
        let payload = [0x1000, 0, 16, 0, (1 << 6) | 1];
        let packet = Packet::new(Opcode::Configure, CommandType::Default, &payload).unwrap();
        let cfg = ConfigurePacket::parse(&packet).unwrap();
        assert_eq!(cfg.features, ConfigureFeatures::ERT);
    }

    #[test]
    fn test_configure_rejects_bad_payload() {
        let zero_slot = ConfigurePacket::new(0).to_packet();
        assert_eq!(zero_slot, Err(Error::InvalidConfiguration));

        // claims 3 CUs, carries 1
        let payload = [0x1000, 3, 16, 0, 0, 0x1000_0000];
        let packet = Packet::new(Opcode::Configure, CommandType::Default, &payload);
        assert_eq!(packet, Err(Error::InvalidConfiguration));
    }
}
