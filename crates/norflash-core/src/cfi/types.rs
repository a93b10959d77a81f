//! CFI types and constants
//!
//! The CFI query table is a byte-per-position structure starting at query
//! position 0x10. Positions are addressed through
//! [`MemoryLayout::query_address`](crate::geometry::MemoryLayout::query_address),
//! so the raw structures below describe the logical byte sequence after it
//! has been gathered from the bus.

use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

// ============================================================================
// Query mode
// ============================================================================

/// Query position the CFI entry command is written to
pub const CFI_QUERY_POS: u32 = 0x55;
/// CFI entry command
pub const CMD_CFI_QUERY: u64 = 0x98;
/// Intel-style return to read array
pub const CMD_READ_ARRAY: u64 = 0xFF;
/// AMD-style reset / return to read array
pub const CMD_RESET: u64 = 0xF0;

/// Expected signature at query positions 0x10..0x13
pub const CFI_SIGNATURE: [u8; 3] = *b"QRY";
/// Expected signature at the start of a primary extended table
pub const PRI_SIGNATURE: [u8; 3] = *b"PRI";

// ============================================================================
// Table positions
// ============================================================================

/// First position of the query header
pub const QUERY_HEADER_POS: u32 = 0x10;
/// Length of the query header in positions
pub const QUERY_HEADER_LEN: usize = 0x1D;
/// First erase region descriptor
pub const ERASE_REGION_POS: u32 = 0x2D;
/// Positions per erase region descriptor
pub const ERASE_REGION_LEN: usize = 4;

/// Identifier position holding the manufacturer code
pub const ID_MANUFACTURER_POS: u32 = 0x00;
/// Identifier position holding the device code
pub const ID_DEVICE_POS: u32 = 0x01;
/// Identifier position, relative to a block, holding its protection state
pub const ID_BLOCK_PROTECT_POS: u32 = 0x02;

/// Raw CFI query header, positions 0x10 through 0x2C
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CfiQueryHeader {
    /// "QRY"
    pub signature: [u8; 3],
    /// Primary vendor command set ID
    pub primary_cmd_set: U16,
    /// Position of the primary extended query table
    pub primary_ext_table: U16,
    /// Alternate vendor command set ID
    pub alt_cmd_set: U16,
    /// Position of the alternate extended query table
    pub alt_ext_table: U16,
    /// Vcc minimum, BCD volts
    pub vcc_min: u8,
    /// Vcc maximum, BCD volts
    pub vcc_max: u8,
    /// Vpp minimum, BCD volts
    pub vpp_min: u8,
    /// Vpp maximum, BCD volts
    pub vpp_max: u8,
    /// Typical single word program time, 2^N us
    pub typ_word_write_exp: u8,
    /// Typical full buffer program time, 2^N us (0 = not supported)
    pub typ_buffer_write_exp: u8,
    /// Typical block erase time, 2^N ms
    pub typ_block_erase_exp: u8,
    /// Typical chip erase time, 2^N ms (0 = not supported)
    pub typ_chip_erase_exp: u8,
    /// Maximum word program time, 2^N times typical
    pub max_word_write_exp: u8,
    /// Maximum buffer program time, 2^N times typical
    pub max_buffer_write_exp: u8,
    /// Maximum block erase time, 2^N times typical
    pub max_block_erase_exp: u8,
    /// Maximum chip erase time, 2^N times typical
    pub max_chip_erase_exp: u8,
    /// Device size, 2^N bytes
    pub device_size_exp: u8,
    /// Interface description code
    pub interface: U16,
    /// Maximum bytes in a write buffer, 2^N
    pub write_buffer_exp: U16,
    /// Number of erase region descriptors that follow
    pub num_erase_regions: u8,
}

/// Raw erase region descriptor
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CfiRegionInfo {
    /// Number of blocks minus one
    pub blocks_minus_one: U16,
    /// Block size in units of 256 bytes (0 means 128 bytes)
    pub size_div_256: U16,
}

impl CfiRegionInfo {
    /// Number of blocks in the region
    pub fn block_count(&self) -> u32 {
        u32::from(self.blocks_minus_one.get()) + 1
    }

    /// Size of one block in bytes, per part
    pub fn block_size(&self) -> u32 {
        match self.size_div_256.get() {
            0 => 128,
            n => u32::from(n) * 256,
        }
    }
}

// ============================================================================
// Command sets
// ============================================================================

/// Which family driver speaks a command set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Family {
    /// Intel / Sharp status-register protocol
    Intel,
    /// AMD / Fujitsu / Spansion unlock-cycle protocol
    Amd,
}

/// Primary vendor command set reported by CFI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandSet {
    /// Intel/Sharp extended (0x0001)
    IntelExtended,
    /// AMD/Fujitsu standard (0x0002)
    AmdStandard,
    /// Intel standard (0x0003)
    IntelStandard,
    /// AMD/Fujitsu extended (0x0004)
    AmdExtended,
    /// Intel performance code (0x0200)
    IntelPerformance,
    /// Anything else
    Unknown(u16),
}

impl CommandSet {
    /// Decode a CFI command set ID
    pub const fn from_id(id: u16) -> Self {
        match id {
            0x0001 => Self::IntelExtended,
            0x0002 => Self::AmdStandard,
            0x0003 => Self::IntelStandard,
            0x0004 => Self::AmdExtended,
            0x0200 => Self::IntelPerformance,
            other => Self::Unknown(other),
        }
    }

    /// Raw CFI command set ID
    pub const fn id(self) -> u16 {
        match self {
            Self::IntelExtended => 0x0001,
            Self::AmdStandard => 0x0002,
            Self::IntelStandard => 0x0003,
            Self::AmdExtended => 0x0004,
            Self::IntelPerformance => 0x0200,
            Self::Unknown(id) => id,
        }
    }

    /// Family driver for this command set, if any
    pub const fn family(self) -> Option<Family> {
        match self {
            Self::IntelExtended | Self::IntelStandard | Self::IntelPerformance => {
                Some(Family::Intel)
            }
            Self::AmdStandard | Self::AmdExtended => Some(Family::Amd),
            Self::Unknown(_) => None,
        }
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

/// Boot block arrangement reported by the AMD extended table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BootMode {
    /// Not reported
    #[default]
    Unknown,
    /// Uniform blocks
    Uniform,
    /// Small blocks at the bottom of the array
    Bottom,
    /// Small blocks at the top of the array
    Top,
}

impl BootMode {
    /// Decode the AMD extended table boot flag
    pub const fn from_amd_flag(flag: u8) -> Self {
        match flag {
            2 => Self::Bottom,
            3 => Self::Top,
            0 | 1 | 4 | 5 => Self::Uniform,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

/// Identification of the part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartId {
    /// Manufacturer code
    pub manufacturer: u16,
    /// Device code
    pub device: u16,
    /// Primary vendor command set
    pub command_set: CommandSet,
}

/// Operation timings
///
/// Writes are in microseconds and erases in milliseconds. Zero means the
/// operation is not supported or not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timing {
    /// Single word program, us
    pub write_single_us: u32,
    /// Full write buffer program, us
    pub write_buffer_us: u32,
    /// Block erase, ms
    pub erase_block_ms: u32,
    /// Chip erase, ms
    pub erase_chip_ms: u32,
}

impl Timing {
    /// Typical timings from the raw CFI exponents
    pub fn typical(header: &CfiQueryHeader) -> Self {
        Self {
            write_single_us: pow2(header.typ_word_write_exp),
            write_buffer_us: pow2(header.typ_buffer_write_exp),
            erase_block_ms: pow2(header.typ_block_erase_exp),
            erase_chip_ms: pow2(header.typ_chip_erase_exp),
        }
    }

    /// Maximum timings from the raw CFI exponents
    pub fn maximum(header: &CfiQueryHeader) -> Self {
        let typ = Self::typical(header);
        Self {
            write_single_us: scale(typ.write_single_us, header.max_word_write_exp),
            write_buffer_us: scale(typ.write_buffer_us, header.max_buffer_write_exp),
            erase_block_ms: scale(typ.erase_block_ms, header.max_block_erase_exp),
            erase_chip_ms: scale(typ.erase_chip_ms, header.max_chip_erase_exp),
        }
    }
}

/// Programming capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramCaps {
    /// Write buffer size in bytes across all interleaved parts (0 = none)
    pub write_buffer_size: u32,
    /// Mask of the offset bits inside one write buffer
    pub write_buffer_align_mask: u32,
    /// Number of blocks issued per erase polling cycle
    pub erase_queue_size: u8,
}

/// Everything about a part that is not geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Properties {
    /// Part identification
    pub part_id: PartId,
    /// Typical timings
    pub typical: Timing,
    /// Maximum timings
    pub max: Timing,
    /// Programming capabilities
    pub program: ProgramCaps,
    /// Boot block arrangement
    pub boot_mode: BootMode,
    /// Query position of the primary extended table (0 = none)
    pub primary_ext_table: u16,
}

/// 2^exp, with exponent 0 meaning "not supported"
fn pow2(exp: u8) -> u32 {
    match exp {
        0 => 0,
        n => 1u32.checked_shl(u32::from(n)).unwrap_or(u32::MAX),
    }
}

fn scale(typ: u32, exp: u8) -> u32 {
    if typ == 0 || exp == 0 {
        return typ;
    }
    typ.checked_shl(u32::from(exp))
        .filter(|v| v >> exp == typ)
        .unwrap_or(u32::MAX)
}
