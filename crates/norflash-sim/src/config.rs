//! Description of a simulated part
//!
//! A [`SimConfig`] can be built in code or loaded from a RON file:
//!
//! ```ron
//! (
//!     family: Amd,
//!     layout: X16X16X1,
//!     manufacturer: 0x0001,
//!     device: 0x227E,
//!     regions: [
//!         (blocks: 8, block_size: KiB(8)),
//!         (blocks: 15, block_size: KiB(64)),
//!     ],
//!     write_buffer: B(32),
//! )
//! ```
//!
//! Sizes are given for the whole bus. With interleaved parts each part
//! reports its share in its CFI table.

use std::fs;
use std::path::Path;

use norflash_core::geometry::MemoryLayout;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or checking a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// RON syntax or schema error
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The described part cannot be expressed in a CFI table
    #[error("invalid part description: {0}")]
    Invalid(String),
}

/// Size with a unit, for readable RON files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    /// Bytes
    B(u32),
    /// Kibibytes
    KiB(u32),
    /// Mebibytes
    MiB(u32),
}

impl Size {
    /// Size in bytes
    pub fn to_bytes(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n.saturating_mul(1024),
            Size::MiB(n) => n.saturating_mul(1024 * 1024),
        }
    }
}

/// Command protocol spoken by the simulated part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimFamily {
    /// Intel / Sharp status register protocol
    #[default]
    Intel,
    /// AMD / Spansion unlock cycle and toggle bit protocol
    Amd,
}

impl SimFamily {
    /// CFI primary command set reported unless overridden
    pub fn default_command_set(self) -> u16 {
        match self {
            SimFamily::Intel => 0x0001,
            SimFamily::Amd => 0x0002,
        }
    }

    /// Parse "intel" or "amd"
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "intel" => Some(SimFamily::Intel),
            "amd" | "spansion" => Some(SimFamily::Amd),
            _ => None,
        }
    }
}

/// One run of equally sized blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRegion {
    /// Number of blocks
    pub blocks: u32,
    /// Size of each block across the whole bus
    pub block_size: Size,
}

/// Everything needed to build a simulated part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Command protocol
    pub family: SimFamily,
    /// CFI primary command set ID, when it differs from the family default
    pub command_set: Option<u16>,
    /// Bus wiring
    pub layout: MemoryLayout,
    /// Manufacturer code
    pub manufacturer: u16,
    /// Device code
    pub device: u16,
    /// Erase regions in ascending address order
    pub regions: Vec<SimRegion>,
    /// Report the regions top-down, as top boot AMD parts do
    pub top_boot: bool,
    /// Write buffer across the whole bus, `B(0)` for none
    pub write_buffer: Size,
    /// Identical partitions reported in the Intel extended table
    pub banks: u16,
    /// Status reads that report busy after every embedded operation
    pub busy_reads: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            family: SimFamily::Intel,
            command_set: None,
            layout: MemoryLayout::X16X16X1,
            manufacturer: 0x0089, // Intel
            device: 0x0018,       // 28F128J3
            regions: vec![SimRegion {
                blocks: 16,
                block_size: Size::KiB(64),
            }],
            top_boot: false,
            write_buffer: Size::B(32),
            banks: 0,
            busy_reads: 2,
        }
    }
}

impl SimConfig {
    /// A part with a single region of uniform blocks
    pub fn uniform(family: SimFamily, layout: MemoryLayout, size: u32, block_size: u32) -> Self {
        let (manufacturer, device) = match family {
            SimFamily::Intel => (0x0089, 0x0018),
            SimFamily::Amd => (0x0001, 0x227E), // Spansion S29GL
        };
        Self {
            family,
            layout,
            manufacturer,
            device,
            regions: vec![SimRegion {
                blocks: size / block_size.max(1),
                block_size: Size::B(block_size),
            }],
            ..Self::default()
        }
    }

    /// Parse and check a RON description
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a RON description from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron(&text)
    }

    /// CFI primary command set ID
    pub fn command_set_id(&self) -> u16 {
        self.command_set
            .unwrap_or_else(|| self.family.default_command_set())
    }

    /// Total array size across the bus
    pub fn device_size(&self) -> u32 {
        self.regions
            .iter()
            .map(|r| r.blocks.saturating_mul(r.block_size.to_bytes()))
            .fold(0u32, u32::saturating_add)
    }

    /// Write buffer size across the bus
    pub fn write_buffer_size(&self) -> u32 {
        self.write_buffer.to_bytes()
    }

    /// Check that the part can be described by a CFI table
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parts = self.layout.num_parts();
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.regions.is_empty() {
            return invalid("no erase regions".into());
        }
        if self.regions.len() > usize::from(u8::MAX) {
            return invalid(format!("{} erase regions", self.regions.len()));
        }
        for (i, region) in self.regions.iter().enumerate() {
            let size = region.block_size.to_bytes();
            if region.blocks == 0 || region.blocks > 0x1_0000 {
                return invalid(format!("region {}: {} blocks", i, region.blocks));
            }
            if size % parts != 0 {
                return invalid(format!("region {}: block size {:#x} not split over {} parts", i, size, parts));
            }
            let part_size = size / parts;
            if part_size != 128 && (part_size % 256 != 0 || part_size / 256 > 0xFFFF) {
                return invalid(format!("region {}: block size {:#x} per part", i, part_size));
            }
        }

        let size = self.device_size();
        if size % parts != 0 || !(size / parts).is_power_of_two() {
            return invalid(format!("device size {:#x} is not a power of two per part", size));
        }

        let buffer = self.write_buffer_size();
        if buffer != 0
            && (buffer % parts != 0
                || !(buffer / parts).is_power_of_two()
                || buffer < self.layout.bus_width())
        {
            return invalid(format!("write buffer of {} bytes", buffer));
        }
        Ok(())
    }
}
