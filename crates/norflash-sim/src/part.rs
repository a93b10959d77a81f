//! Bus level model of one or more interleaved CFI parts
//!
//! All parts on the bus run in lockstep: a command cycle is only accepted
//! when every lane carries the same value, which is what lets the CFI
//! decoder tell the candidate layouts apart. Data cycles are applied to
//! the array as whole bus words.
//!
//! Embedded operations complete instantly. `busy_reads` status reads still
//! report busy afterwards so that the polling loops get exercised.

use norflash_core::bus::FlashBus;
use norflash_core::geometry::{Geometry, MemoryLayout};

use crate::config::{ConfigError, SimConfig, SimFamily};
use crate::table::cfi_table;

/// Size of the AMD secured silicon sector
pub const SECURED_SILICON_SIZE: usize = 256;

/// Intel status register bits
pub(crate) mod status {
    pub const READY: u8 = 0x80;
    pub const ERASE_SUSPENDED: u8 = 0x40;
    pub const ERASE_ERROR: u8 = 0x20;
    pub const PROGRAM_ERROR: u8 = 0x10;
    pub const BLOCK_LOCKED: u8 = 0x02;
}

/// What a read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Array contents
    Array,
    /// CFI query table
    Query,
    /// Identifier codes and block protection
    Identifier,
    /// Intel status register
    Status,
    /// AMD embedded operation in progress; reads toggle DQ6
    Embedded { toggles: u32, failed: bool },
    /// Spansion status register, for one read
    StatusRegister,
    /// AMD group protection verify readback
    ProtectVerify { block: u32 },
}

/// Multi-cycle command waiting for its next cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Pending {
    #[default]
    None,
    /// Next cycle is program data
    Program,
    /// Next cycle is the write buffer word count
    BufferCount { block: Option<usize> },
    /// Write buffer words still to come
    BufferLoad {
        block: Option<usize>,
        remaining: u32,
        words: Vec<(u32, u64)>,
    },
    /// Buffer full, waiting for the confirm command
    BufferConfirm {
        block: Option<usize>,
        words: Vec<(u32, u64)>,
    },
    /// Intel block erase setup, waiting for confirm
    EraseSetup,
    /// Intel lock setup, waiting for set / clear / configure
    LockSetup,
    /// Intel RY/BY# configuration code
    ReadyBusyConfig,
    /// AMD unlock bypass reset, waiting for 0x00
    BypassReset,
    /// AMD secured silicon exit, waiting for 0x00
    ExitSecured,
}

/// One completed write buffer program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCycle {
    /// Offset of the first word loaded
    pub start: u32,
    /// Number of bus words loaded
    pub words: u32,
}

/// A simulated flash window
#[derive(Debug)]
pub struct SimFlash {
    pub(crate) config: SimConfig,
    pub(crate) base: u64,
    pub(crate) geometry: Geometry,
    pub(crate) data: Vec<u8>,
    pub(crate) table: Vec<u8>,
    pub(crate) protected: Vec<bool>,
    pub(crate) secured: Vec<u8>,

    pub(crate) mode: Mode,
    pub(crate) pending: Pending,
    /// AMD unlock cycles seen so far (0..=2)
    pub(crate) unlock_stage: u8,
    /// AMD erase setup seen, waiting for the second unlock
    pub(crate) erase_armed: bool,
    /// AMD unlock bypass active
    pub(crate) bypass: bool,
    /// AMD secured silicon sector mapped over the start of the array
    pub(crate) secured_mapped: bool,
    /// Current DQ6 level while an AMD operation runs
    pub(crate) toggle_bit: bool,

    /// Intel status register, without the ready bit
    pub(crate) status: u8,
    pub(crate) busy_left: u32,
    pub(crate) fail_next: bool,
    pub(crate) stuck: bool,

    pub(crate) ready_busy_mode: Option<u8>,
    pub(crate) config_register: Option<u32>,
    pub(crate) buffer_cycles: Vec<BufferCycle>,
    pub(crate) word_programs: u32,
    pub(crate) block_erases: u32,
    pub(crate) status_reads: u64,
    pub(crate) misaligned: u32,
    pub(crate) elapsed_us: u64,
}

impl SimFlash {
    /// Build a blank (erased, unprotected) part mapped at `base`
    pub fn new(config: SimConfig, base: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let pairs: Vec<(u32, u32)> = config
            .regions
            .iter()
            .map(|r| (r.blocks, r.block_size.to_bytes()))
            .collect();
        let geometry = Geometry::from_regions(base, config.layout, &pairs)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let table = cfi_table(&config);
        let size = config.device_size() as usize;
        let blocks = pairs.iter().map(|&(n, _)| n as usize).sum();

        log::debug!(
            "sim: {:?} part {:04x}:{:04x}, {} bytes as {}",
            config.family,
            config.manufacturer,
            config.device,
            size,
            config.layout.name()
        );

        Ok(Self {
            config,
            base,
            geometry,
            data: vec![0xFF; size],
            table,
            protected: vec![false; blocks],
            secured: vec![0xFF; SECURED_SILICON_SIZE],
            mode: Mode::Array,
            pending: Pending::None,
            unlock_stage: 0,
            erase_armed: false,
            bypass: false,
            secured_mapped: false,
            toggle_bit: false,
            status: 0,
            busy_left: 0,
            fail_next: false,
            stuck: false,
            ready_busy_mode: None,
            config_register: None,
            buffer_cycles: Vec::new(),
            word_programs: 0,
            block_erases: 0,
            status_reads: 0,
            misaligned: 0,
            elapsed_us: 0,
        })
    }

    /// Base address of the window
    pub fn base_address(&self) -> u64 {
        self.base
    }

    /// Part description
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable array contents, bypassing the command interface
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Secured silicon sector contents
    pub fn secured_silicon_mut(&mut self) -> &mut [u8] {
        &mut self.secured
    }

    /// Whether the block holding `offset` is protected
    pub fn is_protected(&self, offset: u32) -> bool {
        self.block_index(offset)
            .map(|i| self.protected[i])
            .unwrap_or(false)
    }

    /// Protect or unprotect the block holding `offset`
    pub fn set_protected(&mut self, offset: u32, protected: bool) {
        if let Some(i) = self.block_index(offset) {
            self.protected[i] = protected;
        }
    }

    /// Make the next program or erase fail
    pub fn fail_next_operation(&mut self) {
        self.fail_next = true;
    }

    /// Never finish embedded operations
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// Write buffer programs performed so far
    pub fn buffer_cycles(&self) -> &[BufferCycle] {
        &self.buffer_cycles
    }

    /// Single word programs performed so far
    pub fn word_programs(&self) -> u32 {
        self.word_programs
    }

    /// Block erases performed so far
    pub fn block_erases(&self) -> u32 {
        self.block_erases
    }

    /// Status reads answered so far
    pub fn status_reads(&self) -> u64 {
        self.status_reads
    }

    /// Accesses that were not naturally aligned and got dropped
    pub fn misaligned_accesses(&self) -> u32 {
        self.misaligned
    }

    /// Total time requested through `delay_us`
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Last RY/BY# configuration code written
    pub fn ready_busy_mode(&self) -> Option<u8> {
        self.ready_busy_mode
    }

    /// Last platform flash configuration register value written
    pub fn config_register(&self) -> Option<u32> {
        self.config_register
    }

    /// True when reads return array data
    pub fn in_read_array(&self) -> bool {
        self.mode == Mode::Array && !self.secured_mapped
    }

    /// True while the secured silicon sector is mapped
    pub fn secured_mapped(&self) -> bool {
        self.secured_mapped
    }

    pub(crate) fn layout(&self) -> MemoryLayout {
        self.config.layout
    }

    fn bus_width(&self) -> u32 {
        self.layout().bus_width()
    }

    fn width_mask(&self) -> u64 {
        self.layout().access_width().mask()
    }

    /// Address as seen by each part, in part words
    pub(crate) fn part_word(&self, offset: u32) -> u32 {
        let layout = self.layout();
        if layout.is_byte_mode() {
            (offset / layout.num_parts()) >> 1
        } else {
            offset / layout.bus_width()
        }
    }

    /// Part word relative to the start of the enclosing block
    pub(crate) fn block_word(&self, offset: u32) -> u32 {
        match self.geometry.to_block(offset) {
            Ok(pos) => self.part_word(offset) - self.part_word(offset - pos.offset),
            Err(_) => self.part_word(offset),
        }
    }

    pub(crate) fn block_index(&self, offset: u32) -> Option<usize> {
        let pos = self.geometry.to_block(offset).ok()?;
        let region = self.geometry.regions()[pos.region];
        Some((region.first_block + pos.block) as usize)
    }

    /// Command byte of a cycle, if every lane agrees
    pub(crate) fn command_byte(&self, value: u64) -> Option<u8> {
        let layout = self.layout();
        let value = value & self.width_mask();
        let lane = value & layout.lane_mask();
        (layout.replicate(lane) == value).then_some(lane as u8)
    }

    pub(crate) fn lane_value(&self, value: u64) -> u32 {
        (value & self.layout().lane_mask()) as u32
    }

    pub(crate) fn replicate(&self, value: u64) -> u64 {
        self.layout().replicate(value)
    }

    /// Memory backing `offset`: the secured sector when it is mapped and
    /// covers the offset, the array otherwise
    fn backing(&mut self, offset: u32) -> &mut [u8] {
        if self.secured_mapped && (offset as usize) < self.secured.len() {
            &mut self.secured
        } else {
            &mut self.data
        }
    }

    pub(crate) fn array_word(&mut self, offset: u32) -> u64 {
        let start = offset as usize;
        let width = self.bus_width() as usize;
        self.backing(offset)[start..start + width]
            .iter()
            .rev()
            .fold(0, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// Program one bus word; bits only go from 1 to 0
    pub(crate) fn program_word(&mut self, offset: u32, value: u64) {
        let start = offset as usize;
        let width = self.bus_width() as usize;
        for (i, byte) in self.backing(offset)[start..start + width]
            .iter_mut()
            .enumerate()
        {
            *byte &= (value >> (8 * i)) as u8;
        }
    }

    pub(crate) fn erase_block(&mut self, offset: u32) {
        let Ok(pos) = self.geometry.to_block(offset) else {
            return;
        };
        let start = (offset - pos.offset) as usize;
        let size = self.geometry.regions()[pos.region].block_size as usize;
        self.data[start..start + size].fill(0xFF);
        self.block_erases += 1;
        log::trace!("sim: erased block at 0x{:x}", start);
    }

    pub(crate) fn identifier(&self, offset: u32) -> u64 {
        let value = match self.block_word(offset) {
            0 => self.config.manufacturer,
            1 => self.config.device,
            2 => u16::from(self.is_protected(offset)),
            _ => 0,
        };
        self.replicate(u64::from(value))
    }

    fn query(&self, offset: u32) -> u64 {
        let pos = self.part_word(offset) as usize;
        let value = self.table.get(pos).copied().unwrap_or(0);
        self.replicate(u64::from(value))
    }

    /// Value of the bus word at `offset` (bus aligned)
    fn read_word(&mut self, offset: u32) -> u64 {
        let mode = self.mode;
        match mode {
            Mode::Array => self.array_word(offset),
            Mode::Query => self.query(offset),
            Mode::Identifier => self.identifier(offset),
            Mode::Status => self.intel_status(),
            Mode::StatusRegister => {
                self.status_reads += 1;
                self.mode = Mode::Array;
                self.replicate(u64::from(status::READY))
            }
            Mode::Embedded { toggles, failed } => self.amd_toggle_read(offset, toggles, failed),
            Mode::ProtectVerify { block } => {
                let protected = self.protected.get(block as usize).copied().unwrap_or(false);
                self.replicate(u64::from(protected))
            }
        }
    }

    fn cycle(&mut self, offset: u32, value: u64) {
        log::trace!("sim: write 0x{:x} <- 0x{:x}", offset, value);
        match self.config.family {
            SimFamily::Intel => self.intel_cycle(offset, value),
            SimFamily::Amd => self.amd_cycle(offset, value),
        }
    }

    fn offset_of(&self, addr: u64, len: u64) -> Option<u32> {
        let offset = addr.checked_sub(self.base)?;
        (offset + len <= u64::from(self.config.device_size())).then_some(offset as u32)
    }

    /// A real bus faults on a wide access that is not naturally aligned
    fn misaligned_access(&mut self, addr: u64, len: u32) -> bool {
        if addr % u64::from(len) == 0 {
            return false;
        }
        log::warn!("sim: {}-byte access at unaligned 0x{:x} dropped", len, addr);
        self.misaligned += 1;
        true
    }

    fn read_access(&mut self, addr: u64, len: u32) -> u64 {
        if self.misaligned_access(addr, len) {
            return u64::MAX;
        }
        let Some(offset) = self.offset_of(addr, u64::from(len)) else {
            log::trace!("sim: read outside the window at 0x{:x}", addr);
            return u64::MAX;
        };
        let width = self.bus_width();
        let end = offset + len;
        let mut result = 0u64;
        let mut word = offset & !(width - 1);
        while word < end {
            let value = self.read_word(word);
            for i in 0..width {
                let byte_offset = word + i;
                if byte_offset >= offset && byte_offset < end {
                    let byte = (value >> (8 * i)) & 0xFF;
                    result |= byte << (8 * (byte_offset - offset));
                }
            }
            word += width;
        }
        result
    }

    fn write_access(&mut self, addr: u64, len: u32, value: u64) {
        if self.misaligned_access(addr, len) {
            return;
        }
        let Some(offset) = self.offset_of(addr, u64::from(len)) else {
            log::trace!("sim: write outside the window at 0x{:x}", addr);
            return;
        };
        let width = self.bus_width();
        if len > width {
            // A wide store reaches the bus as several cycles
            let mut i = 0;
            while i < len {
                let part = (value >> (8 * i)) & self.width_mask();
                self.cycle(offset + i, part);
                i += width;
            }
        } else {
            let word = offset & !(width - 1);
            self.cycle(word, value << (8 * (offset - word)));
        }
    }
}

impl FlashBus for SimFlash {
    fn read8(&mut self, addr: u64) -> u8 {
        self.read_access(addr, 1) as u8
    }

    fn read16(&mut self, addr: u64) -> u16 {
        self.read_access(addr, 2) as u16
    }

    fn read32(&mut self, addr: u64) -> u32 {
        self.read_access(addr, 4) as u32
    }

    fn read64(&mut self, addr: u64) -> u64 {
        self.read_access(addr, 8)
    }

    fn write8(&mut self, addr: u64, value: u8) {
        self.write_access(addr, 1, u64::from(value))
    }

    fn write16(&mut self, addr: u64, value: u16) {
        self.write_access(addr, 2, u64::from(value))
    }

    fn write32(&mut self, addr: u64, value: u32) {
        self.write_access(addr, 4, u64::from(value))
    }

    fn write64(&mut self, addr: u64, value: u64) {
        self.write_access(addr, 8, value)
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += u64::from(us);
    }

    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        match self.offset_of(addr, buf.len() as u64) {
            Some(offset) if self.mode == Mode::Array && !self.secured_mapped => {
                let start = offset as usize;
                buf.copy_from_slice(&self.data[start..start + buf.len()]);
            }
            _ => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.read8(addr + i as u64);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Size;

    const BASE: u64 = 0x1000_0000;

    fn sim(layout: MemoryLayout) -> SimFlash {
        let config = SimConfig {
            layout,
            write_buffer: Size::B(8 * layout.bus_width()),
            ..SimConfig::default()
        };
        SimFlash::new(config, BASE).unwrap()
    }

    #[test]
    fn test_part_word_decoding() {
        assert_eq!(sim(MemoryLayout::X16X16X1).part_word(0xAAA), 0x555);
        assert_eq!(sim(MemoryLayout::X16X8X1).part_word(0xAAA), 0x555);
        assert_eq!(sim(MemoryLayout::X16X8X1).part_word(0x555), 0x2AA);
        assert_eq!(sim(MemoryLayout::X16X16X2).part_word(0x1554), 0x555);
        assert_eq!(sim(MemoryLayout::X16X8X2).part_word(0x154), 0x55);
    }

    #[test]
    fn test_command_needs_all_lanes() {
        let flash = sim(MemoryLayout::X16X8X2);
        assert_eq!(flash.command_byte(0x9898), Some(0x98));
        assert_eq!(flash.command_byte(0x0098), None);

        let flash = sim(MemoryLayout::X16X16X2);
        assert_eq!(flash.command_byte(0x0098_0098), Some(0x98));
        assert_eq!(flash.command_byte(0x0000_0098), None);
    }

    #[test]
    fn test_array_reads() {
        let mut flash = sim(MemoryLayout::X16X16X1);
        flash.data_mut()[..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(flash.read8(BASE + 1), 0x22);
        assert_eq!(flash.read16(BASE), 0x2211);
        assert_eq!(flash.read32(BASE), 0x4433_2211);
        let mut buf = [0u8; 3];
        flash.read_bytes(BASE + 1, &mut buf);
        assert_eq!(buf, [0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_outside_window() {
        let mut flash = sim(MemoryLayout::X16X16X1);
        assert_eq!(flash.read16(BASE - 2), 0xFFFF);
        assert_eq!(flash.read8(BASE + (1 << 20)), 0xFF);
        flash.write16(BASE + (1 << 20), 0x0090);
        assert!(flash.in_read_array());
    }

    #[test]
    fn test_query_mode() {
        for layout in MemoryLayout::ALL {
            let mut flash = sim(layout);
            let width = layout.access_width();
            width.write(
                &mut flash,
                BASE + layout.query_address(0x55),
                layout.replicate(0x98),
            );
            for (i, &c) in b"QRY".iter().enumerate() {
                let addr = BASE + layout.query_address(0x10 + i as u32);
                assert_eq!(
                    width.read(&mut flash, addr),
                    layout.replicate(u64::from(c)),
                    "{}",
                    layout.name()
                );
                assert_eq!(flash.read8(addr), c, "{}", layout.name());
            }
        }
    }

    #[test]
    fn test_protection_bookkeeping() {
        let mut flash = sim(MemoryLayout::X16X16X1);
        flash.set_protected(0x2_0010, true);
        assert!(flash.is_protected(0x2_0000));
        assert!(!flash.is_protected(0x1_FFFF));
        assert!(!flash.is_protected(1 << 20));
    }

    #[test]
    fn test_unaligned_cycle_is_dropped() {
        let mut flash = sim(MemoryLayout::X16X16X1);
        flash.write16(BASE + 0x23, 0x0090);
        assert!(flash.in_read_array());
        assert_eq!(flash.read16(BASE + 0x11), 0xFFFF);
        assert_eq!(flash.misaligned_accesses(), 2);

        flash.write16(BASE + 0x22, 0x0090);
        assert!(!flash.in_read_array());
        assert_eq!(flash.misaligned_accesses(), 2);
    }
}
