//! AMD / Fujitsu / Spansion command set driver
//!
//! Every stateful command is preceded by the two unlock cycles
//! (0xAA at 0x555, 0x55 at 0x2AA). Completion is detected with the toggle
//! bit: while an embedded operation runs, DQ6 flips on every read.
//!
//! Command addresses are given in part word units. [`AmdDriver`] converts
//! them to byte offsets for the detected layout, including the odd mapping
//! of an x16 part strapped for byte mode (see [`byte_mode_address`]).

use super::{CommandSetDriver, DeviceCommand, DeviceResponse, DeviceStatus, Poller, Target};
use crate::bus::{AccessWidth, FlashBus};
use crate::cfi::{Properties, ID_BLOCK_PROTECT_POS, ID_DEVICE_POS, ID_MANUFACTURER_POS};
use crate::error::{Error, HardwareOp, Result};
use crate::geometry::{Geometry, MemoryLayout};

// ============================================================================
// Commands and addresses
// ============================================================================

/// First unlock cycle address (part words)
pub const UNLOCK1_ADDR: u32 = 0x555;
/// Second unlock cycle address (part words)
pub const UNLOCK2_ADDR: u32 = 0x2AA;
/// First unlock cycle data
pub const UNLOCK1_DATA: u8 = 0xAA;
/// Second unlock cycle data
pub const UNLOCK2_DATA: u8 = 0x55;

/// Reset / read array
pub const CMD_RESET: u8 = 0xF0;
/// Autoselect (identifier) mode
pub const CMD_AUTO_SELECT: u8 = 0x90;
/// Erase setup
pub const CMD_ERASE_SETUP: u8 = 0x80;
/// Sector erase (after setup and a second unlock)
pub const CMD_ERASE_BLOCK: u8 = 0x30;
/// Chip erase (after setup and a second unlock)
pub const CMD_ERASE_CHIP: u8 = 0x10;
/// Enter unlock bypass
pub const CMD_UNLOCK_BYPASS: u8 = 0x20;
/// Unlock bypass reset, first cycle
pub const CMD_UNLOCK_BYPASS_RESET1: u8 = 0x90;
/// Unlock bypass reset, second cycle
pub const CMD_UNLOCK_BYPASS_RESET2: u8 = 0x00;
/// Write buffer program confirm
pub const CMD_PROGRAM_BUFFER: u8 = 0x29;
/// Erase suspend
pub const CMD_ERASE_SUSPEND: u8 = 0xB0;
/// Erase resume
pub const CMD_ERASE_RESUME: u8 = 0x30;
/// Enter secured silicon sector
pub const CMD_ENTER_EXT_MODE: u8 = 0x88;
/// Leave secured silicon sector, first cycle
pub const CMD_EXIT_EXT_MODE1: u8 = 0x90;
/// Leave secured silicon sector, second cycle
pub const CMD_EXIT_EXT_MODE2: u8 = 0x00;
/// Group protect / unprotect setup
pub const CMD_GROUP_PROTECT_SETUP: u8 = 0x60;
/// Group protect / unprotect verify
pub const CMD_GROUP_PROTECT_VERIFY: u8 = 0x40;
/// Status register read (Spansion write buffer parts)
pub const CMD_STATUS_REG_READ: u8 = 0x70;
/// Status register clear (Spansion write buffer parts)
pub const CMD_STATUS_REG_CLEAR: u8 = 0x71;

/// DQ7 in status register mode: device ready
pub const STATUS_DEVICE_READY: u8 = 0x80;
/// DQ6: toggles while an embedded operation runs
pub const STATUS_TOGGLE: u8 = 0x40;
/// DQ5: exceeded timing limits
pub const STATUS_ERROR: u8 = 0x20;

/// Protection verify readback for a protected group
pub const GROUP_PROTECTED: u8 = 0x01;
/// Protection verify readback for an unprotected group
pub const GROUP_UNPROTECTED: u8 = 0x00;
/// Word offset (A6 and A1 high) used for chip unprotect verify
pub const CHIP_UNPROTECT_ADDR: u32 = 0x42;

/// Spansion manufacturer code; selects write buffer programming
pub const MANUFACTURER_SPANSION: u16 = 0x01;

const LOCK_ATTEMPTS: u32 = 25;
const UNLOCK_ATTEMPTS: u32 = 1000;
const PROTECT_SETUP_DELAY_US: u32 = 100;
const UNPROTECT_SETUP_DELAY_US: u32 = 10_000;
const VERIFY_DELAY_US: u32 = 4;

/// Byte address of part word `addr` for an x16 part in byte mode
///
/// In byte mode the part's A-1 pin becomes the least significant address
/// line, so word `a` lives at byte `2a`. The unlock addresses are decoded
/// on odd/even patterns that only line up when the low bit is also
/// inverted: 0x555 maps to 0xAAA and 0x2AA to 0x555.
pub const fn byte_mode_address(addr: u32) -> u32 {
    2 * addr + (!addr & 1)
}

/// Toggle-bit completion check
///
/// Compares each status read with the previous one. A stable DQ6 means the
/// operation has finished. If DQ6 is still toggling and DQ5 is set, two
/// more reads decide: the flag can appear one cycle before the part really
/// finishes, so a stable DQ6 then is still success.
pub fn poll_toggle<B: FlashBus + ?Sized>(
    bus: &mut B,
    width: AccessWidth,
    addr: u64,
    toggle_mask: u64,
    error_mask: u64,
    poller: &mut Poller,
) -> Result<DeviceStatus> {
    let mut previous = poller.read(bus, width, addr)?;
    loop {
        let current = poller.read(bus, width, addr)?;
        if (previous ^ current) & toggle_mask == 0 {
            return Ok(DeviceStatus::Ready);
        }
        if current & error_mask != error_mask {
            previous = current;
            continue;
        }
        let first = poller.read(bus, width, addr)?;
        let second = poller.read(bus, width, addr)?;
        if (first ^ second) & toggle_mask == 0 {
            return Ok(DeviceStatus::Ready);
        }
        return Ok(DeviceStatus::Error(second));
    }
}

/// Driver state for an AMD command set part
#[derive(Debug, Clone)]
pub struct AmdDriver {
    layout: MemoryLayout,
    toggle_mask: u64,
    error_mask: u64,
    use_write_buffer: bool,
    last_error: u64,
}

impl AmdDriver {
    /// Initialize the driver and read the part identifier
    ///
    /// AMD parts are supported as a single x16 part in either mode or as a
    /// pair of x16 parts in word mode.
    pub fn new<B: FlashBus + ?Sized>(
        bus: &mut B,
        geometry: &Geometry,
        properties: &mut Properties,
    ) -> Result<Self> {
        let layout = geometry.layout();
        match layout {
            MemoryLayout::X16X8X1 | MemoryLayout::X16X16X1 | MemoryLayout::X16X16X2 => {}
            _ => {
                log::warn!("AMD: layout {} not supported", layout.name());
                return Err(Error::PartNotSupported);
            }
        }

        let mut driver = Self {
            layout,
            toggle_mask: layout.replicate(u64::from(STATUS_TOGGLE)),
            error_mask: layout.replicate(u64::from(STATUS_ERROR)),
            use_write_buffer: false,
            last_error: 0,
        };

        let mut target = Target {
            bus,
            geometry,
            properties: &*properties,
            commands: super::CommandCodes::AMD,
            poll_limit: None,
        };
        driver.unlock_command(&mut target, 0, CMD_AUTO_SELECT);
        let manufacturer = driver.read_id(&mut target, 0, ID_MANUFACTURER_POS);
        let device = driver.read_id(&mut target, 0, ID_DEVICE_POS);
        target.command(0, CMD_RESET);

        driver.use_write_buffer = manufacturer == MANUFACTURER_SPANSION
            && properties.program.write_buffer_size > 0;
        properties.part_id.manufacturer = manufacturer;
        properties.part_id.device = device;
        log::debug!(
            "AMD: part {:04x}:{:04x}, {} programming",
            manufacturer,
            device,
            if driver.use_write_buffer {
                "write buffer"
            } else {
                "unlock bypass"
            }
        );
        Ok(driver)
    }

    /// Last failing status word
    pub fn last_error(&self) -> u64 {
        self.last_error
    }

    /// True when programming goes through the write buffer
    pub fn uses_write_buffer(&self) -> bool {
        self.use_write_buffer
    }

    /// Byte offset of a command address given in part words
    pub fn command_address(&self, addr: u32) -> u32 {
        if self.layout.is_byte_mode() {
            byte_mode_address(addr) * self.layout.num_parts()
        } else {
            addr * self.layout.bus_width()
        }
    }

    fn read_id<B: FlashBus + ?Sized>(&self, target: &mut Target<'_, B>, block: u32, pos: u32) -> u16 {
        let word = target.read(block + self.layout.query_address(pos) as u32);
        (word & self.layout.lane_mask()) as u16
    }

    fn unlock_cycles<B: FlashBus + ?Sized>(&self, target: &mut Target<'_, B>, bank: u32) {
        target.command(bank + self.command_address(UNLOCK1_ADDR), UNLOCK1_DATA);
        target.command(bank + self.command_address(UNLOCK2_ADDR), UNLOCK2_DATA);
    }

    /// Unlock cycles followed by `command` at the first unlock address
    fn unlock_command<B: FlashBus + ?Sized>(&self, target: &mut Target<'_, B>, bank: u32, command: u8) {
        self.unlock_cycles(target, bank);
        target.command(bank + self.command_address(UNLOCK1_ADDR), command);
    }

    /// Run the toggle-bit check at `offset`, mapping failure to `op`
    fn wait_done<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        op: HardwareOp,
    ) -> Result<()> {
        let mut poller = target.poller();
        let addr = target.word_addr(offset);
        let width = target.width();
        match poll_toggle(
            &mut *target.bus,
            width,
            addr,
            self.toggle_mask,
            self.error_mask,
            &mut poller,
        )? {
            DeviceStatus::Error(status) => {
                self.last_error = status;
                log::debug!("AMD: {} failed at 0x{:x}, status 0x{:x}", op, offset, status);
                Err(Error::HardwareError { op, status })
            }
            _ => Ok(()),
        }
    }

    /// Spin on the Spansion status register until DQ7 reports ready
    fn wait_device_ready<B: FlashBus + ?Sized>(&self, target: &mut Target<'_, B>) -> Result<()> {
        let ready = self.layout.replicate(u64::from(STATUS_DEVICE_READY));
        let mut poller = target.poller();
        loop {
            target.command(self.command_address(UNLOCK1_ADDR), CMD_STATUS_REG_READ);
            if target.poll(&mut poller, 0)? & ready == ready {
                return Ok(());
            }
        }
    }

    fn reset_bank<B: FlashBus + ?Sized>(&self, target: &mut Target<'_, B>, offset: u32, len: usize) {
        let geometry = target.geometry;
        for region in geometry.regions_in_range(offset, len) {
            target.command(geometry.regions()[region].offset, CMD_RESET);
        }
    }

    /// Legacy programming: one bus word per program command
    fn write_unlock_bypass<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let width = target.width();
        let step = width.bytes();
        let end = offset as u64 + data.len() as u64;
        let program = target.commands.program;

        self.unlock_command(target, 0, CMD_UNLOCK_BYPASS);
        let mut word = offset & !(step - 1);
        let mut result = Ok(());
        while u64::from(word) < end {
            target.command(word, program);
            target.write(word, width.pack(word, offset, data));
            result = self.wait_done(target, word, HardwareOp::Program);
            if result.is_err() {
                break;
            }
            word += step;
        }
        target.command(0, CMD_UNLOCK_BYPASS_RESET1);
        target.command(0, CMD_UNLOCK_BYPASS_RESET2);
        result
    }

    /// Spansion write buffer programming
    ///
    /// Chunks never cross a write buffer page. Only the words that carry
    /// data are loaded.
    fn write_buffered<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let width = target.width();
        let step = width.bytes();
        let geometry = target.geometry;
        let buffer_size = target.properties.program.write_buffer_size;
        let align_mask = target.properties.program.write_buffer_align_mask;
        let end = offset + data.len() as u32;
        let write_buffer = target.commands.write_buffer;

        let mut chunk = offset & !(step - 1);
        while chunk < end {
            let page_end = ((chunk & !align_mask) + buffer_size).min(end);
            let words = (page_end - chunk).div_ceil(step);
            let pos = geometry.to_block(chunk)?;
            let sector = geometry.block_start(pos.region, pos.block)?;

            self.wait_device_ready(target)?;
            target.command(self.command_address(UNLOCK1_ADDR), CMD_STATUS_REG_CLEAR);
            self.unlock_cycles(target, 0);
            target.command(sector, write_buffer);
            target.write(sector, self.layout.replicate(u64::from(words - 1)));
            let mut word = chunk;
            for _ in 0..words {
                target.write(word, width.pack(word, offset, data));
                word += step;
            }
            target.command(sector, CMD_PROGRAM_BUFFER);
            if let Err(e) = self.wait_done(target, word - step, HardwareOp::Program) {
                self.reset_bank(target, offset, data.len());
                return Err(e);
            }
            chunk = word;
        }
        Ok(())
    }

    /// Offset of a group verify location inside a block
    fn group_address(&self, block_start: u32, word: u32) -> u32 {
        block_start | self.layout.query_address(word) as u32
    }

    /// Protect one block, retrying the verify a bounded number of times
    fn protect_block<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        block_start: u32,
    ) -> Result<()> {
        let group = self.group_address(block_start, ID_BLOCK_PROTECT_POS);
        let expected = self.layout.replicate(u64::from(GROUP_PROTECTED));
        let mut status = 0;
        for _ in 0..LOCK_ATTEMPTS {
            target.command(group, CMD_GROUP_PROTECT_SETUP);
            target.delay_us(PROTECT_SETUP_DELAY_US);
            target.command(group, CMD_GROUP_PROTECT_VERIFY);
            target.delay_us(VERIFY_DELAY_US);
            status = target.read(group);
            if status == expected {
                return Ok(());
            }
        }
        self.last_error = status;
        Err(Error::HardwareError {
            op: HardwareOp::Lock,
            status,
        })
    }

    fn protection_status<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
    ) -> Result<DeviceResponse> {
        let geometry = target.geometry;
        let pos = geometry.to_block(offset)?;
        let start = geometry.block_start(pos.region, pos.block)?;
        self.unlock_command(target, 0, CMD_AUTO_SELECT);
        let status = self.read_id(target, start, ID_BLOCK_PROTECT_POS);
        target.command(0, CMD_RESET);
        if status & u16::from(GROUP_PROTECTED) != 0 {
            Err(Error::BlockProtected)
        } else {
            Ok(DeviceResponse::Unprotected)
        }
    }
}

impl CommandSetDriver for AmdDriver {
    fn read<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        target.geometry.check_range(offset, buf.len())?;
        self.reset_bank(target, offset, buf.len());
        let addr = target.addr(offset);
        target.bus.read_bytes(addr, buf);
        Ok(())
    }

    fn write<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        target.geometry.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let result = if self.use_write_buffer {
            self.write_buffered(target, offset, data)
        } else {
            self.write_unlock_bypass(target, offset, data)
        };
        if result.is_err() {
            self.reset_bank(target, offset, data.len());
        }
        result
    }

    fn erase<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        let geometry = target.geometry;
        geometry.check_range(offset, len)?;
        let mut remaining = geometry.blocks_in_range(offset, len)?;
        if remaining == 0 {
            return Ok(());
        }
        let first = geometry.to_block(offset)?;
        let (mut region, mut block) = (first.region, first.block);
        let queue = u32::from(target.properties.program.erase_queue_size.max(1));

        let mut result = Ok(());
        while remaining > 0 {
            let batch = remaining.min(queue);
            let mut last = 0;
            for i in 0..batch {
                last = geometry.block_start(region, block)?;
                if i == 0 {
                    self.unlock_command(target, 0, CMD_ERASE_SETUP);
                    self.unlock_cycles(target, 0);
                }
                target.command(last, CMD_ERASE_BLOCK);
                (region, block) = geometry.increment(region, block);
            }
            result = self.wait_done(target, last, HardwareOp::Erase);
            if result.is_err() {
                break;
            }
            remaining -= batch;
        }
        self.reset_bank(target, offset, len);
        result
    }

    fn lock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        let geometry = target.geometry;
        geometry.check_range(offset, len)?;
        let len = len.max(1);
        let first = geometry.to_block(offset)?;
        let mut count = geometry.blocks_in_range(offset, len)?;
        let (mut region, mut block) = (first.region, first.block);
        let mut result = Ok(());
        while count > 0 {
            let start = geometry.block_start(region, block)?;
            result = self.protect_block(target, start);
            if result.is_err() {
                break;
            }
            (region, block) = geometry.increment(region, block);
            count -= 1;
        }
        target.command(0, CMD_RESET);
        result
    }

    /// Chip unprotect
    ///
    /// The unprotect pulse lifts protection from every group at once, so
    /// the range is only checked for validity. All groups are protected
    /// first, then each group is verified in turn, repeating the pulse
    /// whenever a verify fails.
    fn unlock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        let geometry = target.geometry;
        geometry.check_range(offset, len)?;

        for region in geometry.regions() {
            for block in 0..region.block_count {
                let start = region.offset + block * region.block_size;
                if let Err(e) = self.protect_block(target, start) {
                    target.command(0, CMD_RESET);
                    return Err(e);
                }
            }
        }

        let expected = self.layout.replicate(u64::from(GROUP_UNPROTECTED));
        let total = geometry.num_blocks();
        let (mut region, mut block) = (0, 0);
        let mut verified = 0;
        let mut setup = true;
        let mut status = 0;
        for _ in 0..UNLOCK_ATTEMPTS {
            let start = geometry.block_start(region, block)?;
            let group = self.group_address(start, CHIP_UNPROTECT_ADDR);
            if setup {
                target.command(group, CMD_GROUP_PROTECT_SETUP);
                target.delay_us(UNPROTECT_SETUP_DELAY_US);
            }
            target.command(group, CMD_GROUP_PROTECT_VERIFY);
            target.delay_us(VERIFY_DELAY_US);
            status = target.read(group);
            if status == expected {
                verified += 1;
                if verified == total {
                    target.command(0, CMD_RESET);
                    return Ok(());
                }
                (region, block) = geometry.increment(region, block);
                setup = false;
            } else {
                setup = true;
            }
        }

        target.command(0, CMD_RESET);
        self.last_error = status;
        Err(Error::HardwareError {
            op: HardwareOp::Unlock,
            status,
        })
    }

    fn reset<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        self.reset_bank(target, offset, len);
        Ok(())
    }

    fn device_control<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        command: DeviceCommand,
    ) -> Result<DeviceResponse> {
        match command {
            DeviceCommand::GetGeometry => Ok(DeviceResponse::Geometry(target.geometry.clone())),
            DeviceCommand::GetProperties => Ok(DeviceResponse::Properties(*target.properties)),
            DeviceCommand::GetLastError => Ok(DeviceResponse::LastError(self.last_error)),
            DeviceCommand::EraseSuspend { offset } => {
                let block = target.block_base(offset)?;
                target.command(block, CMD_ERASE_SUSPEND);
                self.wait_done(target, block, HardwareOp::Suspend)?;
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::EraseResume { offset } => {
                let block = target.block_base(offset)?;
                target.command(block, CMD_ERASE_RESUME);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::EnterExtendedMode => {
                self.unlock_command(target, 0, CMD_ENTER_EXT_MODE);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::ExitExtendedMode => {
                self.unlock_command(target, 0, CMD_EXIT_EXT_MODE1);
                target.command(0, CMD_EXIT_EXT_MODE2);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::ProtectionStatus { offset } => self.protection_status(target, offset),
            DeviceCommand::EraseChip => {
                self.erase_chip(target)?;
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::SetRyBy(_) | DeviceCommand::SetConfigRegister(_) => {
                Err(Error::NotSupported)
            }
        }
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, target: &mut Target<'_, B>) -> Result<()> {
        self.unlock_command(target, 0, CMD_ERASE_SETUP);
        self.unlock_command(target, 0, CMD_ERASE_CHIP);
        let result = self.wait_done(target, 0, HardwareOp::Erase);
        target.command(0, CMD_RESET);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Status location that toggles DQ6 for a fixed number of reads
    struct ToggleBus {
        toggles: u32,
        /// DQ5 is raised from this read on
        error_from: Option<u32>,
        /// Keep toggling forever once DQ5 is up
        stuck: bool,
        reads: u32,
    }

    impl ToggleBus {
        fn new(toggles: u32) -> Self {
            Self {
                toggles,
                error_from: None,
                stuck: false,
                reads: 0,
            }
        }

        fn value(&mut self) -> u64 {
            let i = self.reads;
            self.reads += 1;
            let running = i < self.toggles || self.stuck;
            let dq6 = if running { i % 2 } else { (self.toggles.max(1) - 1) % 2 };
            let dq5 = match self.error_from {
                Some(from) if i >= from => 0x20,
                _ => 0,
            };
            u64::from(dq6) * 0x40 | dq5 | 0x01
        }
    }

    impl FlashBus for ToggleBus {
        fn read8(&mut self, _addr: u64) -> u8 {
            self.value() as u8
        }
        fn read16(&mut self, _addr: u64) -> u16 {
            self.value() as u16
        }
        fn read32(&mut self, _addr: u64) -> u32 {
            self.value() as u32
        }
        fn read64(&mut self, _addr: u64) -> u64 {
            self.value()
        }
        fn write8(&mut self, _addr: u64, _value: u8) {}
        fn write16(&mut self, _addr: u64, _value: u16) {}
        fn write32(&mut self, _addr: u64, _value: u32) {}
        fn write64(&mut self, _addr: u64, _value: u64) {}
        fn delay_us(&mut self, _us: u32) {}
    }

    fn poll(bus: &mut ToggleBus) -> Result<DeviceStatus> {
        let mut poller = Poller::new(Some(10_000));
        poll_toggle(bus, AccessWidth::X8, 0, 0x40, 0x20, &mut poller)
    }

    #[test]
    fn test_toggle_ready_after_n_plus_one_reads() {
        for n in 1..32 {
            let mut bus = ToggleBus::new(n);
            assert_eq!(poll(&mut bus), Ok(DeviceStatus::Ready));
            assert_eq!(bus.reads, n + 1, "toggling for {} reads", n);
        }
    }

    #[test]
    fn test_toggle_error_flag_then_stable() {
        // DQ5 shows up while DQ6 is still toggling, then the part settles
        let mut bus = ToggleBus::new(6);
        bus.error_from = Some(4);
        assert_eq!(poll(&mut bus), Ok(DeviceStatus::Ready));
    }

    #[test]
    fn test_toggle_error_flag_still_toggling() {
        let mut bus = ToggleBus::new(6);
        bus.error_from = Some(3);
        bus.stuck = true;
        match poll(&mut bus) {
            Ok(DeviceStatus::Error(status)) => assert_eq!(status & 0x20, 0x20),
            other => panic!("expected error, got {:?}", other),
        }
        // Four reads until DQ5 shows up, two more to decide
        assert_eq!(bus.reads, 6);
    }

    #[test]
    fn test_toggle_poll_limit() {
        let mut bus = ToggleBus::new(u32::MAX);
        let mut poller = Poller::new(Some(50));
        assert_eq!(
            poll_toggle(&mut bus, AccessWidth::X8, 0, 0x40, 0x20, &mut poller),
            Err(Error::Timeout)
        );
        assert_eq!(bus.reads, 50);
    }

    #[test]
    fn test_byte_mode_address() {
        assert_eq!(byte_mode_address(0x555), 0xAAA);
        assert_eq!(byte_mode_address(0x2AA), 0x555);
        assert_eq!(byte_mode_address(0x55), 0xAA);
    }

    #[test]
    fn test_command_address() {
        let mk = |layout| AmdDriver {
            layout,
            toggle_mask: 0,
            error_mask: 0,
            use_write_buffer: false,
            last_error: 0,
        };
        assert_eq!(mk(MemoryLayout::X16X8X1).command_address(UNLOCK1_ADDR), 0xAAA);
        assert_eq!(mk(MemoryLayout::X16X8X1).command_address(UNLOCK2_ADDR), 0x555);
        assert_eq!(mk(MemoryLayout::X16X16X1).command_address(UNLOCK1_ADDR), 0xAAA);
        assert_eq!(mk(MemoryLayout::X16X16X1).command_address(UNLOCK2_ADDR), 0x554);
        assert_eq!(mk(MemoryLayout::X16X16X2).command_address(UNLOCK1_ADDR), 0x1554);
    }
}
