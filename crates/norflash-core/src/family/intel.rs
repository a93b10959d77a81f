//! Intel / Sharp command set driver
//!
//! Intel parts report progress through a status register. Once an
//! embedded operation starts, every read returns the status register until
//! the part is put back into read array mode. Bit 7 (write state machine
//! ready) signals completion; the remaining bits are only meaningful once
//! bit 7 is set and flag the various failure causes.

use bitflags::bitflags;

use super::{
    CommandSetDriver, DeviceCommand, DeviceResponse, DeviceStatus, Poller, Target,
};
use crate::bus::FlashBus;
use crate::cfi::{CommandSet, Properties, ID_BLOCK_PROTECT_POS, ID_DEVICE_POS, ID_MANUFACTURER_POS};
use crate::error::{Error, HardwareOp, Result};
use crate::geometry::{Geometry, MemoryLayout};

// ============================================================================
// Commands
// ============================================================================

/// Return to read array mode
pub const CMD_READ_ARRAY: u8 = 0xFF;
/// Read identifier codes
pub const CMD_READ_ID: u8 = 0x90;
/// Read status register
pub const CMD_READ_STATUS: u8 = 0x70;
/// Clear status register error bits
pub const CMD_CLEAR_STATUS: u8 = 0x50;
/// Block erase setup
pub const CMD_BLOCK_ERASE: u8 = 0x20;
/// Confirm erase / buffered program / unlock
pub const CMD_CONFIRM: u8 = 0xD0;
/// Lock setup
pub const CMD_LOCK_SETUP: u8 = 0x60;
/// Lock block (after setup)
pub const CMD_LOCK_SET: u8 = 0x01;
/// Unlock block (after setup)
pub const CMD_LOCK_CLEAR: u8 = 0xD0;
/// RY/BY# configuration
pub const CMD_CONFIG: u8 = 0xB8;
/// Configuration register setup (platform flash)
pub const CMD_CONFIG_REG_SETUP: u8 = 0x60;
/// Configuration register confirm (platform flash)
pub const CMD_CONFIG_REG_CONFIRM: u8 = 0x03;
/// Reset, accepted alongside read array
pub const CMD_RESET: u8 = 0xF0;
/// Program / erase suspend
pub const CMD_SUSPEND: u8 = 0xB0;
/// Program / erase resume
pub const CMD_RESUME: u8 = 0xD0;

/// StrataFlash device code; these parts take the word count without a
/// ready check after the write-to-buffer command
const DEVICE_STRATAFLASH: u16 = 0x01;

bitflags! {
    /// Intel status register bits (one part lane)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntelStatus: u8 {
        /// Write state machine ready
        const READY             = 0x80;
        /// Erase suspended
        const ERASE_SUSPENDED   = 0x40;
        /// Erase or unlock error
        const ERASE_ERROR       = 0x20;
        /// Program or lock error
        const PROGRAM_ERROR     = 0x10;
        /// Program voltage low
        const VPP_LOW           = 0x08;
        /// Program suspended
        const PROGRAM_SUSPENDED = 0x04;
        /// Operation attempted on a locked block
        const BLOCK_LOCKED      = 0x02;
    }
}

/// Driver state for an Intel command set part
#[derive(Debug, Clone)]
pub struct IntelDriver {
    layout: MemoryLayout,
    /// Status word with only the ready bit set in every lane
    ready_mask: u64,
    /// Word count written after the write-to-buffer command (count - 1)
    buffer_word_count: u32,
    skip_buffer_ready_poll: bool,
    platform_flash: bool,
    last_error: u64,
}

impl IntelDriver {
    /// Initialize the driver and read the part identifier
    ///
    /// Intel parts are only supported in byte mode on an 8-bit bus or in
    /// word mode on a 16, 32 or 64-bit bus.
    pub fn new<B: FlashBus + ?Sized>(
        bus: &mut B,
        geometry: &Geometry,
        properties: &mut Properties,
        platform_flash: bool,
    ) -> Result<Self> {
        let layout = geometry.layout();
        match layout {
            MemoryLayout::X16X8X1
            | MemoryLayout::X16X16X1
            | MemoryLayout::X16X16X2
            | MemoryLayout::X16X16X4 => {}
            _ => {
                log::warn!("Intel: layout {} not supported", layout.name());
                return Err(Error::PartNotSupported);
            }
        }

        let buffer_size = properties.program.write_buffer_size;
        let buffer_word_count = (buffer_size / layout.bus_width()).saturating_sub(1);

        let mut driver = Self {
            layout,
            ready_mask: layout.replicate(u64::from(IntelStatus::READY.bits())),
            buffer_word_count,
            skip_buffer_ready_poll: false,
            platform_flash,
            last_error: 0,
        };

        let width = layout.access_width();
        let base = geometry.base_address();
        width.write(bus, base, driver.cmd(CMD_READ_ID));
        let manufacturer = driver.read_id(bus, base, ID_MANUFACTURER_POS);
        let device = driver.read_id(bus, base, ID_DEVICE_POS);
        width.write(bus, base, driver.cmd(CMD_READ_ARRAY));

        properties.part_id.manufacturer = manufacturer;
        properties.part_id.device = device;
        driver.skip_buffer_ready_poll = device == DEVICE_STRATAFLASH;
        log::debug!(
            "Intel: part {:04x}:{:04x}, write buffer {} bytes",
            manufacturer,
            device,
            buffer_size
        );
        Ok(driver)
    }

    /// Last failing status word
    pub fn last_error(&self) -> u64 {
        self.last_error
    }

    fn cmd(&self, command: u8) -> u64 {
        self.layout.replicate(u64::from(command))
    }

    fn status_bits(&self, bits: IntelStatus) -> u64 {
        self.layout.replicate(u64::from(bits.bits()))
    }

    fn read_id<B: FlashBus + ?Sized>(&self, bus: &mut B, base: u64, pos: u32) -> u16 {
        let word = self
            .layout
            .access_width()
            .read(bus, base + self.layout.query_address(pos));
        (word & self.layout.lane_mask()) as u16
    }

    /// Interpret one status register sample
    fn classify(&mut self, status: u64) -> DeviceStatus {
        if status == self.ready_mask {
            DeviceStatus::Ready
        } else if status & self.ready_mask != self.ready_mask {
            DeviceStatus::Busy
        } else {
            self.last_error = status;
            DeviceStatus::Error(status)
        }
    }

    /// Spin until every part reports ready, without judging error bits
    fn wait_ready<B: FlashBus + ?Sized>(
        &self,
        target: &mut Target<'_, B>,
        poller: &mut Poller,
        offset: u32,
    ) -> Result<u64> {
        loop {
            let status = target.poll(poller, offset)?;
            if status & self.ready_mask == self.ready_mask {
                return Ok(status);
            }
        }
    }

    /// Spin until ready, then fail if any error bit is set
    fn poll_status<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        op: HardwareOp,
    ) -> Result<()> {
        let mut poller = target.poller();
        let status = self.wait_ready(target, &mut poller, offset)?;
        match self.classify(status) {
            DeviceStatus::Ready => Ok(()),
            _ => {
                log::debug!("Intel: {} failed at 0x{:x}, status 0x{:x}", op, offset, status);
                Err(Error::HardwareError { op, status })
            }
        }
    }

    /// Return the banks covering `[offset, offset + len)` to read array
    ///
    /// The status register is sampled before the clear and reset go out,
    /// because they make a pending failure unobservable. Yields the first
    /// status word that was not a clean ready.
    fn reset_bank<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Option<u64> {
        let geometry = target.geometry;
        let mut pending = None;
        for region in geometry.regions_in_range(offset, len) {
            let bank = geometry.regions()[region].offset;
            target.command(bank, CMD_READ_STATUS);
            let status = target.read(bank);
            target.command(bank, CMD_CLEAR_STATUS);
            target.command(bank, CMD_RESET);
            target.command(bank, CMD_READ_ARRAY);
            if pending.is_none() && self.classify(status) != DeviceStatus::Ready {
                pending = Some(status);
            }
        }
        pending
    }

    /// Bank reset closing a data operation
    ///
    /// A part that is still busy here is reported as a failure of `op`.
    fn settle<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
        op: HardwareOp,
    ) -> Result<()> {
        match self.reset_bank(target, offset, len) {
            None => Ok(()),
            Some(status) => {
                log::debug!("Intel: bank not ready after {}, status 0x{:x}", op, status);
                Err(Error::HardwareError { op, status })
            }
        }
    }

    /// Program through the write buffer, one aligned buffer per cycle
    ///
    /// Every cycle transfers a full buffer. Bytes of the buffer that fall
    /// outside `data` are sent as `0xFF` so they stay untouched.
    fn write_buffered<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let width = self.layout.access_width();
        let step = width.bytes();
        let buffer_size = target.properties.program.write_buffer_size;
        let align_mask = target.properties.program.write_buffer_align_mask;
        let end = offset as u64 + data.len() as u64;
        let write_buffer = target.commands.write_buffer;

        let mut chunk = offset & !align_mask;
        while u64::from(chunk) < end {
            target.command(chunk, write_buffer);
            if !self.skip_buffer_ready_poll {
                let mut poller = target.poller();
                self.wait_ready(target, &mut poller, chunk)?;
            }
            target.write(chunk, self.layout.replicate(u64::from(self.buffer_word_count)));

            let mut word = chunk;
            while word < chunk + buffer_size {
                target.write(word, width.pack(word, offset, data));
                word += step;
            }

            target.command(chunk, CMD_CONFIRM);
            self.poll_status(target, chunk, HardwareOp::Program)?;
            chunk += buffer_size;
        }
        Ok(())
    }

    /// Program one bus word at a time
    fn write_words<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let width = self.layout.access_width();
        let step = width.bytes();
        let end = offset as u64 + data.len() as u64;
        let program = target.commands.program;

        let mut word = offset & !(step - 1);
        while u64::from(word) < end {
            target.command(word, program);
            target.write(word, width.pack(word, offset, data));
            self.poll_status(target, word, HardwareOp::Program)?;
            word += step;
        }
        Ok(())
    }

    /// Lock or unlock every block in the range
    fn set_lock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
        lock: bool,
    ) -> Result<()> {
        let geometry = target.geometry;
        geometry.check_range(offset, len)?;
        // A zero length still targets the block holding `offset`
        let len = len.max(1);
        let (confirm, error_bit, op) = if lock {
            (CMD_LOCK_SET, IntelStatus::PROGRAM_ERROR, HardwareOp::Lock)
        } else {
            (CMD_LOCK_CLEAR, IntelStatus::ERASE_ERROR, HardwareOp::Unlock)
        };
        let error_mask = self.status_bits(error_bit);

        let first = geometry.to_block(offset)?;
        let mut count = geometry.blocks_in_range(offset, len)?;
        let (mut region, mut block) = (first.region, first.block);
        while count > 0 {
            let start = geometry.block_start(region, block)?;
            target.command(start, CMD_CLEAR_STATUS);
            target.command(start, CMD_LOCK_SETUP);
            target.command(start, confirm);
            target.command(start, CMD_READ_STATUS);
            let mut poller = target.poller();
            let status = self.wait_ready(target, &mut poller, start)?;
            if status & error_mask != 0 {
                self.last_error = status;
                target.command(start, CMD_CLEAR_STATUS);
                target.command(start, CMD_READ_ARRAY);
                return Err(Error::HardwareError { op, status });
            }
            (region, block) = geometry.increment(region, block);
            count -= 1;
        }
        self.settle(target, offset, len, op)
    }

    fn erase_suspend<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
    ) -> Result<()> {
        let block = target.block_base(offset)?;
        target.command(block, CMD_SUSPEND);
        target.command(block, CMD_READ_STATUS);
        let mut poller = target.poller();
        let status = self.wait_ready(target, &mut poller, block)?;
        let errors = self.status_bits(IntelStatus::ERASE_ERROR | IntelStatus::PROGRAM_ERROR);
        target.command(block, CMD_READ_ARRAY);
        if status & errors != 0 {
            self.last_error = status;
            return Err(Error::HardwareError {
                op: HardwareOp::Suspend,
                status,
            });
        }
        Ok(())
    }

    fn protection_status<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
    ) -> Result<DeviceResponse> {
        let geometry = target.geometry;
        let pos = geometry.to_block(offset)?;
        let start = geometry.block_start(pos.region, pos.block)?;
        target.command(start, CMD_READ_ID);
        let status = target.read(start + self.layout.query_address(ID_BLOCK_PROTECT_POS) as u32);
        target.command(start, CMD_READ_ARRAY);
        if status & self.layout.replicate(0x01) != 0 {
            Err(Error::BlockProtected)
        } else {
            Ok(DeviceResponse::Unprotected)
        }
    }
}

impl CommandSetDriver for IntelDriver {
    fn read<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        target.geometry.check_range(offset, buf.len())?;
        self.settle(target, offset, buf.len(), HardwareOp::Reset)?;
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
        let block = target.block_base(offset)?;
        target.command(block, CMD_CLEAR_STATUS);
        let result = if target.properties.program.write_buffer_size > 0 {
            self.write_buffered(target, offset, data)
        } else {
            self.write_words(target, offset, data)
        };
        match result {
            Ok(()) => target.command(block, CMD_READ_ARRAY),
            // Clear the latched failure
            Err(_) => {
                let _ = self.reset_bank(target, offset, data.len());
            }
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

        target.command(geometry.block_start(region, block)?, CMD_CLEAR_STATUS);
        while remaining > 0 {
            let batch = remaining.min(queue);
            let mut last = 0;
            for _ in 0..batch {
                last = geometry.block_start(region, block)?;
                target.command(last, CMD_BLOCK_ERASE);
                target.command(last, CMD_CONFIRM);
                (region, block) = geometry.increment(region, block);
            }
            if let Err(e) = self.poll_status(target, last, HardwareOp::Erase) {
                // Report the erase failure, not what the reset finds
                let _ = self.reset_bank(target, offset, len);
                return Err(e);
            }
            remaining -= batch;
        }
        self.settle(target, offset, len, HardwareOp::Erase)
    }

    fn lock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        self.set_lock(target, offset, len, true)
    }

    fn unlock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        self.set_lock(target, offset, len, false)
    }

    fn reset<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        match self.reset_bank(target, offset, len) {
            None => Ok(()),
            Some(status) if status & self.ready_mask != self.ready_mask => Err(Error::Busy),
            Some(status) => Err(Error::HardwareError {
                op: HardwareOp::Reset,
                status,
            }),
        }
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
            DeviceCommand::SetRyBy(mode) => {
                if target.properties.part_id.command_set != CommandSet::IntelExtended {
                    return Err(Error::NotSupported);
                }
                target.command(0, CMD_CONFIG);
                target.command(0, mode.code());
                target.command(0, CMD_READ_ARRAY);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::SetConfigRegister(value) => {
                if !self.platform_flash {
                    return Err(Error::NotSupported);
                }
                // The register value is presented on the address lines
                let offset = u32::from(value) * self.layout.bus_width();
                target.command(offset, CMD_CONFIG_REG_SETUP);
                target.command(offset, CMD_CONFIG_REG_CONFIRM);
                target.command(0, CMD_READ_ARRAY);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::EraseSuspend { offset } => {
                self.erase_suspend(target, offset)?;
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::EraseResume { offset } => {
                let block = target.block_base(offset)?;
                target.command(block, CMD_RESUME);
                Ok(DeviceResponse::Done)
            }
            DeviceCommand::ProtectionStatus { offset } => self.protection_status(target, offset),
            DeviceCommand::EnterExtendedMode
            | DeviceCommand::ExitExtendedMode
            | DeviceCommand::EraseChip => Err(Error::NotSupported),
        }
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, _target: &mut Target<'_, B>) -> Result<()> {
        Err(Error::NotSupported)
    }
}
