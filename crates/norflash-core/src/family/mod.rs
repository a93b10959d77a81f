//! Command set drivers
//!
//! Each vendor family implements [`CommandSetDriver`]. The concrete driver
//! is chosen once, from the CFI command set ID, and stored in a [`Driver`]
//! enum that forwards every call with a plain `match`.
//!
//! Drivers never own the bus or the geometry. The facade lends them a
//! [`Target`] for the duration of each call.

pub mod amd;
pub mod intel;

pub use amd::AmdDriver;
pub use intel::IntelDriver;

use crate::bus::{AccessWidth, FlashBus};
use crate::cfi::{Family, Properties};
use crate::error::{Error, Result};
use crate::geometry::Geometry;

/// Buffered-write and single-program command codes
///
/// Most parts use the standard codes of their family; the platform flash
/// variant of the Intel command set shifts them by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCodes {
    /// Write-to-buffer setup command
    pub write_buffer: u8,
    /// Single word program command
    pub program: u8,
}

impl CommandCodes {
    /// Intel / Sharp command set
    pub const INTEL: Self = Self {
        write_buffer: 0xE8,
        program: 0x40,
    };

    /// Intel command set as implemented by platform flash parts
    pub const PLATFORM_FLASH: Self = Self {
        write_buffer: 0xE9,
        program: 0x41,
    };

    /// AMD / Spansion command set
    pub const AMD: Self = Self {
        write_buffer: 0x25,
        program: 0xA0,
    };

    /// Codes for a family
    pub const fn for_family(family: Family, platform_flash: bool) -> Self {
        match family {
            Family::Intel if platform_flash => Self::PLATFORM_FLASH,
            Family::Intel => Self::INTEL,
            Family::Amd => Self::AMD,
        }
    }
}

/// Everything a driver needs to touch the hardware for one call
pub struct Target<'a, B: ?Sized> {
    /// Raw bus
    pub bus: &'a mut B,
    /// Device geometry
    pub geometry: &'a Geometry,
    /// Device properties
    pub properties: &'a Properties,
    /// Program command codes
    pub commands: CommandCodes,
    /// Give up polling after this many status reads (`None` waits forever)
    pub poll_limit: Option<u32>,
}

impl<B: FlashBus + ?Sized> Target<'_, B> {
    /// Physical address of a device offset
    pub fn addr(&self, offset: u32) -> u64 {
        self.geometry.address(offset)
    }

    /// Width of one bus cycle
    pub fn width(&self) -> AccessWidth {
        self.geometry.layout().access_width()
    }

    /// Physical address of the bus word holding `offset`
    ///
    /// Wide cycles must land on a bus word boundary; anything finer than
    /// that is not addressable on the flash side anyway.
    pub fn word_addr(&self, offset: u32) -> u64 {
        let mask = self.geometry.layout().bus_width() - 1;
        self.addr(offset & !mask)
    }

    /// Start of the erase block holding `offset`
    pub fn block_base(&self, offset: u32) -> Result<u32> {
        let pos = self.geometry.to_block(offset)?;
        Ok(offset - pos.offset)
    }

    /// Read one bus word at a device offset
    pub fn read(&mut self, offset: u32) -> u64 {
        let addr = self.word_addr(offset);
        self.width().read(&mut *self.bus, addr)
    }

    /// Write one bus word at a device offset
    pub fn write(&mut self, offset: u32, value: u64) {
        let addr = self.word_addr(offset);
        self.width().write(&mut *self.bus, addr, value)
    }

    /// Send a command byte to every interleaved part
    pub fn command(&mut self, offset: u32, command: u8) {
        let value = self.geometry.layout().replicate(u64::from(command));
        self.write(offset, value)
    }

    /// Start a polling loop honouring the configured limit
    pub fn poller(&self) -> Poller {
        Poller::new(self.poll_limit)
    }

    /// Read one status word through `poller`
    pub fn poll(&mut self, poller: &mut Poller, offset: u32) -> Result<u64> {
        let addr = self.word_addr(offset);
        let width = self.width();
        poller.read(&mut *self.bus, width, addr)
    }

    /// Wait at least `us` microseconds
    pub fn delay_us(&mut self, us: u32) {
        self.bus.delay_us(us)
    }
}

/// Outcome of one status sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Embedded operation finished successfully
    Ready,
    /// Embedded operation still running
    Busy,
    /// Embedded operation finished with an error; carries the status word
    Error(u64),
}

/// Status reader with an optional read budget
///
/// Without a limit the loops that use it spin until the device answers,
/// which is how the hardware expects to be driven. A limit turns a hung
/// device into [`Error::Timeout`].
#[derive(Debug)]
pub struct Poller {
    limit: Option<u32>,
    reads: u32,
}

impl Poller {
    /// Create a poller that allows `limit` reads
    pub const fn new(limit: Option<u32>) -> Self {
        Self { limit, reads: 0 }
    }

    /// Read one status word
    pub fn read<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        width: AccessWidth,
        addr: u64,
    ) -> Result<u64> {
        if let Some(limit) = self.limit {
            if self.reads >= limit {
                log::warn!("status polling at 0x{:x} gave up after {} reads", addr, limit);
                return Err(Error::Timeout);
            }
        }
        self.reads += 1;
        Ok(width.read(bus, addr))
    }

    /// Number of reads issued so far
    pub fn reads(&self) -> u32 {
        self.reads
    }
}

/// Ready/busy output configuration (Intel extended command set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RyByMode {
    /// Level mode, low while busy
    Level,
    /// Pulse on erase completion
    PulseOnErase,
    /// Pulse on program completion
    PulseOnWrite,
    /// Pulse on erase or program completion
    PulseOnBoth,
}

impl RyByMode {
    /// Configuration code sent after the configuration command
    pub const fn code(self) -> u8 {
        match self {
            Self::Level => 0x00,
            Self::PulseOnErase => 0x01,
            Self::PulseOnWrite => 0x02,
            Self::PulseOnBoth => 0x03,
        }
    }
}

/// Commands accepted by [`CommandSetDriver::device_control`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Return a copy of the geometry
    GetGeometry,
    /// Return a copy of the properties
    GetProperties,
    /// Return the last failing status word
    GetLastError,
    /// Configure the RY/BY# output
    SetRyBy(RyByMode),
    /// Write the platform flash configuration register
    SetConfigRegister(u16),
    /// Suspend the erase running in the bank holding `offset`
    EraseSuspend {
        /// Any offset inside the erasing bank
        offset: u32,
    },
    /// Resume a suspended erase
    EraseResume {
        /// Any offset inside the suspended bank
        offset: u32,
    },
    /// Switch to the secured silicon sector
    EnterExtendedMode,
    /// Leave the secured silicon sector
    ExitExtendedMode,
    /// Query whether the block holding `offset` is protected
    ProtectionStatus {
        /// Any offset inside the block
        offset: u32,
    },
    /// Erase the whole device
    EraseChip,
}

/// Data returned by [`CommandSetDriver::device_control`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResponse {
    /// Command completed, nothing to report
    Done,
    /// Device geometry
    Geometry(Geometry),
    /// Device properties
    Properties(Properties),
    /// Last failing status word (0 if none)
    LastError(u64),
    /// The queried block is not protected
    Unprotected,
}

/// Operations every command set family provides
///
/// Offsets are relative to the start of the device and lengths are in
/// bytes. Every call blocks until the hardware reports completion.
pub trait CommandSetDriver {
    /// Copy `buf.len()` bytes starting at `offset` out of the array
    fn read<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Program `data` at `offset`
    ///
    /// Programming only clears bits; the range must have been erased. On
    /// failure the range may be partially programmed.
    fn write<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Erase every block touched by `[offset, offset + len)`
    fn erase<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()>;

    /// Protect every block touched by the range
    fn lock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()>;

    /// Remove protection from the range
    fn unlock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()>;

    /// Return the banks covering the range to read array mode
    fn reset<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()>;

    /// Run a family specific command
    fn device_control<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        command: DeviceCommand,
    ) -> Result<DeviceResponse>;

    /// Erase the whole device in one operation
    fn erase_chip<B: FlashBus + ?Sized>(&mut self, target: &mut Target<'_, B>) -> Result<()>;
}

/// The family driver selected for an instance
#[derive(Debug, Clone)]
pub enum Driver {
    /// Intel / Sharp status-register driver
    Intel(IntelDriver),
    /// AMD / Spansion toggle-bit driver
    Amd(AmdDriver),
}

impl Driver {
    /// Pick and initialize the driver for the decoded part
    ///
    /// Reads the part identifier and stores it in `properties`.
    pub fn select<B: FlashBus + ?Sized>(
        bus: &mut B,
        geometry: &Geometry,
        properties: &mut Properties,
        platform_flash: bool,
    ) -> Result<Self> {
        match properties.part_id.command_set.family() {
            Some(Family::Intel) => Ok(Self::Intel(IntelDriver::new(
                bus,
                geometry,
                properties,
                platform_flash,
            )?)),
            Some(Family::Amd) => Ok(Self::Amd(AmdDriver::new(bus, geometry, properties)?)),
            None => {
                log::warn!(
                    "no driver for command set 0x{:04x}",
                    properties.part_id.command_set.id()
                );
                Err(Error::PartNotSupported)
            }
        }
    }

    /// Family of the selected driver
    pub fn family(&self) -> Family {
        match self {
            Self::Intel(_) => Family::Intel,
            Self::Amd(_) => Family::Amd,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            Driver::Intel($d) => $call,
            Driver::Amd($d) => $call,
        }
    };
}

impl CommandSetDriver for Driver {
    fn read<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        dispatch!(self, d => d.read(target, offset, buf))
    }

    fn write<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        dispatch!(self, d => d.write(target, offset, data))
    }

    fn erase<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        dispatch!(self, d => d.erase(target, offset, len))
    }

    fn lock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        dispatch!(self, d => d.lock(target, offset, len))
    }

    fn unlock<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        dispatch!(self, d => d.unlock(target, offset, len))
    }

    fn reset<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        offset: u32,
        len: usize,
    ) -> Result<()> {
        dispatch!(self, d => d.reset(target, offset, len))
    }

    fn device_control<B: FlashBus + ?Sized>(
        &mut self,
        target: &mut Target<'_, B>,
        command: DeviceCommand,
    ) -> Result<DeviceResponse> {
        dispatch!(self, d => d.device_control(target, command))
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, target: &mut Target<'_, B>) -> Result<()> {
        dispatch!(self, d => d.erase_chip(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    impl FlashBus for Fixed {
        fn read8(&mut self, _addr: u64) -> u8 {
            self.0 as u8
        }
        fn read16(&mut self, _addr: u64) -> u16 {
            self.0 as u16
        }
        fn read32(&mut self, _addr: u64) -> u32 {
            self.0 as u32
        }
        fn read64(&mut self, _addr: u64) -> u64 {
            self.0
        }
        fn write8(&mut self, _addr: u64, _value: u8) {}
        fn write16(&mut self, _addr: u64, _value: u16) {}
        fn write32(&mut self, _addr: u64, _value: u32) {}
        fn write64(&mut self, _addr: u64, _value: u64) {}
        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn test_poller_limit() {
        let mut bus = Fixed(0x1234);
        let mut poller = Poller::new(Some(2));
        assert_eq!(poller.read(&mut bus, AccessWidth::X8, 0), Ok(0x34));
        assert_eq!(poller.read(&mut bus, AccessWidth::X16, 0), Ok(0x1234));
        assert_eq!(poller.read(&mut bus, AccessWidth::X16, 0), Err(Error::Timeout));
        assert_eq!(poller.reads(), 2);
    }

    #[test]
    fn test_poller_unbounded() {
        let mut bus = Fixed(0);
        let mut poller = Poller::new(None);
        for _ in 0..10_000 {
            assert!(poller.read(&mut bus, AccessWidth::X32, 0).is_ok());
        }
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(CommandCodes::for_family(Family::Intel, false), CommandCodes::INTEL);
        assert_eq!(
            CommandCodes::for_family(Family::Intel, true),
            CommandCodes::PLATFORM_FLASH
        );
        assert_eq!(CommandCodes::for_family(Family::Amd, true), CommandCodes::AMD);
    }
}
