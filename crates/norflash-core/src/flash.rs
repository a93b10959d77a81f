//! Flash controller facade
//!
//! [`NorFlash`] owns the bus and everything learned about the part. It runs
//! the CFI probe, selects the family driver and forwards the public
//! operations to it. Every operation fails with [`Error::NotInitialized`]
//! until [`NorFlash::init`] has succeeded.

use crate::bus::FlashBus;
use crate::cfi::{self, Properties};
use crate::error::{Error, Result};
use crate::family::{CommandCodes, CommandSetDriver, Driver, Target};
use crate::geometry::Geometry;

pub use crate::family::{DeviceCommand, DeviceResponse, RyByMode};

/// How the flash is wired to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashConfig {
    /// Physical address of the first byte of the array
    pub base_address: u64,
    /// Bus width in bytes (1, 2, 4 or 8)
    pub bus_width: u8,
    /// Intel platform flash part with shifted program command codes
    pub platform_flash: bool,
    /// Give up status polling after this many reads
    pub poll_limit: Option<u32>,
}

impl FlashConfig {
    /// Standard part at `base_address` on a `bus_width` byte bus
    pub const fn new(base_address: u64, bus_width: u8) -> Self {
        Self {
            base_address,
            bus_width,
            platform_flash: false,
            poll_limit: None,
        }
    }

    /// Select the platform flash command codes
    pub const fn with_platform_flash(mut self, platform_flash: bool) -> Self {
        self.platform_flash = platform_flash;
        self
    }

    /// Bound every polling loop to `limit` status reads
    pub const fn with_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.poll_limit = limit;
        self
    }
}

#[derive(Debug)]
struct FlashState {
    geometry: Geometry,
    properties: Properties,
    commands: CommandCodes,
    driver: Driver,
}

/// A CFI flash device behind a [`FlashBus`]
#[derive(Debug)]
pub struct NorFlash<B> {
    bus: B,
    config: FlashConfig,
    state: Option<FlashState>,
}

impl<B: FlashBus> NorFlash<B> {
    /// Wrap a bus without touching the hardware
    pub fn new(bus: B, config: FlashConfig) -> Self {
        Self {
            bus,
            config,
            state: None,
        }
    }

    /// Wrap a bus and initialize the device in one step
    pub fn initialize(bus: B, config: FlashConfig) -> Result<Self> {
        let mut flash = Self::new(bus, config);
        flash.init()?;
        Ok(flash)
    }

    /// Probe the part and select its driver
    ///
    /// On failure the instance stays uninitialized.
    pub fn init(&mut self) -> Result<()> {
        self.state = None;
        let FlashConfig {
            base_address,
            bus_width,
            platform_flash,
            ..
        } = self.config;

        if bus_width == 0 || base_address % u64::from(bus_width) != 0 {
            log::warn!(
                "base address 0x{:x} not aligned to a {} byte bus",
                base_address,
                bus_width
            );
            return Err(Error::AlignmentError);
        }

        let cfi::CfiInfo {
            geometry,
            mut properties,
        } = cfi::probe(&mut self.bus, base_address, bus_width)?;
        let driver = Driver::select(&mut self.bus, &geometry, &mut properties, platform_flash)?;
        let commands = CommandCodes::for_family(driver.family(), platform_flash);

        log::info!(
            "Found CFI flash {:04x}:{:04x} ({:?}), {} KiB in {} erase region(s), layout {}",
            properties.part_id.manufacturer,
            properties.part_id.device,
            properties.part_id.command_set,
            geometry.device_size() / 1024,
            geometry.num_regions(),
            geometry.layout().name()
        );

        self.state = Some(FlashState {
            geometry,
            properties,
            commands,
            driver,
        });
        Ok(())
    }

    /// True once initialization has succeeded
    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// Configuration this instance was created with
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Device geometry, if initialized
    pub fn geometry(&self) -> Option<&Geometry> {
        self.state.as_ref().map(|s| &s.geometry)
    }

    /// Device properties, if initialized
    pub fn properties(&self) -> Option<&Properties> {
        self.state.as_ref().map(|s| &s.properties)
    }

    /// Borrow the underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give the bus back
    pub fn into_inner(self) -> B {
        self.bus
    }

    fn with_driver<T>(
        &mut self,
        f: impl FnOnce(&mut Driver, &mut Target<'_, B>) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let mut target = Target {
            bus: &mut self.bus,
            geometry: &state.geometry,
            properties: &state.properties,
            commands: state.commands,
            poll_limit: self.config.poll_limit,
        };
        f(&mut state.driver, &mut target)
    }

    /// Read `buf.len()` bytes starting at `offset`
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.with_driver(|d, t| d.read(t, offset, buf))
    }

    /// Program `data` at `offset`
    ///
    /// The range must have been erased. A failed write may leave the range
    /// partially programmed.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.with_driver(|d, t| d.write(t, offset, data))
    }

    /// Erase every block touched by `[offset, offset + len)`
    pub fn erase(&mut self, offset: u32, len: usize) -> Result<()> {
        self.with_driver(|d, t| d.erase(t, offset, len))
    }

    /// Protect every block touched by the range
    pub fn lock(&mut self, offset: u32, len: usize) -> Result<()> {
        self.with_driver(|d, t| d.lock(t, offset, len))
    }

    /// Remove protection from the range
    ///
    /// AMD parts can only unprotect the whole chip at once.
    pub fn unlock(&mut self, offset: u32, len: usize) -> Result<()> {
        self.with_driver(|d, t| d.unlock(t, offset, len))
    }

    /// Return the whole device to read array mode
    pub fn reset(&mut self) -> Result<()> {
        self.with_driver(|d, t| {
            let size = t.geometry.device_size() as usize;
            d.reset(t, 0, size)
        })
    }

    /// Run a device control command
    pub fn device_control(&mut self, command: DeviceCommand) -> Result<DeviceResponse> {
        self.with_driver(|d, t| d.device_control(t, command))
    }

    /// Erase the whole device in one operation
    pub fn erase_chip(&mut self) -> Result<()> {
        self.with_driver(|d, t| d.erase_chip(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bus with nothing on it: reads float high
    #[derive(Default)]
    struct EmptyBus {
        writes: u32,
    }

    impl FlashBus for EmptyBus {
        fn read8(&mut self, _addr: u64) -> u8 {
            0xFF
        }
        fn read16(&mut self, _addr: u64) -> u16 {
            0xFFFF
        }
        fn read32(&mut self, _addr: u64) -> u32 {
            0xFFFF_FFFF
        }
        fn read64(&mut self, _addr: u64) -> u64 {
            u64::MAX
        }
        fn write8(&mut self, _addr: u64, _value: u8) {
            self.writes += 1;
        }
        fn write16(&mut self, _addr: u64, _value: u16) {
            self.writes += 1;
        }
        fn write32(&mut self, _addr: u64, _value: u32) {
            self.writes += 1;
        }
        fn write64(&mut self, _addr: u64, _value: u64) {
            self.writes += 1;
        }
        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn test_config_builder() {
        let config = FlashConfig::new(0x1000, 2)
            .with_platform_flash(true)
            .with_poll_limit(Some(10));
        assert_eq!(config.base_address, 0x1000);
        assert_eq!(config.bus_width, 2);
        assert!(config.platform_flash);
        assert_eq!(config.poll_limit, Some(10));
        assert_eq!(FlashConfig::new(0, 1).poll_limit, None);
    }

    #[test]
    fn test_operations_need_init() {
        let mut flash = NorFlash::new(EmptyBus::default(), FlashConfig::new(0, 2));
        let mut buf = [0u8; 4];
        assert!(!flash.is_ready());
        assert_eq!(flash.read(0, &mut buf), Err(Error::NotInitialized));
        assert_eq!(flash.write(0, &buf), Err(Error::NotInitialized));
        assert_eq!(flash.erase(0, 1), Err(Error::NotInitialized));
        assert_eq!(flash.lock(0, 1), Err(Error::NotInitialized));
        assert_eq!(flash.unlock(0, 1), Err(Error::NotInitialized));
        assert_eq!(flash.reset(), Err(Error::NotInitialized));
        assert_eq!(flash.erase_chip(), Err(Error::NotInitialized));
        assert_eq!(
            flash.device_control(DeviceCommand::GetGeometry),
            Err(Error::NotInitialized)
        );
        assert!(flash.geometry().is_none());
        assert!(flash.properties().is_none());
        // Nothing reached the bus
        assert_eq!(flash.bus().writes, 0);
    }

    #[test]
    fn test_misaligned_base() {
        let result = NorFlash::initialize(EmptyBus::default(), FlashConfig::new(0x1001, 2));
        assert_eq!(result.err(), Some(Error::AlignmentError));

        let result = NorFlash::initialize(EmptyBus::default(), FlashConfig::new(0x1000, 0));
        assert_eq!(result.err(), Some(Error::AlignmentError));
    }

    #[test]
    fn test_no_part_present() {
        let mut flash = NorFlash::new(EmptyBus::default(), FlashConfig::new(0x1000, 2));
        assert_eq!(flash.init(), Err(Error::PartNotSupported));
        assert!(!flash.is_ready());
        assert!(flash.bus().writes > 0);
    }

    #[test]
    fn test_unknown_bus_width() {
        let result = NorFlash::initialize(EmptyBus::default(), FlashConfig::new(0x3000, 3));
        assert_eq!(result.err(), Some(Error::PartNotSupported));
    }
}
