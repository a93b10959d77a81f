//! norflash-physmap - Memory mapped NOR flash behind /dev/mem
//!
//! [`PhysmapBus`] maps a physical flash window and implements
//! [`FlashBus`] on it, so the flash engine can drive a part wired straight
//! onto the CPU bus (boot flash, FPGA or SoC external bus windows).
//!
//! Bus addresses handed to [`FlashBus`] are physical addresses inside the
//! window; use the window base as the flash base address.
//!
//! ```no_run
//! use norflash_core::flash::{FlashConfig, NorFlash};
//! use norflash_physmap::PhysmapBus;
//!
//! let bus = PhysmapBus::open(0xFF00_0000, 0x100_0000)?;
//! let flash = NorFlash::initialize(bus, FlashConfig::new(0xFF00_0000, 2))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod physmap;

use std::time::{Duration, Instant};

use norflash_core::bus::FlashBus;

pub use error::PhysmapError;
pub use physmap::PhysMap;

/// Delays below this are spun instead of slept
const SPIN_LIMIT_US: u32 = 100;

/// [`FlashBus`] over a mapped physical window
#[derive(Debug)]
pub struct PhysmapBus {
    map: PhysMap,
}

impl PhysmapBus {
    /// Map `size` bytes of flash starting at physical address `base`
    pub fn open(base: u64, size: usize) -> Result<Self, PhysmapError> {
        Ok(Self {
            map: PhysMap::new(base, size)?,
        })
    }

    /// First physical address of the window
    pub fn base(&self) -> u64 {
        self.map.phys_addr()
    }

    /// Size of the window in bytes
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Offset of an access of `len` bytes, if it falls inside the window
    /// and is naturally aligned
    fn offset(&self, addr: u64, len: usize) -> Option<usize> {
        if addr % len as u64 != 0 {
            return None;
        }
        let offset = usize::try_from(addr.checked_sub(self.map.phys_addr())?).ok()?;
        (offset.checked_add(len)? <= self.map.len()).then_some(offset)
    }

    fn read<T: Copy + Default>(&self, addr: u64) -> T {
        match self.offset(addr, core::mem::size_of::<T>()) {
            Some(offset) => self.map.read(offset),
            None => {
                log::warn!("physmap: read at {:#x} unaligned or outside the window", addr);
                T::default()
            }
        }
    }

    fn write<T: Copy>(&self, addr: u64, value: T) {
        match self.offset(addr, core::mem::size_of::<T>()) {
            Some(offset) => self.map.write(offset, value),
            None => log::warn!("physmap: write at {:#x} unaligned or outside the window", addr),
        }
    }
}

impl FlashBus for PhysmapBus {
    fn read8(&mut self, addr: u64) -> u8 {
        self.read(addr)
    }

    fn read16(&mut self, addr: u64) -> u16 {
        self.read(addr)
    }

    fn read32(&mut self, addr: u64) -> u32 {
        self.read(addr)
    }

    fn read64(&mut self, addr: u64) -> u64 {
        self.read(addr)
    }

    fn write8(&mut self, addr: u64, value: u8) {
        self.write(addr, value)
    }

    fn write16(&mut self, addr: u64, value: u16) {
        self.write(addr, value)
    }

    fn write32(&mut self, addr: u64, value: u32) {
        self.write(addr, value)
    }

    fn write64(&mut self, addr: u64, value: u64) {
        self.write(addr, value)
    }

    fn delay_us(&mut self, us: u32) {
        if us < SPIN_LIMIT_US {
            let deadline = Instant::now() + Duration::from_micros(u64::from(us));
            while Instant::now() < deadline {
                core::hint::spin_loop();
            }
        } else {
            std::thread::sleep(Duration::from_micros(u64::from(us)));
        }
    }
}
