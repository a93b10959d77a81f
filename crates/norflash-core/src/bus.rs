//! Raw bus access to a memory-mapped flash window
//!
//! NOR flash is driven entirely through loads and stores on its memory
//! window. [`FlashBus`] is the hardware boundary of this crate: a back-end
//! provides single volatile accesses of each width plus a microsecond delay,
//! and the drivers build every command sequence on top of it.
//!
//! [`AccessWidth`] lets the algorithms stay width agnostic. Values travel
//! as `u64` and are truncated to the active width at the bus.

/// Volatile access to the physical flash window
///
/// Addresses are absolute physical addresses. Every method must perform
/// exactly one bus cycle of the stated width, uncached and ordered with
/// respect to the other accesses made through the same bus.
pub trait FlashBus {
    /// Read one byte
    fn read8(&mut self, addr: u64) -> u8;

    /// Read one 16-bit word
    fn read16(&mut self, addr: u64) -> u16;

    /// Read one 32-bit word
    fn read32(&mut self, addr: u64) -> u32;

    /// Read one 64-bit word
    fn read64(&mut self, addr: u64) -> u64;

    /// Write one byte
    fn write8(&mut self, addr: u64, value: u8);

    /// Write one 16-bit word
    fn write16(&mut self, addr: u64, value: u16);

    /// Write one 32-bit word
    fn write32(&mut self, addr: u64, value: u32);

    /// Write one 64-bit word
    fn write64(&mut self, addr: u64, value: u64);

    /// Busy-wait for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Copy a run of bytes out of the window
    ///
    /// The default implementation issues one byte read per byte. Back-ends
    /// with a direct mapping may override it with a bulk volatile copy.
    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read8(addr + i as u64);
        }
    }
}

impl<B: FlashBus + ?Sized> FlashBus for &mut B {
    fn read8(&mut self, addr: u64) -> u8 {
        (**self).read8(addr)
    }

    fn read16(&mut self, addr: u64) -> u16 {
        (**self).read16(addr)
    }

    fn read32(&mut self, addr: u64) -> u32 {
        (**self).read32(addr)
    }

    fn read64(&mut self, addr: u64) -> u64 {
        (**self).read64(addr)
    }

    fn write8(&mut self, addr: u64, value: u8) {
        (**self).write8(addr, value)
    }

    fn write16(&mut self, addr: u64, value: u16) {
        (**self).write16(addr, value)
    }

    fn write32(&mut self, addr: u64, value: u32) {
        (**self).write32(addr, value)
    }

    fn write64(&mut self, addr: u64, value: u64) {
        (**self).write64(addr, value)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
        (**self).read_bytes(addr, buf)
    }
}

/// Width of a single bus cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessWidth {
    /// 8-bit accesses
    X8,
    /// 16-bit accesses
    X16,
    /// 32-bit accesses
    X32,
    /// 64-bit accesses
    X64,
}

impl AccessWidth {
    /// Width for a bus of `bytes` bytes, if it is one of 1, 2, 4 or 8
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::X8),
            2 => Some(Self::X16),
            4 => Some(Self::X32),
            8 => Some(Self::X64),
            _ => None,
        }
    }

    /// Number of bytes moved per cycle
    pub const fn bytes(self) -> u32 {
        match self {
            Self::X8 => 1,
            Self::X16 => 2,
            Self::X32 => 4,
            Self::X64 => 8,
        }
    }

    /// Mask covering every bit of a word of this width
    pub const fn mask(self) -> u64 {
        match self {
            Self::X8 => 0xFF,
            Self::X16 => 0xFFFF,
            Self::X32 => 0xFFFF_FFFF,
            Self::X64 => u64::MAX,
        }
    }

    /// Read one word of this width, zero-extended
    #[inline]
    pub fn read<B: FlashBus + ?Sized>(self, bus: &mut B, addr: u64) -> u64 {
        match self {
            Self::X8 => u64::from(bus.read8(addr)),
            Self::X16 => u64::from(bus.read16(addr)),
            Self::X32 => u64::from(bus.read32(addr)),
            Self::X64 => bus.read64(addr),
        }
    }

    /// Write the low bits of `value` as one word of this width
    #[inline]
    pub fn write<B: FlashBus + ?Sized>(self, bus: &mut B, addr: u64, value: u64) {
        match self {
            Self::X8 => bus.write8(addr, value as u8),
            Self::X16 => bus.write16(addr, value as u16),
            Self::X32 => bus.write32(addr, value as u32),
            Self::X64 => bus.write64(addr, value),
        }
    }

    /// Assemble the word that lands at `word_offset` when `data` is
    /// programmed starting at `data_offset`
    ///
    /// Byte lanes outside of `data` are filled with `0xFF`, which leaves the
    /// corresponding flash cells untouched. Lanes are packed little endian,
    /// matching how the CPU lays a wide store onto the byte-addressed window.
    pub fn pack(self, word_offset: u32, data_offset: u32, data: &[u8]) -> u64 {
        let mut word = 0u64;
        for lane in 0..self.bytes() {
            let pos = word_offset + lane;
            let byte = pos
                .checked_sub(data_offset)
                .and_then(|i| data.get(i as usize).copied())
                .unwrap_or(0xFF);
            word |= u64::from(byte) << (8 * lane);
        }
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_from_bytes() {
        assert_eq!(AccessWidth::from_bytes(1), Some(AccessWidth::X8));
        assert_eq!(AccessWidth::from_bytes(8), Some(AccessWidth::X64));
        assert_eq!(AccessWidth::from_bytes(3), None);
        assert_eq!(AccessWidth::X32.mask(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_pack_pads_outside_data() {
        let data = [0x11, 0x22, 0x33];
        // Data starts one byte into the word
        assert_eq!(AccessWidth::X32.pack(0x100, 0x101, &data), 0x3322_11FF);
        // Word past the end of the data
        assert_eq!(AccessWidth::X16.pack(0x104, 0x101, &data), 0xFFFF);
        // Word straddling the tail
        assert_eq!(AccessWidth::X16.pack(0x102, 0x101, &data), 0x3322);
        assert_eq!(AccessWidth::X8.pack(0x103, 0x101, &data), 0x33);
    }
}
