//! Physical memory mapping of the flash window
//!
//! Parallel NOR flash is memory mapped, so reads and command cycles are
//! plain loads and stores into the mapped window. Every access is
//! volatile and uses exactly the requested width; the parts decode the
//! byte lanes of each bus cycle.
//!
//! # Safety
//!
//! Accessing physical memory requires root privileges. Mapping a range
//! that is not a flash window (RAM, unrelated MMIO) can crash the machine.

use crate::error::PhysmapError;

/// A mapped range of physical memory
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct PhysMap {
    /// Start of the requested range inside the mapping
    ptr: *mut u8,
    /// Requested length
    len: usize,
    /// Length of the page aligned mapping
    map_size: usize,
    /// Distance from the start of the mapping to `ptr`
    page_offset: usize,
    phys_addr: u64,
}

#[cfg(target_os = "linux")]
impl PhysMap {
    /// Map `size` bytes of physical memory starting at `phys_addr`
    pub fn new(phys_addr: u64, size: usize) -> Result<Self, PhysmapError> {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        if size == 0 || phys_addr.checked_add(size as u64).is_none() {
            return Err(PhysmapError::InvalidWindow {
                address: phys_addr,
                size,
            });
        }

        // O_SYNC keeps the mapping uncached
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(PhysmapError::Open)?;

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let page_mask = page_size - 1;
        let page_offset = (phys_addr as usize) & page_mask;
        let aligned_addr = phys_addr & !(page_mask as u64);
        let map_size = (size + page_offset + page_mask) & !page_mask;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                aligned_addr as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PhysmapError::MemoryMap {
                address: phys_addr,
                size,
                source: std::io::Error::last_os_error(),
            });
        }

        log::debug!(
            "physmap: mapped {:#x} bytes at {:#x} ({:#x} byte mapping)",
            size,
            phys_addr,
            map_size
        );

        Ok(Self {
            ptr: unsafe { (ptr as *mut u8).add(page_offset) },
            len: size,
            map_size,
            page_offset,
            phys_addr,
        })
    }

    /// Physical address of the first mapped byte
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Length of the mapped range
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read a `T` at `offset`
    ///
    /// `offset + size_of::<T>()` must lie inside the mapping and be
    /// aligned to the size of `T`.
    #[inline]
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        debug_assert!(offset + core::mem::size_of::<T>() <= self.len);
        debug_assert!(offset % core::mem::align_of::<T>() == 0, "unaligned read");
        unsafe { core::ptr::read_volatile(self.ptr.add(offset) as *const T) }
    }

    /// Write a `T` at `offset`, with the same constraints as [`read`](Self::read)
    #[inline]
    pub fn write<T: Copy>(&self, offset: usize, value: T) {
        debug_assert!(offset + core::mem::size_of::<T>() <= self.len);
        debug_assert!(offset % core::mem::align_of::<T>() == 0, "unaligned write");
        unsafe { core::ptr::write_volatile(self.ptr.add(offset) as *mut T, value) }
    }
}

#[cfg(target_os = "linux")]
impl Drop for PhysMap {
    fn drop(&mut self) {
        unsafe {
            let start = self.ptr.sub(self.page_offset);
            libc::munmap(start as *mut libc::c_void, self.map_size);
        }
    }
}

// The mapping is owned and only reached through &self / &mut self
#[cfg(target_os = "linux")]
unsafe impl Send for PhysMap {}

#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
pub struct PhysMap {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl PhysMap {
    pub fn new(_phys_addr: u64, _size: usize) -> Result<Self, PhysmapError> {
        Err(PhysmapError::NotSupported(
            "physical memory mapping is only supported on Linux",
        ))
    }

    pub fn phys_addr(&self) -> u64 {
        0
    }

    pub fn len(&self) -> usize {
        0
    }

    pub fn is_empty(&self) -> bool {
        true
    }

    pub fn read<T: Copy + Default>(&self, _offset: usize) -> T {
        T::default()
    }

    pub fn write<T: Copy>(&self, _offset: usize, _value: T) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_window() {
        assert!(matches!(
            PhysMap::new(0xFF00_0000, 0),
            Err(PhysmapError::InvalidWindow { .. } | PhysmapError::NotSupported(_))
        ));
        assert!(matches!(
            PhysMap::new(u64::MAX - 0xFF, 0x1000),
            Err(PhysmapError::InvalidWindow { .. } | PhysmapError::NotSupported(_))
        ));
    }

    #[test]
    #[ignore] // Requires root and a flash window at 0xFF000000
    fn test_map_bios_window() {
        let map = PhysMap::new(0xFF00_0000, 0x100_0000).unwrap();
        assert_eq!(map.len(), 0x100_0000);
        let _: u16 = map.read(0);
    }
}
