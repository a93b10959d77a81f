//! Flash geometry: bus layout, erase regions and address translation
//!
//! A part (or a bank of interleaved parts) is described as an ordered list
//! of erase regions. Each region is a run of equally sized erase blocks.
//! The region table always ends with a sentinel entry whose offset is the
//! device size, so the half-open interval of region `i` is
//! `[regions[i].offset, regions[i + 1].offset)`.
//!
//! Everything in here is pure arithmetic; no bus access happens.

use crate::bus::AccessWidth;
use crate::error::{Error, Result};

/// Maximum number of erase regions a geometry can hold
pub const MAX_ERASE_REGIONS: usize = 16;

const REGION_TABLE_LEN: usize = MAX_ERASE_REGIONS + 1;

/// How 16-bit NOR parts are wired onto the data bus
///
/// The name reads part width, part mode, part count: `X16X8X2` is two x16
/// parts strapped for byte mode, side by side on a 16-bit bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryLayout {
    /// One x16 part in byte mode on an 8-bit bus
    X16X8X1,
    /// Two x16 parts in byte mode on a 16-bit bus
    X16X8X2,
    /// One x16 part in word mode on a 16-bit bus
    X16X16X1,
    /// Four x16 parts in byte mode on a 32-bit bus
    X16X8X4,
    /// Two x16 parts in word mode on a 32-bit bus
    X16X16X2,
    /// Four x16 parts in word mode on a 64-bit bus
    X16X16X4,
}

impl MemoryLayout {
    /// Every layout, in CFI detection order
    pub const ALL: [MemoryLayout; 6] = [
        Self::X16X8X1,
        Self::X16X16X1,
        Self::X16X8X2,
        Self::X16X16X2,
        Self::X16X8X4,
        Self::X16X16X4,
    ];

    /// Layouts that could sit behind a bus of `bus_width` bytes, in the
    /// order they should be probed
    pub fn candidates(bus_width: u8) -> impl Iterator<Item = MemoryLayout> {
        Self::ALL
            .into_iter()
            .filter(move |layout| layout.bus_width() == u32::from(bus_width))
    }

    /// Total bus width in bytes
    pub const fn bus_width(self) -> u32 {
        self.part_mode() * self.num_parts()
    }

    /// Number of parts interleaved across the bus
    pub const fn num_parts(self) -> u32 {
        match self {
            Self::X16X8X1 | Self::X16X16X1 => 1,
            Self::X16X8X2 | Self::X16X16X2 => 2,
            Self::X16X8X4 | Self::X16X16X4 => 4,
        }
    }

    /// Data width each part is operating at, in bytes
    pub const fn part_mode(self) -> u32 {
        match self {
            Self::X16X8X1 | Self::X16X8X2 | Self::X16X8X4 => 1,
            Self::X16X16X1 | Self::X16X16X2 | Self::X16X16X4 => 2,
        }
    }

    /// True when the parts run in byte mode
    pub const fn is_byte_mode(self) -> bool {
        self.part_mode() == 1
    }

    /// Width of a single bus cycle
    pub const fn access_width(self) -> AccessWidth {
        match self.bus_width() {
            1 => AccessWidth::X8,
            2 => AccessWidth::X16,
            4 => AccessWidth::X32,
            _ => AccessWidth::X64,
        }
    }

    /// Byte distance between consecutive CFI / identifier positions
    ///
    /// x16 parts decode query positions on word boundaries in either mode,
    /// and every interleaved part adds its own lane.
    pub const fn query_stride(self) -> u64 {
        2 * self.num_parts() as u64
    }

    /// Byte address of CFI / identifier position `pos`
    pub const fn query_address(self, pos: u32) -> u64 {
        pos as u64 * self.query_stride()
    }

    /// Mask selecting one part's lane in a bus word
    pub const fn lane_mask(self) -> u64 {
        if self.is_byte_mode() {
            0xFF
        } else {
            0xFFFF
        }
    }

    /// Repeat a per-part value into every lane of the bus word
    ///
    /// Commands and expected status values must reach every interleaved
    /// part at once.
    pub const fn replicate(self, value: u64) -> u64 {
        let lane_bits = 8 * self.part_mode();
        let value = value & self.lane_mask();
        let mut word = 0;
        let mut part = 0;
        while part < self.num_parts() {
            word |= value << (part * lane_bits);
            part += 1;
        }
        word
    }

    /// Short lowercase name, as used on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Self::X16X8X1 => "x16x8x1",
            Self::X16X8X2 => "x16x8x2",
            Self::X16X16X1 => "x16x16x1",
            Self::X16X8X4 => "x16x8x4",
            Self::X16X16X2 => "x16x16x2",
            Self::X16X16X4 => "x16x16x4",
        }
    }

    /// Parse a name produced by [`MemoryLayout::name`]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|layout| layout.name().eq_ignore_ascii_case(name))
    }
}

/// A run of equally sized erase blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EraseRegion {
    /// Byte offset of the first block, relative to the device start
    pub offset: u32,
    /// Absolute index of the first block across the whole device
    pub first_block: u32,
    /// Number of blocks in the region
    pub block_count: u32,
    /// Size of each block in bytes
    pub block_size: u32,
}

impl EraseRegion {
    /// Total size of the region in bytes
    pub const fn size(&self) -> u32 {
        self.block_count * self.block_size
    }

    /// Offset one past the end of the region
    pub const fn end(&self) -> u32 {
        self.offset + self.size()
    }
}

/// Position of a byte in block coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAddress {
    /// Region index
    pub region: usize,
    /// Block index within the region
    pub block: u32,
    /// Byte offset within the block
    pub offset: u32,
}

/// Physical description of a flash device
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geometry {
    base_address: u64,
    layout: MemoryLayout,
    regions: heapless::Vec<EraseRegion, REGION_TABLE_LEN>,
}

impl Geometry {
    /// Create an empty geometry (device size zero)
    pub fn new(base_address: u64, layout: MemoryLayout) -> Self {
        let mut regions = heapless::Vec::new();
        // Capacity is at least one, the sentinel always fits
        let _ = regions.push(EraseRegion {
            offset: 0,
            first_block: 0,
            block_count: 0,
            block_size: 0,
        });
        Self {
            base_address,
            layout,
            regions,
        }
    }

    /// Build a geometry from `(block_count, block_size)` pairs in address order
    pub fn from_regions(
        base_address: u64,
        layout: MemoryLayout,
        regions: &[(u32, u32)],
    ) -> Result<Self> {
        let mut geometry = Self::new(base_address, layout);
        for &(block_count, block_size) in regions {
            geometry.push_region(block_count, block_size)?;
        }
        Ok(geometry)
    }

    /// Append a region after the current end of the device
    ///
    /// Fails with [`Error::TooManyRegions`] once [`MAX_ERASE_REGIONS`] are
    /// present, and with [`Error::PartNotSupported`] if the device would
    /// no longer be addressable with 32-bit offsets.
    pub fn push_region(&mut self, block_count: u32, block_size: u32) -> Result<()> {
        if self.num_regions() >= MAX_ERASE_REGIONS {
            return Err(Error::TooManyRegions);
        }
        let sentinel = *self.sentinel();
        let end = block_count
            .checked_mul(block_size)
            .and_then(|size| sentinel.offset.checked_add(size))
            .ok_or(Error::PartNotSupported)?;
        let region = EraseRegion {
            block_count,
            block_size,
            ..sentinel
        };
        let last = self.regions.len() - 1;
        self.regions[last] = region;
        self.regions
            .push(EraseRegion {
                offset: end,
                first_block: sentinel.first_block + block_count,
                block_count: 0,
                block_size: 0,
            })
            .map_err(|_| Error::TooManyRegions)
    }

    /// Same regions in reverse address order
    pub fn reversed(&self) -> Result<Self> {
        let mut geometry = Self::new(self.base_address, self.layout);
        for region in self.regions().iter().rev() {
            geometry.push_region(region.block_count, region.block_size)?;
        }
        Ok(geometry)
    }

    /// Physical address of offset zero
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Bus layout the device was detected with
    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    /// Total device size in bytes
    pub fn device_size(&self) -> u32 {
        self.sentinel().offset
    }

    /// Number of real (non-sentinel) regions
    pub fn num_regions(&self) -> usize {
        self.regions.len() - 1
    }

    /// Total number of erase blocks
    pub fn num_blocks(&self) -> u32 {
        self.sentinel().first_block
    }

    /// Erase regions in address order, without the sentinel
    pub fn regions(&self) -> &[EraseRegion] {
        &self.regions[..self.num_regions()]
    }

    /// One-past-the-end marker region
    pub fn sentinel(&self) -> &EraseRegion {
        // The table is never empty
        &self.regions[self.regions.len() - 1]
    }

    /// Physical address of a device offset
    pub fn address(&self, offset: u32) -> u64 {
        self.base_address + u64::from(offset)
    }

    /// True when `offset` lies inside the device
    pub fn is_valid_offset(&self, offset: u32) -> bool {
        offset < self.device_size()
    }

    /// Check that `[offset, offset + len)` lies inside the device
    ///
    /// The start offset must always be valid, even for an empty range.
    pub fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        if !self.is_valid_offset(offset) {
            return Err(Error::AddressError);
        }
        let end = u64::from(offset) + len as u64;
        if end > u64::from(self.device_size()) {
            return Err(Error::AddressError);
        }
        Ok(())
    }

    /// Convert a device offset to block coordinates
    pub fn to_block(&self, offset: u32) -> Result<BlockAddress> {
        if !self.is_valid_offset(offset) {
            return Err(Error::AddressError);
        }
        let region = self
            .regions()
            .iter()
            .rposition(|r| r.offset <= offset && r.block_count > 0)
            .ok_or(Error::AddressError)?;
        let r = &self.regions[region];
        let relative = offset - r.offset;
        Ok(BlockAddress {
            region,
            block: relative / r.block_size,
            offset: relative % r.block_size,
        })
    }

    /// Convert block coordinates back to a device offset
    pub fn to_absolute(&self, region: usize, block: u32, block_offset: u32) -> Result<u32> {
        if region >= self.num_regions() {
            return Err(Error::AddressError);
        }
        let r = &self.regions[region];
        if block >= r.block_count || block_offset >= r.block_size {
            return Err(Error::AddressError);
        }
        Ok(r.offset + block * r.block_size + block_offset)
    }

    /// Offset of the first byte of a block
    pub fn block_start(&self, region: usize, block: u32) -> Result<u32> {
        self.to_absolute(region, block, 0)
    }

    /// Size of the blocks in a region
    pub fn block_size(&self, region: usize) -> Result<u32> {
        self.regions()
            .get(region)
            .map(|r| r.block_size)
            .ok_or(Error::AddressError)
    }

    /// Step to the next block, moving into the next region when the
    /// current one is exhausted
    ///
    /// Stepping past the last block yields `(num_regions(), 0)`, the
    /// sentinel position.
    pub fn increment(&self, region: usize, block: u32) -> (usize, u32) {
        let mut region = region;
        let mut block = block + 1;
        while region < self.num_regions() && block >= self.regions[region].block_count {
            region += 1;
            block = 0;
        }
        (region, block)
    }

    /// Inclusive number of blocks between two block coordinates
    ///
    /// Returns zero if the end lies before the start.
    pub fn block_diff(
        &self,
        start_region: usize,
        start_block: u32,
        end_region: usize,
        end_block: u32,
    ) -> u32 {
        let first = self.absolute_block(start_region, start_block);
        let last = self.absolute_block(end_region, end_block);
        if last < first {
            0
        } else {
            last - first + 1
        }
    }

    /// Number of blocks touched by `[offset, offset + len)`
    pub fn blocks_in_range(&self, offset: u32, len: usize) -> Result<u32> {
        if len == 0 {
            return Ok(0);
        }
        self.check_range(offset, len)?;
        let first = self.to_block(offset)?;
        let last = self.to_block(offset + (len - 1) as u32)?;
        Ok(self.block_diff(first.region, first.block, last.region, last.block))
    }

    /// Indices of the regions overlapping `[offset, offset + len)`
    pub fn regions_in_range(&self, offset: u32, len: usize) -> impl Iterator<Item = usize> + '_ {
        let start = u64::from(offset);
        let end = start + len.max(1) as u64;
        self.regions()
            .iter()
            .enumerate()
            .filter(move |(_, r)| u64::from(r.offset) < end && u64::from(r.end()) > start)
            .map(|(i, _)| i)
    }

    fn absolute_block(&self, region: usize, block: u32) -> u32 {
        let idx = region.min(self.regions.len() - 1);
        self.regions[idx].first_block + block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_geometry() -> Geometry {
        // Bottom boot: 8 x 8K parameter blocks, then 31 x 64K main blocks
        Geometry::from_regions(0x1000_0000, MemoryLayout::X16X16X1, &[(8, 0x2000), (31, 0x10000)])
            .unwrap()
    }

    #[test]
    fn test_sentinel_matches_device_size() {
        let geo = boot_geometry();
        assert_eq!(geo.num_regions(), 2);
        assert_eq!(geo.device_size(), 8 * 0x2000 + 31 * 0x10000);
        assert_eq!(geo.sentinel().offset, geo.device_size());
        assert_eq!(geo.sentinel().first_block, 39);
        assert_eq!(geo.num_blocks(), 39);
    }

    #[test]
    fn test_regions_contiguous() {
        let geo = boot_geometry();
        let table = &geo.regions;
        for pair in table.windows(2) {
            assert_eq!(
                pair[0].offset + pair[0].block_count * pair[0].block_size,
                pair[1].offset,
                "regions must be contiguous"
            );
            assert_eq!(pair[0].first_block + pair[0].block_count, pair[1].first_block);
        }
    }

    #[test]
    fn test_to_block() {
        let geo = boot_geometry();
        assert_eq!(
            geo.to_block(0).unwrap(),
            BlockAddress {
                region: 0,
                block: 0,
                offset: 0
            }
        );
        assert_eq!(
            geo.to_block(0x2001).unwrap(),
            BlockAddress {
                region: 0,
                block: 1,
                offset: 1
            }
        );
        assert_eq!(
            geo.to_block(0x10000 + 0x10004).unwrap(),
            BlockAddress {
                region: 1,
                block: 1,
                offset: 4
            }
        );
        assert_eq!(geo.to_block(geo.device_size()), Err(Error::AddressError));
    }

    #[test]
    fn test_to_absolute_rejects_out_of_range() {
        let geo = boot_geometry();
        assert_eq!(geo.to_absolute(2, 0, 0), Err(Error::AddressError));
        assert_eq!(geo.to_absolute(0, 8, 0), Err(Error::AddressError));
        assert_eq!(geo.to_absolute(0, 0, 0x2000), Err(Error::AddressError));
        assert_eq!(geo.to_absolute(1, 30, 0xFFFF), Ok(geo.device_size() - 1));
    }

    #[test]
    fn test_round_trip_every_offset() {
        // Small geometry so every offset can be checked
        let geo = Geometry::from_regions(0, MemoryLayout::X16X8X1, &[(4, 0x80), (2, 0x200), (3, 0x100)])
            .unwrap();
        for offset in 0..geo.device_size() {
            let pos = geo.to_block(offset).unwrap();
            assert_eq!(
                geo.to_absolute(pos.region, pos.block, pos.offset),
                Ok(offset),
                "round trip failed at 0x{:x}",
                offset
            );
        }
    }

    #[test]
    fn test_increment_crosses_regions() {
        let geo = boot_geometry();
        assert_eq!(geo.increment(0, 0), (0, 1));
        assert_eq!(geo.increment(0, 7), (1, 0));
        assert_eq!(geo.increment(1, 29), (1, 30));
        assert_eq!(geo.increment(1, 30), (2, 0));
    }

    #[test]
    fn test_block_diff() {
        let geo = boot_geometry();
        for region in 0..geo.num_regions() {
            for block in 0..geo.regions()[region].block_count {
                assert_eq!(geo.block_diff(region, block, region, block), 1);
            }
        }
        assert_eq!(geo.block_diff(0, 0, 1, 30), 39);
        assert_eq!(geo.block_diff(0, 6, 1, 1), 4);
        assert_eq!(geo.block_diff(1, 1, 0, 6), 0);
    }

    #[test]
    fn test_blocks_in_range() {
        let geo = boot_geometry();
        assert_eq!(geo.blocks_in_range(0, 0), Ok(0));
        assert_eq!(geo.blocks_in_range(0, 1), Ok(1));
        assert_eq!(geo.blocks_in_range(0x1FFF, 2), Ok(2));
        assert_eq!(geo.blocks_in_range(0, geo.device_size() as usize), Ok(39));
        assert_eq!(
            geo.blocks_in_range(0, geo.device_size() as usize + 1),
            Err(Error::AddressError)
        );
    }

    #[test]
    fn test_regions_in_range() {
        let geo = boot_geometry();
        let mut hit = geo.regions_in_range(0x1000, 0x20000);
        assert_eq!(hit.next(), Some(0));
        assert_eq!(hit.next(), Some(1));
        assert_eq!(hit.next(), None);
        assert_eq!(geo.regions_in_range(0x20000, 4).collect::<heapless::Vec<_, 4>>(), [1]);
    }

    #[test]
    fn test_too_many_regions() {
        let mut geo = Geometry::new(0, MemoryLayout::X16X16X1);
        for _ in 0..MAX_ERASE_REGIONS {
            geo.push_region(1, 0x1000).unwrap();
        }
        assert_eq!(geo.push_region(1, 0x1000), Err(Error::TooManyRegions));
        assert_eq!(geo.num_regions(), MAX_ERASE_REGIONS);
    }

    #[test]
    fn test_reversed() {
        let geo = boot_geometry().reversed().unwrap();
        assert_eq!(geo.regions()[0].block_size, 0x10000);
        assert_eq!(geo.regions()[1].offset, 31 * 0x10000);
        assert_eq!(geo.device_size(), boot_geometry().device_size());
    }

    #[test]
    fn test_layout_properties() {
        assert_eq!(MemoryLayout::X16X8X1.bus_width(), 1);
        assert_eq!(MemoryLayout::X16X8X1.query_address(0x10), 0x20);
        assert_eq!(MemoryLayout::X16X16X2.bus_width(), 4);
        assert_eq!(MemoryLayout::X16X16X2.query_address(0x10), 0x40);
        assert_eq!(MemoryLayout::X16X16X2.replicate(0x80), 0x0080_0080);
        assert_eq!(MemoryLayout::X16X8X2.replicate(0x98), 0x9898);
        assert_eq!(MemoryLayout::X16X16X4.replicate(0xFF), 0x00FF_00FF_00FF_00FF);
        assert_eq!(
            MemoryLayout::candidates(2).collect::<heapless::Vec<_, 6>>(),
            [MemoryLayout::X16X16X1, MemoryLayout::X16X8X2]
        );
        assert_eq!(MemoryLayout::from_name("X16x16x2"), Some(MemoryLayout::X16X16X2));
    }
}
