//! CFI layout detection and table parsing

use zerocopy::FromBytes;

use super::types::*;
use crate::bus::FlashBus;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, MemoryLayout, MAX_ERASE_REGIONS};

/// Result of a successful CFI probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiInfo {
    /// Geometry with every size scaled to the whole bus
    pub geometry: Geometry,
    /// Timings, capabilities and command set
    pub properties: Properties,
}

/// Reset every part on the bus to read array mode
///
/// Sends both the AMD and the Intel reset so that the bus is left in a
/// known state whatever the command set.
fn reset_all<B: FlashBus + ?Sized>(bus: &mut B, base: u64, layout: MemoryLayout) {
    let width = layout.access_width();
    width.write(bus, base, layout.replicate(CMD_RESET));
    width.write(bus, base, layout.replicate(CMD_READ_ARRAY));
}

fn enter_query<B: FlashBus + ?Sized>(bus: &mut B, base: u64, layout: MemoryLayout) {
    reset_all(bus, base, layout);
    layout.access_width().write(
        bus,
        base + layout.query_address(CFI_QUERY_POS),
        layout.replicate(CMD_CFI_QUERY),
    );
}

fn exit_query<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
    family: Option<Family>,
) {
    let width = layout.access_width();
    match family {
        Some(Family::Intel) => width.write(bus, base, layout.replicate(CMD_READ_ARRAY)),
        Some(Family::Amd) => width.write(bus, base, layout.replicate(CMD_RESET)),
        None => reset_all(bus, base, layout),
    }
}

/// Read one query position
///
/// Multi-position values are never read with a wide access: on an
/// interleaved bus the bytes of one value live in different parts.
fn read_pos<B: FlashBus + ?Sized>(bus: &mut B, base: u64, layout: MemoryLayout, pos: u32) -> u8 {
    bus.read8(base + layout.query_address(pos))
}

fn read_positions<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
    pos: u32,
    out: &mut [u8],
) {
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = read_pos(bus, base, layout, pos + i as u32);
    }
}

/// Check whether the signature answers at the full width of `layout`
fn signature_matches<B: FlashBus + ?Sized>(bus: &mut B, base: u64, layout: MemoryLayout) -> bool {
    let width = layout.access_width();
    CFI_SIGNATURE.iter().enumerate().all(|(i, &expected)| {
        let addr = base + layout.query_address(QUERY_HEADER_POS + i as u32);
        width.read(bus, addr) == layout.replicate(u64::from(expected))
    })
}

/// Find how the flash is wired behind a bus of `bus_width` bytes
///
/// Each candidate layout is put into query mode and the "QRY" signature is
/// compared against the full bus word, so a layout only matches when every
/// lane answers. The part is left in read array mode.
pub fn detect_layout<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    bus_width: u8,
) -> Result<MemoryLayout> {
    let mut tried = false;
    for layout in MemoryLayout::candidates(bus_width) {
        tried = true;
        enter_query(bus, base, layout);
        let found = signature_matches(bus, base, layout);
        reset_all(bus, base, layout);
        if found {
            log::debug!("CFI: detected layout {}", layout.name());
            return Ok(layout);
        }
        log::trace!("CFI: no answer as {}", layout.name());
    }
    if !tried {
        log::warn!("CFI: no layout has a {}-byte bus", bus_width);
    }
    Err(Error::PartNotSupported)
}

/// Detect the layout and decode the CFI table
///
/// The returned geometry already accounts for interleaving: block sizes,
/// device size and write buffer size cover all parts on the bus.
pub fn probe<B: FlashBus + ?Sized>(bus: &mut B, base: u64, bus_width: u8) -> Result<CfiInfo> {
    let layout = detect_layout(bus, base, bus_width)?;
    enter_query(bus, base, layout);
    let result = parse_table(bus, base, layout);
    let family = result
        .as_ref()
        .ok()
        .and_then(|info| info.properties.part_id.command_set.family());
    exit_query(bus, base, layout, family);
    result
}

fn parse_table<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
) -> Result<CfiInfo> {
    let mut raw = [0u8; QUERY_HEADER_LEN];
    read_positions(bus, base, layout, QUERY_HEADER_POS, &mut raw);
    let header = CfiQueryHeader::read_from_bytes(&raw[..]).map_err(|_| Error::CfiQueryError)?;
    if header.signature != CFI_SIGNATURE {
        log::debug!("CFI: bad signature {:02x?}", header.signature);
        return Err(Error::CfiQueryError);
    }

    let parts = layout.num_parts();
    let command_set = CommandSet::from_id(header.primary_cmd_set.get());
    let device_size = 1u32
        .checked_shl(u32::from(header.device_size_exp))
        .and_then(|size| size.checked_mul(parts))
        .ok_or(Error::PartNotSupported)?;

    let num_regions = usize::from(header.num_erase_regions);
    if num_regions > MAX_ERASE_REGIONS {
        return Err(Error::TooManyRegions);
    }
    let mut geometry = Geometry::new(base, layout);
    for i in 0..num_regions {
        let mut raw = [0u8; ERASE_REGION_LEN];
        let pos = ERASE_REGION_POS + (i * ERASE_REGION_LEN) as u32;
        read_positions(bus, base, layout, pos, &mut raw);
        let info = CfiRegionInfo::read_from_bytes(&raw[..]).map_err(|_| Error::CfiQueryError)?;
        let block_size = info
            .block_size()
            .checked_mul(parts)
            .ok_or(Error::PartNotSupported)?;
        geometry.push_region(info.block_count(), block_size)?;
    }

    let write_buffer_size = match header.write_buffer_exp.get() {
        0 => 0,
        exp => 1u32
            .checked_shl(u32::from(exp))
            .and_then(|size| size.checked_mul(parts))
            .ok_or(Error::PartNotSupported)?,
    };

    let mut properties = Properties {
        part_id: PartId {
            command_set,
            ..PartId::default()
        },
        typical: Timing::typical(&header),
        max: Timing::maximum(&header),
        program: ProgramCaps {
            write_buffer_size,
            write_buffer_align_mask: write_buffer_size.saturating_sub(1),
            erase_queue_size: 1,
        },
        boot_mode: BootMode::Unknown,
        primary_ext_table: header.primary_ext_table.get(),
    };

    log::debug!(
        "CFI: command set 0x{:04x}, {} bytes, {} region(s), write buffer {} bytes",
        command_set.id(),
        device_size,
        geometry.num_regions(),
        write_buffer_size
    );

    let ext = u32::from(properties.primary_ext_table);
    match command_set {
        CommandSet::IntelPerformance => {
            if let Some(banks) = intel_bank_count(bus, base, layout, ext) {
                geometry = expand_banks(&geometry, device_size, u32::from(banks))?;
            }
        }
        CommandSet::AmdStandard | CommandSet::AmdExtended => {
            properties.boot_mode = amd_boot_mode(bus, base, layout, ext);
            if properties.boot_mode == BootMode::Top && geometry.num_regions() > 1 {
                // Top boot parts describe their regions from the top down
                geometry = geometry.reversed()?;
            }
        }
        _ => {}
    }

    if geometry.device_size() != device_size {
        log::warn!(
            "CFI: erase regions cover {} bytes, device reports {}",
            geometry.device_size(),
            device_size
        );
    }

    Ok(CfiInfo {
        geometry,
        properties,
    })
}

/// Read the primary extended table signature and version
fn pri_version<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
    ext: u32,
) -> Option<(u8, u8)> {
    if ext == 0 {
        return None;
    }
    let mut head = [0u8; 5];
    read_positions(bus, base, layout, ext, &mut head);
    if head[..3] != PRI_SIGNATURE {
        log::debug!("CFI: no PRI table at 0x{:x}", ext);
        return None;
    }
    Some((head[3], head[4]))
}

/// Number of identical partitions (banks) from an Intel PRI table, v1.3+
fn intel_bank_count<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
    ext: u32,
) -> Option<u16> {
    let (major, minor) = pri_version(bus, base, layout, ext)?;
    if (major, minor) < (b'1', b'3') {
        return None;
    }
    let mut pri = |offset: u32| read_pos(bus, base, layout, ext + offset);

    // Protection register fields: first one is 4 bytes, the rest are 10
    let fields = u32::from(pri(0x0E));
    let mut pos = 0x0F;
    if fields > 0 {
        pos += 4 + (fields - 1) * 10;
    }
    // Page mode read capability
    pos += 1;
    // Synchronous mode read configuration fields
    let sync_fields = u32::from(pri(pos));
    pos += 1 + sync_fields;

    let partition_regions = pri(pos);
    pos += 1;
    if partition_regions == 0 {
        return None;
    }
    let banks = u16::from(pri(pos)) | (u16::from(pri(pos + 1)) << 8);
    log::debug!("CFI: {} identical partition(s)", banks);
    Some(banks)
}

/// Split the single reported region into one region per bank
///
/// Some parts describe one bank in the region table and others describe
/// the whole array; the device size tells the two apart.
fn expand_banks(geometry: &Geometry, device_size: u32, banks: u32) -> Result<Geometry> {
    if banks <= 1 || geometry.num_regions() != 1 {
        return Ok(geometry.clone());
    }
    let region = geometry.regions()[0];
    let mut expanded = Geometry::new(geometry.base_address(), geometry.layout());
    if u64::from(region.size()) * u64::from(banks) == u64::from(device_size) {
        for _ in 0..banks {
            expanded.push_region(region.block_count, region.block_size)?;
        }
    } else if region.size() == device_size && region.block_count % banks == 0 {
        for _ in 0..banks {
            expanded.push_region(region.block_count / banks, region.block_size)?;
        }
    } else {
        log::warn!("CFI: cannot map {} banks onto the erase regions", banks);
        return Ok(geometry.clone());
    }
    Ok(expanded)
}

fn amd_boot_mode<B: FlashBus + ?Sized>(
    bus: &mut B,
    base: u64,
    layout: MemoryLayout,
    ext: u32,
) -> BootMode {
    match pri_version(bus, base, layout, ext) {
        Some(version) if version >= (b'1', b'1') => {
            BootMode::from_amd_flag(read_pos(bus, base, layout, ext + 0x0F))
        }
        _ => BootMode::Unknown,
    }
}
