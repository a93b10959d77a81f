//! Probe and info command implementation

use norflash_core::cfi::Timing;

use super::format_size;
use crate::handle::FlashHandle;

/// Print a one line summary of the detected part
pub fn run_probe(handle: &FlashHandle) {
    let props = handle.properties();
    println!("Found CFI flash:");
    println!(
        "  ID:      {:04X}:{:04X}",
        props.part_id.manufacturer, props.part_id.device
    );
    println!(
        "  Command set: 0x{:04X} ({:?})",
        props.part_id.command_set.id(),
        props.part_id.command_set
    );
    println!(
        "  Size:    {} bytes ({})",
        handle.size(),
        format_size(handle.size())
    );
    println!("  Layout:  {}", handle.geometry().layout().name());
}

fn print_timing(label: &str, timing: &Timing) {
    println!(
        "{:17}word {} us, buffer {} us, block {} ms, chip {} ms",
        label,
        timing.write_single_us,
        timing.write_buffer_us,
        timing.erase_block_ms,
        timing.erase_chip_ms
    );
}

/// Print geometry and properties in detail
pub fn run_info(handle: &FlashHandle) {
    let geometry = handle.geometry();
    let props = handle.properties();

    println!("Flash Part Information");
    println!("======================");
    println!();
    println!(
        "ID:              {:04X}:{:04X}",
        props.part_id.manufacturer, props.part_id.device
    );
    println!(
        "Command set:     0x{:04X} ({:?})",
        props.part_id.command_set.id(),
        props.part_id.command_set
    );
    println!(
        "Base address:    0x{:08X}",
        geometry.base_address()
    );
    println!(
        "Bus layout:      {} ({} byte bus, {} part(s))",
        geometry.layout().name(),
        geometry.layout().bus_width(),
        geometry.layout().num_parts()
    );
    println!(
        "Size:            {} bytes ({})",
        geometry.device_size(),
        format_size(geometry.device_size())
    );
    if props.program.write_buffer_size > 0 {
        println!(
            "Write buffer:    {} bytes",
            props.program.write_buffer_size
        );
    } else {
        println!("Write buffer:    none");
    }
    println!("Boot mode:       {:?}", props.boot_mode);
    print_timing("Typical:", &props.typical);
    print_timing("Maximum:", &props.max);

    println!();
    println!("Erase regions:");
    for (i, region) in geometry.regions().iter().enumerate() {
        println!(
            "  {}: 0x{:08X} - 0x{:08X}  {} x {}",
            i,
            region.offset,
            region.end().saturating_sub(1),
            region.block_count,
            format_size(region.block_size)
        );
    }
}
