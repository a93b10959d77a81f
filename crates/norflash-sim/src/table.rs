//! CFI query table of one simulated part

use crate::config::{SimConfig, SimFamily};

/// Lowest position of the primary vendor extended table
const PRI_MIN_POS: usize = 0x40;
/// Bytes reserved for the extended table
const PRI_LEN: usize = 0x20;

fn put16(table: &mut [u8], pos: usize, value: u16) {
    table[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
}

fn log2(value: u32) -> u8 {
    value.trailing_zeros() as u8
}

/// Build the query table answered by each part, indexed by query position
///
/// All sizes are per part. Top boot parts list their regions from the top
/// of the array down.
pub fn cfi_table(config: &SimConfig) -> Vec<u8> {
    let parts = config.layout.num_parts();
    let mut regions: Vec<(u32, u32)> = config
        .regions
        .iter()
        .map(|r| (r.blocks, r.block_size.to_bytes() / parts))
        .collect();
    if config.top_boot {
        regions.reverse();
    }

    let pri = (0x2D + 4 * regions.len()).max(PRI_MIN_POS);
    let mut t = vec![0u8; pri + PRI_LEN];
    let amd = config.family == SimFamily::Amd;
    let buffer = config.write_buffer_size() / parts;

    t[0x10..0x13].copy_from_slice(b"QRY");
    put16(&mut t, 0x13, config.command_set_id());
    put16(&mut t, 0x15, pri as u16);

    // Vcc 2.7 V to 3.6 V, no Vpp
    t[0x1B] = 0x27;
    t[0x1C] = 0x36;

    // Typical: 16 us word, 256 us buffer, 1 s block, 32 s chip
    t[0x1F] = 4;
    t[0x20] = if buffer > 0 { 8 } else { 0 };
    t[0x21] = 10;
    t[0x22] = if amd { 15 } else { 0 };
    // Maximum: 16x typical
    t[0x23] = 4;
    t[0x24] = if buffer > 0 { 4 } else { 0 };
    t[0x25] = 4;
    t[0x26] = if amd { 4 } else { 0 };

    t[0x27] = log2(config.device_size() / parts);
    // x8/x16 asynchronous interface
    put16(&mut t, 0x28, 0x0002);
    put16(&mut t, 0x2A, if buffer > 0 { u16::from(log2(buffer)) } else { 0 });
    t[0x2C] = regions.len() as u8;
    for (i, &(blocks, size)) in regions.iter().enumerate() {
        let pos = 0x2D + 4 * i;
        put16(&mut t, pos, (blocks - 1) as u16);
        put16(&mut t, pos + 2, if size == 128 { 0 } else { (size / 256) as u16 });
    }

    t[pri..pri + 3].copy_from_slice(b"PRI");
    match config.family {
        SimFamily::Amd => {
            t[pri + 3] = b'1';
            t[pri + 4] = b'3';
            t[pri + 0x0F] = if config.top_boot {
                3
            } else if regions.len() > 1 {
                2
            } else {
                0
            };
        }
        SimFamily::Intel if config.banks > 1 => {
            t[pri + 3] = b'1';
            t[pri + 4] = b'4';
            // One protection register field (4 bytes) and a page mode byte
            t[pri + 0x0E] = 1;
            t[pri + 0x13] = 0;
            // No synchronous read modes
            t[pri + 0x14] = 0;
            // One partition region made of `banks` identical partitions
            t[pri + 0x15] = 1;
            put16(&mut t, pri + 0x16, config.banks);
        }
        SimFamily::Intel => {
            t[pri + 3] = b'1';
            t[pri + 4] = b'1';
        }
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimRegion, Size};
    use norflash_core::geometry::MemoryLayout;

    #[test]
    fn test_default_table() {
        let t = cfi_table(&SimConfig::default());
        assert_eq!(&t[0x10..0x13], b"QRY");
        assert_eq!(t[0x13], 0x01);
        assert_eq!(t[0x27], 20);
        // 32 byte write buffer
        assert_eq!(t[0x2A], 5);
        assert_eq!(t[0x2C], 1);
        // 16 blocks of 64 KiB
        assert_eq!(&t[0x2D..0x31], &[15, 0, 0x00, 0x01]);
        assert_eq!(&t[0x40..0x43], b"PRI");
    }

    #[test]
    fn test_interleaved_sizes_are_per_part() {
        let config = SimConfig {
            layout: MemoryLayout::X16X16X2,
            write_buffer: Size::B(64),
            ..SimConfig::default()
        };
        let t = cfi_table(&config);
        assert_eq!(t[0x27], 19);
        assert_eq!(t[0x2A], 5);
        assert_eq!(&t[0x2F..0x31], &[0x80, 0x00]);
    }

    #[test]
    fn test_top_boot_order() {
        let config = SimConfig {
            family: SimFamily::Amd,
            regions: vec![
                SimRegion {
                    blocks: 31,
                    block_size: Size::KiB(64),
                },
                SimRegion {
                    blocks: 8,
                    block_size: Size::KiB(8),
                },
            ],
            top_boot: true,
            ..SimConfig::default()
        };
        let t = cfi_table(&config);
        // Small blocks are reported first
        assert_eq!(&t[0x2D..0x31], &[7, 0, 0x20, 0x00]);
        assert_eq!(&t[0x31..0x35], &[30, 0, 0x00, 0x01]);
        assert_eq!(t[0x40 + 0x0F], 3);
    }

    #[test]
    fn test_intel_banks() {
        let config = SimConfig {
            command_set: Some(0x0200),
            banks: 4,
            ..SimConfig::default()
        };
        let t = cfi_table(&config);
        assert_eq!(&t[0x43..0x45], b"14");
        assert_eq!(t[0x40 + 0x15], 1);
        assert_eq!(&t[0x56..0x58], &[4, 0]);
    }
}
