//! norflash-sim - Software model of CFI parallel NOR flash
//!
//! [`SimFlash`] implements [`FlashBus`](norflash_core::bus::FlashBus) on
//! top of an in-memory array and answers command cycles the way Intel
//! and AMD parts do. It backs the `sim` programmer and the end to end
//! tests of the flash engine.
//!
//! # Example
//!
//! ```
//! use norflash_core::flash::{FlashConfig, NorFlash};
//! use norflash_sim::{SimConfig, SimFlash};
//!
//! let sim = SimFlash::new(SimConfig::default(), 0).unwrap();
//! let mut flash = NorFlash::initialize(sim, FlashConfig::new(0, 2)).unwrap();
//! flash.erase(0, 0x10000).unwrap();
//! flash.write(0, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
//! ```

mod amd;
mod config;
mod intel;
mod part;
mod table;

pub use config::{ConfigError, SimConfig, SimFamily, SimRegion, Size};
pub use part::{BufferCycle, SimFlash, SECURED_SILICON_SIZE};
pub use table::cfi_table;

#[cfg(test)]
mod tests {
    use super::*;
    use norflash_core::bus::FlashBus;
    use norflash_core::cfi::{BootMode, CommandSet};
    use norflash_core::error::{Error, HardwareOp};
    use norflash_core::flash::{DeviceCommand, DeviceResponse, FlashConfig, NorFlash, RyByMode};
    use norflash_core::geometry::MemoryLayout;

    const BASE: u64 = 0x1000_0000;

    fn open(config: SimConfig) -> NorFlash<SimFlash> {
        let width = config.layout.bus_width() as u8;
        let sim = SimFlash::new(config, BASE).unwrap();
        NorFlash::initialize(sim, FlashConfig::new(BASE, width)).unwrap()
    }

    fn amd(layout: MemoryLayout) -> SimConfig {
        SimConfig::uniform(SimFamily::Amd, layout, 1 << 21, 1 << 16)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_intel_erase_write_read() {
        let mut flash = open(SimConfig::default());
        let geometry = flash.geometry().unwrap();
        assert_eq!(geometry.device_size(), 1 << 20);
        assert_eq!(geometry.num_blocks(), 16);
        assert_eq!(geometry.layout(), MemoryLayout::X16X16X1);
        let props = *flash.properties().unwrap();
        assert_eq!(props.part_id.manufacturer, 0x0089);
        assert_eq!(props.part_id.device, 0x0018);
        assert_eq!(props.part_id.command_set, CommandSet::IntelExtended);

        flash.erase(0, 65536).unwrap();
        flash.write(0, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let mut buf = [0u8; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(flash.bus().in_read_array());
    }

    #[test]
    fn test_read_past_end() {
        let mut flash = open(SimConfig::default());
        let mut buf = [0u8; 1];
        assert_eq!(flash.read(1 << 20, &mut buf), Err(Error::AddressError));
        let mut buf = [0u8; 2];
        assert_eq!(flash.read((1 << 20) - 1, &mut buf), Err(Error::AddressError));
        assert_eq!(flash.erase(1 << 20, 1), Err(Error::AddressError));
    }

    #[test]
    fn test_programming_only_clears_bits() {
        let mut flash = open(SimConfig::default());
        flash.write(0x100, &[0xF0, 0x0F]).unwrap();
        flash.write(0x100, &[0x3C, 0xFF]).unwrap();
        let mut buf = [0u8; 2];
        flash.read(0x100, &mut buf).unwrap();
        assert_eq!(buf, [0x30, 0x0F]);
    }

    #[test]
    fn test_intel_buffer_cycles_are_aligned() {
        let mut flash = open(SimConfig::default());
        let data = pattern(100);
        flash.write(0x23, &data).unwrap();

        let starts: Vec<u32> = flash.bus().buffer_cycles().iter().map(|c| c.start).collect();
        assert_eq!(starts, [0x20, 0x40, 0x60, 0x80]);
        // Every cycle carries a full buffer, padded with 0xFF
        assert!(flash.bus().buffer_cycles().iter().all(|c| c.words == 16));

        let array = flash.bus().data();
        assert!(array[0x20..0x23].iter().all(|&b| b == 0xFF));
        assert_eq!(&array[0x23..0x23 + 100], &data[..]);
        assert!(array[0x87..0xA0].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_intel_word_programming_without_buffer() {
        let config = SimConfig {
            write_buffer: Size::B(0),
            ..SimConfig::default()
        };
        let mut flash = open(config);
        assert_eq!(flash.properties().unwrap().program.write_buffer_size, 0);
        flash.write(0x11, &[1, 2, 3]).unwrap();
        assert!(flash.bus().buffer_cycles().is_empty());
        // 0x10, 0x12
        assert_eq!(flash.bus().word_programs(), 2);
        assert_eq!(&flash.bus().data()[0x10..0x14], &[0xFF, 1, 2, 3]);
    }

    #[test]
    fn test_strataflash_write() {
        let config = SimConfig {
            device: 0x0001,
            ..SimConfig::default()
        };
        let mut flash = open(config);
        flash.write(0x40, &[0x55; 64]).unwrap();
        assert_eq!(flash.bus().buffer_cycles().len(), 2);
        assert_eq!(&flash.bus().data()[0x40..0x80], &[0x55; 64][..]);
    }

    #[test]
    fn test_erase_spans_blocks() {
        let mut flash = open(SimConfig::default());
        flash.bus_mut().data_mut().fill(0);
        flash.erase(0xFFFF, 2).unwrap();
        assert_eq!(flash.bus().block_erases(), 2);
        let array = flash.bus().data();
        assert!(array[..0x20000].iter().all(|&b| b == 0xFF));
        assert_eq!(array[0x20000], 0);

        // Zero length erases nothing
        flash.erase(0x30000, 0).unwrap();
        assert_eq!(flash.bus().block_erases(), 2);
    }

    #[test]
    fn test_intel_erase_failure() {
        let mut flash = open(SimConfig::default());
        flash.bus_mut().fail_next_operation();
        match flash.erase(0x10000, 1) {
            Err(Error::HardwareError { op, status }) => {
                assert_eq!(op, HardwareOp::Erase);
                assert_eq!(status & 0xA0, 0xA0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(flash.bus().in_read_array());
        match flash.device_control(DeviceCommand::GetLastError).unwrap() {
            DeviceResponse::LastError(status) => assert_ne!(status, 0),
            other => panic!("unexpected {:?}", other),
        }

        // The part recovers for the next operation
        flash.erase(0x10000, 1).unwrap();
    }

    #[test]
    fn test_stuck_part_times_out() {
        for config in [SimConfig::default(), amd(MemoryLayout::X16X16X1)] {
            let mut sim = SimFlash::new(config, BASE).unwrap();
            sim.set_stuck(true);
            let flash_config = FlashConfig::new(BASE, 2).with_poll_limit(Some(100));
            let mut flash = NorFlash::initialize(sim, flash_config).unwrap();
            assert_eq!(flash.write(0, &[0]), Err(Error::Timeout));

            // A part that never comes back fails reads instead of reporting busy
            let mut buf = [0u8; 4];
            let result = flash.read(0, &mut buf);
            assert_ne!(result, Err(Error::Busy));
            if flash.bus().config().family == SimFamily::Intel {
                assert!(matches!(
                    result,
                    Err(Error::HardwareError {
                        op: HardwareOp::Reset,
                        ..
                    })
                ));
                assert_eq!(flash.reset(), Err(Error::Busy));
            }
        }
    }

    #[test]
    fn test_intel_lock_unlock() {
        let mut flash = open(SimConfig::default());
        flash.lock(0x10000, 0).unwrap();
        assert!(flash.bus().is_protected(0x10000));
        assert!(!flash.bus().is_protected(0x20000));
        assert_eq!(
            flash.device_control(DeviceCommand::ProtectionStatus { offset: 0x10004 }),
            Err(Error::BlockProtected)
        );
        assert!(matches!(
            flash.write(0x10000, &[0]),
            Err(Error::HardwareError {
                op: HardwareOp::Program,
                ..
            })
        ));

        flash.unlock(0x10000, 0x10000).unwrap();
        assert_eq!(
            flash.device_control(DeviceCommand::ProtectionStatus { offset: 0x10000 }),
            Ok(DeviceResponse::Unprotected)
        );
        flash.write(0x10000, &[0]).unwrap();
    }

    #[test]
    fn test_intel_device_control() {
        let mut flash = open(SimConfig::default());
        assert_eq!(
            flash.device_control(DeviceCommand::SetRyBy(RyByMode::PulseOnWrite)),
            Ok(DeviceResponse::Done)
        );
        assert_eq!(flash.bus().ready_busy_mode(), Some(RyByMode::PulseOnWrite.code()));
        assert_eq!(
            flash.device_control(DeviceCommand::SetConfigRegister(0x1234)),
            Err(Error::NotSupported)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::EnterExtendedMode),
            Err(Error::NotSupported)
        );
        assert_eq!(flash.erase_chip(), Err(Error::NotSupported));
        assert_eq!(
            flash.device_control(DeviceCommand::EraseSuspend { offset: 0 }),
            Ok(DeviceResponse::Done)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::EraseResume { offset: 0 }),
            Ok(DeviceResponse::Done)
        );
        match flash.device_control(DeviceCommand::GetGeometry).unwrap() {
            DeviceResponse::Geometry(g) => assert_eq!(g.num_blocks(), 16),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_platform_flash_config_register() {
        let sim = SimFlash::new(SimConfig::default(), BASE).unwrap();
        let config = FlashConfig::new(BASE, 2).with_platform_flash(true);
        let mut flash = NorFlash::initialize(sim, config).unwrap();
        assert_eq!(
            flash.device_control(DeviceCommand::SetConfigRegister(0x1234)),
            Ok(DeviceResponse::Done)
        );
        assert_eq!(flash.bus().config_register(), Some(0x1234));

        // Platform flash programs through 0xE9
        flash.write(0, &[0xAA; 32]).unwrap();
        assert_eq!(flash.bus().buffer_cycles().len(), 1);
    }

    #[test]
    fn test_intel_banks_split_region() {
        let config = SimConfig {
            command_set: Some(0x0200),
            banks: 4,
            ..SimConfig::default()
        };
        let mut flash = open(config);
        let geometry = flash.geometry().unwrap().clone();
        assert_eq!(geometry.num_regions(), 4);
        assert_eq!(geometry.regions()[3].offset, 0xC0000);
        assert_eq!(geometry.regions()[3].block_count, 4);

        // Across the bank boundary
        let data = pattern(64);
        flash.erase(0x3FFE0, 64).unwrap();
        flash.write(0x3FFE0, &data).unwrap();
        let mut buf = vec![0u8; 64];
        flash.read(0x3FFE0, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_intel_interleaved() {
        let config = SimConfig {
            layout: MemoryLayout::X16X16X2,
            regions: vec![SimRegion {
                blocks: 16,
                block_size: Size::KiB(128),
            }],
            write_buffer: Size::B(64),
            ..SimConfig::default()
        };
        let mut flash = open(config);
        assert_eq!(flash.geometry().unwrap().layout(), MemoryLayout::X16X16X2);
        assert_eq!(flash.geometry().unwrap().device_size(), 2 << 20);

        let data = pattern(200);
        flash.write(0x21002, &data).unwrap();
        let mut buf = vec![0u8; 200];
        flash.read(0x21002, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(flash.bus().buffer_cycles()[0].start, 0x21000);
    }

    #[test]
    fn test_intel_byte_mode() {
        let config = SimConfig {
            layout: MemoryLayout::X16X8X1,
            write_buffer: Size::B(16),
            ..SimConfig::default()
        };
        let mut flash = open(config);
        assert_eq!(flash.geometry().unwrap().layout(), MemoryLayout::X16X8X1);
        flash.write(0x7, &[9, 8, 7]).unwrap();
        assert_eq!(&flash.bus().data()[0x6..0xB], &[0xFF, 9, 8, 7, 0xFF]);
    }

    #[test]
    fn test_amd_unlock_bypass_write() {
        let config = SimConfig {
            manufacturer: 0x00C2,
            ..amd(MemoryLayout::X16X16X1)
        };
        let mut flash = open(config);
        assert_eq!(
            flash.properties().unwrap().part_id.command_set,
            CommandSet::AmdStandard
        );
        assert_eq!(flash.properties().unwrap().part_id.manufacturer, 0x00C2);

        let data = pattern(9);
        flash.write(0x101, &data).unwrap();
        assert!(flash.bus().buffer_cycles().is_empty());
        assert_eq!(flash.bus().word_programs(), 5);
        let mut buf = vec![0u8; 9];
        flash.read(0x101, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(flash.bus().data()[0x100], 0xFF);
        assert!(flash.bus().in_read_array());
    }

    #[test]
    fn test_amd_write_buffer() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        let data = pattern(100);
        flash.write(0x23, &data).unwrap();

        // Only the words carrying data are loaded
        let cycles: Vec<(u32, u32)> = flash
            .bus()
            .buffer_cycles()
            .iter()
            .map(|c| (c.start, c.words))
            .collect();
        assert_eq!(cycles, [(0x22, 15), (0x40, 16), (0x60, 16), (0x80, 4)]);

        let mut buf = vec![0u8; 100];
        flash.read(0x23, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_amd_erase_and_chip_erase() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        flash.bus_mut().data_mut().fill(0x00);

        flash.erase(0x10000, 0x20000).unwrap();
        let array = flash.bus().data();
        assert_eq!(array[0xFFFF], 0x00);
        assert!(array[0x10000..0x30000].iter().all(|&b| b == 0xFF));
        assert_eq!(array[0x30000], 0x00);

        flash.erase_chip().unwrap();
        assert!(flash.bus().data().iter().all(|&b| b == 0xFF));
        assert!(flash.bus().in_read_array());
    }

    #[test]
    fn test_amd_program_failure() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        flash.bus_mut().fail_next_operation();
        assert!(matches!(
            flash.write(0, &[0x12, 0x34]),
            Err(Error::HardwareError {
                op: HardwareOp::Program,
                ..
            })
        ));
        assert!(flash.bus().in_read_array());
        flash.write(0, &[0x12, 0x34]).unwrap();
        assert_eq!(&flash.bus().data()[..2], &[0x12, 0x34]);
    }

    #[test]
    fn test_amd_protection() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        flash.lock(0x20000, 0x10001).unwrap();
        assert!(flash.bus().is_protected(0x20000));
        assert!(flash.bus().is_protected(0x30000));
        assert!(!flash.bus().is_protected(0x40000));
        assert_eq!(
            flash.device_control(DeviceCommand::ProtectionStatus { offset: 0x30000 }),
            Err(Error::BlockProtected)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::ProtectionStatus { offset: 0x40000 }),
            Ok(DeviceResponse::Unprotected)
        );

        // The erase runs but leaves protected blocks alone
        flash.bus_mut().data_mut()[0x20000] = 0;
        flash.erase(0x20000, 1).unwrap();
        assert_eq!(flash.bus().data()[0x20000], 0);

        // Unprotect is chip wide
        flash.unlock(0x20000, 1).unwrap();
        assert!(!flash.bus().is_protected(0x20000));
        assert!(!flash.bus().is_protected(0x30000));
        flash.erase(0x20000, 1).unwrap();
        assert_eq!(flash.bus().data()[0x20000], 0xFF);
    }

    #[test]
    fn test_amd_top_boot() {
        let config = SimConfig {
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
            ..amd(MemoryLayout::X16X16X1)
        };
        let mut flash = open(config);
        assert_eq!(flash.properties().unwrap().boot_mode, BootMode::Top);
        let geometry = flash.geometry().unwrap().clone();
        assert_eq!(geometry.regions()[0].block_size, 0x10000);
        assert_eq!(geometry.regions()[0].block_count, 31);
        assert_eq!(geometry.regions()[1].offset, 31 * 0x10000);
        assert_eq!(geometry.regions()[1].block_size, 0x2000);

        let last = geometry.device_size() - 0x2000;
        flash.bus_mut().data_mut().fill(0);
        flash.erase(last, 1).unwrap();
        let array = flash.bus().data();
        assert!(array[last as usize..].iter().all(|&b| b == 0xFF));
        assert_eq!(array[last as usize - 1], 0);
    }

    #[test]
    fn test_amd_byte_mode() {
        let config = SimConfig {
            manufacturer: 0x0004,
            ..amd(MemoryLayout::X16X8X1)
        };
        let mut flash = open(config);
        assert_eq!(flash.geometry().unwrap().layout(), MemoryLayout::X16X8X1);
        flash.erase(0, 1).unwrap();
        flash.write(0x3, &[0xA5, 0x5A]).unwrap();
        assert_eq!(flash.bus().word_programs(), 2);
        let mut buf = [0u8; 2];
        flash.read(0x3, &mut buf).unwrap();
        assert_eq!(buf, [0xA5, 0x5A]);
    }

    #[test]
    fn test_amd_interleaved() {
        let config = SimConfig {
            write_buffer: Size::B(64),
            ..SimConfig::uniform(SimFamily::Amd, MemoryLayout::X16X16X2, 1 << 22, 1 << 17)
        };
        let mut flash = open(config);
        assert_eq!(flash.geometry().unwrap().layout(), MemoryLayout::X16X16X2);
        let data = pattern(130);
        flash.erase(0x20000, 1).unwrap();
        flash.write(0x20004, &data).unwrap();
        let mut buf = vec![0u8; 130];
        flash.read(0x20004, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_amd_secured_silicon() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        flash.bus_mut().secured_silicon_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(
            flash.device_control(DeviceCommand::EnterExtendedMode),
            Ok(DeviceResponse::Done)
        );
        let mut buf = [0u8; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        flash.device_control(DeviceCommand::ExitExtendedMode).unwrap();
        assert!(!flash.bus().secured_mapped());
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
    }

    #[test]
    fn test_amd_device_control() {
        let mut flash = open(amd(MemoryLayout::X16X16X1));
        assert_eq!(
            flash.device_control(DeviceCommand::SetRyBy(RyByMode::Level)),
            Err(Error::NotSupported)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::EraseSuspend { offset: 0 }),
            Ok(DeviceResponse::Done)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::EraseResume { offset: 0 }),
            Ok(DeviceResponse::Done)
        );
        assert_eq!(
            flash.device_control(DeviceCommand::EraseChip),
            Ok(DeviceResponse::Done)
        );
        flash.reset().unwrap();
        assert!(flash.bus().in_read_array());
    }

    #[test]
    fn test_unsupported_layout() {
        let sim = SimFlash::new(amd(MemoryLayout::X16X16X4), BASE).unwrap();
        let mut flash = NorFlash::new(sim, FlashConfig::new(BASE, 8));
        assert_eq!(flash.init(), Err(Error::PartNotSupported));
        assert!(!flash.is_ready());
        let mut buf = [0u8; 1];
        assert_eq!(flash.read(0, &mut buf), Err(Error::NotInitialized));
    }

    #[test]
    fn test_ron_part() {
        let config = SimConfig::from_ron(
            r#"(
                family: Amd,
                layout: X16X16X1,
                manufacturer: 0x0001,
                device: 0x2201,
                regions: [
                    (blocks: 8, block_size: KiB(8)),
                    (blocks: 31, block_size: KiB(64)),
                ],
                write_buffer: B(0),
            )"#,
        )
        .unwrap();
        let mut flash = open(config);
        let geometry = flash.geometry().unwrap().clone();
        assert_eq!(geometry.num_regions(), 2);
        assert_eq!(geometry.regions()[0].block_size, 0x2000);
        assert_eq!(flash.properties().unwrap().boot_mode, BootMode::Bottom);

        flash.erase(0x2000, 0x2000).unwrap();
        flash.write(0x2000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&flash.bus().data()[0x2000..0x2004], &[1, 2, 3, 4]);
    }

    /// Sim bus that remembers every access not aligned to its own width
    struct AlignedOnly {
        sim: SimFlash,
        misaligned: Vec<(u64, u32)>,
    }

    impl AlignedOnly {
        fn check(&mut self, addr: u64, len: u32) {
            if addr % u64::from(len) != 0 {
                self.misaligned.push((addr, len));
            }
        }
    }

    impl FlashBus for AlignedOnly {
        fn read8(&mut self, addr: u64) -> u8 {
            self.sim.read8(addr)
        }
        fn read16(&mut self, addr: u64) -> u16 {
            self.check(addr, 2);
            self.sim.read16(addr)
        }
        fn read32(&mut self, addr: u64) -> u32 {
            self.check(addr, 4);
            self.sim.read32(addr)
        }
        fn read64(&mut self, addr: u64) -> u64 {
            self.check(addr, 8);
            self.sim.read64(addr)
        }
        fn write8(&mut self, addr: u64, value: u8) {
            self.sim.write8(addr, value)
        }
        fn write16(&mut self, addr: u64, value: u16) {
            self.check(addr, 2);
            self.sim.write16(addr, value)
        }
        fn write32(&mut self, addr: u64, value: u32) {
            self.check(addr, 4);
            self.sim.write32(addr, value)
        }
        fn write64(&mut self, addr: u64, value: u64) {
            self.check(addr, 8);
            self.sim.write64(addr, value)
        }
        fn delay_us(&mut self, us: u32) {
            self.sim.delay_us(us)
        }
        fn read_bytes(&mut self, addr: u64, buf: &mut [u8]) {
            self.sim.read_bytes(addr, buf)
        }
    }

    #[test]
    fn test_odd_offsets_keep_cycles_aligned() {
        let configs = [
            SimConfig::default(),
            amd(MemoryLayout::X16X16X1),
            amd(MemoryLayout::X16X16X2),
        ];
        for config in configs {
            let name = config.layout.name();
            let width = config.layout.bus_width() as u8;
            let bus = AlignedOnly {
                sim: SimFlash::new(config, BASE).unwrap(),
                misaligned: Vec::new(),
            };
            let mut flash = NorFlash::initialize(bus, FlashConfig::new(BASE, width)).unwrap();

            flash.erase(0x23, 1).unwrap();
            flash.write(0x23, &[1, 2, 3]).unwrap();
            let mut buf = [0u8; 5];
            flash.read(0x21, &mut buf).unwrap();
            assert_eq!(buf, [0xFF, 0xFF, 1, 2, 3], "{}", name);

            flash.lock(0x10001, 0).unwrap();
            flash.unlock(0x10001, 1).unwrap();
            assert_eq!(
                flash.device_control(DeviceCommand::ProtectionStatus { offset: 0x10003 }),
                Ok(DeviceResponse::Unprotected),
                "{}",
                name
            );
            flash
                .device_control(DeviceCommand::EraseSuspend { offset: 0x20003 })
                .unwrap();
            flash
                .device_control(DeviceCommand::EraseResume { offset: 0x20003 })
                .unwrap();
            flash.reset().unwrap();

            let bus = flash.bus();
            assert!(bus.misaligned.is_empty(), "{}: {:x?}", name, bus.misaligned);
            assert_eq!(bus.sim.misaligned_accesses(), 0, "{}", name);
            assert!(bus.sim.in_read_array(), "{}", name);
        }
    }
}
