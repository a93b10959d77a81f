//! Block protection commands

use norflash_core::flash::{DeviceCommand, DeviceResponse};
use norflash_core::Error;

use super::format_size;
use crate::handle::FlashHandle;

/// Run the lock command
pub fn run_lock(
    handle: &mut FlashHandle,
    start: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    handle.lock(start, length as usize)?;
    println!("Protected blocks from 0x{:08X}", start);
    Ok(())
}

/// Run the unlock command
pub fn run_unlock(
    handle: &mut FlashHandle,
    start: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    handle.unlock(start, length as usize)?;
    println!("Removed protection from 0x{:08X}", start);
    Ok(())
}

/// Print the protection state of every block
pub fn run_protection(handle: &mut FlashHandle) -> Result<(), Box<dyn std::error::Error>> {
    let regions = handle.geometry().regions().to_vec();
    println!("{:>10}  {:>8}  State", "Offset", "Size");
    let mut protected = 0;
    for region in regions {
        for block in 0..region.block_count {
            let offset = region.offset + block * region.block_size;
            let state = match handle.device_control(DeviceCommand::ProtectionStatus { offset }) {
                Ok(DeviceResponse::Unprotected) => "unprotected",
                Err(Error::BlockProtected) => {
                    protected += 1;
                    "protected"
                }
                Ok(other) => return Err(format!("Unexpected response {:?}", other).into()),
                Err(e) => return Err(e.into()),
            };
            println!(
                "0x{:08X}  {:>8}  {}",
                offset,
                format_size(region.block_size),
                state
            );
        }
    }
    println!();
    println!(
        "{} of {} block(s) protected",
        protected,
        handle.geometry().num_blocks()
    );
    Ok(())
}
