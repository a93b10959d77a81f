//! Erase command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::read::resolve_range;
use crate::handle::FlashHandle;

fn spinner(message: String) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Run the erase command
///
/// Without a range every block of the part is erased one by one.
pub fn run_erase(
    handle: &mut FlashHandle,
    start: Option<u32>,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (start, length) = match (start, length) {
        (Some(start), Some(length)) => (start, length),
        (Some(_), None) | (None, Some(_)) => {
            return Err("Both --start and --length must be specified for partial erase".into());
        }
        (None, None) => (0, handle.size()),
    };
    let length = resolve_range(handle, start, Some(length))?;

    let geometry = handle.geometry();
    let blocks = geometry.blocks_in_range(start, length)?;
    let pb = spinner(format!(
        "Erasing {} block(s) from 0x{:08X}...",
        blocks, start
    ))?;
    handle.erase(start, length)?;
    pb.finish_with_message(format!("Erased {} block(s)", blocks));
    Ok(())
}

/// Run the erase-chip command
pub fn run_erase_chip(handle: &mut FlashHandle) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!(
        "Erasing {} bytes (this may take a while)...",
        handle.size()
    ))?;
    match handle.erase_chip() {
        Ok(()) => {
            pb.finish_with_message("Chip erase complete");
            Ok(())
        }
        Err(norflash_core::Error::NotSupported) => {
            pb.finish_and_clear();
            Err("This part has no chip erase command; use 'erase' instead".into())
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e.into())
        }
    }
}
