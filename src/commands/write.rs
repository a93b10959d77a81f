//! Write command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use super::read::{read_with_progress, resolve_range};
use crate::handle::FlashHandle;

/// Bytes handed to the driver per write call
const WRITE_CHUNK_SIZE: usize = 4096;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Run the write command
pub fn run_write(
    handle: &mut FlashHandle,
    input: &Path,
    start: u32,
    verify: bool,
    no_erase: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    if data.is_empty() {
        println!("{:?} is empty, nothing to write", input);
        return Ok(());
    }
    let length = u32::try_from(data.len()).map_err(|_| "Input file is larger than 4 GiB")?;
    resolve_range(handle, start, Some(length))?;

    if !no_erase {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message(format!("Erasing blocks covering {} bytes...", data.len()));
        pb.enable_steady_tick(Duration::from_millis(100));
        handle.erase(start, data.len())?;
        pb.finish_with_message("Erase complete");
    }

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(bar_style());
    for (i, chunk) in data.chunks(WRITE_CHUNK_SIZE).enumerate() {
        let offset = i * WRITE_CHUNK_SIZE;
        handle.write(start + offset as u32, chunk)?;
        pb.set_position((offset + chunk.len()) as u64);
    }
    pb.finish_with_message("Write complete");

    if verify {
        let readback = read_with_progress(handle, start, data.len())?;
        if let Some(pos) = readback.iter().zip(&data).position(|(a, b)| a != b) {
            return Err(format!(
                "Verification failed at 0x{:08X}: expected 0x{:02X}, read 0x{:02X}",
                start as usize + pos,
                data[pos],
                readback[pos]
            )
            .into());
        }
        println!("Verified {} bytes", data.len());
    }

    println!("Wrote {} bytes at 0x{:08X}", data.len(), start);
    Ok(())
}
