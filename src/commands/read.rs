//! Read command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::handle::FlashHandle;

/// Default chunk size for reading (4 KiB)
const READ_CHUNK_SIZE: usize = 4096;

/// Resolve an optional length against the device size
pub fn resolve_range(
    handle: &FlashHandle,
    start: u32,
    length: Option<u32>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let size = handle.size();
    if start >= size {
        return Err(format!("Start 0x{:08X} is outside the part (0x{:08X})", start, size).into());
    }
    let length = length.unwrap_or(size - start);
    if u64::from(start) + u64::from(length) > u64::from(size) {
        return Err(format!(
            "Range 0x{:08X}..0x{:08X} is outside the part (0x{:08X})",
            start,
            u64::from(start) + u64::from(length),
            size
        )
        .into());
    }
    Ok(length as usize)
}

/// Run the read command
pub fn run_read(
    handle: &mut FlashHandle,
    output: &Path,
    start: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let length = resolve_range(handle, start, length)?;
    let data = read_with_progress(handle, start, length)?;

    let mut file = File::create(output)?;
    file.write_all(&data)?;

    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Read `length` bytes from `start` with a progress bar
pub fn read_with_progress(
    handle: &mut FlashHandle,
    start: u32,
    length: usize,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut data = vec![0u8; length];

    let pb = ProgressBar::new(length as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );

    for (i, chunk) in data.chunks_mut(READ_CHUNK_SIZE).enumerate() {
        let offset = i * READ_CHUNK_SIZE;
        handle.read(start + offset as u32, chunk)?;
        pb.set_position((offset + chunk.len()) as u64);
    }

    pb.finish_with_message("Read complete");
    Ok(data)
}
