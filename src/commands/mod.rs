//! CLI command implementations
//!
//! Every command works on a [`FlashHandle`](crate::handle::FlashHandle),
//! independent of the programmer behind it.

pub mod erase;
mod list;
pub mod probe;
pub mod protect;
pub mod read;
pub mod write;

pub use list::list_programmers;

/// Format a byte count with the largest fitting binary unit
pub fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
