//! Error types for the physmap back-end

use thiserror::Error;

/// Errors raised while mapping the flash window
#[derive(Debug, Error)]
pub enum PhysmapError {
    /// /dev/mem could not be opened (usually missing root privileges)
    #[error("failed to open /dev/mem: {0}")]
    Open(#[source] std::io::Error),

    /// mmap of the requested window failed
    #[error("failed to map {size:#x} bytes at {address:#x}: {source}")]
    MemoryMap {
        address: u64,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// Window is empty or wraps around the address space
    #[error("invalid flash window {size:#x} bytes at {address:#x}")]
    InvalidWindow { address: u64, size: usize },

    /// Physical memory access is not available on this platform
    #[error("{0}")]
    NotSupported(&'static str),
}
