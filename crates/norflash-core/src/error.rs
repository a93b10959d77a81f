//! Error types for norflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Which kind of embedded operation a status register reported as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareOp {
    /// Word or buffer programming
    Program,
    /// Block or chip erase
    Erase,
    /// Block lock / group protect
    Lock,
    /// Block unlock / chip unprotect
    Unlock,
    /// Erase suspend request
    Suspend,
    /// Return to read array; the part was still busy or had a failure latched
    Reset,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Lifecycle errors
    /// Operation attempted on an instance that was never initialized
    NotInitialized,

    // Address errors
    /// Offset or length falls outside the addressable geometry
    AddressError,
    /// Address is not aligned to the bus width
    AlignmentError,

    // Discovery errors
    /// CFI signature did not read back as "QRY"
    CfiQueryError,
    /// Bus layout or command set is not recognized by any driver
    PartNotSupported,
    /// CFI reports more erase regions than the region table can hold
    TooManyRegions,

    // Device errors
    /// Status register reported a failure
    HardwareError {
        /// Operation that failed
        op: HardwareOp,
        /// Raw status word read from the bus
        status: u64,
    },
    /// Block is protected against modification
    BlockProtected,
    /// Device is still executing an embedded operation
    Busy,
    /// Device control command is not available on this part
    NotSupported,
    /// Polling gave up after the configured number of status reads
    Timeout,
}

impl fmt::Display for HardwareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Program => write!(f, "program"),
            Self::Erase => write!(f, "erase"),
            Self::Lock => write!(f, "lock"),
            Self::Unlock => write!(f, "unlock"),
            Self::Suspend => write!(f, "suspend"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "flash instance not initialized"),
            Self::AddressError => write!(f, "address outside of flash geometry"),
            Self::AlignmentError => write!(f, "address not aligned to bus width"),
            Self::CfiQueryError => write!(f, "CFI query signature mismatch"),
            Self::PartNotSupported => write!(f, "flash part or bus layout not supported"),
            Self::TooManyRegions => write!(f, "too many erase regions"),
            Self::HardwareError { op, status } => {
                write!(f, "{} failed, status 0x{:X}", op, status)
            }
            Self::BlockProtected => write!(f, "block is protected"),
            Self::Busy => write!(f, "device busy"),
            Self::NotSupported => write!(f, "command not supported by this part"),
            Self::Timeout => write!(f, "device polling timed out"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
