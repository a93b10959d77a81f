//! norflash-core - Engine for CFI compliant parallel NOR flash
//!
//! This crate drives memory-mapped NOR flash parts that implement the
//! Common Flash Interface. It detects how the parts are wired to the bus,
//! decodes the CFI table into a [`geometry::Geometry`] and
//! [`cfi::Properties`], and then runs the Intel or AMD/Spansion command
//! protocol to read, program, erase and protect the array.
//!
//! The crate is `no_std` and never allocates. All hardware access goes
//! through the [`bus::FlashBus`] trait.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc` and `serde`)
//! - `alloc` - Reserved for heap backed helpers
//! - `serde` - Derive `Serialize`/`Deserialize` for the descriptive types
//!
//! # Example
//!
//! ```ignore
//! use norflash_core::{bus::FlashBus, flash::{FlashConfig, NorFlash}};
//!
//! fn dump_id<B: FlashBus>(bus: B) -> norflash_core::Result<()> {
//!     let flash = NorFlash::initialize(bus, FlashConfig::new(0x6000_0000, 2))?;
//!     if let Some(props) = flash.properties() {
//!         println!("{:04x}:{:04x}", props.part_id.manufacturer, props.part_id.device);
//!     }
//!     Ok(())
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod bus;
pub mod cfi;
pub mod error;
pub mod family;
pub mod flash;
pub mod geometry;

pub use error::{Error, Result};
