//! Common Flash Interface query decoding
//!
//! This module discovers how NOR parts are attached to the bus and decodes
//! their CFI table into a [`Geometry`](crate::geometry::Geometry) and
//! [`Properties`].

mod parser;
mod types;

pub use parser::{detect_layout, probe, CfiInfo};
pub use types::*;
