//! CLI argument parsing

use crate::registry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use [available: {}]",
        registry::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "norflash")]
#[command(author, version, about = "CFI parallel NOR flash tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that talks to a part
#[derive(clap::Args, Debug, Clone)]
pub struct FlashArgs {
    /// Programmer to use, with parameters (e.g. sim:family=amd)
    #[arg(short, long, help = programmer_help())]
    pub programmer: String,

    /// Part is an Intel platform flash (0xE9/0x41 program commands)
    #[arg(long)]
    pub platform_flash: bool,

    /// Give up after this many status reads instead of polling forever
    #[arg(long)]
    pub poll_limit: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe for a CFI flash part
    Probe {
        #[command(flatten)]
        flash: FlashArgs,
    },

    /// Show geometry and properties of the part
    Info {
        #[command(flatten)]
        flash: FlashArgs,
    },

    /// Read flash contents to file
    Read {
        #[command(flatten)]
        flash: FlashArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start offset (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Number of bytes to read (defaults to the rest of the device)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write file to flash
    Write {
        #[command(flatten)]
        flash: FlashArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start offset (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Verify after writing
        #[arg(long, default_value = "true")]
        verify: bool,

        /// Don't erase before writing
        #[arg(long)]
        no_erase: bool,
    },

    /// Erase the blocks covering a range
    Erase {
        #[command(flatten)]
        flash: FlashArgs,

        /// Start offset (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: Option<u32>,

        /// Length of region to erase (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Erase the whole part with the chip erase command (AMD only)
    EraseChip {
        #[command(flatten)]
        flash: FlashArgs,
    },

    /// Protect the blocks covering a range
    Lock {
        #[command(flatten)]
        flash: FlashArgs,

        /// Start offset (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: u32,

        /// Length of the range (0 targets the block holding start)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        length: u32,
    },

    /// Remove protection (AMD parts unprotect the whole chip)
    Unlock {
        #[command(flatten)]
        flash: FlashArgs,

        /// Start offset (hex, e.g., 0x10000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: u32,

        /// Length of the range (0 targets the block holding start)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        length: u32,
    },

    /// Show the protection state of every block
    Protection {
        #[command(flatten)]
        flash: FlashArgs,
    },

    /// List supported programmers
    ListProgrammers,
}
