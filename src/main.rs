//! norflash - A CFI parallel NOR flash tool
//!
//! Detects memory mapped NOR flash through the Common Flash Interface and
//! reads, programs, erases and protects it with the Intel or AMD command
//! set.
//!
//! # Architecture
//!
//! The engine lives in `norflash-core` and talks to hardware through the
//! `FlashBus` trait. Two back-ends implement it:
//! - **sim** - a software model of Intel and AMD parts, for trying things
//!   out and for tests
//! - **physmap** - the physical flash window mapped through /dev/mem

mod cli;
mod commands;
mod handle;
mod programmers;
mod registry;

use clap::Parser;
use cli::{Cli, Commands};
use programmers::open_flash;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Probe { flash } => {
            let handle = open_flash(&flash)?;
            commands::probe::run_probe(&handle);
            handle.close()
        }
        Commands::Info { flash } => {
            let handle = open_flash(&flash)?;
            commands::probe::run_info(&handle);
            handle.close()
        }
        Commands::Read {
            flash,
            output,
            start,
            length,
        } => {
            let mut handle = open_flash(&flash)?;
            commands::read::run_read(&mut handle, &output, start, length)?;
            handle.close()
        }
        Commands::Write {
            flash,
            input,
            start,
            verify,
            no_erase,
        } => {
            let mut handle = open_flash(&flash)?;
            commands::write::run_write(&mut handle, &input, start, verify, no_erase)?;
            handle.close()
        }
        Commands::Erase {
            flash,
            start,
            length,
        } => {
            let mut handle = open_flash(&flash)?;
            commands::erase::run_erase(&mut handle, start, length)?;
            handle.close()
        }
        Commands::EraseChip { flash } => {
            let mut handle = open_flash(&flash)?;
            commands::erase::run_erase_chip(&mut handle)?;
            handle.close()
        }
        Commands::Lock {
            flash,
            start,
            length,
        } => {
            let mut handle = open_flash(&flash)?;
            commands::protect::run_lock(&mut handle, start, length)?;
            handle.close()
        }
        Commands::Unlock {
            flash,
            start,
            length,
        } => {
            let mut handle = open_flash(&flash)?;
            commands::protect::run_unlock(&mut handle, start, length)?;
            handle.close()
        }
        Commands::Protection { flash } => {
            let mut handle = open_flash(&flash)?;
            commands::protect::run_protection(&mut handle)?;
            handle.close()
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
    }
}
