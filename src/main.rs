//! flashblob - Flash device dispatcher front end
//!
//! Runs the `flashblob-core` dispatcher on the host against emulated
//! devices described by a RON device table. Device contents persist in
//! image files between invocations, so a sequence of commands behaves like
//! a session with a real flash loader:
//!
//! ```text
//! flashblob erase --address 0x08000000 --length 0x4000 --image flash.img
//! flashblob write --address 0x08000000 --input fw.bin --image flash.img --verify
//! flashblob read --address 0x08000000 --length 0x4000 --output dump.bin --image flash.img
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use flashblob_core::DeviceDatabase;
use std::path::{Path, PathBuf};

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

    let db = match load_device_database(cli.devices.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load device table: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Loaded {} device definitions", db.len());

    let result = match cli.command {
        Commands::List { vendor } => {
            commands::list_devices(&db, vendor.as_deref());
            Ok(())
        }
        Commands::Info { address } => commands::show_info(&db, address),
        Commands::Read {
            address,
            length,
            output,
            image,
        } => commands::run_read(&db, image.image.as_deref(), address, length, &output),
        Commands::Write {
            address,
            input,
            erase,
            verify,
            image,
        } => commands::run_write(&db, image.image.as_deref(), address, &input, erase, verify),
        Commands::Erase {
            address,
            length,
            image,
        } => commands::run_erase(&db, image.image.as_deref(), address, length),
        Commands::EraseChip { address, image } => {
            commands::run_erase_chip(&db, image.image.as_deref(), address)
        }
        Commands::BlankCheck {
            address,
            length,
            image,
        } => commands::run_blank_check(&db, image.image.as_deref(), address, length),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Load the device table from the given path or the default locations
fn load_device_database(
    path: Option<&Path>,
) -> Result<DeviceDatabase, Box<dyn std::error::Error>> {
    let mut db = DeviceDatabase::new();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Device table path not found: {}", path.display()).into());
        }
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("devices"),
            PathBuf::from("/usr/share/flashblob/devices"),
            PathBuf::from("/usr/local/share/flashblob/devices"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match db.load_dir(dir) {
                    Ok(count) => {
                        log::debug!("Loaded {} devices from {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to load devices from {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No device table found in default locations");
        }
    }

    Ok(db)
}
