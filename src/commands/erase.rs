//! Erase command implementations

use super::session::{self, EmulatedDispatcher};
use super::spinner;
use flashblob_core::DeviceDatabase;
use std::path::Path;

/// Run the erase command
pub fn run_erase(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let erased = session::run(db, image, address, true, |dispatcher| {
        erase_with_spinner(dispatcher, address, length)
    })?;
    println!("Erased {} bytes starting at 0x{:08X}", erased, address);
    Ok(())
}

/// Erase sectors with progress spinner
///
/// Returns the number of bytes erased (whole sectors).
pub fn erase_with_spinner(
    dispatcher: &EmulatedDispatcher<'_>,
    address: u32,
    length: u32,
) -> Result<u32, Box<dyn std::error::Error>> {
    let pb = spinner(format!("Erasing {} bytes from 0x{:08X}...", length, address))?;
    match dispatcher.try_erase(address, length) {
        Ok(erased) => {
            pb.finish_with_message(format!("Erased {} bytes", erased));
            Ok(erased)
        }
        Err(e) => {
            pb.abandon_with_message(format!("Erase stopped after {} bytes", e.completed()));
            Err(e.into())
        }
    }
}

/// Run the erase-chip command
pub fn run_erase_chip(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    session::run(db, image, address, true, |dispatcher| {
        let total_size = dispatcher
            .device_at(address)
            .map_or(0, |desc| desc.total_size);
        let pb = spinner(format!(
            "Erasing {} bytes (this may take a while)...",
            total_size
        ))?;
        dispatcher.try_erase_chip(address)?;
        pb.finish_with_message(format!("Erased {} bytes", total_size));
        Ok(())
    })?;
    println!("Chip erase complete");
    Ok(())
}

/// Run the blank-check command
pub fn run_blank_check(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    session::run(db, image, address, false, |dispatcher| {
        let pb = spinner(format!("Checking {} bytes from 0x{:08X}...", length, address))?;
        let result = dispatcher.try_blank_check(address, length);
        pb.finish_and_clear();
        Ok(result?)
    })?;
    println!("Range 0x{:08X}+0x{:X} is blank", address, length);
    Ok(())
}
