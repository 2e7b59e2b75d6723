//! Emulated device session
//!
//! Each command runs against a freshly built [`EmulatedFlash`] for the
//! device owning the requested address. The device contents come from an
//! optional image file and are written back after modifying commands.

use flashblob_core::{DeviceDatabase, DeviceEntry, Dispatcher, Registry};
use flashblob_dummy::{EmulatedBus, EmulatedFlash};
use std::path::Path;

/// Dispatcher type handed to command bodies
pub type EmulatedDispatcher<'s> = Dispatcher<'s, 's, EmulatedBus<'s, 's>>;

/// Find the first table entry whose range contains `address`
pub fn owner<'db>(
    db: &'db DeviceDatabase,
    address: u32,
) -> Result<&'db DeviceEntry, Box<dyn std::error::Error>> {
    db.iter()
        .find(|entry| entry.descriptor().contains(address))
        .ok_or_else(|| format!("No device in the table covers address 0x{:08X}", address).into())
}

/// Run `op` between `init` and `uninit` of the device owning `address`
///
/// With `persist` set and an image path given, the device contents are
/// saved back to the image once `op` has succeeded.
pub fn run<R>(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
    persist: bool,
    op: impl FnOnce(&EmulatedDispatcher<'_>) -> Result<R, Box<dyn std::error::Error>>,
) -> Result<R, Box<dyn std::error::Error>> {
    let entry = owner(db, address)?;
    let flash = EmulatedFlash::new(entry.descriptor());

    if let Some(path) = image {
        if path.exists() {
            flash.load_image(path)?;
        } else {
            log::info!("{} does not exist yet, starting erased", path.display());
        }
    }

    let mut registry = Registry::new();
    registry.register(*flash.descriptor(), &flash)?;
    let mut bus = EmulatedBus::new();
    bus.attach(&flash);
    let dispatcher = Dispatcher::new(&registry, bus);

    println!(
        "Using: {} {} at 0x{:08X} ({} bytes)",
        entry.vendor,
        entry.name(),
        flash.descriptor().base_address,
        flash.descriptor().total_size
    );

    if !dispatcher.init(address) {
        return Err(format!("Failed to initialise device at 0x{:08X}", address).into());
    }
    let result = op(&dispatcher);
    if !dispatcher.uninit(address) {
        log::warn!("Device did not release cleanly");
    }
    let value = result?;

    if persist {
        if let Some(path) = image {
            flash.save_image(path)?;
            log::info!("Saved device contents to {}", path.display());
        }
    }

    Ok(value)
}
