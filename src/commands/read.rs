//! Read command implementation

use super::session::{self, EmulatedDispatcher};
use super::progress_bar;
use flashblob_core::{DeviceDatabase, Error};
use std::fs;
use std::path::Path;

/// Default chunk size for reading (4 KiB)
const READ_CHUNK_SIZE: u32 = 4096;

/// Run the read command
pub fn run_read(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
    length: u32,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = session::run(db, image, address, false, |dispatcher| {
        read_with_progress(dispatcher, address, length)
    })?;

    fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Read a range with progress bar
pub fn read_with_progress(
    dispatcher: &EmulatedDispatcher<'_>,
    address: u32,
    length: u32,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    // Reject the request before allocating the buffer for it
    let device = dispatcher
        .device_at(address)
        .ok_or(Error::DeviceNotFound { address })?;
    if !device.fits(address, length) {
        return Err(Error::OutOfRange { address, len: length }.into());
    }

    let mut data = vec![0u8; length as usize];
    let pb = progress_bar(length as u64)?;

    let mut offset = 0u32;
    while offset < length {
        let chunk_size = READ_CHUNK_SIZE.min(length - offset);
        let chunk = &mut data[offset as usize..(offset + chunk_size) as usize];
        let chunk_address = address
            .checked_add(offset)
            .ok_or(Error::OutOfRange { address, len: length })?;
        dispatcher.try_read(chunk_address, chunk)?;

        offset += chunk_size;
        pb.set_position(offset as u64);
    }

    pb.finish_with_message("Read complete");
    Ok(data)
}
