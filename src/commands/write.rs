//! Write command implementation

use super::erase::erase_with_spinner;
use super::session::{self, EmulatedDispatcher};
use super::{progress_bar, spinner};
use flashblob_core::{DeviceDatabase, Error};
use std::fs;
use std::path::Path;

/// Pages handed to the dispatcher per write call
const PAGES_PER_CHUNK: u32 = 16;

/// Run the write command
pub fn run_write(
    db: &DeviceDatabase,
    image: Option<&Path>,
    address: u32,
    input: &Path,
    erase: bool,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    let length = u32::try_from(data.len()).map_err(|_| "Input file larger than 4 GiB")?;

    session::run(db, image, address, true, |dispatcher| {
        if erase {
            erase_with_spinner(dispatcher, address, length)?;
        }
        write_with_progress(dispatcher, address, &data)?;
        if verify {
            verify_with_spinner(dispatcher, address, &data)?;
        }
        Ok(())
    })?;

    println!("Write complete");
    Ok(())
}

/// Program `data` with progress bar
pub fn write_with_progress(
    dispatcher: &EmulatedDispatcher<'_>,
    address: u32,
    data: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let page_size = dispatcher
        .device_at(address)
        .map_or(256, |desc| desc.page_size);
    let chunk_size = page_size.saturating_mul(PAGES_PER_CHUNK) as usize;

    let pb = progress_bar(data.len() as u64)?;
    let mut written = 0usize;
    for chunk in data.chunks(chunk_size) {
        let chunk_address = u32::try_from(written)
            .ok()
            .and_then(|offset| address.checked_add(offset))
            .ok_or(Error::OutOfRange {
                address,
                len: u32::try_from(data.len()).unwrap_or(u32::MAX),
            })?;
        dispatcher.try_write(chunk_address, chunk)?;
        written += chunk.len();
        pb.set_position(written as u64);
    }
    pb.finish_with_message("Write complete");
    Ok(())
}

/// Compare device contents with `data`
pub fn verify_with_spinner(
    dispatcher: &EmulatedDispatcher<'_>,
    address: u32,
    data: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner(format!("Verifying {} bytes...", data.len()))?;
    dispatcher.try_verify(address, data)?;
    pb.finish_with_message("Verify OK");
    Ok(())
}
