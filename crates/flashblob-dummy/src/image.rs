//! Image files holding the contents of an emulated device

use std::fs;
use std::io;
use std::path::Path;

use crate::EmulatedFlash;

/// Error type for image file operations
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// I/O error reading or writing the file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Image is larger than the device
    #[error("image is {actual} bytes but the device holds only {capacity}")]
    TooLarge {
        /// Device size in bytes
        capacity: usize,
        /// Image size in bytes
        actual: usize,
    },
}

impl EmulatedFlash<'_> {
    /// Replace the device contents with an image file
    ///
    /// A shorter image leaves the remainder erased.
    pub fn load_image(&self, path: &Path) -> Result<(), ImageError> {
        let data = fs::read(path)?;
        let mut memory = self.memory.borrow_mut();
        if data.len() > memory.len() {
            return Err(ImageError::TooLarge {
                capacity: memory.len(),
                actual: data.len(),
            });
        }
        memory.fill(self.descriptor.erased_value);
        memory[..data.len()].copy_from_slice(&data);
        log::debug!(
            "{}: loaded {} bytes from {}",
            self.descriptor.name,
            data.len(),
            path.display()
        );
        Ok(())
    }

    /// Write the full device contents to an image file
    pub fn save_image(&self, path: &Path) -> Result<(), ImageError> {
        fs::write(path, &*self.memory.borrow())?;
        log::debug!("{}: saved image to {}", self.descriptor.name, path.display());
        Ok(())
    }
}
