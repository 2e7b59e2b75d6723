//! Device table loading
//!
//! Descriptor literals normally live next to the device code as `'static`
//! data. Host tools instead load them from RON files at runtime through
//! [`DeviceDatabase`], which owns the strings and sector tables and lends
//! [`DeviceDescriptor`] views of them.

use std::fs;
use std::io;
use std::path::Path;

use super::types::{DeviceDescriptor, DeviceKind, SectorInfo, INTERFACE_VERSION, SECTOR_END};

/// Error type for device table operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
    /// Size in mebibytes (1024 * 1024 bytes)
    MiB(u32),
}

impl Size {
    /// Convert to bytes, `None` if the size does not fit in 32 bits
    pub fn to_bytes(self) -> Option<u32> {
        match self {
            Size::B(n) => Some(n),
            Size::KiB(n) => n.checked_mul(1024),
            Size::MiB(n) => n.checked_mul(1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct SectorDef {
    size: Size,
    offset: u32,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct DeviceDef {
    name: String,
    #[serde(default)]
    kind: DeviceKind,
    base_address: u32,
    total_size: Size,
    page_size: Size,
    #[serde(default = "default_erased_value")]
    erased_value: u8,
    #[serde(default = "default_program_timeout")]
    program_timeout_ms: u32,
    #[serde(default = "default_erase_timeout")]
    erase_timeout_ms: u32,
    sectors: Vec<SectorDef>,
}

fn default_erased_value() -> u8 {
    0xFF
}

fn default_program_timeout() -> u32 {
    100
}

fn default_erase_timeout() -> u32 {
    3000
}

/// Vendor definition containing multiple devices
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    devices: Vec<DeviceDef>,
}

// ============================================================================
// Device database
// ============================================================================

/// One device loaded from a table, owning its name and sector map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Vendor the device was listed under
    pub vendor: String,
    name: String,
    kind: DeviceKind,
    base_address: u32,
    total_size: u32,
    page_size: u32,
    erased_value: u8,
    program_timeout_ms: u32,
    erase_timeout_ms: u32,
    /// Sector runs followed by the terminator
    sectors: Vec<SectorInfo>,
}

impl DeviceEntry {
    /// Borrow the entry as a descriptor
    pub fn descriptor(&self) -> DeviceDescriptor<'_> {
        DeviceDescriptor {
            version: INTERFACE_VERSION,
            name: &self.name,
            kind: self.kind,
            base_address: self.base_address,
            total_size: self.total_size,
            page_size: self.page_size,
            erased_value: self.erased_value,
            program_timeout_ms: self.program_timeout_ms,
            erase_timeout_ms: self.erase_timeout_ms,
            sectors: &self.sectors,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runtime device table
#[derive(Debug, Clone, Default)]
pub struct DeviceDatabase {
    devices: Vec<DeviceEntry>,
}

impl DeviceDatabase {
    /// Create an empty device table
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Load device definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, DatabaseError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load device definitions from a RON string
    ///
    /// Every definition is validated before anything is added, so a bad
    /// file leaves the table untouched.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, DatabaseError> {
        let vendor_def: VendorDef = ron::from_str(content)?;
        let mut loaded = Vec::with_capacity(vendor_def.devices.len());

        for def in vendor_def.devices {
            let bytes = |size: Size| {
                size.to_bytes().ok_or_else(|| {
                    DatabaseError::Validation(format!("{}: size overflows 32 bits", def.name))
                })
            };

            let mut sectors = Vec::with_capacity(def.sectors.len() + 1);
            for s in &def.sectors {
                sectors.push(SectorInfo::new(bytes(s.size)?, s.offset));
            }
            sectors.push(SECTOR_END);
            let total_size = bytes(def.total_size)?;
            let page_size = bytes(def.page_size)?;

            let entry = DeviceEntry {
                vendor: vendor_def.vendor.clone(),
                name: def.name,
                kind: def.kind,
                base_address: def.base_address,
                total_size,
                page_size,
                erased_value: def.erased_value,
                program_timeout_ms: def.program_timeout_ms,
                erase_timeout_ms: def.erase_timeout_ms,
                sectors,
            };

            entry.descriptor().validate().map_err(|e| {
                DatabaseError::Validation(format!("{}: {}", entry.name, e))
            })?;
            loaded.push(entry);
        }

        let count = loaded.len();
        self.devices.extend(loaded);
        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, DatabaseError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ron") {
                paths.push(path);
            }
        }
        // Registration order decides overlap tie-breaks, keep it stable
        paths.sort();

        let mut total = 0;
        for path in paths {
            total += self.load_file(&path)?;
        }
        Ok(total)
    }

    /// Get all devices in the table
    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    /// Get the number of devices in the table
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Find a device by name (case-insensitive exact match)
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Find devices by vendor (case-insensitive partial match)
    pub fn find_by_vendor(&self, vendor: &str) -> Vec<&DeviceEntry> {
        let vendor_lower = vendor.to_lowercase();
        self.devices
            .iter()
            .filter(|d| d.vendor.to_lowercase().contains(&vendor_lower))
            .collect()
    }

    /// Iterate over all devices
    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter()
    }
}
