//! Device registry
//!
//! The registry is built once at start-up: each device module registers its
//! descriptor together with a reference to its primitive operations. After
//! that the registry is only read, and the [`Dispatcher`](crate::dispatch::Dispatcher)
//! borrows it immutably, so no registration can happen once operations
//! have started.

use core::fmt;

use crate::device::{DeviceDescriptor, FlashAlgorithm};
use crate::error::{Error, Result};

/// Maximum number of devices a registry holds
pub const MAX_DEVICES: usize = 8;

/// Index of a registered device, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryHandle(usize);

impl RegistryHandle {
    /// Position of the device in registration order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A registered device: descriptor plus primitive operations
#[derive(Clone, Copy)]
pub struct RegistryEntry<'a> {
    descriptor: DeviceDescriptor<'a>,
    device: &'a dyn FlashAlgorithm,
}

impl<'a> RegistryEntry<'a> {
    /// Static description of the device
    pub fn descriptor(&self) -> &DeviceDescriptor<'a> {
        &self.descriptor
    }

    /// Primitive operations of the device
    pub fn device(&self) -> &'a dyn FlashAlgorithm {
        self.device
    }
}

impl fmt::Debug for RegistryEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("descriptor", &self.descriptor)
            .field("capabilities", &self.device.capabilities())
            .finish()
    }
}

/// Ordered collection of registered flash devices
///
/// Registration order is significant: [`resolve`](Self::resolve) returns
/// the earliest-registered device whose range contains the address, so if
/// ranges overlap the first one wins.
#[derive(Default)]
pub struct Registry<'a> {
    entries: heapless::Vec<RegistryEntry<'a>, MAX_DEVICES>,
}

impl<'a> Registry<'a> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Register a device
    ///
    /// The descriptor geometry is validated; overlapping ranges are not
    /// rejected (keeping them apart is the device table author's job) but
    /// are reported as a warning.
    ///
    /// # Errors
    /// * `InvalidDescriptor` - If the descriptor fails validation
    /// * `RegistryFull` - If [`MAX_DEVICES`] devices are already registered
    pub fn register(
        &mut self,
        descriptor: DeviceDescriptor<'a>,
        device: &'a dyn FlashAlgorithm,
    ) -> Result<RegistryHandle> {
        if let Err(e) = descriptor.validate() {
            log::error!("Refusing to register {}: {}", descriptor.name, e);
            return Err(Error::InvalidDescriptor(e));
        }

        for existing in self.entries.iter().filter(|e| e.descriptor.overlaps(&descriptor)) {
            log::warn!(
                "{} (0x{:08X}+0x{:X}) overlaps {} (0x{:08X}+0x{:X}); shared addresses keep resolving to {}",
                descriptor.name,
                descriptor.base_address,
                descriptor.total_size,
                existing.descriptor.name,
                existing.descriptor.base_address,
                existing.descriptor.total_size,
                existing.descriptor.name
            );
        }

        let handle = RegistryHandle(self.entries.len());
        self.entries
            .push(RegistryEntry { descriptor, device })
            .map_err(|_| Error::RegistryFull)?;

        log::debug!(
            "Registered {} [{}] at 0x{:08X} ({} bytes, page {} bytes, {:?})",
            descriptor.name,
            descriptor.kind,
            descriptor.base_address,
            descriptor.total_size,
            descriptor.page_size,
            device.capabilities()
        );

        Ok(handle)
    }

    /// Find the device that owns `address`
    ///
    /// Linear scan in registration order; the first half-open range
    /// `[base, base + size)` containing the address wins. `None` is a valid
    /// outcome, not an error.
    pub fn resolve(&self, address: u32) -> Option<&RegistryEntry<'a>> {
        self.entries
            .iter()
            .find(|entry| entry.descriptor.contains(address))
    }

    /// Get a registered device by handle
    pub fn get(&self, handle: RegistryHandle) -> Option<&RegistryEntry<'a>> {
        self.entries.get(handle.0)
    }

    /// Find a device by name (ASCII case-insensitive)
    pub fn find_by_name(&self, name: &str) -> Option<(RegistryHandle, &RegistryEntry<'a>)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.descriptor.name.eq_ignore_ascii_case(name))
            .map(|(i, entry)| (RegistryHandle(i), entry))
    }

    /// Pairs of registered devices whose ranges overlap
    ///
    /// Diagnostic only; in each pair the first handle is the one
    /// [`resolve`](Self::resolve) prefers.
    pub fn overlaps(&self) -> impl Iterator<Item = (RegistryHandle, RegistryHandle)> + '_ {
        self.entries.iter().enumerate().flat_map(move |(i, a)| {
            self.entries
                .iter()
                .enumerate()
                .skip(i + 1)
                .filter(move |(_, b)| a.descriptor.overlaps(&b.descriptor))
                .map(move |(j, _)| (RegistryHandle(i), RegistryHandle(j)))
        })
    }

    /// Iterate over registered devices in registration order
    pub fn iter(&self) -> impl Iterator<Item = (RegistryHandle, &RegistryEntry<'a>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (RegistryHandle(i), entry))
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no device is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
