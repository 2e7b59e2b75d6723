//! flashblob-core - Hardware-agnostic flash programming core
//!
//! This crate provides the pieces a flash loader needs between the host
//! protocol and the device drivers: a descriptor format for flash devices,
//! the capability interface devices implement, a registry mapping address
//! ranges to devices, and a dispatcher that turns address-based requests
//! into calls to device primitives. It is `no_std` compatible for use in
//! flash algorithms running on the target.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`), RON
//!   device tables and `std::error::Error` impls
//! - `alloc` - Enable heap allocation
//!
//! # Example
//!
//! ```ignore
//! use flashblob_core::{Dispatcher, MappedMemory, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register(GD32E50X_FLASH, &GD32E50X)?;
//!
//! let dispatcher = Dispatcher::new(&registry, unsafe { MappedMemory::new() });
//! if dispatcher.init(0x0800_0000) {
//!     let erased = dispatcher.erase(0x0800_0000, image.len() as u32);
//!     let written = dispatcher.write(0x0800_0000, &image);
//!     dispatcher.uninit(0x0800_0000);
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod device;
pub mod dispatch;
pub mod error;
pub mod registry;

pub use device::{
    Capabilities, DeviceDescriptor, DeviceKind, ErrorCode, FlashAlgorithm, Function, SectorInfo,
    Status, INTERFACE_VERSION, SECTOR_END,
};
#[cfg(feature = "std")]
pub use device::{DatabaseError, DeviceDatabase, DeviceEntry};
pub use dispatch::{Dispatcher, MappedMemory, MemoryBus};
pub use error::{Error, Result};
pub use registry::{Registry, RegistryEntry, RegistryHandle, MAX_DEVICES};
