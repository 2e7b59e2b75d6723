//! Error types for flashblob-core
//!
//! This module provides a no_std compatible error type shared by the
//! registry and the dispatcher. The coarse dispatcher entry points collapse
//! these into byte counts; the `try_*` variants hand them to the caller.

use core::fmt;

use crate::device::{Capabilities, DescriptorError, ErrorCode};

/// Primitive operation that reported a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `Init`
    Init,
    /// `UnInit`
    UnInit,
    /// `EraseChip`
    EraseChip,
    /// `EraseSector`
    EraseSector,
    /// `Program`
    Program,
    /// `Read`
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::UnInit => "uninit",
            Self::EraseChip => "chip erase",
            Self::EraseSector => "sector erase",
            Self::Program => "program",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Details about a failed device primitive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveFailure {
    /// Which primitive failed
    pub operation: Operation,
    /// Address passed to the primitive
    pub address: u32,
    /// Status code returned by the device
    pub code: ErrorCode,
    /// Bytes successfully processed before the failing call
    pub completed: u32,
}

impl fmt::Display for PrimitiveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at address 0x{:08X} with status {} ({} bytes completed)",
            self.operation, self.address, self.code, self.completed
        )
    }
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Dispatch errors
    /// No registered device owns the address
    DeviceNotFound {
        /// Requested address
        address: u32,
    },
    /// Address is not word aligned
    MisalignedAddress {
        /// Requested address
        address: u32,
    },
    /// Request extends past the end of the device
    OutOfRange {
        /// Requested address
        address: u32,
        /// Requested length in bytes
        len: u32,
    },
    /// Device does not implement the required primitive
    CapabilityUnavailable(Capabilities),
    /// A device primitive returned a non-zero status
    PrimitiveFailure(PrimitiveFailure),
    /// Read-back data differs from the expected contents
    VerifyMismatch {
        /// First address that differs
        address: u32,
    },
    /// Blank check found a programmed byte
    NotBlank {
        /// Address of the first non-erased byte
        address: u32,
        /// Value found there
        found: u8,
    },

    // Registry errors
    /// Descriptor geometry is invalid
    InvalidDescriptor(DescriptorError),
    /// No free registry slot
    RegistryFull,
}

impl Error {
    /// Bytes completed before the failure.
    ///
    /// Only a primitive failure can happen after work has started; every
    /// other kind is raised before the first device call.
    pub fn completed(&self) -> u32 {
        match self {
            Self::PrimitiveFailure(failure) => failure.completed,
            _ => 0,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound { address } => {
                write!(f, "no flash device at address 0x{:08X}", address)
            }
            Self::MisalignedAddress { address } => {
                write!(f, "address 0x{:08X} is not 4-byte aligned", address)
            }
            Self::OutOfRange { address, len } => write!(
                f,
                "range 0x{:08X}+0x{:X} exceeds the device size",
                address, len
            ),
            Self::CapabilityUnavailable(caps) => {
                write!(f, "device does not support {:?}", caps)
            }
            Self::PrimitiveFailure(failure) => write!(f, "{}", failure),
            Self::VerifyMismatch { address } => {
                write!(f, "verify failed: data mismatch at 0x{:08X}", address)
            }
            Self::NotBlank { address, found } => write!(
                f,
                "blank check failed at 0x{:08X}: found 0x{:02X}",
                address, found
            ),
            Self::InvalidDescriptor(e) => write!(f, "invalid device descriptor: {}", e),
            Self::RegistryFull => write!(f, "device registry is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
