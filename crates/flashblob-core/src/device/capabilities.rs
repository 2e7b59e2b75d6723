//! Device capability interface
//!
//! A flash device plugs into the dispatcher by implementing
//! [`FlashAlgorithm`]. The method set mirrors the classic flash-algorithm
//! calling convention (`Init`, `UnInit`, `EraseChip`, `EraseSector`,
//! `ProgramPage`, `Read`). Which of the optional primitives a device really
//! provides is declared up front through [`Capabilities`], so the dispatcher
//! never has to probe by calling.

use core::fmt;
use core::num::NonZeroU32;

use bitflags::bitflags;

bitflags! {
    /// Optional primitives implemented by a device
    ///
    /// `Init` and `UnInit` are mandatory and have no flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Erase the whole device in one call
        const ERASE_CHIP   = 1 << 0;
        /// Erase the sector containing an address
        const ERASE_SECTOR = 1 << 1;
        /// Program up to one page
        const PROGRAM      = 1 << 2;
        /// Read through the device instead of a direct memory load
        const READ         = 1 << 3;

        /// Typical memory-mapped on-chip flash: everything except `READ`
        const MAPPED = Self::ERASE_CHIP.bits() | Self::ERASE_SECTOR.bits() | Self::PROGRAM.bits();
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::empty()
    }
}

/// Non-zero status code returned by a failing primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(NonZeroU32);

impl ErrorCode {
    /// Generic failure (the conventional `1`)
    pub const FAILED: Self = Self::custom(1);
    /// Primitive is not implemented by this device
    pub const UNSUPPORTED: Self = Self::custom(u32::MAX);

    /// Device-specific code for use in constants
    ///
    /// # Panics
    /// If `code` is zero, which means success.
    pub const fn custom(code: u32) -> Self {
        match NonZeroU32::new(code) {
            Some(code) => Self(code),
            None => panic!("error code must be non-zero"),
        }
    }

    /// Wrap a raw status; `0` means success and yields `None`
    pub const fn new(code: u32) -> Option<Self> {
        match NonZeroU32::new(code) {
            Some(code) => Some(Self(code)),
            None => None,
        }
    }

    /// Convert a C-style status (`0` = OK) into a `Result`
    pub const fn check(status: u32) -> Result<(), Self> {
        match Self::new(status) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    /// Raw status value
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNSUPPORTED {
            f.write_str("unsupported")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Result of a device primitive
pub type Status = Result<(), ErrorCode>;

/// Function code handed to `Init`/`UnInit`
///
/// The dispatcher always passes [`Function::Unspecified`]; the other codes
/// follow the CMSIS flash algorithm convention (1 = erase, 2 = program,
/// 3 = verify) for hosts that announce what they are about to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Function {
    /// No particular operation announced
    #[default]
    Unspecified = 0,
    /// Erase follows
    Erase = 1,
    /// Program follows
    Program = 2,
    /// Verify follows
    Verify = 3,
}

/// Primitive operations of one flash device
///
/// All methods take `&self`: a device is a handle to hardware registers
/// and the registry only ever holds shared references to it. Devices that
/// keep software state use interior mutability.
///
/// The optional primitives default to [`ErrorCode::UNSUPPORTED`]; a device
/// implementing one must also advertise it in [`capabilities`](Self::capabilities).
pub trait FlashAlgorithm {
    /// Optional primitives this device implements
    fn capabilities(&self) -> Capabilities;

    /// Prepare the controller for subsequent operations (e.g. unlock)
    ///
    /// `clock` and `function` are pass-through context from the legacy
    /// calling convention.
    fn init(&self, address: u32, clock: u32, function: Function) -> Status;

    /// Return the controller to its locked/idle state
    fn uninit(&self, function: Function) -> Status;

    /// Erase the entire device
    fn erase_chip(&self) -> Status {
        Err(ErrorCode::UNSUPPORTED)
    }

    /// Erase the sector containing `address`
    fn erase_sector(&self, _address: u32) -> Status {
        Err(ErrorCode::UNSUPPORTED)
    }

    /// Program `data` (at most one page) at `address`
    ///
    /// Read-after-write checking, if wanted, is the device's business.
    fn program_page(&self, _address: u32, _data: &[u8]) -> Status {
        Err(ErrorCode::UNSUPPORTED)
    }

    /// Read `buf.len()` bytes starting at `address`
    fn read(&self, _address: u32, _buf: &mut [u8]) -> Status {
        Err(ErrorCode::UNSUPPORTED)
    }
}

impl<T: FlashAlgorithm + ?Sized> FlashAlgorithm for &T {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn init(&self, address: u32, clock: u32, function: Function) -> Status {
        (**self).init(address, clock, function)
    }

    fn uninit(&self, function: Function) -> Status {
        (**self).uninit(function)
    }

    fn erase_chip(&self) -> Status {
        (**self).erase_chip()
    }

    fn erase_sector(&self, address: u32) -> Status {
        (**self).erase_sector(address)
    }

    fn program_page(&self, address: u32, data: &[u8]) -> Status {
        (**self).program_page(address, data)
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Status {
        (**self).read(address, buf)
    }
}
