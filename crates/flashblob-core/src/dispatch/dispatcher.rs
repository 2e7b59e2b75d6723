//! Address-based flash operations
//!
//! The [`Dispatcher`] resolves each request to the registered device that
//! owns the start address, validates it against that device's geometry and
//! capabilities, then drives the device primitives inside an atomic
//! section.
//!
//! Two flavours of every operation exist. The coarse ones (`init`,
//! `write`, `erase`, ...) follow the flash-loader calling convention and
//! report plain booleans and byte counts: a rejected write reads as `0`.
//! The `try_*` ones return [`Result`] with the reason attached.

use crate::device::{Capabilities, DeviceDescriptor, ErrorCode, Function};
use crate::dispatch::atomic;
use crate::dispatch::bus::MemoryBus;
use crate::error::{Error, Operation, PrimitiveFailure, Result};
use crate::registry::{Registry, RegistryEntry};

/// Required alignment of start addresses for init, write and read
pub const WORD_ALIGN: u32 = 4;

/// Read-back granularity of [`Dispatcher::verify`] and [`Dispatcher::blank_check`]
pub const VERIFY_CHUNK_SIZE: usize = 256;

fn primitive(operation: Operation, address: u32, code: ErrorCode, completed: u32) -> Error {
    Error::PrimitiveFailure(PrimitiveFailure {
        operation,
        address,
        code,
        completed,
    })
}

fn request_len(address: u32, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::OutOfRange {
        address,
        len: u32::MAX,
    })
}

fn check_aligned(address: u32) -> Result<()> {
    if address % WORD_ALIGN != 0 {
        return Err(Error::MisalignedAddress { address });
    }
    Ok(())
}

fn check_access(descriptor: &DeviceDescriptor<'_>, address: u32, len: u32) -> Result<()> {
    check_aligned(address)?;
    if !descriptor.fits(address, len) {
        return Err(Error::OutOfRange { address, len });
    }
    Ok(())
}

fn require(entry: &RegistryEntry<'_>, capability: Capabilities) -> Result<()> {
    if !entry.device().capabilities().contains(capability) {
        return Err(Error::CapabilityUnavailable(capability));
    }
    Ok(())
}

fn report(what: &str, address: u32, error: &Error) {
    match error {
        Error::PrimitiveFailure(_) => log::error!("{} at 0x{:08X}: {}", what, address, error),
        _ => log::warn!("{} at 0x{:08X} rejected: {}", what, address, error),
    }
}

/// Routes flash operations to registered devices
///
/// Borrows the registry immutably for its whole lifetime, so the device
/// set cannot change while operations are possible.
pub struct Dispatcher<'r, 'a, B> {
    registry: &'r Registry<'a>,
    bus: B,
}

impl<'r, 'a, B: MemoryBus> Dispatcher<'r, 'a, B> {
    /// Create a dispatcher over `registry`
    ///
    /// `bus` serves reads from devices that lack a `READ` primitive.
    pub fn new(registry: &'r Registry<'a>, bus: B) -> Self {
        Self { registry, bus }
    }

    /// The registry requests are resolved against
    pub fn registry(&self) -> &'r Registry<'a> {
        self.registry
    }

    /// The memory bus used for direct loads
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Descriptor of the device owning `address`, if any
    pub fn device_at(&self, address: u32) -> Option<DeviceDescriptor<'a>> {
        self.registry.resolve(address).map(|entry| *entry.descriptor())
    }

    fn resolve(&self, address: u32) -> Result<&'r RegistryEntry<'a>> {
        self.registry
            .resolve(address)
            .ok_or(Error::DeviceNotFound { address })
    }

    // ------------------------------------------------------------------
    // Init / UnInit
    // ------------------------------------------------------------------

    /// Prepare the device owning `address`
    ///
    /// Returns `false` for a misaligned address, an unowned address, or a
    /// failing `Init`.
    pub fn init(&self, address: u32) -> bool {
        self.try_init(address)
            .map_err(|e| report("init", address, &e))
            .is_ok()
    }

    /// Prepare the device owning `address`
    ///
    /// Runs outside an atomic section: init and uninit belong to the
    /// single-threaded setup and teardown phase.
    pub fn try_init(&self, address: u32) -> Result<()> {
        check_aligned(address)?;
        let entry = self.resolve(address)?;
        log::debug!("init {} at 0x{:08X}", entry.descriptor().name, address);
        entry
            .device()
            .init(address, 0, Function::Unspecified)
            .map_err(|code| primitive(Operation::Init, address, code, 0))
    }

    /// Release the device owning `address`
    ///
    /// An unowned address has nothing to release and reports success.
    pub fn uninit(&self, address: u32) -> bool {
        self.try_uninit(address)
            .map_err(|e| report("uninit", address, &e))
            .is_ok()
    }

    /// Release the device owning `address`
    pub fn try_uninit(&self, address: u32) -> Result<()> {
        let Some(entry) = self.registry.resolve(address) else {
            log::debug!("uninit: no device at 0x{:08X}, nothing to release", address);
            return Ok(());
        };
        log::debug!("uninit {}", entry.descriptor().name);
        entry
            .device()
            .uninit(Function::Unspecified)
            .map_err(|code| primitive(Operation::UnInit, address, code, 0))
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Program `data` at `address`
    ///
    /// Returns `data.len()` on success and `0` on any failure. A failure
    /// part way through may leave earlier pages programmed.
    pub fn write(&self, address: u32, data: &[u8]) -> usize {
        self.try_write(address, data).unwrap_or_else(|e| {
            report("write", address, &e);
            0
        })
    }

    /// Program `data` at `address`
    ///
    /// The data is cut into chunks of at most one page, starting at
    /// `address` itself; a start in the middle of a page is passed through
    /// to the device unchanged.
    pub fn try_write(&self, address: u32, data: &[u8]) -> Result<usize> {
        atomic::section(|| {
            let entry = self.resolve(address)?;
            let descriptor = entry.descriptor();
            let len = request_len(address, data.len())?;
            check_access(descriptor, address, len)?;
            require(entry, Capabilities::PROGRAM)?;

            log::debug!(
                "write {} bytes to {} at 0x{:08X}",
                data.len(),
                descriptor.name,
                address
            );

            let device = entry.device();
            let page_size = descriptor.page_size as usize;
            let mut current = address;
            let mut written = 0u32;
            for chunk in data.chunks(page_size) {
                log::trace!("program 0x{:08X} ({} bytes)", current, chunk.len());
                device
                    .program_page(current, chunk)
                    .map_err(|code| primitive(Operation::Program, current, code, written))?;
                current = current.wrapping_add(chunk.len() as u32);
                written += chunk.len() as u32;
            }

            Ok(data.len())
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Read `buf.len()` bytes from `address`
    ///
    /// Returns `buf.len()` on success and `0` on any failure.
    pub fn read(&self, address: u32, buf: &mut [u8]) -> usize {
        self.try_read(address, buf).unwrap_or_else(|e| {
            report("read", address, &e);
            0
        })
    }

    /// Read `buf.len()` bytes from `address`
    ///
    /// Devices with a `READ` primitive get a single call for the whole
    /// range; all others are loaded directly through the memory bus.
    pub fn try_read(&self, address: u32, buf: &mut [u8]) -> Result<usize> {
        atomic::section(|| {
            let entry = self.resolve(address)?;
            let len = request_len(address, buf.len())?;
            check_access(entry.descriptor(), address, len)?;
            self.read_from(entry, address, buf)?;
            Ok(buf.len())
        })
    }

    /// Read `len` bytes from `address` into a new buffer
    ///
    /// The request is checked against the owning device before anything is
    /// allocated.
    #[cfg(feature = "alloc")]
    pub fn try_read_vec(&self, address: u32, len: u32) -> Result<alloc::vec::Vec<u8>> {
        let entry = self.resolve(address)?;
        check_access(entry.descriptor(), address, len)?;
        let mut buf = alloc::vec![0u8; len as usize];
        self.try_read(address, &mut buf)?;
        Ok(buf)
    }

    fn read_from(&self, entry: &RegistryEntry<'_>, address: u32, buf: &mut [u8]) -> Result<()> {
        if entry.device().capabilities().contains(Capabilities::READ) {
            log::trace!("read 0x{:08X} ({} bytes) via device", address, buf.len());
            return entry
                .device()
                .read(address, buf)
                .map_err(|code| primitive(Operation::Read, address, code, 0));
        }

        let descriptor = entry.descriptor();
        if !descriptor.kind.is_memory_mapped() {
            log::debug!(
                "{} ({}) has no read primitive, loading directly",
                descriptor.name,
                descriptor.kind
            );
        }
        log::trace!("read 0x{:08X} ({} bytes) via bus", address, buf.len());
        self.bus.load(address, buf);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    /// Erase at least `len` bytes starting with the sector at `address`
    ///
    /// Returns the number of bytes erased, which is rounded up to whole
    /// sectors. If a sector erase fails the bytes erased before it are
    /// returned; a rejected request returns `0`.
    pub fn erase(&self, address: u32, len: u32) -> u32 {
        self.try_erase(address, len).unwrap_or_else(|e| {
            report("erase", address, &e);
            e.completed()
        })
    }

    /// Erase at least `len` bytes starting with the sector at `address`
    ///
    /// Sectors are erased one after another, each step advancing by the
    /// size of the sector containing the current address, until the total
    /// reaches `len`. Only `len` itself is checked against the device
    /// size; a run starting near the end can step past the device, which
    /// the device rejects.
    ///
    /// On a failing sector erase the error's [`completed`](Error::completed)
    /// count holds the bytes erased so far.
    pub fn try_erase(&self, address: u32, len: u32) -> Result<u32> {
        atomic::section(|| {
            let entry = self.resolve(address)?;
            let descriptor = entry.descriptor();
            if len > descriptor.total_size {
                return Err(Error::OutOfRange { address, len });
            }
            require(entry, Capabilities::ERASE_SECTOR)?;

            log::debug!(
                "erase {} bytes of {} from 0x{:08X}",
                len,
                descriptor.name,
                address
            );

            let device = entry.device();
            let mut current = address;
            let mut erased = 0u32;
            while erased < len {
                log::trace!("erase sector at 0x{:08X}", current);
                device
                    .erase_sector(current)
                    .map_err(|code| primitive(Operation::EraseSector, current, code, erased))?;
                // Validated tables always answer; an empty one stops here
                let Some(size) = descriptor.sector_size_at(descriptor.offset_of(current)) else {
                    break;
                };
                current = current.wrapping_add(size);
                erased = erased.saturating_add(size);
            }

            Ok(erased)
        })
    }

    /// Erase the whole device owning `address`
    pub fn erase_chip(&self, address: u32) -> bool {
        self.try_erase_chip(address)
            .map_err(|e| report("chip erase", address, &e))
            .is_ok()
    }

    /// Erase the whole device owning `address`
    pub fn try_erase_chip(&self, address: u32) -> Result<()> {
        atomic::section(|| {
            let entry = self.resolve(address)?;
            require(entry, Capabilities::ERASE_CHIP)?;
            log::debug!("chip erase {}", entry.descriptor().name);
            entry
                .device()
                .erase_chip()
                .map_err(|code| primitive(Operation::EraseChip, address, code, 0))
        })
    }

    // ------------------------------------------------------------------
    // Verify / blank check
    // ------------------------------------------------------------------

    /// Compare device contents at `address` with `expected`
    pub fn verify(&self, address: u32, expected: &[u8]) -> bool {
        self.try_verify(address, expected)
            .map_err(|e| report("verify", address, &e))
            .is_ok()
    }

    /// Compare device contents at `address` with `expected`
    ///
    /// Reads back in [`VERIFY_CHUNK_SIZE`] blocks and stops at the first
    /// difference, reporting its address.
    pub fn try_verify(&self, address: u32, expected: &[u8]) -> Result<()> {
        self.scan(address, expected.len(), |offset, actual| {
            actual
                .iter()
                .zip(&expected[offset..])
                .position(|(a, e)| a != e)
                .map(|i| Error::VerifyMismatch {
                    address: address + (offset + i) as u32,
                })
        })
    }

    /// Check that `len` bytes at `address` hold the erased value
    pub fn blank_check(&self, address: u32, len: u32) -> bool {
        self.try_blank_check(address, len)
            .map_err(|e| report("blank check", address, &e))
            .is_ok()
    }

    /// Check that `len` bytes at `address` hold the erased value
    pub fn try_blank_check(&self, address: u32, len: u32) -> Result<()> {
        let erased_value = self
            .device_at(address)
            .ok_or(Error::DeviceNotFound { address })?
            .erased_value;
        self.scan(address, len as usize, |offset, actual| {
            actual
                .iter()
                .position(|&b| b != erased_value)
                .map(|i| Error::NotBlank {
                    address: address + (offset + i) as u32,
                    found: actual[i],
                })
        })
    }

    /// Read `len` bytes in chunks, handing each to `check` with its offset
    fn scan(
        &self,
        address: u32,
        len: usize,
        mut check: impl FnMut(usize, &[u8]) -> Option<Error>,
    ) -> Result<()> {
        atomic::section(|| {
            let entry = self.resolve(address)?;
            let total = request_len(address, len)?;
            check_access(entry.descriptor(), address, total)?;

            let mut chunk = [0u8; VERIFY_CHUNK_SIZE];
            let mut offset = 0usize;
            while offset < len {
                let n = (len - offset).min(VERIFY_CHUNK_SIZE);
                let buf = &mut chunk[..n];
                self.read_from(entry, address + offset as u32, buf)?;
                if let Some(e) = check(offset, buf) {
                    return Err(e);
                }
                offset += n;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, FlashAlgorithm, SectorInfo, Status, INTERFACE_VERSION, SECTOR_END};
    use std::cell::{Cell, RefCell};

    const BASE: u32 = 0x0800_0000;
    const PAGE: u32 = 0x800;
    const SIZE: u32 = 0x4000;

    const UNIFORM: &[SectorInfo] = &[SectorInfo { size: 0x800, offset: 0 }, SECTOR_END];

    // 4 x 16K, 1 x 64K, 3 x 128K
    const MIXED: &[SectorInfo] = &[
        SectorInfo { size: 0x4000, offset: 0x00000 },
        SectorInfo { size: 0x10000, offset: 0x10000 },
        SectorInfo { size: 0x20000, offset: 0x20000 },
        SECTOR_END,
    ];

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Init(u32, u32, Function),
        UnInit,
        EraseChip,
        EraseSector(u32),
        Program(u32, usize),
        Read(u32, usize),
    }

    /// NOR-style mock: starts erased, programming can only clear bits
    struct MockDevice {
        base: u32,
        caps: Capabilities,
        memory: RefCell<Vec<u8>>,
        calls: RefCell<Vec<Call>>,
        fail_erase_call: Option<usize>,
        fail_program_call: Option<usize>,
        fail_init: bool,
        fail_uninit: bool,
        erase_count: Cell<usize>,
        program_count: Cell<usize>,
    }

    impl MockDevice {
        fn new(base: u32, size: u32, caps: Capabilities) -> Self {
            Self {
                base,
                caps,
                memory: RefCell::new(vec![0xFF; size as usize]),
                calls: RefCell::new(Vec::new()),
                fail_erase_call: None,
                fail_program_call: None,
                fail_init: false,
                fail_uninit: false,
                erase_count: Cell::new(0),
                program_count: Cell::new(0),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn log(&self, call: Call) {
            if !matches!(call, Call::Init(..) | Call::UnInit) {
                assert!(atomic::is_active(), "{:?} outside atomic section", call);
            }
            self.calls.borrow_mut().push(call);
        }

        fn index(&self, address: u32) -> Option<usize> {
            let offset = address.checked_sub(self.base)? as usize;
            (offset < self.memory.borrow().len()).then_some(offset)
        }
    }

    impl FlashAlgorithm for MockDevice {
        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        fn init(&self, address: u32, clock: u32, function: Function) -> Status {
            self.log(Call::Init(address, clock, function));
            if self.fail_init {
                return Err(ErrorCode::FAILED);
            }
            Ok(())
        }

        fn uninit(&self, _function: Function) -> Status {
            self.log(Call::UnInit);
            if self.fail_uninit {
                return Err(ErrorCode::FAILED);
            }
            Ok(())
        }

        fn erase_chip(&self) -> Status {
            self.log(Call::EraseChip);
            self.memory.borrow_mut().fill(0xFF);
            Ok(())
        }

        fn erase_sector(&self, address: u32) -> Status {
            self.log(Call::EraseSector(address));
            let n = self.erase_count.get();
            self.erase_count.set(n + 1);
            if self.fail_erase_call == Some(n) {
                return Err(ErrorCode::FAILED);
            }
            let start = self.index(address).ok_or(ErrorCode::FAILED)?;
            let mut memory = self.memory.borrow_mut();
            let end = (start + PAGE as usize).min(memory.len());
            memory[start..end].fill(0xFF);
            Ok(())
        }

        fn program_page(&self, address: u32, data: &[u8]) -> Status {
            self.log(Call::Program(address, data.len()));
            let n = self.program_count.get();
            self.program_count.set(n + 1);
            if self.fail_program_call == Some(n) {
                return Err(ErrorCode::FAILED);
            }
            let start = self.index(address).ok_or(ErrorCode::FAILED)?;
            let mut memory = self.memory.borrow_mut();
            for (dst, src) in memory[start..start + data.len()].iter_mut().zip(data) {
                *dst &= *src;
            }
            Ok(())
        }

        fn read(&self, address: u32, buf: &mut [u8]) -> Status {
            self.log(Call::Read(address, buf.len()));
            let start = self.index(address).ok_or(ErrorCode::FAILED)?;
            buf.copy_from_slice(&self.memory.borrow()[start..start + buf.len()]);
            Ok(())
        }
    }

    /// Direct loads served from the mock's memory
    impl MemoryBus for MockDevice {
        fn load(&self, address: u32, buf: &mut [u8]) {
            let start = self.index(address).unwrap();
            buf.copy_from_slice(&self.memory.borrow()[start..start + buf.len()]);
        }
    }

    struct NoBus;

    impl MemoryBus for NoBus {
        fn load(&self, address: u32, _buf: &mut [u8]) {
            panic!("unexpected direct load at 0x{:08X}", address);
        }
    }

    fn descriptor(total_size: u32, sectors: &'static [SectorInfo]) -> DeviceDescriptor<'static> {
        DeviceDescriptor {
            version: INTERFACE_VERSION,
            name: "GD32E50X 16kB Flash",
            kind: DeviceKind::OnChip,
            base_address: BASE,
            total_size,
            page_size: PAGE,
            erased_value: 0xFF,
            program_timeout_ms: 100,
            erase_timeout_ms: 6000,
            sectors,
        }
    }

    fn register_one(dev: &MockDevice) -> Registry<'_> {
        let mut registry = Registry::new();
        registry.register(descriptor(SIZE, UNIFORM), dev).unwrap();
        registry
    }

    // ------------------------------------------------------------------
    // Init / UnInit
    // ------------------------------------------------------------------

    #[test]
    fn test_init_passes_address() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert!(dispatcher.init(BASE));
        assert_eq!(dev.calls(), vec![Call::Init(BASE, 0, Function::Unspecified)]);
    }

    #[test]
    fn test_init_rejections() {
        let mut dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        dev.fail_init = true;
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(
            dispatcher.try_init(BASE + 2),
            Err(Error::MisalignedAddress { address: BASE + 2 })
        );
        assert_eq!(
            dispatcher.try_init(0x2000_0000),
            Err(Error::DeviceNotFound {
                address: 0x2000_0000
            })
        );
        assert!(dev.calls().is_empty());

        assert!(!dispatcher.init(BASE));
        assert_eq!(dev.calls().len(), 1);
    }

    #[test]
    fn test_uninit() {
        let mut dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        {
            let dispatcher = Dispatcher::new(&registry, NoBus);
            assert!(dispatcher.uninit(0x2000_0000));
            assert!(dev.calls().is_empty());
            assert!(dispatcher.uninit(BASE + 0x100));
            assert_eq!(dev.calls(), vec![Call::UnInit]);
        }
        drop(registry);

        dev.fail_uninit = true;
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);
        assert!(!dispatcher.uninit(BASE));
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    #[test]
    fn test_write_splits_into_pages() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        let data = vec![0x5A; 0x1000];
        assert_eq!(dispatcher.write(BASE, &data), 0x1000);
        assert_eq!(
            dev.calls(),
            vec![
                Call::Program(BASE, 0x800),
                Call::Program(BASE + 0x800, 0x800)
            ]
        );
        assert!(dev.memory.borrow()[..0x1000].iter().all(|&b| b == 0x5A));
        assert_eq!(dev.memory.borrow()[0x1000], 0xFF);
    }

    #[test]
    fn test_write_partial_last_chunk() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        // Starts mid-page; chunks follow the start address, not page bounds
        let data = vec![0x00; 0x1804];
        assert_eq!(dispatcher.write(BASE + 0x400, &data), 0x1804);
        assert_eq!(
            dev.calls(),
            vec![
                Call::Program(BASE + 0x400, 0x800),
                Call::Program(BASE + 0xC00, 0x800),
                Call::Program(BASE + 0x1400, 0x800),
                Call::Program(BASE + 0x1C00, 4),
            ]
        );
    }

    #[test]
    fn test_write_rejections() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.write(BASE + 2, &[0; 4]), 0);
        assert_eq!(dispatcher.write(BASE + SIZE - 4, &[0; 8]), 0);
        assert_eq!(dispatcher.write(0x2000_0000, &[0; 4]), 0);
        assert!(dev.calls().is_empty());

        assert_eq!(
            dispatcher.try_write(BASE + SIZE - 4, &[0; 8]),
            Err(Error::OutOfRange {
                address: BASE + SIZE - 4,
                len: 8
            })
        );

        // Exactly up to the end is fine
        assert_eq!(dispatcher.write(BASE + SIZE - 4, &[0; 4]), 4);
    }

    #[test]
    fn test_write_empty() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.write(BASE, &[]), 0);
        assert_eq!(dispatcher.try_write(BASE, &[]), Ok(0));
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn test_write_without_program_capability() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::READ);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);

        assert_eq!(
            dispatcher.try_write(BASE, &[0; 4]),
            Err(Error::CapabilityUnavailable(Capabilities::PROGRAM))
        );
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn test_write_stops_at_first_failure() {
        let mut dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        dev.fail_program_call = Some(1);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        let data = vec![0x00; 0x1800];
        let err = dispatcher.try_write(BASE, &data).unwrap_err();
        assert_eq!(err.completed(), 0x800);
        assert!(matches!(
            err,
            Error::PrimitiveFailure(PrimitiveFailure {
                operation: Operation::Program,
                address,
                ..
            }) if address == BASE + 0x800
        ));
        assert_eq!(dev.calls().len(), 2);

        dev.program_count.set(0);
        assert_eq!(dispatcher.write(BASE, &data), 0);
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    #[test]
    fn test_read_direct_load() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        dev.memory.borrow_mut()[0x10..0x14].copy_from_slice(&[1, 2, 3, 4]);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        let mut buf = [0u8; 8];
        assert_eq!(dispatcher.read(BASE + 0x10, &mut buf), 8);
        assert_eq!(buf, [1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn test_read_uses_device_primitive() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED | Capabilities::READ);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);

        let mut buf = vec![0u8; 0x1800];
        assert_eq!(dispatcher.read(BASE, &mut buf), 0x1800);
        // One call for the whole range, no page splitting
        assert_eq!(dev.calls(), vec![Call::Read(BASE, 0x1800)]);
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_read_rejections() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);

        let mut buf = [0u8; 8];
        assert_eq!(dispatcher.read(BASE + 1, &mut buf), 0);
        assert_eq!(dispatcher.read(BASE + SIZE - 4, &mut buf), 0);
        assert_eq!(dispatcher.read(0, &mut buf), 0);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_read_vec_checks_before_allocating() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);

        assert_eq!(
            dispatcher.try_read_vec(BASE, u32::MAX),
            Err(Error::OutOfRange {
                address: BASE,
                len: u32::MAX
            })
        );
        assert_eq!(
            dispatcher.try_read_vec(0, u32::MAX),
            Err(Error::DeviceNotFound { address: 0 })
        );
        assert_eq!(
            dispatcher.try_read_vec(BASE + 2, 8),
            Err(Error::MisalignedAddress { address: BASE + 2 })
        );
        assert!(dev.calls().is_empty());
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    #[test]
    fn test_erase_whole_sectors() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.erase(BASE, 0x1800), 0x1800);
        assert_eq!(
            dev.calls(),
            vec![
                Call::EraseSector(BASE),
                Call::EraseSector(BASE + 0x800),
                Call::EraseSector(BASE + 0x1000),
            ]
        );
    }

    #[test]
    fn test_erase_rounds_up() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.erase(BASE, 1), 0x800);
        assert_eq!(dispatcher.erase(BASE, 0), 0);
        assert_eq!(dev.calls().len(), 1);
    }

    #[test]
    fn test_erase_reports_partial_progress() {
        let mut dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        dev.fail_erase_call = Some(1);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.erase(BASE, 0x1800), 0x800);
        assert_eq!(dev.calls().len(), 2);
    }

    #[test]
    fn test_erase_rejections() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::PROGRAM);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert_eq!(dispatcher.erase(BASE, SIZE + 1), 0);
        assert_eq!(
            dispatcher.try_erase(BASE, 0x800),
            Err(Error::CapabilityUnavailable(Capabilities::ERASE_SECTOR))
        );
        assert_eq!(dispatcher.erase(0x2000_0000, 0x800), 0);
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn test_erase_mixed_sectors() {
        let size = 0x8_0000;
        let dev = MockDevice::new(BASE, size, Capabilities::MAPPED);
        let mut registry = Registry::new();
        registry.register(descriptor(size, MIXED), &dev).unwrap();
        let dispatcher = Dispatcher::new(&registry, &dev);

        // Four 16K sectors, then into the 64K sector
        assert_eq!(dispatcher.erase(BASE, 0x1_4000), 0x2_0000);
        assert_eq!(
            dev.calls(),
            vec![
                Call::EraseSector(BASE),
                Call::EraseSector(BASE + 0x4000),
                Call::EraseSector(BASE + 0x8000),
                Call::EraseSector(BASE + 0xC000),
                Call::EraseSector(BASE + 0x1_0000),
            ]
        );
    }

    #[test]
    fn test_erase_chip() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        dev.memory.borrow_mut().fill(0);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert!(dispatcher.erase_chip(BASE + 0x100));
        assert_eq!(dev.calls(), vec![Call::EraseChip]);
        assert!(dispatcher.blank_check(BASE, SIZE));
    }

    // ------------------------------------------------------------------
    // Verify / blank check
    // ------------------------------------------------------------------

    #[test]
    fn test_verify() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        let data: Vec<u8> = (0..0x300u32).map(|i| i as u8).collect();
        assert_eq!(dispatcher.write(BASE, &data), data.len());
        assert!(dispatcher.verify(BASE, &data));

        let mut expected = data.clone();
        expected[0x2A1] ^= 0x01;
        assert_eq!(
            dispatcher.try_verify(BASE, &expected),
            Err(Error::VerifyMismatch {
                address: BASE + 0x2A1
            })
        );
    }

    #[test]
    fn test_blank_check() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, &dev);

        assert!(dispatcher.blank_check(BASE, SIZE));
        assert_eq!(dispatcher.write(BASE + 0x1000, &[0xFF, 0x7F, 0xFF, 0xFF]), 4);
        assert_eq!(
            dispatcher.try_blank_check(BASE, SIZE),
            Err(Error::NotBlank {
                address: BASE + 0x1001,
                found: 0x7F
            })
        );
        assert!(dispatcher.blank_check(BASE, 0x1000));
    }

    #[test]
    fn test_device_at() {
        let dev = MockDevice::new(BASE, SIZE, Capabilities::MAPPED);
        let registry = register_one(&dev);
        let dispatcher = Dispatcher::new(&registry, NoBus);

        assert_eq!(dispatcher.device_at(BASE + 4).map(|d| d.total_size), Some(SIZE));
        assert!(dispatcher.device_at(BASE + SIZE).is_none());
    }
}
