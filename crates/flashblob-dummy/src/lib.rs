//! flashblob-dummy - In-memory flash device emulator for testing
//!
//! This crate provides a flash device that keeps its contents in RAM and
//! implements [`FlashAlgorithm`] against any [`DeviceDescriptor`]. It's
//! useful for testing the dispatcher and for host tools without real
//! hardware.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;
#[cfg(feature = "alloc")]
use core::cell::{Cell, RefCell};

#[cfg(feature = "alloc")]
use flashblob_core::{
    Capabilities, DeviceDescriptor, ErrorCode, FlashAlgorithm, Function, MemoryBus, Status,
};

/// Status codes reported by the emulator
pub mod codes {
    use flashblob_core::ErrorCode;

    /// Program or erase attempted before `init`
    pub const LOCKED: ErrorCode = ErrorCode::custom(2);
    /// Address or length outside the device
    pub const OUT_OF_RANGE: ErrorCode = ErrorCode::custom(3);
    /// Failure injected by the test
    pub const INJECTED: ErrorCode = ErrorCode::custom(4);
}

/// A primitive call recorded by [`EmulatedFlash`]
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// `init(address, clock, function)`
    Init {
        /// Address passed to init
        address: u32,
        /// Function code passed to init
        function: Function,
    },
    /// `uninit`
    UnInit,
    /// `erase_chip`
    EraseChip,
    /// `erase_sector(address)`
    EraseSector {
        /// Address passed to the call
        address: u32,
    },
    /// `program_page(address, data)`
    Program {
        /// Address passed to the call
        address: u32,
        /// Number of bytes
        len: usize,
    },
    /// `read(address, buf)`
    Read {
        /// Address passed to the call
        address: u32,
        /// Number of bytes
        len: usize,
    },
}

#[cfg(feature = "alloc")]
#[derive(Debug, Default)]
struct Faults {
    init: bool,
    erase_at: Option<usize>,
    program_at: Option<usize>,
    erase_calls: usize,
    program_calls: usize,
}

/// RAM-backed flash device
///
/// Memory starts out erased. Programming follows NOR semantics (bits can
/// only go from 1 to 0) and program/erase are refused until `init` has
/// unlocked the device. Every primitive call is recorded.
#[cfg(feature = "alloc")]
pub struct EmulatedFlash<'a> {
    descriptor: DeviceDescriptor<'a>,
    capabilities: Capabilities,
    memory: RefCell<Vec<u8>>,
    unlocked: Cell<bool>,
    ops: RefCell<Vec<FlashOp>>,
    faults: RefCell<Faults>,
}

#[cfg(feature = "alloc")]
impl<'a> EmulatedFlash<'a> {
    /// Create an erased device for `descriptor`
    ///
    /// The device advertises [`Capabilities::MAPPED`], so the dispatcher
    /// reads it through a [`MemoryBus`] like real on-chip flash.
    pub fn new(descriptor: DeviceDescriptor<'a>) -> Self {
        let memory = vec![descriptor.erased_value; descriptor.total_size as usize];
        Self {
            descriptor,
            capabilities: Capabilities::MAPPED,
            memory: RefCell::new(memory),
            unlocked: Cell::new(false),
            ops: RefCell::new(Vec::new()),
            faults: RefCell::new(Faults::default()),
        }
    }

    /// Replace the advertised capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Pre-fill the device, starting at offset 0
    pub fn with_data(self, initial_data: &[u8]) -> Self {
        {
            let mut memory = self.memory.borrow_mut();
            let len = core::cmp::min(initial_data.len(), memory.len());
            memory[..len].copy_from_slice(&initial_data[..len]);
        }
        self
    }

    /// Descriptor the device was built for
    pub fn descriptor(&self) -> &DeviceDescriptor<'a> {
        &self.descriptor
    }

    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.memory.borrow().clone()
    }

    /// Whether `init` has unlocked the device
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.get()
    }

    /// Recorded primitive calls, oldest first
    pub fn ops(&self) -> Vec<FlashOp> {
        self.ops.borrow().clone()
    }

    /// Forget the recorded calls
    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    /// Make the `n`th sector erase (counting from 0) fail
    pub fn fail_nth_erase(&self, n: usize) {
        let mut faults = self.faults.borrow_mut();
        faults.erase_at = Some(n);
        faults.erase_calls = 0;
    }

    /// Make the `n`th page program (counting from 0) fail
    pub fn fail_nth_program(&self, n: usize) {
        let mut faults = self.faults.borrow_mut();
        faults.program_at = Some(n);
        faults.program_calls = 0;
    }

    /// Make `init` fail
    pub fn fail_init(&self, fail: bool) {
        self.faults.borrow_mut().init = fail;
    }

    /// Remove all injected failures
    pub fn clear_faults(&self) {
        *self.faults.borrow_mut() = Faults::default();
    }

    /// Copy bytes at absolute `address` into `buf`, if all are on the device
    fn copy_out(&self, address: u32, buf: &mut [u8]) -> Status {
        let (start, end) = self.span(address, buf.len())?;
        buf.copy_from_slice(&self.memory.borrow()[start..end]);
        Ok(())
    }

    fn span(&self, address: u32, len: usize) -> Result<(usize, usize), ErrorCode> {
        let offset = address
            .checked_sub(self.descriptor.base_address)
            .ok_or(codes::OUT_OF_RANGE)? as usize;
        let end = offset.checked_add(len).ok_or(codes::OUT_OF_RANGE)?;
        if end > self.descriptor.total_size as usize {
            return Err(codes::OUT_OF_RANGE);
        }
        Ok((offset, end))
    }

    /// Start and size of the sector containing device offset `offset`
    fn sector_at(&self, offset: u32) -> Option<(u32, u32)> {
        let entries = self.descriptor.sector_entries();
        let run = entries.iter().rev().find(|entry| entry.offset <= offset)?;
        if run.size == 0 {
            return None;
        }
        let start = run.offset + (offset - run.offset) / run.size * run.size;
        Some((start, run.size))
    }

    fn check_unlocked(&self) -> Status {
        if !self.unlocked.get() {
            log::debug!("{}: device is locked", self.descriptor.name);
            return Err(codes::LOCKED);
        }
        Ok(())
    }

    fn record(&self, op: FlashOp) {
        log::trace!("{}: {:?}", self.descriptor.name, op);
        self.ops.borrow_mut().push(op);
    }
}

#[cfg(feature = "alloc")]
impl FlashAlgorithm for EmulatedFlash<'_> {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn init(&self, address: u32, _clock: u32, function: Function) -> Status {
        self.record(FlashOp::Init { address, function });
        if self.faults.borrow().init {
            return Err(codes::INJECTED);
        }
        self.unlocked.set(true);
        Ok(())
    }

    fn uninit(&self, _function: Function) -> Status {
        self.record(FlashOp::UnInit);
        self.unlocked.set(false);
        Ok(())
    }

    fn erase_chip(&self) -> Status {
        self.record(FlashOp::EraseChip);
        self.check_unlocked()?;
        self.memory.borrow_mut().fill(self.descriptor.erased_value);
        Ok(())
    }

    fn erase_sector(&self, address: u32) -> Status {
        self.record(FlashOp::EraseSector { address });
        {
            let mut faults = self.faults.borrow_mut();
            let call = faults.erase_calls;
            faults.erase_calls += 1;
            if faults.erase_at == Some(call) {
                return Err(codes::INJECTED);
            }
        }
        self.check_unlocked()?;

        let (offset, _) = self.span(address, 1)?;
        let (start, size) = self
            .sector_at(offset as u32)
            .ok_or(codes::OUT_OF_RANGE)?;
        let (start, end) = self.span(self.descriptor.base_address + start, size as usize)?;
        self.memory.borrow_mut()[start..end].fill(self.descriptor.erased_value);
        Ok(())
    }

    fn program_page(&self, address: u32, data: &[u8]) -> Status {
        self.record(FlashOp::Program {
            address,
            len: data.len(),
        });
        {
            let mut faults = self.faults.borrow_mut();
            let call = faults.program_calls;
            faults.program_calls += 1;
            if faults.program_at == Some(call) {
                return Err(codes::INJECTED);
            }
        }
        self.check_unlocked()?;

        if data.len() > self.descriptor.page_size as usize {
            return Err(codes::OUT_OF_RANGE);
        }
        let (start, end) = self.span(address, data.len())?;

        // Flash programming: can only change 1 -> 0
        for (dst, &src) in self.memory.borrow_mut()[start..end].iter_mut().zip(data) {
            *dst &= src;
        }
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Status {
        self.record(FlashOp::Read {
            address,
            len: buf.len(),
        });
        self.copy_out(address, buf)
    }
}

/// Emulated address space over a set of [`EmulatedFlash`] devices
///
/// Serves the dispatcher's direct loads. Bytes no attached device covers
/// read as `0x00` and are logged.
#[cfg(feature = "alloc")]
#[derive(Default)]
pub struct EmulatedBus<'d, 'a> {
    devices: Vec<&'d EmulatedFlash<'a>>,
}

#[cfg(feature = "alloc")]
impl<'d, 'a> EmulatedBus<'d, 'a> {
    /// Create a bus with no devices attached
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Map a device into the address space
    pub fn attach(&mut self, device: &'d EmulatedFlash<'a>) {
        self.devices.push(device);
    }

    fn device_at(&self, address: u32) -> Option<&'d EmulatedFlash<'a>> {
        self.devices
            .iter()
            .copied()
            .find(|dev| dev.descriptor.contains(address))
    }
}

#[cfg(feature = "alloc")]
impl MemoryBus for EmulatedBus<'_, '_> {
    fn load(&self, address: u32, buf: &mut [u8]) {
        let mut done = 0usize;
        while done < buf.len() {
            let current = address.wrapping_add(done as u32);
            match self.device_at(current) {
                Some(dev) => {
                    let available = (dev.descriptor.end_address() - current as u64) as usize;
                    let n = available.min(buf.len() - done);
                    // In range by construction
                    let _ = dev.copy_out(current, &mut buf[done..done + n]);
                    done += n;
                }
                None => {
                    log::warn!("load from unmapped address 0x{:08X}", current);
                    buf[done] = 0;
                    done += 1;
                }
            }
        }
    }
}

#[cfg(feature = "std")]
mod image;

#[cfg(feature = "std")]
pub use image::ImageError;
