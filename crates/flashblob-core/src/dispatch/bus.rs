//! Direct memory access for devices without a read primitive

/// Source of direct loads from the flash address space
///
/// Memory-mapped flash is read by plain loads from its address range. The
/// dispatcher goes through this trait instead of dereferencing raw
/// addresses itself, so a host build can substitute an emulated address
/// space.
pub trait MemoryBus {
    /// Fill `buf` with the bytes at `address..address + buf.len()`
    fn load(&self, address: u32, buf: &mut [u8]);
}

impl<B: MemoryBus + ?Sized> MemoryBus for &B {
    fn load(&self, address: u32, buf: &mut [u8]) {
        (**self).load(address, buf)
    }
}

/// The real address space of the running target
#[derive(Debug)]
pub struct MappedMemory {
    _private: (),
}

impl MappedMemory {
    /// Create a handle to the target address space
    ///
    /// # Safety
    /// Every address the dispatcher can resolve to a device without a
    /// `READ` primitive must be readable by byte loads for the lifetime of
    /// the handle.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl MemoryBus for MappedMemory {
    fn load(&self, address: u32, buf: &mut [u8]) {
        // Byte loads, one at a time: some controllers fault on wider
        // accesses to unaligned flash addresses.
        for (i, byte) in buf.iter_mut().enumerate() {
            let ptr = address.wrapping_add(i as u32) as usize as *const u8;
            // SAFETY: readable per the contract of `MappedMemory::new`
            *byte = unsafe { core::ptr::read_volatile(ptr) };
        }
    }
}
