//! Operation dispatch
//!
//! Routes address-based requests to the registered device that owns the
//! address and splits them into calls to the device primitives.

pub mod atomic;
mod bus;
mod dispatcher;

pub use bus::{MappedMemory, MemoryBus};
pub use dispatcher::{Dispatcher, VERIFY_CHUNK_SIZE, WORD_ALIGN};
