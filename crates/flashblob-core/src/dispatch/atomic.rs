//! Atomic sections
//!
//! Flash controllers do not tolerate being re-entered, and on most targets
//! code executing from the flash being programmed must not run while an
//! operation is in flight. Every dispatcher operation that touches a device
//! therefore runs inside [`section`], which is a `critical_section::with`
//! call: interrupts are masked (or the platform lock is taken) on entry and
//! restored on every exit path, early returns and `?` included.
//!
//! On hosts the `critical-section/std` implementation provides a global
//! reentrant mutex; firmware links whatever implementation its HAL provides.

use core::sync::atomic::{AtomicUsize, Ordering};

// Nesting depth, only modified while the critical section is held
static DEPTH: AtomicUsize = AtomicUsize::new(0);

// Restores the depth on drop, so an unwinding `f` leaves it balanced
struct Depth(usize);

impl Drop for Depth {
    fn drop(&mut self) {
        DEPTH.store(self.0, Ordering::Relaxed);
    }
}

/// Run `f` with interrupts masked
pub fn section<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_cs| {
        let depth = DEPTH.load(Ordering::Relaxed);
        DEPTH.store(depth + 1, Ordering::Relaxed);
        let _restore = Depth(depth);
        f()
    })
}

/// Check whether the caller is inside a [`section`]
///
/// Device code can use this to assert it is only driven through the
/// dispatcher.
pub fn is_active() -> bool {
    DEPTH.load(Ordering::Relaxed) > 0
}
