//! Flash device model
//!
//! This module provides the static descriptor of a flash device, the
//! capability interface its primitive operations are reached through, and
//! (with `std`) a loader for device tables.

mod capabilities;
mod types;

#[cfg(feature = "std")]
mod database;

pub use capabilities::*;
pub use types::*;

#[cfg(feature = "std")]
pub use database::*;
