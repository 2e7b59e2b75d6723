//! CLI command implementations
//!
//! Every command resolves its address against the device table, builds an
//! emulated device for the owner and drives it through the dispatcher; see
//! [`session`].

mod erase;
mod list;
mod read;
pub mod session;
mod write;

pub use erase::{run_blank_check, run_erase, run_erase_chip};
pub use list::{list_devices, show_info};
pub use read::run_read;
pub use write::run_write;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a byte progress bar
fn progress_bar(total: u64) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Create a ticking spinner with a message
fn spinner(message: String) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}
