//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "flashblob")]
#[command(author, version, about = "Flash device dispatcher on emulated devices", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to device table directory or file (.ron)
    /// Defaults to looking in ./devices/ and /usr/share/flashblob/devices/
    #[arg(long, global = true)]
    pub devices: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Backing image for the device being operated on
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Image file holding the device contents; created on first modification
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List devices in the device table
    List {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },

    /// Show descriptor and sector map of the device owning an address
    Info {
        /// Address inside the device (hex, e.g., 0x08000000)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,
    },

    /// Read device contents to file
    Read {
        /// Start address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Program file contents at an address
    Write {
        /// Start address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Erase the covered sectors first
        #[arg(long)]
        erase: bool,

        /// Verify after writing
        #[arg(long)]
        verify: bool,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Erase sectors starting at an address
    Erase {
        /// Start address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to erase, rounded up to whole sectors
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Erase the whole device owning an address
    EraseChip {
        /// Address inside the device (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Check that a range holds the erased value
    BlankCheck {
        /// Start address (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to check (hex or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,

        #[command(flatten)]
        image: ImageArgs,
    },
}
