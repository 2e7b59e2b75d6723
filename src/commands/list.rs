//! List and info commands implementation

use flashblob_core::{DeviceDatabase, DeviceDescriptor};

/// List all devices in the table
pub fn list_devices(db: &DeviceDatabase, vendor_filter: Option<&str>) {
    println!("Known flash devices:");
    println!();
    println!(
        "{:<12} {:<28} {:<8} {:>12} {:>10} {:>8}",
        "Vendor", "Name", "Kind", "Base", "Size", "Page"
    );
    println!("{}", "-".repeat(84));

    let entries = match vendor_filter {
        Some(vendor) => db.find_by_vendor(vendor),
        None => db.iter().collect(),
    };

    for entry in entries {
        let desc = entry.descriptor();
        println!(
            "{:<12} {:<28} {:<8} {:>12} {:>10} {:>8}",
            entry.vendor,
            desc.name,
            desc.kind.to_string(),
            format!("0x{:08X}", desc.base_address),
            format_size(desc.total_size),
            format_size(desc.page_size)
        );
    }
}

/// Show the descriptor of the device owning `address`
pub fn show_info(db: &DeviceDatabase, address: u32) -> Result<(), Box<dyn std::error::Error>> {
    let entry = super::session::owner(db, address)?;
    let desc = entry.descriptor();

    println!("Device:        {} {}", entry.vendor, desc.name);
    println!("Kind:          {}", desc.kind);
    println!(
        "Range:         0x{:08X} - 0x{:08X}",
        desc.base_address,
        desc.end_address() - 1
    );
    println!("Size:          {} ({} bytes)", format_size(desc.total_size), desc.total_size);
    println!("Page size:     {}", format_size(desc.page_size));
    println!("Erased value:  0x{:02X}", desc.erased_value);
    println!("Timeouts:      program {} ms, erase {} ms", desc.program_timeout_ms, desc.erase_timeout_ms);
    println!("Sectors:       {}", desc.sector_count());
    print_sector_map(&desc);
    Ok(())
}

fn print_sector_map(desc: &DeviceDescriptor<'_>) {
    let entries = desc.sector_entries();
    for (i, entry) in entries.iter().enumerate() {
        let end = entries.get(i + 1).map_or(desc.total_size, |next| next.offset);
        let count = (end - entry.offset) / entry.size;
        println!(
            "  0x{:08X} - 0x{:08X}: {} x {}",
            desc.base_address + entry.offset,
            desc.base_address as u64 + end as u64 - 1,
            count,
            format_size(entry.size)
        );
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
