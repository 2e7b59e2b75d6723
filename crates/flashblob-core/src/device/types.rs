//! Flash device descriptor definitions

use core::fmt;

/// Descriptor interface version (1.01)
pub const INTERFACE_VERSION: u16 = 0x0101;

/// Maximum number of sector table entries, sentinel included
pub const MAX_SECTORS: usize = 16;

/// Maximum length of a device name in bytes
pub const MAX_NAME_LEN: usize = 128;

/// Sector table terminator
pub const SECTOR_END: SectorInfo = SectorInfo::new(u32::MAX, u32::MAX);

/// Physical attachment of a flash device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Unknown attachment
    #[default]
    Unknown,
    /// On-chip flash memory
    OnChip,
    /// External flash on an 8-bit bus
    Ext8Bit,
    /// External flash on a 16-bit bus
    Ext16Bit,
    /// External flash on a 32-bit bus
    Ext32Bit,
    /// External flash behind SPI
    ExtSpi,
}

impl DeviceKind {
    /// Whether the device contents can be loaded directly from its address range
    pub const fn is_memory_mapped(&self) -> bool {
        matches!(
            self,
            Self::OnChip | Self::Ext8Bit | Self::Ext16Bit | Self::Ext32Bit
        )
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::OnChip => "on-chip",
            Self::Ext8Bit => "external 8-bit",
            Self::Ext16Bit => "external 16-bit",
            Self::Ext32Bit => "external 32-bit",
            Self::ExtSpi => "external SPI",
        };
        f.write_str(name)
    }
}

/// One sector table entry
///
/// Describes a run of equally sized sectors starting at `offset` (relative
/// to the device base) and extending up to the next entry's offset, or to
/// the end of the device for the last entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorInfo {
    /// Size of each sector in this run, in bytes
    pub size: u32,
    /// Offset of the first sector of this run
    pub offset: u32,
}

impl SectorInfo {
    /// Create a new sector table entry
    pub const fn new(size: u32, offset: u32) -> Self {
        Self { size, offset }
    }

    /// Whether this entry is the table terminator
    pub const fn is_end(&self) -> bool {
        self.size == SECTOR_END.size && self.offset == SECTOR_END.offset
    }
}

/// Reason a descriptor failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// Page size is zero
    ZeroPageSize,
    /// Total size is zero
    ZeroSize,
    /// `base_address + total_size` wraps past the 32-bit address space
    RangeOverflow,
    /// Name exceeds [`MAX_NAME_LEN`]
    NameTooLong,
    /// Sector table has no entries before the terminator
    EmptySectorTable,
    /// No terminator within [`MAX_SECTORS`] entries
    MissingSentinel,
    /// First sector run does not start at offset 0
    FirstOffsetNotZero,
    /// Offsets not strictly increasing, or an offset past the device end
    BadSectorOffset {
        /// Index of the offending entry
        index: usize,
    },
    /// A run has sector size zero or is not a whole number of sectors
    BadSectorSize {
        /// Index of the offending entry
        index: usize,
    },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPageSize => write!(f, "page size is zero"),
            Self::ZeroSize => write!(f, "device size is zero"),
            Self::RangeOverflow => write!(f, "address range wraps past 4 GiB"),
            Self::NameTooLong => write!(f, "name longer than {} bytes", MAX_NAME_LEN),
            Self::EmptySectorTable => write!(f, "sector table is empty"),
            Self::MissingSentinel => {
                write!(f, "sector table not terminated within {} entries", MAX_SECTORS)
            }
            Self::FirstOffsetNotZero => write!(f, "first sector run does not start at 0"),
            Self::BadSectorOffset { index } => write!(f, "bad offset in sector entry {}", index),
            Self::BadSectorSize { index } => write!(f, "bad size in sector entry {}", index),
        }
    }
}

/// Static description of one flash device
///
/// Descriptors are immutable data, usually `'static` literals owned by the
/// device module. Runtime-loaded tables lend shorter-lived views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor<'a> {
    /// Interface version tag
    pub version: u16,
    /// Device name and description
    pub name: &'a str,
    /// Physical attachment
    pub kind: DeviceKind,
    /// First address owned by the device
    pub base_address: u32,
    /// Size of the device in bytes
    pub total_size: u32,
    /// Largest amount of data a single program call accepts
    pub page_size: u32,
    /// Content of erased memory
    pub erased_value: u8,
    /// Page program timeout in milliseconds (advisory)
    pub program_timeout_ms: u32,
    /// Sector erase timeout in milliseconds (advisory)
    pub erase_timeout_ms: u32,
    /// Sector table, terminated by [`SECTOR_END`]
    pub sectors: &'a [SectorInfo],
}

impl<'a> DeviceDescriptor<'a> {
    /// End of the device range (exclusive), widened to avoid overflow
    pub const fn end_address(&self) -> u64 {
        self.base_address as u64 + self.total_size as u64
    }

    /// Check if `address` falls inside `[base, base + size)`
    pub const fn contains(&self, address: u32) -> bool {
        address >= self.base_address && (address as u64) < self.end_address()
    }

    /// Offset of `address` from the device base
    ///
    /// Wraps for addresses below the base; callers resolve first.
    pub const fn offset_of(&self, address: u32) -> u32 {
        address.wrapping_sub(self.base_address)
    }

    /// Check if `[address, address + len)` stays inside the device
    ///
    /// Only the end is checked against the device size, like the
    /// dispatcher does after resolving `address` to this device.
    pub fn fits(&self, address: u32, len: u32) -> bool {
        self.offset_of(address) as u64 + len as u64 <= self.total_size as u64
    }

    /// Check if two devices share at least one address
    pub fn overlaps(&self, other: &DeviceDescriptor<'_>) -> bool {
        (self.base_address as u64) < other.end_address()
            && (other.base_address as u64) < self.end_address()
    }

    /// Sector runs, without the terminator
    pub fn sector_entries(&self) -> &'a [SectorInfo] {
        let len = self
            .sectors
            .iter()
            .take(MAX_SECTORS)
            .position(SectorInfo::is_end)
            .unwrap_or(self.sectors.len().min(MAX_SECTORS));
        &self.sectors[..len]
    }

    /// Size of the sector that contains `offset`
    ///
    /// Walks the table until the run whose `[start, next start)` encloses
    /// the offset, stopping at the terminator. Offsets past the last run's
    /// start report the last run's size. Returns `None` only for a table
    /// that is empty or has a zero-sized run at that position.
    pub fn sector_size_at(&self, offset: u32) -> Option<u32> {
        let entries = self.sector_entries();
        let mut index = 0;
        while index + 1 < entries.len() {
            if offset >= entries[index].offset && offset < entries[index + 1].offset {
                break;
            }
            index += 1;
        }
        entries
            .get(index)
            .map(|entry| entry.size)
            .filter(|&size| size > 0)
    }

    /// Total number of sectors on the device
    pub fn sector_count(&self) -> u32 {
        let entries = self.sector_entries();
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let end = entries
                    .get(i + 1)
                    .map_or(self.total_size, |next| next.offset);
                end.saturating_sub(entry.offset)
                    .checked_div(entry.size)
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Check the geometry invariants the dispatcher relies on
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.page_size == 0 {
            return Err(DescriptorError::ZeroPageSize);
        }
        if self.total_size == 0 {
            return Err(DescriptorError::ZeroSize);
        }
        if self.end_address() > u32::MAX as u64 + 1 {
            return Err(DescriptorError::RangeOverflow);
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(DescriptorError::NameTooLong);
        }

        let terminated = self
            .sectors
            .iter()
            .take(MAX_SECTORS)
            .any(SectorInfo::is_end);
        if !terminated {
            return Err(DescriptorError::MissingSentinel);
        }

        let entries = self.sector_entries();
        let first = entries.first().ok_or(DescriptorError::EmptySectorTable)?;
        if first.offset != 0 {
            return Err(DescriptorError::FirstOffsetNotZero);
        }

        for (index, entry) in entries.iter().enumerate() {
            if entry.offset >= self.total_size {
                return Err(DescriptorError::BadSectorOffset { index });
            }
            let end = match entries.get(index + 1) {
                Some(next) if next.offset <= entry.offset => {
                    return Err(DescriptorError::BadSectorOffset { index: index + 1 });
                }
                Some(next) => next.offset,
                None => self.total_size,
            };
            if entry.size == 0 || (end - entry.offset) % entry.size != 0 {
                return Err(DescriptorError::BadSectorSize { index });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIFORM: &[SectorInfo] = &[SectorInfo::new(0x800, 0), SECTOR_END];

    // 4 x 16K, 1 x 64K, 3 x 128K - the classic boot-sector layout
    const MIXED: &[SectorInfo] = &[
        SectorInfo::new(0x4000, 0x00000),
        SectorInfo::new(0x10000, 0x10000),
        SectorInfo::new(0x20000, 0x20000),
        SECTOR_END,
    ];

    fn descriptor(total_size: u32, sectors: &'static [SectorInfo]) -> DeviceDescriptor<'static> {
        DeviceDescriptor {
            version: INTERFACE_VERSION,
            name: "test flash",
            kind: DeviceKind::OnChip,
            base_address: 0x0800_0000,
            total_size,
            page_size: 0x800,
            erased_value: 0xFF,
            program_timeout_ms: 100,
            erase_timeout_ms: 6000,
            sectors,
        }
    }

    #[test]
    fn test_contains_is_half_open() {
        let d = descriptor(0x4_0000, UNIFORM);
        assert!(!d.contains(0x07FF_FFFF));
        assert!(d.contains(0x0800_0000));
        assert!(d.contains(0x0803_FFFF));
        assert!(!d.contains(0x0804_0000));
    }

    #[test]
    fn test_contains_top_of_address_space() {
        let mut d = descriptor(0x1000, UNIFORM);
        d.base_address = 0xFFFF_F000;
        assert!(d.contains(0xFFFF_FFFF));
        assert_eq!(d.validate(), Ok(()));

        d.total_size = 0x2000;
        assert_eq!(d.validate(), Err(DescriptorError::RangeOverflow));
    }

    #[test]
    fn test_fits() {
        let d = descriptor(0x4_0000, UNIFORM);
        assert!(d.fits(0x0800_0000, 0x4_0000));
        assert!(d.fits(0x0803_F800, 0x800));
        assert!(!d.fits(0x0803_F800, 0x801));
        assert!(!d.fits(0x0800_0000, u32::MAX));
    }

    #[test]
    fn test_sector_size_uniform() {
        let d = descriptor(0x4_0000, UNIFORM);
        assert_eq!(d.sector_entries().len(), 1);
        assert_eq!(d.sector_size_at(0), Some(0x800));
        assert_eq!(d.sector_size_at(0x3_F800), Some(0x800));
        assert_eq!(d.sector_count(), 0x80);
    }

    #[test]
    fn test_sector_size_mixed() {
        let d = descriptor(0x8_0000, MIXED);
        assert_eq!(d.sector_size_at(0), Some(0x4000));
        assert_eq!(d.sector_size_at(0xC000), Some(0x4000));
        assert_eq!(d.sector_size_at(0x10000), Some(0x10000));
        assert_eq!(d.sector_size_at(0x1FFFF), Some(0x10000));
        assert_eq!(d.sector_size_at(0x20000), Some(0x20000));
        assert_eq!(d.sector_size_at(0x7FFFF), Some(0x20000));
        // Past the end the last run still answers
        assert_eq!(d.sector_size_at(0x9_0000), Some(0x20000));
        assert_eq!(d.sector_count(), 4 + 1 + 3);
        assert_eq!(d.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let mut d = descriptor(0x4_0000, UNIFORM);
        d.page_size = 0;
        assert_eq!(d.validate(), Err(DescriptorError::ZeroPageSize));

        let d = descriptor(0, UNIFORM);
        assert_eq!(d.validate(), Err(DescriptorError::ZeroSize));

        let d = descriptor(0x4_0000, &[SectorInfo { size: 0x800, offset: 0 }]);
        assert_eq!(d.validate(), Err(DescriptorError::MissingSentinel));

        let d = descriptor(0x4_0000, &[SECTOR_END]);
        assert_eq!(d.validate(), Err(DescriptorError::EmptySectorTable));

        let d = descriptor(0x4_0000, &[SectorInfo { size: 0x800, offset: 0x800 }, SECTOR_END]);
        assert_eq!(d.validate(), Err(DescriptorError::FirstOffsetNotZero));

        let d = descriptor(0x4_0000, &[SectorInfo { size: 0, offset: 0 }, SECTOR_END]);
        assert_eq!(d.validate(), Err(DescriptorError::BadSectorSize { index: 0 }));

        let d = descriptor(0x4_0000, &[SectorInfo { size: 0x3000, offset: 0 }, SECTOR_END]);
        assert_eq!(d.validate(), Err(DescriptorError::BadSectorSize { index: 0 }));

        let d = descriptor(
            0x4_0000,
            &[
                SectorInfo { size: 0x800, offset: 0 },
                SectorInfo { size: 0x800, offset: 0 },
                SECTOR_END,
            ],
        );
        assert_eq!(d.validate(), Err(DescriptorError::BadSectorOffset { index: 1 }));
    }

    #[test]
    fn test_sentinel_must_be_within_capacity() {
        static LONG: [SectorInfo; MAX_SECTORS + 1] = {
            let mut table = [SectorInfo::new(0x100, 0); MAX_SECTORS + 1];
            let mut i = 0;
            while i < MAX_SECTORS {
                table[i] = SectorInfo::new(0x100, i as u32 * 0x100);
                i += 1;
            }
            table[MAX_SECTORS] = SECTOR_END;
            table
        };
        let d = descriptor(0x4_0000, &LONG);
        assert_eq!(d.validate(), Err(DescriptorError::MissingSentinel));
    }

    #[test]
    fn test_overlaps() {
        let a = descriptor(0x4_0000, UNIFORM);
        let mut b = a;
        b.base_address = 0x0804_0000;
        assert!(!a.overlaps(&b));
        b.base_address = 0x0803_F800;
        assert!(a.overlaps(&b));
    }

    #[test]
    fn test_memory_mapped_kinds() {
        assert!(DeviceKind::OnChip.is_memory_mapped());
        assert!(DeviceKind::Ext16Bit.is_memory_mapped());
        assert!(!DeviceKind::ExtSpi.is_memory_mapped());
        assert!(!DeviceKind::Unknown.is_memory_mapped());
    }
}
