//! Section table (spec §3 "Section").

use byteorder::{ByteOrder, LittleEndian};

bitflags::bitflags! {
    /// Section `Characteristics` flags (subset relevant to dissection:
    /// full flag set per the Microsoft PE spec).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
    pub struct SectionFlags: u32 {
        const TYPE_NO_PAD = 0x0000_0008;
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_OTHER = 0x0000_0100;
        const LNK_INFO = 0x0000_0200;
        const LNK_REMOVE = 0x0000_0800;
        const LNK_COMDAT = 0x0000_1000;
        const GPREL = 0x0000_8000;
        const MEM_PURGEABLE = 0x0002_0000;
        const MEM_16BIT = 0x0002_0000;
        const MEM_LOCKED = 0x0004_0000;
        const MEM_PRELOAD = 0x0008_0000;
        const ALIGN_1BYTES = 0x0010_0000;
        const LNK_NRELOC_OVFL = 0x0100_0000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

pub const SECTION_HEADER_SIZE: usize = 40;

/// The fixed-size, on-disk section header row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SectionHeader {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: SectionFlags,
}

impl SectionHeader {
    /// Decode a 40-byte section header row. `bytes` must be at least
    /// [`SECTION_HEADER_SIZE`] long; callers are expected to bounds-check
    /// via the image reader before calling this.
    pub fn from_bytes(bytes: &[u8]) -> SectionHeader {
        let raw_name = &bytes[0..8];
        let nul = raw_name.iter().position(|&b| b == 0).unwrap_or(8);
        let name = String::from_utf8_lossy(&raw_name[..nul]).into_owned();

        SectionHeader {
            name,
            virtual_size: LittleEndian::read_u32(&bytes[8..12]),
            virtual_address: LittleEndian::read_u32(&bytes[12..16]),
            size_of_raw_data: LittleEndian::read_u32(&bytes[16..20]),
            pointer_to_raw_data: LittleEndian::read_u32(&bytes[20..24]),
            pointer_to_relocations: LittleEndian::read_u32(&bytes[24..28]),
            pointer_to_line_numbers: LittleEndian::read_u32(&bytes[28..32]),
            number_of_relocations: LittleEndian::read_u16(&bytes[32..34]),
            number_of_line_numbers: LittleEndian::read_u16(&bytes[34..36]),
            characteristics: SectionFlags::from_bits_retain(LittleEndian::read_u32(&bytes[36..40])),
        }
    }
}

/// A section plus the derived file/virtual range pair the dissectors use
/// for RVA translation (spec §3 "Section").
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Section {
    pub header: SectionHeader,
}

impl Section {
    pub fn new(header: SectionHeader) -> Section {
        Section { header }
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = self.header.virtual_address;
        // Some linkers emit VirtualSize == 0; fall back to SizeOfRawData
        // for the extent check in that case, matching widely deployed
        // PE tools' tolerance for this malformation.
        let size = if self.header.virtual_size != 0 {
            self.header.virtual_size
        } else {
            self.header.size_of_raw_data
        };
        let end = start.saturating_add(size);
        rva >= start && rva < end
    }

    pub fn file_offset_of(&self, rva: u32) -> u32 {
        self.header.pointer_to_raw_data + (rva - self.header.virtual_address)
    }

    pub fn contains_offset(&self, offset: u32) -> bool {
        let start = self.header.pointer_to_raw_data;
        let end = start.saturating_add(self.header.size_of_raw_data);
        offset >= start && offset < end
    }
}
