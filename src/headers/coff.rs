//! NT/COFF file header (out-of-scope collaborator per spec §1; the
//! straightforward linear decode every dissector depends on for
//! `NumberOfSections` and `SizeOfOptionalHeader`).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::image::ImageView;

pub const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
pub const COFF_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Machine {
    Unknown,
    I386,
    Arm,
    ArmNt,
    Arm64,
    Ia64,
    Amd64,
    RiscV32,
    RiscV64,
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Machine {
        match value {
            0x0 => Machine::Unknown,
            0x14c => Machine::I386,
            0x1c0 => Machine::Arm,
            0x1c4 => Machine::ArmNt,
            0xaa64 => Machine::Arm64,
            0x200 => Machine::Ia64,
            0x8664 => Machine::Amd64,
            0x5032 => Machine::RiscV32,
            0x5064 => Machine::RiscV64,
            other => Machine::Other(other),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED = 0x0001;
        const EXECUTABLE_IMAGE = 0x0002;
        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;
        const LARGE_ADDRESS_AWARE = 0x0020;
        const BYTES_REVERSED_LO = 0x0080;
        const MACHINE_32BIT = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;
        const DLL = 0x2000;
        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: FileCharacteristics,
}

impl CoffHeader {
    pub fn from_bytes(bytes: &[u8]) -> CoffHeader {
        CoffHeader {
            machine: Machine::from(LittleEndian::read_u16(&bytes[0..2])),
            number_of_sections: LittleEndian::read_u16(&bytes[2..4]),
            time_date_stamp: LittleEndian::read_u32(&bytes[4..8]),
            pointer_to_symbol_table: LittleEndian::read_u32(&bytes[8..12]),
            number_of_symbols: LittleEndian::read_u32(&bytes[12..16]),
            size_of_optional_header: LittleEndian::read_u16(&bytes[16..18]),
            characteristics: FileCharacteristics::from_bits_retain(LittleEndian::read_u16(
                &bytes[18..20],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct NtHeader {
    pub signature: u32,
    pub coff: CoffHeader,
}

impl NtHeader {
    pub fn parse(view: &ImageView, e_lfanew: u64) -> Result<NtHeader> {
        let signature = view.read_u32(e_lfanew)?;
        if signature != NT_SIGNATURE {
            return Err(Error::MissingNtSignature);
        }
        let coff_bytes = view.read_bytes(e_lfanew + 4, COFF_HEADER_SIZE)?;
        Ok(NtHeader {
            signature,
            coff: CoffHeader::from_bytes(coff_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_signature() {
        let bytes = vec![0u8; 64];
        let view = ImageView::new(&bytes, &[]);
        assert!(matches!(
            NtHeader::parse(&view, 0),
            Err(Error::MissingNtSignature)
        ));
    }

    #[test]
    fn decodes_coff_header() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&NT_SIGNATURE.to_le_bytes());
        bytes[4..6].copy_from_slice(&0x8664u16.to_le_bytes()); // machine = AMD64
        bytes[6..8].copy_from_slice(&3u16.to_le_bytes()); // sections
        bytes[20..22].copy_from_slice(&0xF0u16.to_le_bytes()); // opt header size
        bytes[22..24].copy_from_slice(&0x0022u16.to_le_bytes()); // characteristics
        let view = ImageView::new(&bytes, &[]);
        let nt = NtHeader::parse(&view, 0).unwrap();
        assert_eq!(nt.coff.machine, Machine::Amd64);
        assert_eq!(nt.coff.number_of_sections, 3);
        assert!(nt
            .coff
            .characteristics
            .contains(FileCharacteristics::EXECUTABLE_IMAGE));
    }
}
