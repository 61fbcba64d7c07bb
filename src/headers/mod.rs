//! NT header family: DOS stub, COFF file header, optional header, section
//! table, data directory array.

pub mod coff;
pub mod data_directory;
pub mod dos;
pub mod optional;
pub mod section;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::image::ImageView;
use coff::NtHeader;
use dos::DosHeader;
use optional::OptionalHeader;
use section::{Section, SectionHeader, SECTION_HEADER_SIZE};

/// The fully decoded header region: everything before the first section's
/// raw data, parsed once up front so every later dissector can borrow an
/// [`ImageView`] plus an already-parsed section list.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Headers {
    pub dos: DosHeader,
    pub nt: NtHeader,
    pub optional: OptionalHeader,
    pub sections: Vec<Section>,
}

impl Headers {
    pub fn parse(bytes: &[u8]) -> Result<Headers> {
        let bare_view = ImageView::new(bytes, &[]);
        let dos = DosHeader::parse(&bare_view)?;
        let nt = NtHeader::parse(&bare_view, dos.e_lfanew as u64)?;

        let optional_offset = dos.e_lfanew as u64 + 4 + coff::COFF_HEADER_SIZE as u64;
        let optional = OptionalHeader::parse(
            &bare_view,
            optional_offset,
            nt.coff.size_of_optional_header,
        )?;

        let section_table_offset = optional_offset + nt.coff.size_of_optional_header as u64;
        let mut sections = Vec::with_capacity(nt.coff.number_of_sections as usize);
        for i in 0..nt.coff.number_of_sections as u64 {
            let offset = section_table_offset + i * SECTION_HEADER_SIZE as u64;
            let Ok(raw) = bare_view.read_bytes(offset, SECTION_HEADER_SIZE) else {
                break;
            };
            sections.push(Section::new(SectionHeader::from_bytes(raw)));
        }

        Ok(Headers {
            dos,
            nt,
            optional,
            sections,
        })
    }

    pub fn is_64(&self) -> bool {
        self.optional.is_64()
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        self.optional.windows.number_of_rva_and_sizes
    }
}

/// Read a little-endian u32 directly, used in a couple of spots where a
/// caller already has a raw slice rather than an [`ImageView`].
pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&bytes[offset..offset + 4])
}
