//! Export directory: `IMAGE_EXPORT_DIRECTORY` and its three parallel
//! arrays (`AddressOfFunctions`, `AddressOfNames`, `AddressOfNameOrdinals`).
//! This crate's only consumer is the Load Configuration dissector's GFIDS
//! table, which reverse-looks-up a guarded function's RVA against the
//! export table to recover a human-readable name (spec §4.6 step 2).
//! Grounded on the same descriptor-plus-parallel-array shape as
//! [`crate::imports::descriptor`]'s ILT/IAT walk.

use byteorder::{ByteOrder, LittleEndian};

use crate::image::ImageView;

const EXPORT_DIRECTORY_SIZE: usize = 40;
const MAX_ENTRIES: usize = 0x10_000;
const MAX_NAME_LEN: usize = 512;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportFunction {
    pub ordinal: u32,
    pub rva: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set when `rva` falls inside the export directory itself: the
    /// "address" is actually an ASCII `module.function` forwarder string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarder: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportTable {
    pub name: String,
    pub base: u32,
    pub time_date_stamp: u32,
    pub functions: Vec<ExportFunction>,
}

impl ExportTable {
    /// Reverse-lookup the export whose address is `rva`, returning its
    /// name if it has one or `#ordinal` otherwise (spec §4.6 step 2,
    /// mirroring [`crate::loadconfig::cfg::resolve_import_at_rva`]'s
    /// import-side resolution).
    pub fn describe(&self, rva: u32) -> Option<String> {
        self.functions
            .iter()
            .find(|f| f.rva == rva)
            .map(|f| f.name.clone().unwrap_or_else(|| format!("#{}", f.ordinal)))
    }
}

/// Translate `rva` to a file offset, or `None` when it falls outside
/// every section (and the headers region).
fn view_offset(view: &ImageView, rva: u32) -> Option<u32> {
    let offset = view.offset_from_rva(rva);
    if offset == crate::image::INVALID_OFFSET {
        None
    } else {
        Some(offset)
    }
}

fn read_u32(view: &ImageView, offset: u32) -> Option<u32> {
    view.read_u32(offset as u64).ok()
}

/// Parse the export directory at `directory_rva`/`directory_size`. Returns
/// `None` when the directory RVA doesn't translate or the header can't be
/// read; individual table-walk failures truncate rather than abort.
pub fn parse_export_directory(view: &ImageView, directory_rva: u32, directory_size: u32) -> Option<ExportTable> {
    if directory_rva == 0 {
        return None;
    }
    let offset = view.offset_from_rva(directory_rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }
    let bytes = view.read_bytes(offset as u64, EXPORT_DIRECTORY_SIZE).ok()?;

    let time_date_stamp = LittleEndian::read_u32(&bytes[4..8]);
    let name_rva = LittleEndian::read_u32(&bytes[12..16]);
    let base = LittleEndian::read_u32(&bytes[16..20]);
    let number_of_functions = LittleEndian::read_u32(&bytes[20..24]).min(MAX_ENTRIES as u32);
    let number_of_names = LittleEndian::read_u32(&bytes[24..28]).min(MAX_ENTRIES as u32);
    let address_of_functions = LittleEndian::read_u32(&bytes[28..32]);
    let address_of_names = LittleEndian::read_u32(&bytes[32..36]);
    let address_of_name_ordinals = LittleEndian::read_u32(&bytes[36..40]);

    let name = view.get_string_at_rva(name_rva, MAX_NAME_LEN);

    let directory_start = directory_rva;
    let directory_end = directory_rva.saturating_add(directory_size);
    let is_forwarder = |rva: u32| directory_size != 0 && rva >= directory_start && rva < directory_end;

    let mut functions: Vec<ExportFunction> = Vec::with_capacity(number_of_functions as usize);
    for i in 0..number_of_functions {
        let entry_rva = address_of_functions + i * 4;
        let Some(entry_offset) = view_offset(view, entry_rva) else {
            break;
        };
        let Some(rva) = read_u32(view, entry_offset) else {
            break;
        };
        if rva == 0 {
            continue;
        }
        let forwarder = if is_forwarder(rva) {
            Some(view.get_string_at_rva(rva, MAX_NAME_LEN))
        } else {
            None
        };
        functions.push(ExportFunction {
            ordinal: base + i,
            rva,
            name: None,
            forwarder,
        });
    }

    for i in 0..number_of_names {
        let name_entry_rva = address_of_names + i * 4;
        let ordinal_entry_rva = address_of_name_ordinals + i * 2;
        let Some(name_entry_offset) = view_offset(view, name_entry_rva) else {
            break;
        };
        let Some(this_name_rva) = read_u32(view, name_entry_offset) else {
            break;
        };
        let Some(ordinal_index_offset) = view_offset(view, ordinal_entry_rva) else {
            break;
        };
        let Ok(ordinal_index) = view.read_u16(ordinal_index_offset as u64) else {
            break;
        };
        let export_name = view.get_string_at_rva(this_name_rva, MAX_NAME_LEN);
        if export_name.is_empty() {
            continue;
        }
        if let Some(function) = functions.iter_mut().find(|f| f.ordinal == base + ordinal_index as u32) {
            function.name = Some(export_name);
        }
    }

    Some(ExportTable {
        name,
        base,
        time_date_stamp,
        functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{Section, SectionFlags, SectionHeader};

    fn flat_section() -> Vec<Section> {
        vec![Section::new(SectionHeader {
            name: ".edata".into(),
            virtual_size: 0x2000,
            virtual_address: 0x1000,
            size_of_raw_data: 0x2000,
            pointer_to_raw_data: 0x400,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::empty(),
        })]
    }

    #[test]
    fn resolves_named_export_by_rva() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = flat_section();
        let dir_off = 0x400usize;

        bytes[dir_off + 16..dir_off + 20].copy_from_slice(&1u32.to_le_bytes()); // base
        bytes[dir_off + 20..dir_off + 24].copy_from_slice(&1u32.to_le_bytes()); // NumberOfFunctions
        bytes[dir_off + 24..dir_off + 28].copy_from_slice(&1u32.to_le_bytes()); // NumberOfNames
        bytes[dir_off + 28..dir_off + 32].copy_from_slice(&0x1200u32.to_le_bytes()); // AddressOfFunctions
        bytes[dir_off + 32..dir_off + 36].copy_from_slice(&0x1300u32.to_le_bytes()); // AddressOfNames
        bytes[dir_off + 36..dir_off + 40].copy_from_slice(&0x1400u32.to_le_bytes()); // AddressOfNameOrdinals

        // AddressOfFunctions[0] = 0xFE2A0
        bytes[0x600..0x604].copy_from_slice(&0xFE2A0u32.to_le_bytes());
        // AddressOfNames[0] -> name string rva
        bytes[0x700..0x704].copy_from_slice(&0x1500u32.to_le_bytes());
        // AddressOfNameOrdinals[0] = 0
        bytes[0x800..0x802].copy_from_slice(&0u16.to_le_bytes());
        // name string
        bytes[0x900..0x900 + 19].copy_from_slice(b"GetCalendarInfoEx\0\0");

        let view = ImageView::new(&bytes, &sections);
        let table = parse_export_directory(&view, 0x1000, 0x1000).unwrap();
        assert_eq!(table.describe(0xFE2A0).as_deref(), Some("GetCalendarInfoEx"));
    }

    #[test]
    fn ordinal_only_export_formats_as_hash_ordinal() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = flat_section();
        let dir_off = 0x400usize;

        bytes[dir_off + 16..dir_off + 20].copy_from_slice(&5u32.to_le_bytes()); // base
        bytes[dir_off + 20..dir_off + 24].copy_from_slice(&1u32.to_le_bytes()); // NumberOfFunctions
        bytes[dir_off + 28..dir_off + 32].copy_from_slice(&0x1200u32.to_le_bytes()); // AddressOfFunctions

        bytes[0x600..0x604].copy_from_slice(&0x3000u32.to_le_bytes());

        let view = ImageView::new(&bytes, &sections);
        let table = parse_export_directory(&view, 0x1000, 0x1000).unwrap();
        assert_eq!(table.describe(0x3000).as_deref(), Some("#5"));
    }

    #[test]
    fn missing_rva_resolves_to_none() {
        let bytes = vec![0u8; 0x2800];
        let sections = flat_section();
        let view = ImageView::new(&bytes, &sections);
        let table = parse_export_directory(&view, 0x1000, 0x1000).unwrap();
        assert_eq!(table.describe(0x1234), None);
    }
}
