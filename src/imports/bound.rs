//! Bound-import directory: cached pre-resolution of another module's
//! addresses, used by the loader as a fast path when timestamps still
//! match (spec §3 "Bound import descriptor + forwarded refs", §4.4).

use byteorder::{ByteOrder, LittleEndian};

use crate::image::ImageView;

const DESCRIPTOR_SIZE: usize = 8;
const FORWARDED_REF_SIZE: usize = 8;
const MAX_DESCRIPTORS: usize = 1024;
const MAX_MODULE_NAME_LEN: usize = 256;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BoundForwardedRef {
    pub time_date_stamp: u32,
    pub module_name: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BoundImportEntry {
    pub time_date_stamp: u32,
    pub module_name: String,
    pub forwarded_refs: Vec<BoundForwardedRef>,
}

fn is_printable(name: &str) -> bool {
    name.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Byte distance from `from_offset` to the start of the nearest
/// section's raw data, or to the end of the image if none follows (spec
/// §4.4 "safety boundary").
fn safety_boundary(view: &ImageView, from_offset: u32) -> u32 {
    let next_section_start = view
        .sections
        .iter()
        .map(|s| s.header.pointer_to_raw_data)
        .filter(|&start| start > from_offset)
        .min();
    match next_section_start {
        Some(start) => start - from_offset,
        None => (view.len() as u32).saturating_sub(from_offset),
    }
}

pub fn parse_bound_import_directory(view: &ImageView, directory_rva: u32) -> Vec<BoundImportEntry> {
    let mut entries = Vec::new();
    if directory_rva == 0 {
        return entries;
    }
    let table_start = view.offset_from_rva(directory_rva);
    if table_start == crate::image::INVALID_OFFSET {
        return entries;
    }

    let mut cursor = table_start;
    for _ in 0..MAX_DESCRIPTORS {
        let Ok(bytes) = view.read_bytes(cursor as u64, DESCRIPTOR_SIZE) else {
            break;
        };
        let time_date_stamp = LittleEndian::read_u32(&bytes[0..4]);
        let offset_module_name = LittleEndian::read_u16(&bytes[4..6]);
        let number_of_refs = LittleEndian::read_u16(&bytes[6..8]);
        if time_date_stamp == 0 && offset_module_name == 0 && number_of_refs == 0 {
            break;
        }

        let module_name =
            view.get_ascii_string_from_data((table_start + offset_module_name as u32) as u64, MAX_MODULE_NAME_LEN);
        if !module_name.is_empty() && (module_name.len() > MAX_MODULE_NAME_LEN || !is_printable(&module_name)) {
            break;
        }

        cursor += DESCRIPTOR_SIZE as u32;
        let boundary = safety_boundary(view, cursor);
        let ref_count = (number_of_refs as usize).min((boundary / FORWARDED_REF_SIZE as u32) as usize);

        let mut forwarded_refs = Vec::with_capacity(ref_count);
        let mut corrupted = false;
        for _ in 0..ref_count {
            let Ok(ref_bytes) = view.read_bytes(cursor as u64, FORWARDED_REF_SIZE) else {
                break;
            };
            let ref_time_date_stamp = LittleEndian::read_u32(&ref_bytes[0..4]);
            let ref_offset_name = LittleEndian::read_u16(&ref_bytes[4..6]);
            let ref_name = view.get_ascii_string_from_data(
                (table_start + ref_offset_name as u32) as u64,
                MAX_MODULE_NAME_LEN,
            );
            if !ref_name.is_empty() && (ref_name.len() > MAX_MODULE_NAME_LEN || !is_printable(&ref_name)) {
                corrupted = true;
                cursor += FORWARDED_REF_SIZE as u32;
                break;
            }
            forwarded_refs.push(BoundForwardedRef {
                time_date_stamp: ref_time_date_stamp,
                module_name: ref_name,
            });
            cursor += FORWARDED_REF_SIZE as u32;
        }

        entries.push(BoundImportEntry {
            time_date_stamp,
            module_name,
            forwarded_refs,
        });

        if corrupted {
            break;
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{Section, SectionFlags, SectionHeader};

    fn flat_section() -> Vec<Section> {
        vec![Section::new(SectionHeader {
            name: ".idata".into(),
            virtual_size: 0x1000,
            virtual_address: 0x1000,
            size_of_raw_data: 0x1000,
            pointer_to_raw_data: 0x400,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::empty(),
        })]
    }

    #[test]
    fn parses_descriptor_with_one_forwarded_ref() {
        let mut bytes = vec![0u8; 0x500];
        let sections = flat_section();
        let table_off = 0x400usize;
        bytes[table_off..table_off + 4].copy_from_slice(&0x1234u32.to_le_bytes());
        bytes[table_off + 4..table_off + 6].copy_from_slice(&16u16.to_le_bytes()); // offset module name
        bytes[table_off + 6..table_off + 8].copy_from_slice(&1u16.to_le_bytes()); // 1 forwarder ref

        // forwarded ref immediately follows the 8-byte descriptor
        let ref_off = table_off + 8;
        bytes[ref_off..ref_off + 4].copy_from_slice(&0xAAAAu32.to_le_bytes());
        bytes[ref_off + 4..ref_off + 6].copy_from_slice(&24u16.to_le_bytes());

        // module names relative to table start
        bytes[table_off + 16..table_off + 16 + 8].copy_from_slice(b"foo.dll\0");
        bytes[table_off + 24..table_off + 24 + 8].copy_from_slice(b"bar.dll\0");

        let view = ImageView::new(&bytes, &sections);
        let entries = parse_bound_import_directory(&view, 0x1000);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].module_name, "foo.dll");
        assert_eq!(entries[0].forwarded_refs.len(), 1);
        assert_eq!(entries[0].forwarded_refs[0].module_name, "bar.dll");
    }
}
