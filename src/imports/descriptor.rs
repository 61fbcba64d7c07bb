//! Classic import directory: `IMAGE_IMPORT_DESCRIPTOR` iteration and the
//! `IMAGE_IMPORT_BY_NAME` records its thunks point at (spec §3 "Import
//! descriptor", §4.3). Grounded on the teacher's `ImageImportDescriptor`
//! (`pe.rs`), generalized from a single fixed-width cursor read into a
//! bounds-checked, anomaly-tracking walk over both thunk tables.

use byteorder::{ByteOrder, LittleEndian};

use crate::anomalies::{self, Anomalies};
use crate::error::Result;
use crate::image::ImageView;
use crate::imports::thunk::{self, ThunkEntry, ThunkValue};

pub const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const MAX_DESCRIPTORS: usize = 1024;
const MAX_NAME_LEN: usize = 512;
const MAX_CONSECUTIVE_INVALID: usize = 1000;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportDescriptorRaw {
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub first_thunk: u32,
}

impl ImportDescriptorRaw {
    pub fn from_bytes(bytes: &[u8]) -> ImportDescriptorRaw {
        ImportDescriptorRaw {
            original_first_thunk: LittleEndian::read_u32(&bytes[0..4]),
            time_date_stamp: LittleEndian::read_u32(&bytes[4..8]),
            forwarder_chain: LittleEndian::read_u32(&bytes[8..12]),
            name_rva: LittleEndian::read_u32(&bytes[12..16]),
            first_thunk: LittleEndian::read_u32(&bytes[16..20]),
        }
    }

    pub fn is_zeroed_out(&self) -> bool {
        self.original_first_thunk == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name_rva == 0
            && self.first_thunk == 0
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportFunction {
    pub name: String,
    pub hint: u16,
    pub by_ordinal: bool,
    pub ordinal: u16,
    pub original_thunk_value: u64,
    pub thunk_value: u64,
    pub thunk_rva: u32,
    pub original_thunk_rva: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportModule {
    pub name: String,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub original_first_thunk: u32,
    pub first_thunk: u32,
    pub functions: Vec<ImportFunction>,
}

/// Read a hint + NUL-terminated name at `IMAGE_IMPORT_BY_NAME` RVA `rva`.
/// Never fails: an untranslatable RVA yields `(0, String::new())`.
fn read_hint_name(view: &ImageView, rva: u32) -> (u16, String) {
    let offset = view.offset_from_rva(rva);
    if offset == crate::image::INVALID_OFFSET {
        return (0, String::new());
    }
    let hint = view.read_u16(offset as u64).unwrap_or(0);
    let name = view.get_ascii_string_from_data(offset as u64 + 2, MAX_NAME_LEN);
    (hint, name)
}

/// A conservative identifier-charset check: printable ASCII only, no
/// control characters. C++ mangled names use `?@$`, which this allows.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Build the module's function list from its ILT/IAT thunk arrays. Per
/// spec §4.3: prefer the ILT for semantic content, fall back to the IAT
/// when the ILT is absent or empty.
pub(crate) fn build_functions(
    view: &ImageView,
    ilt: &[ThunkEntry],
    iat: &[ThunkEntry],
    anomalies: &mut Anomalies,
) -> Vec<ImportFunction> {
    let primary: &[ThunkEntry] = if !ilt.is_empty() { ilt } else { iat };
    let mut functions = Vec::with_capacity(primary.len());
    let mut consecutive_invalid = 0usize;

    for i in 0..primary.len() {
        let entry = &primary[i];
        let original_thunk = ilt.get(i);
        let iat_thunk = iat.get(i);

        let (by_ordinal, ordinal, name, hint) = match entry.value {
            ThunkValue::Ordinal(ord) => (true, ord, format!("#{ord}"), 0u16),
            ThunkValue::NameAddress(addr) => {
                let (hint, raw_name) = read_hint_name(view, addr);
                if !is_valid_name(&raw_name) {
                    anomalies.push(anomalies::NO_NAME_NO_ORDINAL);
                    consecutive_invalid += 1;
                    (false, 0, "*invalid*".to_string(), hint)
                } else {
                    consecutive_invalid = 0;
                    (false, 0, raw_name, hint)
                }
            }
        };

        functions.push(ImportFunction {
            name,
            hint,
            by_ordinal,
            ordinal,
            original_thunk_value: original_thunk.map(|e| e.raw).unwrap_or(0),
            thunk_value: iat_thunk.map(|e| e.raw).unwrap_or(0),
            thunk_rva: iat_thunk.map(|e| e.entry_rva).unwrap_or(0),
            original_thunk_rva: original_thunk.map(|e| e.entry_rva).unwrap_or(0),
        });

        if consecutive_invalid >= MAX_CONSECUTIVE_INVALID {
            break;
        }
    }

    functions
}

/// Walk the classic import directory at `directory_rva`, producing one
/// [`ImportModule`] per non-terminator descriptor. Per-module corruption
/// (e.g. a damaged import table) is recorded as an anomaly and the module
/// is skipped rather than aborting the whole directory.
pub fn parse_import_directory(
    view: &ImageView,
    directory_rva: u32,
    is_64: bool,
    anomalies: &mut Anomalies,
) -> Result<Vec<ImportModule>> {
    let mut modules = Vec::new();
    if directory_rva == 0 {
        return Ok(modules);
    }

    for i in 0..MAX_DESCRIPTORS {
        let entry_rva = directory_rva + (i * IMPORT_DESCRIPTOR_SIZE) as u32;
        let offset = view.offset_from_rva(entry_rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let Ok(bytes) = view.read_bytes(offset as u64, IMPORT_DESCRIPTOR_SIZE) else {
            break;
        };
        let raw = ImportDescriptorRaw::from_bytes(bytes);
        if raw.is_zeroed_out() {
            break;
        }

        let module_name = view.get_string_at_rva(raw.name_rva, 512);
        if !is_valid_name(&module_name) {
            continue;
        }

        let entry_width: u32 = if is_64 { 8 } else { 4 };
        let ilt_max = thunk::max_thunk_entries(view, raw.original_first_thunk, entry_width);
        let iat_max = thunk::max_thunk_entries(view, raw.first_thunk, entry_width);

        let ilt = thunk::walk_thunk_table(view, raw.original_first_thunk, is_64, ilt_max, anomalies);
        let iat = thunk::walk_thunk_table(view, raw.first_thunk, is_64, iat_max, anomalies);

        if ilt.is_empty() && iat.is_empty() {
            anomalies.push_detail(anomalies::DAMAGED_IMPORT_TABLE, &module_name);
            continue;
        }

        let functions = build_functions(view, &ilt, &iat, anomalies);

        modules.push(ImportModule {
            name: module_name,
            time_date_stamp: raw.time_date_stamp,
            forwarder_chain: raw.forwarder_chain,
            original_first_thunk: raw.original_first_thunk,
            first_thunk: raw.first_thunk,
            functions,
        });
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{Section, SectionFlags, SectionHeader};

    fn flat_section() -> Vec<Section> {
        vec![Section::new(SectionHeader {
            name: ".idata".into(),
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
    fn parses_single_named_import() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = flat_section();
        // descriptor at RVA 0x1000 -> file offset 0x400
        let descriptor_off = 0x400usize;
        bytes[descriptor_off..descriptor_off + 4].copy_from_slice(&0x1100u32.to_le_bytes()); // OFT rva
        bytes[descriptor_off + 12..descriptor_off + 16].copy_from_slice(&0x1200u32.to_le_bytes()); // name rva
        bytes[descriptor_off + 16..descriptor_off + 20].copy_from_slice(&0x1300u32.to_le_bytes()); // FT rva

        // module name at rva 0x1200 -> offset 0x600
        bytes[0x600..0x600 + 8].copy_from_slice(b"foo.dll\0");

        // ILT at rva 0x1100 -> offset 0x500: single entry pointing to name rva 0x1400
        bytes[0x500..0x504].copy_from_slice(&0x1400u32.to_le_bytes());
        // IAT at rva 0x1300 -> offset 0x700: mirror
        bytes[0x700..0x704].copy_from_slice(&0x1400u32.to_le_bytes());

        // hint/name at rva 0x1400 -> offset 0x800
        bytes[0x800..0x802].copy_from_slice(&7u16.to_le_bytes());
        bytes[0x802..0x802 + 4].copy_from_slice(b"Bar\0");

        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::new();
        let modules = parse_import_directory(&view, 0x1000, false, &mut anomalies).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "foo.dll");
        assert_eq!(modules[0].functions.len(), 1);
        assert_eq!(modules[0].functions[0].name, "Bar");
        assert_eq!(modules[0].functions[0].hint, 7);
        assert!(!modules[0].functions[0].by_ordinal);
    }

    #[test]
    fn ordinal_import_formats_as_hash_ordinal() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = flat_section();
        let descriptor_off = 0x400usize;
        bytes[descriptor_off..descriptor_off + 4].copy_from_slice(&0x1100u32.to_le_bytes());
        bytes[descriptor_off + 12..descriptor_off + 16].copy_from_slice(&0x1200u32.to_le_bytes());
        bytes[descriptor_off + 16..descriptor_off + 20].copy_from_slice(&0x1300u32.to_le_bytes());
        bytes[0x600..0x600 + 8].copy_from_slice(b"ws2_32\0\0");
        bytes[0x500..0x504].copy_from_slice(&(0x8000_0000u32 | 115).to_le_bytes());
        bytes[0x700..0x704].copy_from_slice(&(0x8000_0000u32 | 115).to_le_bytes());

        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::new();
        let modules = parse_import_directory(&view, 0x1000, false, &mut anomalies).unwrap();
        assert_eq!(modules[0].functions[0].name, "#115");
        assert!(modules[0].functions[0].by_ordinal);
    }

    #[test]
    fn one_damaged_descriptor_does_not_wipe_out_the_rest() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = flat_section();

        // Descriptor 0 at rva 0x1000 -> offset 0x400: a valid module name
        // but both OriginalFirstThunk and FirstThunk left zero, so neither
        // the ILT nor the IAT has any entries.
        let bad_off = 0x400usize;
        bytes[bad_off + 12..bad_off + 16].copy_from_slice(&0x1200u32.to_le_bytes()); // name rva
        bytes[0x600..0x600 + 8].copy_from_slice(b"bad.dll\0");

        // Descriptor 1 at rva 0x1014 -> offset 0x414: a well-formed module.
        let good_off = 0x414usize;
        bytes[good_off..good_off + 4].copy_from_slice(&0x1110u32.to_le_bytes()); // OFT rva
        bytes[good_off + 12..good_off + 16].copy_from_slice(&0x1210u32.to_le_bytes()); // name rva
        bytes[good_off + 16..good_off + 20].copy_from_slice(&0x1310u32.to_le_bytes()); // FT rva
        bytes[0x610..0x610 + 9].copy_from_slice(b"good.dll\0");
        bytes[0x510..0x514].copy_from_slice(&0x1410u32.to_le_bytes());
        bytes[0x710..0x714].copy_from_slice(&0x1410u32.to_le_bytes());
        bytes[0x810..0x810 + 2].copy_from_slice(&1u16.to_le_bytes());
        bytes[0x812..0x812 + 4].copy_from_slice(b"Baz\0");

        // Descriptor 2 at rva 0x1028 -> offset 0x428: all-zero terminator.

        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::new();
        let modules = parse_import_directory(&view, 0x1000, false, &mut anomalies).unwrap();

        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "good.dll");
        assert_eq!(modules[0].functions[0].name, "Baz");
        assert!(anomalies
            .as_slice()
            .iter()
            .any(|m| m.starts_with(anomalies::DAMAGED_IMPORT_TABLE)));
    }
}
