//! Delay-import directory: imports resolved lazily on first call, with
//! two historical encodings (spec §3 "Delay import descriptor", §9 open
//! question 3). When `Attributes == 0` every RVA-looking field is
//! actually an absolute VA — the "old" Visual C++ 6.0 form — and must
//! have `ImageBase` subtracted before translation.

use byteorder::{ByteOrder, LittleEndian};

use crate::anomalies::Anomalies;
use crate::image::ImageView;
use crate::imports::descriptor::{build_functions, ImportFunction};
use crate::imports::thunk;

pub const DELAY_DESCRIPTOR_SIZE: usize = 32;
const MAX_DESCRIPTORS: usize = 1024;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DelayImportDescriptorRaw {
    pub attributes: u32,
    pub name_rva: u32,
    pub module_handle_rva: u32,
    pub iat_rva: u32,
    pub int_rva: u32,
    pub bound_iat_rva: u32,
    pub unload_info_rva: u32,
    pub time_date_stamp: u32,
}

impl DelayImportDescriptorRaw {
    pub fn from_bytes(bytes: &[u8]) -> DelayImportDescriptorRaw {
        DelayImportDescriptorRaw {
            attributes: LittleEndian::read_u32(&bytes[0..4]),
            name_rva: LittleEndian::read_u32(&bytes[4..8]),
            module_handle_rva: LittleEndian::read_u32(&bytes[8..12]),
            iat_rva: LittleEndian::read_u32(&bytes[12..16]),
            int_rva: LittleEndian::read_u32(&bytes[16..20]),
            bound_iat_rva: LittleEndian::read_u32(&bytes[20..24]),
            unload_info_rva: LittleEndian::read_u32(&bytes[24..28]),
            time_date_stamp: LittleEndian::read_u32(&bytes[28..32]),
        }
    }

    pub fn is_zeroed_out(&self) -> bool {
        self.attributes == 0
            && self.name_rva == 0
            && self.module_handle_rva == 0
            && self.iat_rva == 0
            && self.int_rva == 0
            && self.bound_iat_rva == 0
            && self.unload_info_rva == 0
            && self.time_date_stamp == 0
    }

    /// The old (pre-`Attributes`) form used absolute VAs throughout.
    pub fn is_old_form(&self) -> bool {
        self.attributes == 0
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DelayImportModule {
    pub attributes: u32,
    pub name: String,
    pub module_handle_rva: u32,
    pub iat_rva: u32,
    pub int_rva: u32,
    pub bound_iat_rva: u32,
    pub unload_info_rva: u32,
    pub time_date_stamp: u32,
    pub functions: Vec<ImportFunction>,
}

fn va_to_rva(va: u32, image_base: u64) -> u32 {
    va.wrapping_sub(image_base as u32)
}

pub fn parse_delay_import_directory(
    view: &ImageView,
    directory_rva: u32,
    image_base: u64,
    is_64: bool,
    anomalies: &mut Anomalies,
) -> Vec<DelayImportModule> {
    let mut modules = Vec::new();
    if directory_rva == 0 {
        return modules;
    }

    for i in 0..MAX_DESCRIPTORS {
        let entry_rva = directory_rva + (i * DELAY_DESCRIPTOR_SIZE) as u32;
        let offset = view.offset_from_rva(entry_rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let Ok(bytes) = view.read_bytes(offset as u64, DELAY_DESCRIPTOR_SIZE) else {
            break;
        };
        let raw = DelayImportDescriptorRaw::from_bytes(bytes);
        if raw.is_zeroed_out() {
            break;
        }

        let old_form = raw.is_old_form();
        let (name_rva, module_handle_rva, iat_rva, int_rva, bound_iat_rva, unload_info_rva) = if old_form {
            (
                va_to_rva(raw.name_rva, image_base),
                va_to_rva(raw.module_handle_rva, image_base),
                va_to_rva(raw.iat_rva, image_base),
                va_to_rva(raw.int_rva, image_base),
                va_to_rva(raw.bound_iat_rva, image_base),
                va_to_rva(raw.unload_info_rva, image_base),
            )
        } else {
            (
                raw.name_rva,
                raw.module_handle_rva,
                raw.iat_rva,
                raw.int_rva,
                raw.bound_iat_rva,
                raw.unload_info_rva,
            )
        };

        let module_name = view.get_string_at_rva(name_rva, 512);
        if module_name.is_empty() {
            continue;
        }

        let entry_width: u32 = if is_64 { 8 } else { 4 };
        let int_max = thunk::max_thunk_entries(view, int_rva, entry_width);
        let iat_max = thunk::max_thunk_entries(view, iat_rva, entry_width);
        let int_entries = thunk::walk_thunk_table(view, int_rva, is_64, int_max, anomalies);
        let iat_entries = thunk::walk_thunk_table(view, iat_rva, is_64, iat_max, anomalies);

        let functions = build_functions(view, &int_entries, &iat_entries, anomalies);

        modules.push(DelayImportModule {
            attributes: raw.attributes,
            name: module_name,
            module_handle_rva,
            iat_rva,
            int_rva,
            bound_iat_rva,
            unload_info_rva,
            time_date_stamp: raw.time_date_stamp,
            functions,
        });
    }

    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{Section, SectionFlags, SectionHeader};

    fn flat_section() -> Vec<Section> {
        vec![Section::new(SectionHeader {
            name: ".text".into(),
            virtual_size: 0x4000,
            virtual_address: 0x1000,
            size_of_raw_data: 0x4000,
            pointer_to_raw_data: 0x400,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::empty(),
        })]
    }

    #[test]
    fn new_form_translates_rvas_directly() {
        let mut bytes = vec![0u8; 0x4400];
        let sections = flat_section();
        let desc_off = 0x400usize;
        bytes[desc_off..desc_off + 4].copy_from_slice(&1u32.to_le_bytes()); // attributes = 1 (new form)
        bytes[desc_off + 4..desc_off + 8].copy_from_slice(&0x1200u32.to_le_bytes()); // name rva
        bytes[desc_off + 12..desc_off + 16].copy_from_slice(&0x1300u32.to_le_bytes()); // iat rva
        bytes[desc_off + 16..desc_off + 20].copy_from_slice(&0x1400u32.to_le_bytes()); // int rva

        bytes[0x600..0x600 + 12].copy_from_slice(b"kernel32.dll");

        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::new();
        let modules = parse_delay_import_directory(&view, 0x1000, 0x1400_0000, false, &mut anomalies);
        assert_eq!(modules.len(), 1);
        assert!(modules[0].name.starts_with("kernel32"));
        assert_eq!(modules[0].attributes, 1);
    }
}
