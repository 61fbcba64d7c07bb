//! IAT-directory dissector (spec §4.5). Walks the flat pointer-width
//! array described by data directory index 12 and annotates each slot by
//! reverse-lookup through the already-parsed import/delay-import tables.
//! Informational only — the import tables remain the source of truth.

use crate::image::ImageView;
use crate::imports::delay::DelayImportModule;
use crate::imports::descriptor::ImportModule;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct IatEntry {
    pub index: usize,
    pub rva: u32,
    pub value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,
}

fn reverse_lookup(
    rva: u32,
    imports: &[ImportModule],
    delay_imports: &[DelayImportModule],
) -> Option<String> {
    for module in imports {
        for function in &module.functions {
            if function.thunk_rva == rva {
                return Some(format!("{}!{}", module.name, function.name));
            }
        }
    }
    for module in delay_imports {
        for function in &module.functions {
            if function.thunk_rva == rva {
                return Some(format!("{}!{}", module.name, function.name));
            }
        }
    }
    None
}

pub fn parse_iat_directory(
    view: &ImageView,
    directory_rva: u32,
    directory_size: u32,
    is_64: bool,
    imports: &[ImportModule],
    delay_imports: &[DelayImportModule],
) -> Vec<IatEntry> {
    let mut entries = Vec::new();
    if directory_rva == 0 || directory_size == 0 {
        return entries;
    }

    let entry_width: u32 = if is_64 { 8 } else { 4 };
    let count = directory_size / entry_width;

    for index in 0..count as usize {
        let rva = directory_rva + (index as u32) * entry_width;
        let offset = view.offset_from_rva(rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let value = if is_64 {
            match view.read_u64(offset as u64) {
                Ok(v) => v,
                Err(_) => break,
            }
        } else {
            match view.read_u32(offset as u64) {
                Ok(v) => v as u64,
                Err(_) => break,
            }
        };

        entries.push(IatEntry {
            index,
            rva,
            value,
            meaning: reverse_lookup(rva, imports, delay_imports),
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::descriptor::ImportFunction;

    #[test]
    fn resolves_meaning_via_reverse_lookup() {
        let bytes = vec![0u8; 0x100];
        let view = ImageView::new(&bytes, &[]);
        let imports = vec![ImportModule {
            name: "kernel32.dll".into(),
            time_date_stamp: 0,
            forwarder_chain: 0,
            original_first_thunk: 0,
            first_thunk: 0x10,
            functions: vec![ImportFunction {
                name: "ExitProcess".into(),
                hint: 0,
                by_ordinal: false,
                ordinal: 0,
                original_thunk_value: 0,
                thunk_value: 0,
                thunk_rva: 0x10,
                original_thunk_rva: 0,
            }],
        }];
        let entries = parse_iat_directory(&view, 0x10, 4, false, &imports, &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].meaning.as_deref(), Some("kernel32.dll!ExitProcess"));
    }
}
