//! Compiled Hybrid Portable Executable (CHPE) metadata: x86-on-ARM64
//! emulation tables referenced from `LoadConfig.CHPEMetadataPointer`
//! (spec §4.6 step 2 "CHPE metadata"). Version-dispatched per §9 open
//! question 2: versions beyond the documented v1-v3 are decoded with the
//! widest known struct, same as load-config itself.

use byteorder::{ByteOrder, LittleEndian};

use crate::image::ImageView;
use crate::imports::descriptor::ImportModule;

const MAX_CODE_RANGES: usize = 0x10000;
const MAX_COMPILER_IAT_ENTRIES: usize = 1024;

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CodeRange {
    pub begin: u32,
    pub length: u32,
    /// `0` = emulated x86, `1` = native ARM64.
    pub machine: u8,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CompilerIatEntry {
    pub rva: u32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ChpeMetadata {
    pub version: u32,
    pub code_range_count: u32,
    pub compiler_iat_pointer: u32,
    pub wow_a64_rdtsc_function_pointer: u32,
    pub code_ranges: Vec<CodeRange>,
    pub compiler_iat: Vec<CompilerIatEntry>,
}

/// The widest known header: v1's ten base fields (40 bytes), plus v2's
/// `CompilerIATPointer` (4 bytes), plus v3's RDTSC function pointer (4
/// bytes) — 48 bytes total. Higher versions reuse this layout.
const HEADER_LEN: usize = 48;

fn read_header(view: &ImageView, rva: u32) -> Option<[u8; HEADER_LEN]> {
    let offset = view.offset_from_rva(rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }
    let available = view.len().saturating_sub(offset as usize).min(HEADER_LEN);
    let mut buf = [0u8; HEADER_LEN];
    if available > 0 {
        if let Ok(bytes) = view.read_bytes(offset as u64, available) {
            buf[..available].copy_from_slice(bytes);
        }
    }
    Some(buf)
}

fn resolve_import_at_rva(rva: u32, imports: &[ImportModule]) -> Option<String> {
    for module in imports {
        for function in &module.functions {
            if function.thunk_rva == rva {
                return Some(format!("{}!{}", module.name, function.name));
            }
        }
    }
    None
}

pub fn parse_chpe_metadata(
    view: &ImageView,
    metadata_va: u64,
    image_base: u64,
    imports: &[ImportModule],
) -> Option<ChpeMetadata> {
    let metadata_rva = metadata_va.checked_sub(image_base)? as u32;
    let buf = read_header(view, metadata_rva)?;

    let version = LittleEndian::read_u32(&buf[0..4]);
    let code_range_offset = LittleEndian::read_u32(&buf[4..8]);
    let code_range_count = LittleEndian::read_u32(&buf[8..12]);
    let compiler_iat_pointer = if version >= 2 {
        LittleEndian::read_u32(&buf[40..44])
    } else {
        0
    };
    let wow_a64_rdtsc_function_pointer = if version >= 3 {
        LittleEndian::read_u32(&buf[44..48])
    } else {
        0
    };

    let mut code_ranges = Vec::new();
    let count = (code_range_count as usize).min(MAX_CODE_RANGES);
    for i in 0..count {
        let entry_rva = code_range_offset + (i as u32) * 8;
        let offset = view.offset_from_rva(entry_rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let Ok(bytes) = view.read_bytes(offset as u64, 8) else {
            break;
        };
        let raw_start = LittleEndian::read_u32(&bytes[0..4]);
        let length = LittleEndian::read_u32(&bytes[4..8]);
        code_ranges.push(CodeRange {
            begin: raw_start & !1,
            length,
            machine: (raw_start & 1) as u8,
        });
    }

    let mut compiler_iat = Vec::new();
    if compiler_iat_pointer != 0 {
        for i in 0..MAX_COMPILER_IAT_ENTRIES {
            let entry_rva = compiler_iat_pointer + (i as u32) * 4;
            let Ok(rva) = view.read_u32_at_rva(entry_rva) else {
                break;
            };
            if rva == 0 {
                break;
            }
            compiler_iat.push(CompilerIatEntry {
                rva,
                description: resolve_import_at_rva(rva, imports),
            });
        }
    }

    Some(ChpeMetadata {
        version,
        code_range_count,
        compiler_iat_pointer,
        wow_a64_rdtsc_function_pointer,
        code_ranges,
        compiler_iat,
    })
}
