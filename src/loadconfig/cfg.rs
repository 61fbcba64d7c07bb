//! Control Flow Guard sub-tables: GFIDS (guarded function IDs), the CFG
//! IAT table, and long-jump targets. All three share the same
//! variable-stride encoding driven by `GuardFlags` (spec §4.6 step 2).

use crate::exports::ExportTable;
use crate::image::ImageView;
use crate::imports::descriptor::ImportModule;

/// Hard ceiling on entries read from a guard table (GFIDS, CFG IAT, or
/// long-jump targets), independent of the attacker-controlled count field
/// in the load-config header.
const MAX_GUARD_TABLE_ENTRIES: usize = 0x10000;

/// Number of extra metadata bytes following each table's 4-byte RVA,
/// encoded in the top nibble of `GuardFlags`.
pub fn guard_table_stride_extra(guard_flags: u32) -> usize {
    ((guard_flags >> 28) & 0xF) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GfidsFlag {
    None,
    FidSuppressed,
    ExportSuppressed,
    Other(u8),
}

impl From<u8> for GfidsFlag {
    fn from(value: u8) -> GfidsFlag {
        match value {
            0 => GfidsFlag::None,
            1 => GfidsFlag::FidSuppressed,
            2 => GfidsFlag::ExportSuppressed,
            other => GfidsFlag::Other(other),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GfidsEntry {
    pub rva: u32,
    pub flags: GfidsFlag,
    /// Populated by reverse-lookup against the export table for entries
    /// flagged `FidSuppressed`/`ExportSuppressed`; `None` when the image
    /// has no export directory or the RVA doesn't resolve to one of its
    /// exports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CfgIatEntry {
    pub rva: u32,
    pub metadata: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int_value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat_value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LongJumpEntry {
    pub rva: u32,
}

/// Walk a guard table's raw `(rva, metadata)` pairs. `extra_bytes` is the
/// per-entry metadata width (0..=4) derived from `GuardFlags`'s top
/// nibble; metadata wider than 4 bytes cannot occur since the field it
/// comes from is itself 4 bits.
fn walk_guard_table(view: &ImageView, table_rva: u32, count: u64, extra_bytes: usize) -> Vec<(u32, u32)> {
    let stride = 4 + extra_bytes as u32;
    let count = (count as usize).min(MAX_GUARD_TABLE_ENTRIES) as u64;
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let entry_rva = table_rva + (i as u32) * stride;
        let Ok(rva) = view.read_u32_at_rva(entry_rva) else {
            break;
        };
        let metadata = if extra_bytes == 0 {
            0
        } else {
            let offset = view.offset_from_rva(entry_rva + 4);
            if offset == crate::image::INVALID_OFFSET {
                0
            } else {
                let mut bytes = [0u8; 4];
                for (j, b) in bytes.iter_mut().enumerate().take(extra_bytes) {
                    *b = view.read_u8(offset as u64 + j as u64).unwrap_or(0);
                }
                u32::from_le_bytes(bytes)
            }
        };
        entries.push((rva, metadata));
    }
    entries
}

/// Per spec §4.6 step 2: entries flagged `FidSuppressed`/`ExportSuppressed`
/// get a `description` via reverse-lookup of the export at that RVA.
pub fn parse_gfids_table(
    view: &ImageView,
    table_rva: u32,
    count: u64,
    guard_flags: u32,
    exports: Option<&ExportTable>,
) -> Vec<GfidsEntry> {
    let extra = guard_table_stride_extra(guard_flags);
    walk_guard_table(view, table_rva, count, extra)
        .into_iter()
        .map(|(rva, metadata)| {
            let flags = GfidsFlag::from(metadata as u8);
            let description = match flags {
                GfidsFlag::FidSuppressed | GfidsFlag::ExportSuppressed => {
                    exports.and_then(|table| table.describe(rva))
                }
                _ => None,
            };
            GfidsEntry {
                rva,
                flags,
                description,
            }
        })
        .collect()
}

fn resolve_import_at_rva(rva: u32, imports: &[ImportModule]) -> Option<(String, u32, u32)> {
    for module in imports {
        for function in &module.functions {
            if function.thunk_rva == rva {
                return Some((
                    format!("{}!{}", module.name, function.name),
                    function.thunk_value as u32,
                    function.original_thunk_value as u32,
                ));
            }
        }
    }
    None
}

pub fn parse_cfg_iat_table(
    view: &ImageView,
    table_rva: u32,
    count: u64,
    guard_flags: u32,
    imports: &[ImportModule],
) -> Vec<CfgIatEntry> {
    let extra = guard_table_stride_extra(guard_flags);
    walk_guard_table(view, table_rva, count, extra)
        .into_iter()
        .map(|(rva, metadata)| {
            let resolved = resolve_import_at_rva(rva, imports);
            CfgIatEntry {
                rva,
                metadata,
                iat_value: resolved.as_ref().map(|(_, iat, _)| *iat),
                int_value: resolved.as_ref().map(|(_, _, int)| *int),
                description: resolved.map(|(desc, _, _)| desc),
            }
        })
        .collect()
}

pub fn parse_long_jump_table(
    view: &ImageView,
    table_rva: u32,
    count: u64,
    guard_flags: u32,
) -> Vec<LongJumpEntry> {
    let extra = guard_table_stride_extra(guard_flags);
    walk_guard_table(view, table_rva, count, extra)
        .into_iter()
        .map(|(rva, _)| LongJumpEntry { rva })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gfids_entry_classifies_export_suppressed() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&0xFE2A0u32.to_le_bytes());
        bytes[4] = 2; // ExportSuppressed
        let view = ImageView::new(&bytes, &[]);
        let entries = parse_gfids_table(&view, 0, 1, 0x1000_0000, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].flags, GfidsFlag::ExportSuppressed);
        assert_eq!(entries[0].description, None);
    }

    #[test]
    fn gfids_entry_resolves_export_suppressed_description() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&0xFE2A0u32.to_le_bytes());
        bytes[4] = 2; // ExportSuppressed
        let view = ImageView::new(&bytes, &[]);
        let exports = ExportTable {
            name: "KernelBase.dll".into(),
            base: 1,
            time_date_stamp: 0,
            functions: vec![crate::exports::ExportFunction {
                ordinal: 1,
                rva: 0xFE2A0,
                name: Some("GetCalendarInfoEx".into()),
                forwarder: None,
            }],
        };
        let entries = parse_gfids_table(&view, 0, 1, 0x1000_0000, Some(&exports));
        assert_eq!(entries[0].description.as_deref(), Some("GetCalendarInfoEx"));
    }

    #[test]
    fn gfids_entry_plain_flag_skips_export_lookup() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        bytes[4] = 0; // None
        let view = ImageView::new(&bytes, &[]);
        let exports = ExportTable {
            name: "foo.dll".into(),
            base: 1,
            time_date_stamp: 0,
            functions: vec![crate::exports::ExportFunction {
                ordinal: 1,
                rva: 0x1000,
                name: Some("Foo".into()),
                forwarder: None,
            }],
        };
        let entries = parse_gfids_table(&view, 0, 1, 0x1000_0000, Some(&exports));
        assert_eq!(entries[0].description, None);
    }

    #[test]
    fn cfg_iat_resolves_through_imports() {
        let bytes = vec![0u8; 64];
        let view = ImageView::new(&bytes, &[]);
        let imports = vec![ImportModule {
            name: "ntdll.dll".into(),
            time_date_stamp: 0,
            forwarder_chain: 0,
            original_first_thunk: 0,
            first_thunk: 0,
            functions: vec![crate::imports::descriptor::ImportFunction {
                name: "#8".into(),
                hint: 0,
                by_ordinal: true,
                ordinal: 8,
                original_thunk_value: 0x8000_0008,
                thunk_value: 0x8000_0008,
                thunk_rva: 0,
                original_thunk_rva: 0,
            }],
        }];
        let entries = parse_cfg_iat_table(&view, 0, 1, 0, &imports);
        assert_eq!(entries[0].description.as_deref(), Some("ntdll.dll!#8"));
    }
}
