//! Thunk (ILT/IAT entry) parsing shared by imports, delay-imports, and the
//! CFG sub-tables in load-config (spec §4.3, §9 "pointer/thunk-value
//! duality" design note).
//!
//! A thunk is a pointer-width value whose high bit switches it between an
//! ordinal import and the RVA of an `IMAGE_IMPORT_BY_NAME` record. Rather
//! than pass the raw integer around and re-derive the high-bit test at
//! every call site, every consumer goes through [`ThunkValue`].

use crate::anomalies::{self, Anomalies};
use crate::image::ImageView;

/// Thunk table entries stop being trusted past this many repeats of the
/// same address-of-data (spec §4.3).
const MAX_REPEATED_ENTRIES: usize = 15;
/// Spread beyond which addresses-of-data are considered implausible for a
/// single module's import table (spec §4.3: "128 MiB").
const MAX_ADDRESS_SPREAD: u32 = 0x0800_0000;
/// Hard ceiling on thunk-table iteration when no terminator is found,
/// independent of the `maxLen` boundary computed from file layout.
const MAX_THUNK_ENTRIES: usize = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThunkValue {
    Ordinal(u16),
    /// RVA of an `IMAGE_IMPORT_BY_NAME` record (hint + name).
    NameAddress(u32),
}

impl ThunkValue {
    pub fn decode(raw: u64, is_64: bool) -> ThunkValue {
        let ordinal_bit = if is_64 {
            raw & 0x8000_0000_0000_0000 != 0
        } else {
            raw & 0x8000_0000 != 0
        };
        if ordinal_bit {
            ThunkValue::Ordinal((raw & 0xFFFF) as u16)
        } else {
            let mask = if is_64 {
                0x7FFF_FFFF_FFFF_FFFF
            } else {
                0x7FFF_FFFF
            };
            ThunkValue::NameAddress((raw & mask) as u32)
        }
    }

    pub fn is_ordinal(&self) -> bool {
        matches!(self, ThunkValue::Ordinal(_))
    }
}

/// One raw thunk table entry: its pointer-width value, decoded
/// interpretation, and the RVA at which the entry itself lives (so
/// callers can populate `ThunkRVA`/`OriginalThunkRVA`).
#[derive(Debug, Clone, Copy)]
pub struct ThunkEntry {
    pub raw: u64,
    pub value: ThunkValue,
    pub entry_rva: u32,
}

/// Read successive pointer-width thunks at `table_rva` until a zero entry,
/// `max_entries`, or a detected anomaly. Returns an empty vec for a
/// `table_rva` of zero (no such table) or one that fails to translate.
pub fn walk_thunk_table(
    view: &ImageView,
    table_rva: u32,
    is_64: bool,
    max_entries: usize,
    anomalies: &mut Anomalies,
) -> Vec<ThunkEntry> {
    if table_rva == 0 {
        return Vec::new();
    }
    let entry_width: u32 = if is_64 { 8 } else { 4 };
    let cap = max_entries.min(MAX_THUNK_ENTRIES);

    let mut entries = Vec::new();
    let mut min_addr = u32::MAX;
    let mut max_addr = 0u32;
    let mut repeat_counts: std::collections::HashMap<u32, usize> =
        std::collections::HashMap::new();

    for i in 0..cap {
        let entry_rva = table_rva + (i as u32) * entry_width;
        let offset = view.offset_from_rva(entry_rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let raw = if is_64 {
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
        if raw == 0 {
            break;
        }

        let value = ThunkValue::decode(raw, is_64);

        if let ThunkValue::NameAddress(addr) = value {
            // Self-reference: the named-import record would live inside
            // the thunk table range we are still walking.
            let table_end = table_rva + ((i + 1) as u32) * entry_width;
            if addr >= table_rva && addr < table_end {
                break;
            }

            min_addr = min_addr.min(addr);
            max_addr = max_addr.max(addr);
            *repeat_counts.entry(addr).or_insert(0) += 1;
        }

        if let ThunkValue::Ordinal(_) = value {
            if raw & 0x7FFF_0000 != 0 {
                anomalies.push(anomalies::ADDRESS_BEYOND_LIMITS);
            }
        }

        entries.push(ThunkEntry {
            raw,
            value,
            entry_rva,
        });
    }

    if !entries.is_empty() && max_addr.saturating_sub(min_addr) > MAX_ADDRESS_SPREAD {
        anomalies.push(anomalies::THUNK_SPREAD);
    }
    if repeat_counts.values().any(|&count| count >= MAX_REPEATED_ENTRIES) {
        anomalies.push(anomalies::MANY_REPEATED_ENTRIES);
    }

    entries
}

/// Upper bound on the number of thunk entries that can legitimately
/// follow `table_rva`, derived from how far the RVA is from the end of
/// the image (spec §4.3 `maxLen`). Bounds iteration for files that omit
/// the zero terminator rather than trusting an unbounded loop.
pub fn max_thunk_entries(view: &ImageView, table_rva: u32, entry_width: u32) -> usize {
    let offset = view.offset_from_rva(table_rva);
    if offset == crate::image::INVALID_OFFSET {
        return 0;
    }
    let remaining = view.len().saturating_sub(offset as usize);
    (remaining / entry_width as usize).min(MAX_THUNK_ENTRIES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{Section, SectionFlags, SectionHeader};

    fn flat_sections() -> Vec<Section> {
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
    fn decodes_ordinal_and_name_forms() {
        assert_eq!(
            ThunkValue::decode(0x8000_0000 | 7, false),
            ThunkValue::Ordinal(7)
        );
        assert_eq!(
            ThunkValue::decode(0x0000_1234, false),
            ThunkValue::NameAddress(0x1234)
        );
        assert_eq!(
            ThunkValue::decode(0x8000_0000_0000_0000 | 3, true),
            ThunkValue::Ordinal(3)
        );
    }

    #[test]
    fn stops_at_zero_terminator() {
        let mut bytes = vec![0u8; 0x1400];
        bytes[0x400..0x404].copy_from_slice(&0x2000u32.to_le_bytes());
        // next entry left zero -> terminator
        let sections = flat_sections();
        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::default();
        let entries = walk_thunk_table(&view, 0x1000, false, 100, &mut anomalies);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn detects_self_reference_cycle() {
        let mut bytes = vec![0u8; 0x1400];
        // entry at table start points back into the table itself
        bytes[0x400..0x404].copy_from_slice(&0x1000u32.to_le_bytes());
        let sections = flat_sections();
        let view = ImageView::new(&bytes, &sections);
        let mut anomalies = Anomalies::default();
        let entries = walk_thunk_table(&view, 0x1000, false, 100, &mut anomalies);
        assert!(entries.is_empty());
    }
}
