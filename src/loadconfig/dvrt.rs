//! Dynamic Value Relocation Table: per-image retpoline patching metadata
//! (spec §3 "DVRT", §4.6 step 2). Located at `.reloc`'s section base plus
//! `DynamicValueRelocTableOffset`; only format version 1 is defined.

use byteorder::{ByteOrder, LittleEndian};

use crate::headers::section::Section;
use crate::image::ImageView;

const BLOCK_HEADER_SIZE: usize = 8;
const MAX_ENTRIES: usize = 4096;
const MAX_BLOCKS_PER_ENTRY: usize = 4096;
const MAX_RECORDS_PER_BLOCK: usize = 0x10000;

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DvrtHeader {
    pub version: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub enum FixupRecord {
    ImportControlTransfer {
        page_relative_offset: u16,
        indirect_call: bool,
        iat_index: u32,
    },
    IndirectControlTransfer {
        page_relative_offset: u16,
        indirect_call: bool,
        rex_w_prefix: bool,
        cfg_check: bool,
    },
    SwitchableBranch {
        page_relative_offset: u16,
        register_number: u8,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RelocBlock {
    pub virtual_address: u32,
    pub size_of_block: u32,
    pub records: Vec<FixupRecord>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DvrtEntry {
    pub symbol: u64,
    pub base_reloc_size: u32,
    pub blocks: Vec<RelocBlock>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Dvrt {
    pub header: DvrtHeader,
    pub entries: Vec<DvrtEntry>,
}

fn decode_record(symbol: u64, bytes: &[u8]) -> Option<(FixupRecord, usize)> {
    match symbol {
        3 if bytes.len() >= 4 => {
            let raw = LittleEndian::read_u32(&bytes[0..4]);
            if raw == 0 {
                return Some((
                    FixupRecord::ImportControlTransfer {
                        page_relative_offset: 0,
                        indirect_call: false,
                        iat_index: 0,
                    },
                    4,
                ));
            }
            let page_relative_offset = (raw & 0xFFF) as u16;
            let indirect_call = (raw >> 12) & 1 != 0;
            let iat_index = raw >> 13;
            Some((
                FixupRecord::ImportControlTransfer {
                    page_relative_offset,
                    indirect_call,
                    iat_index,
                },
                4,
            ))
        }
        4 if bytes.len() >= 2 => {
            let raw = LittleEndian::read_u16(&bytes[0..2]);
            let page_relative_offset = raw & 0xFFF;
            let indirect_call = (raw >> 12) & 1 != 0;
            let rex_w_prefix = (raw >> 13) & 1 != 0;
            let cfg_check = (raw >> 14) & 1 != 0;
            Some((
                FixupRecord::IndirectControlTransfer {
                    page_relative_offset,
                    indirect_call,
                    rex_w_prefix,
                    cfg_check,
                },
                2,
            ))
        }
        5 if bytes.len() >= 2 => {
            let raw = LittleEndian::read_u16(&bytes[0..2]);
            let page_relative_offset = raw & 0xFFF;
            let register_number = ((raw >> 12) & 0xF) as u8;
            Some((
                FixupRecord::SwitchableBranch {
                    page_relative_offset,
                    register_number,
                },
                2,
            ))
        }
        _ => None,
    }
}

fn record_stride(symbol: u64) -> usize {
    match symbol {
        3 => 4,
        4 | 5 => 2,
        _ => 0,
    }
}

fn parse_blocks(view: &ImageView, start_offset: u64, total_len: u32, symbol: u64) -> Vec<RelocBlock> {
    let mut blocks = Vec::new();
    let mut consumed = 0u32;
    let stride = record_stride(symbol);
    if stride == 0 {
        return blocks;
    }

    for _ in 0..MAX_BLOCKS_PER_ENTRY {
        if consumed >= total_len {
            break;
        }
        let Ok(header) = view.read_bytes(start_offset + consumed as u64, BLOCK_HEADER_SIZE) else {
            break;
        };
        let virtual_address = LittleEndian::read_u32(&header[0..4]);
        let size_of_block = LittleEndian::read_u32(&header[4..8]);
        if size_of_block < BLOCK_HEADER_SIZE as u32 {
            break;
        }

        let records_len = size_of_block - BLOCK_HEADER_SIZE as u32;
        let record_count = (records_len as usize / stride).min(MAX_RECORDS_PER_BLOCK);
        let mut records = Vec::with_capacity(record_count);
        let records_offset = start_offset + consumed as u64 + BLOCK_HEADER_SIZE as u64;
        for i in 0..record_count {
            let Ok(record_bytes) = view.read_bytes(records_offset + (i * stride) as u64, stride) else {
                break;
            };
            if let Some((record, _)) = decode_record(symbol, record_bytes) {
                let is_padding = record_bytes.iter().all(|&b| b == 0);
                if !is_padding {
                    records.push(record);
                }
            }
        }

        blocks.push(RelocBlock {
            virtual_address,
            size_of_block,
            records,
        });
        consumed += size_of_block;
    }

    blocks
}

/// Parse the DVRT located at `.reloc`'s raw base plus
/// `DynamicValueRelocTableOffset`. Returns `None` if there is no
/// `.reloc` section or the offset does not translate.
pub fn parse_dvrt(
    view: &ImageView,
    sections: &[Section],
    table_offset: u32,
    is_64: bool,
) -> Option<Dvrt> {
    let reloc_section = sections.iter().find(|s| s.header.name == ".reloc")?;
    let base_rva = reloc_section.header.virtual_address + table_offset;
    let offset = view.offset_from_rva(base_rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }

    let header_bytes = view.read_bytes(offset as u64, 8).ok()?;
    let header = DvrtHeader {
        version: LittleEndian::read_u32(&header_bytes[0..4]),
        size: LittleEndian::read_u32(&header_bytes[4..8]),
    };
    log::debug!("DVRT header at rva {base_rva:#x}: version {}, size {:#x}", header.version, header.size);

    if header.version != 1 {
        return Some(Dvrt {
            header,
            entries: Vec::new(),
        });
    }

    let entry_header_size: u32 = if is_64 { 12 } else { 8 };
    let mut cursor = offset as u64 + 8;
    let table_end = offset as u64 + 8 + header.size as u64;
    let mut entries = Vec::new();

    for _ in 0..MAX_ENTRIES {
        if cursor >= table_end {
            break;
        }
        let Ok(entry_header) = view.read_bytes(cursor, entry_header_size as usize) else {
            break;
        };
        let symbol = if is_64 {
            LittleEndian::read_u64(&entry_header[0..8])
        } else {
            LittleEndian::read_u32(&entry_header[0..4]) as u64
        };
        let base_reloc_size = if is_64 {
            LittleEndian::read_u32(&entry_header[8..12])
        } else {
            LittleEndian::read_u32(&entry_header[4..8])
        };

        let blocks_offset = cursor + entry_header_size as u64;
        let blocks = parse_blocks(view, blocks_offset, base_reloc_size, symbol);

        entries.push(DvrtEntry {
            symbol,
            base_reloc_size,
            blocks,
        });

        cursor = blocks_offset + base_reloc_size as u64;
    }

    Some(Dvrt { header, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::section::{SectionFlags, SectionHeader};

    fn reloc_section() -> Vec<Section> {
        vec![Section::new(SectionHeader {
            name: ".reloc".into(),
            virtual_size: 0x1000,
            virtual_address: 0x5000,
            size_of_raw_data: 0x1000,
            pointer_to_raw_data: 0x1800,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::empty(),
        })]
    }

    #[test]
    fn decodes_one_entry_one_block_import_control_transfer() {
        let mut bytes = vec![0u8; 0x2800];
        let sections = reloc_section();
        let table_off = 0x1800usize; // offset for rva 0x5000
        bytes[table_off..table_off + 4].copy_from_slice(&1u32.to_le_bytes()); // version
        bytes[table_off + 4..table_off + 8].copy_from_slice(&0x14u32.to_le_bytes()); // size

        let entry_off = table_off + 8;
        bytes[entry_off..entry_off + 4].copy_from_slice(&3u32.to_le_bytes()); // symbol
        bytes[entry_off + 4..entry_off + 8].copy_from_slice(&0xCu32.to_le_bytes()); // base reloc size

        let block_off = entry_off + 8;
        bytes[block_off..block_off + 4].copy_from_slice(&0x2000u32.to_le_bytes()); // VA
        bytes[block_off + 4..block_off + 8].copy_from_slice(&0xCu32.to_le_bytes()); // size of block
        // one 4-byte record: PageRelativeOffset=0x611, IndirectCall=0, IATIndex=0x28
        let raw: u32 = 0x611 | (0 << 12) | (0x28 << 13);
        bytes[block_off + 8..block_off + 12].copy_from_slice(&raw.to_le_bytes());

        let view = ImageView::new(&bytes, &sections);
        let dvrt = parse_dvrt(&view, &sections, 0, false).unwrap();
        assert_eq!(dvrt.header.version, 1);
        assert_eq!(dvrt.entries.len(), 1);
        assert_eq!(dvrt.entries[0].symbol, 3);
        assert_eq!(dvrt.entries[0].blocks.len(), 1);
        assert_eq!(dvrt.entries[0].blocks[0].records.len(), 1);
        match dvrt.entries[0].blocks[0].records[0] {
            FixupRecord::ImportControlTransfer {
                page_relative_offset,
                indirect_call,
                iat_index,
            } => {
                assert_eq!(page_relative_offset, 0x611);
                assert!(!indirect_call);
                assert_eq!(iat_index, 0x28);
            }
            _ => panic!("wrong record variant"),
        }
    }
}
