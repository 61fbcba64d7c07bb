//! Volatile metadata: access and info-range tables describing memory the
//! loader must treat as volatile across snapshots (spec §4.6 step 2
//! "Volatile metadata").

use byteorder::{ByteOrder, LittleEndian};

use crate::image::ImageView;

const HEADER_SIZE: usize = 24;
const MAX_ENTRIES: usize = 0x10000;

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct VolatileMetadataHeader {
    pub size: u32,
    pub version: u32,
    pub volatile_access_table_rva: u32,
    pub volatile_access_table_size: u32,
    pub volatile_info_range_table_rva: u32,
    pub volatile_info_range_table_size: u32,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InfoRangeEntry {
    pub rva: u32,
    pub size: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct VolatileMetadata {
    pub header: VolatileMetadataHeader,
    pub access_table: Vec<u32>,
    pub info_range_table: Vec<InfoRangeEntry>,
}

pub fn parse_volatile_metadata(view: &ImageView, metadata_rva: u32) -> Option<VolatileMetadata> {
    let offset = view.offset_from_rva(metadata_rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }
    let bytes = view.read_bytes(offset as u64, HEADER_SIZE).ok()?;
    let header = VolatileMetadataHeader {
        size: LittleEndian::read_u32(&bytes[0..4]),
        version: LittleEndian::read_u32(&bytes[4..8]),
        volatile_access_table_rva: LittleEndian::read_u32(&bytes[8..12]),
        volatile_access_table_size: LittleEndian::read_u32(&bytes[12..16]),
        volatile_info_range_table_rva: LittleEndian::read_u32(&bytes[16..20]),
        volatile_info_range_table_size: LittleEndian::read_u32(&bytes[20..24]),
    };

    let mut access_table = Vec::new();
    let access_count = (header.volatile_access_table_size as usize / 4).min(MAX_ENTRIES);
    for i in 0..access_count {
        let rva = header.volatile_access_table_rva + (i as u32) * 4;
        match view.read_u32_at_rva(rva) {
            Ok(value) => access_table.push(value),
            Err(_) => break,
        }
    }

    let mut info_range_table = Vec::new();
    let range_count = (header.volatile_info_range_table_size as usize / 8).min(MAX_ENTRIES);
    for i in 0..range_count {
        let entry_rva = header.volatile_info_range_table_rva + (i as u32) * 8;
        let entry_offset = view.offset_from_rva(entry_rva);
        if entry_offset == crate::image::INVALID_OFFSET {
            break;
        }
        let Ok(entry_bytes) = view.read_bytes(entry_offset as u64, 8) else {
            break;
        };
        info_range_table.push(InfoRangeEntry {
            rva: LittleEndian::read_u32(&entry_bytes[0..4]),
            size: LittleEndian::read_u32(&entry_bytes[4..8]),
        });
    }

    Some(VolatileMetadata {
        header,
        access_table,
        info_range_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_access_and_info_range_tables() {
        let mut bytes = vec![0u8; 0x100];
        bytes[0..4].copy_from_slice(&24u32.to_le_bytes()); // size
        bytes[8..12].copy_from_slice(&0x40u32.to_le_bytes()); // access table rva
        bytes[12..16].copy_from_slice(&8u32.to_le_bytes()); // access table size (2 entries)
        bytes[16..20].copy_from_slice(&0x60u32.to_le_bytes()); // info range rva
        bytes[20..24].copy_from_slice(&16u32.to_le_bytes()); // info range size (2 entries)

        bytes[0x40..0x44].copy_from_slice(&0x1000u32.to_le_bytes());
        bytes[0x44..0x48].copy_from_slice(&0x1010u32.to_le_bytes());
        bytes[0x60..0x64].copy_from_slice(&0x2000u32.to_le_bytes());
        bytes[0x64..0x68].copy_from_slice(&0x40u32.to_le_bytes());

        let view = ImageView::new(&bytes, &[]);
        let meta = parse_volatile_metadata(&view, 0).unwrap();
        assert_eq!(meta.access_table, vec![0x1000, 0x1010]);
        assert_eq!(meta.info_range_table[0].rva, 0x2000);
        assert_eq!(meta.info_range_table[0].size, 0x40);
    }
}
