//! The 16-entry data directory array at the tail of the Optional Header.

use byteorder::{ByteOrder, LittleEndian};

/// Stable index into the 16-entry data directory array (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[repr(u8)]
pub enum DirectoryIndex {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Certificate = 4,
    BaseReloc = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImport = 13,
    Clr = 14,
    Reserved = 15,
}

pub const DATA_DIRECTORY_COUNT: usize = 16;

pub const ALL_DIRECTORIES: [DirectoryIndex; DATA_DIRECTORY_COUNT] = [
    DirectoryIndex::Export,
    DirectoryIndex::Import,
    DirectoryIndex::Resource,
    DirectoryIndex::Exception,
    DirectoryIndex::Certificate,
    DirectoryIndex::BaseReloc,
    DirectoryIndex::Debug,
    DirectoryIndex::Architecture,
    DirectoryIndex::GlobalPtr,
    DirectoryIndex::Tls,
    DirectoryIndex::LoadConfig,
    DirectoryIndex::BoundImport,
    DirectoryIndex::Iat,
    DirectoryIndex::DelayImport,
    DirectoryIndex::Clr,
    DirectoryIndex::Reserved,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl ImageDataDirectory {
    pub fn from_bytes(bytes: &[u8]) -> ImageDataDirectory {
        ImageDataDirectory {
            virtual_address: LittleEndian::read_u32(&bytes[0..4]),
            size: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }
}

/// Parsed 16-entry array, in data-directory order.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DataDirectories {
    pub entries: [ImageDataDirectory; DATA_DIRECTORY_COUNT],
}

impl DataDirectories {
    pub fn from_bytes(bytes: &[u8]) -> DataDirectories {
        let mut entries = [ImageDataDirectory::default(); DATA_DIRECTORY_COUNT];
        for (i, entry) in entries.iter_mut().enumerate() {
            let offset = i * 8;
            if offset + 8 <= bytes.len() {
                *entry = ImageDataDirectory::from_bytes(&bytes[offset..offset + 8]);
            }
        }
        DataDirectories { entries }
    }

    pub fn get(&self, index: DirectoryIndex) -> ImageDataDirectory {
        self.entries[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sixteen_entries() {
        let mut raw = vec![0u8; 128];
        // Import table entry (index 1): RVA=0x2000, size=0x50
        raw[8..12].copy_from_slice(&0x2000u32.to_le_bytes());
        raw[12..16].copy_from_slice(&0x50u32.to_le_bytes());
        let dirs = DataDirectories::from_bytes(&raw);
        let import = dirs.get(DirectoryIndex::Import);
        assert_eq!(import.virtual_address, 0x2000);
        assert_eq!(import.size, 0x50);
        assert!(!dirs.get(DirectoryIndex::Export).is_present());
    }
}
