//! VBS/SGX-style enclave configuration: identity plus an allowed-imports
//! array (spec §3 "Bound import descriptor..." — see "Enclave", §4.6 step
//! 2 "Enclave configuration").

use byteorder::{ByteOrder, LittleEndian};

use crate::image::ImageView;

const MAX_IMPORTS: usize = 4096;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EnclaveConfig {
    pub size: u32,
    pub minimum_required_config_size: u32,
    pub policy_flags: u32,
    pub number_of_imports: u32,
    pub import_list_rva: u32,
    pub import_entry_size: u32,
    pub family_id: [u8; 16],
    pub image_id: [u8; 16],
    pub image_version: u32,
    pub security_version: u32,
    pub enclave_size: u64,
    pub number_of_threads: u32,
    pub enclave_flags: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EnclaveImport {
    pub match_type: u32,
    pub minimum_enclave_import_version: u32,
    pub import_name: String,
    pub reserved: u32,
}

/// Decode the widest known enclave config layout from a zero-padded
/// buffer, the same compatibility contract load-config uses for its own
/// header (spec §4.6 step 1).
pub fn parse_enclave_config(view: &ImageView, config_rva: u32, is_64: bool) -> Option<EnclaveConfig> {
    let offset = view.offset_from_rva(config_rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }
    let size = view.read_u32(offset as u64).ok()?;
    const WIDEST: usize = 0x80;
    let available = view.len().saturating_sub(offset as usize).min(WIDEST);
    let mut buf = vec![0u8; WIDEST];
    let copy_len = (size as usize).min(available).min(WIDEST);
    if copy_len > 0 {
        if let Ok(bytes) = view.read_bytes(offset as u64, copy_len) {
            buf[..copy_len].copy_from_slice(bytes);
        }
    }

    let ptr = |off: usize| -> u64 {
        if is_64 {
            LittleEndian::read_u64(&buf[off..off + 8])
        } else {
            LittleEndian::read_u32(&buf[off..off + 4]) as u64
        }
    };
    let ptr_width = if is_64 { 8 } else { 4 };

    let minimum_required_config_size = LittleEndian::read_u32(&buf[4..8]);
    let policy_flags = LittleEndian::read_u32(&buf[8..12]);
    let number_of_imports = LittleEndian::read_u32(&buf[12..16]);
    let import_list_rva = LittleEndian::read_u32(&buf[16..20]);
    let import_entry_size = LittleEndian::read_u32(&buf[20..24]);

    let mut family_id = [0u8; 16];
    family_id.copy_from_slice(&buf[24..40]);
    let mut image_id = [0u8; 16];
    image_id.copy_from_slice(&buf[40..56]);

    let image_version = LittleEndian::read_u32(&buf[56..60]);
    let security_version = LittleEndian::read_u32(&buf[60..64]);
    let enclave_size_off = 64;
    let enclave_size = ptr(enclave_size_off);
    let number_of_threads = LittleEndian::read_u32(&buf[enclave_size_off + ptr_width..enclave_size_off + ptr_width + 4]);
    let enclave_flags = LittleEndian::read_u32(
        &buf[enclave_size_off + ptr_width + 4..enclave_size_off + ptr_width + 8],
    );

    Some(EnclaveConfig {
        size,
        minimum_required_config_size,
        policy_flags,
        number_of_imports,
        import_list_rva,
        import_entry_size,
        family_id,
        image_id,
        image_version,
        security_version,
        enclave_size,
        number_of_threads,
        enclave_flags,
    })
}

pub fn parse_enclave_imports(view: &ImageView, config: &EnclaveConfig) -> Vec<EnclaveImport> {
    let mut imports = Vec::new();
    if config.import_entry_size == 0 || config.import_list_rva == 0 {
        return imports;
    }
    let count = (config.number_of_imports as usize).min(MAX_IMPORTS);
    for i in 0..count {
        let entry_rva = config.import_list_rva + (i as u32) * config.import_entry_size;
        let offset = view.offset_from_rva(entry_rva);
        if offset == crate::image::INVALID_OFFSET {
            break;
        }
        let Ok(bytes) = view.read_bytes(offset as u64, 16.min(config.import_entry_size as usize)) else {
            break;
        };
        if bytes.len() < 16 {
            break;
        }
        let match_type = LittleEndian::read_u32(&bytes[0..4]);
        let minimum_enclave_import_version = LittleEndian::read_u32(&bytes[4..8]);
        let import_name_rva = LittleEndian::read_u32(&bytes[8..12]);
        let reserved = LittleEndian::read_u32(&bytes[12..16]);
        let import_name = view.get_string_at_rva(import_name_rva, 256);

        imports.push(EnclaveImport {
            match_type,
            minimum_enclave_import_version,
            import_name,
            reserved,
        });
    }
    imports
}
