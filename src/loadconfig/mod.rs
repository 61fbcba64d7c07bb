//! Load Configuration directory: the most schema-variant structure in
//! the format (spec §4.6). A binary's self-reported `Size` field governs
//! how many of the widest known struct's trailing fields are real; this
//! crate always decodes the widest struct from a zero-padded buffer
//! rather than chasing per-version offset tables (spec §9 "version-variant
//! structs without reflection").

pub mod cfg;
pub mod chpe;
pub mod dvrt;
pub mod enclave;
pub mod seh;
pub mod volatile;

use byteorder::{ByteOrder, LittleEndian};

use crate::anomalies::Anomalies;
use crate::exports::ExportTable;
use crate::headers::section::Section;
use crate::image::ImageView;
use crate::imports::descriptor::ImportModule;

use cfg::{CfgIatEntry, GfidsEntry, LongJumpEntry};
use chpe::ChpeMetadata;
use dvrt::Dvrt;
use enclave::{EnclaveConfig, EnclaveImport};
use volatile::VolatileMetadata;

/// Generous upper bound on the widest struct across every documented
/// version; fields beyond what a given binary actually carries simply
/// read back as zero from the zero-padded buffer.
const BUFFER_LEN: usize = 600;

struct FieldCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    is_64: bool,
}

impl<'a> FieldCursor<'a> {
    fn new(buf: &'a [u8], is_64: bool) -> FieldCursor<'a> {
        FieldCursor { buf, pos: 0, is_64 }
    }

    fn u16(&mut self) -> u16 {
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        v
    }

    /// A pointer-width field (4 bytes on PE32, 8 on PE32+), always
    /// widened to `u64` for storage.
    fn addr(&mut self) -> u64 {
        let v = if self.is_64 {
            LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8])
        } else {
            LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]) as u64
        };
        self.pos += if self.is_64 { 8 } else { 4 };
        v
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadConfigHeader {
    pub size: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub global_flags_clear: u32,
    pub global_flags_set: u32,
    pub critical_section_default_timeout: u32,
    pub decommit_free_block_threshold: u64,
    pub decommit_total_free_threshold: u64,
    pub lock_prefix_table: u64,
    pub maximum_allocation_size: u64,
    pub virtual_memory_threshold: u64,
    pub process_affinity_mask: u64,
    pub process_heap_flags: u32,
    pub csd_version: u16,
    /// Spec-documented as "must be zero"; real binaries populate it
    /// (e.g. KernelBase.dll uses `0x800`). Preserved unvalidated (spec §9
    /// open question 1).
    pub dependent_load_flags: u16,
    pub edit_list: u64,
    pub security_cookie: u64,
    pub se_handler_table: u64,
    pub se_handler_count: u64,
    pub guard_cf_check_function_pointer: u64,
    pub guard_cf_dispatch_function_pointer: u64,
    pub guard_cf_function_table: u64,
    pub guard_cf_function_count: u64,
    pub guard_flags: u32,
    pub code_integrity_flags: u16,
    pub code_integrity_catalog: u16,
    pub code_integrity_catalog_offset: u32,
    pub guard_address_taken_iat_entry_table: u64,
    pub guard_address_taken_iat_entry_count: u64,
    pub guard_long_jump_target_table: u64,
    pub guard_long_jump_target_count: u64,
    pub dynamic_value_reloc_table: u64,
    pub chpe_metadata_pointer: u64,
    pub guard_rf_failure_routine: u64,
    pub guard_rf_failure_routine_function_pointer: u64,
    pub dynamic_value_reloc_table_offset: u32,
    pub dynamic_value_reloc_table_section: u16,
    pub guard_rf_verify_stack_pointer_function_pointer: u64,
    pub hot_patch_table_offset: u32,
    pub enclave_configuration_pointer: u64,
    pub volatile_metadata_pointer: u64,
    pub guard_eh_continuation_table: u64,
    pub guard_eh_continuation_count: u64,
    pub guard_xfg_check_function_pointer: u64,
    pub guard_xfg_dispatch_function_pointer: u64,
    pub guard_xfg_table_dispatch_function_pointer: u64,
    pub cast_guard_os_determined_failure_mode: u64,
    pub guard_memcpy_function_pointer: u64,
}

impl LoadConfigHeader {
    fn decode(buf: &[u8], is_64: bool) -> LoadConfigHeader {
        let mut c = FieldCursor::new(buf, is_64);
        LoadConfigHeader {
            size: c.u32(),
            time_date_stamp: c.u32(),
            major_version: c.u16(),
            minor_version: c.u16(),
            global_flags_clear: c.u32(),
            global_flags_set: c.u32(),
            critical_section_default_timeout: c.u32(),
            decommit_free_block_threshold: c.addr(),
            decommit_total_free_threshold: c.addr(),
            lock_prefix_table: c.addr(),
            maximum_allocation_size: c.addr(),
            virtual_memory_threshold: c.addr(),
            process_affinity_mask: c.addr(),
            process_heap_flags: c.u32(),
            csd_version: c.u16(),
            dependent_load_flags: c.u16(),
            edit_list: c.addr(),
            security_cookie: c.addr(),
            se_handler_table: c.addr(),
            se_handler_count: c.addr(),
            guard_cf_check_function_pointer: c.addr(),
            guard_cf_dispatch_function_pointer: c.addr(),
            guard_cf_function_table: c.addr(),
            guard_cf_function_count: c.addr(),
            guard_flags: c.u32(),
            code_integrity_flags: c.u16(),
            code_integrity_catalog: c.u16(),
            code_integrity_catalog_offset: {
                let v = c.u32();
                let _reserved = c.u32();
                v
            },
            guard_address_taken_iat_entry_table: c.addr(),
            guard_address_taken_iat_entry_count: c.addr(),
            guard_long_jump_target_table: c.addr(),
            guard_long_jump_target_count: c.addr(),
            dynamic_value_reloc_table: c.addr(),
            chpe_metadata_pointer: c.addr(),
            guard_rf_failure_routine: c.addr(),
            guard_rf_failure_routine_function_pointer: c.addr(),
            dynamic_value_reloc_table_offset: c.u32(),
            dynamic_value_reloc_table_section: {
                let v = c.u16();
                let _reserved2 = c.u16();
                v
            },
            guard_rf_verify_stack_pointer_function_pointer: c.addr(),
            hot_patch_table_offset: {
                let v = c.u32();
                let _reserved3 = c.u32();
                v
            },
            enclave_configuration_pointer: c.addr(),
            volatile_metadata_pointer: c.addr(),
            guard_eh_continuation_table: c.addr(),
            guard_eh_continuation_count: c.addr(),
            guard_xfg_check_function_pointer: c.addr(),
            guard_xfg_dispatch_function_pointer: c.addr(),
            guard_xfg_table_dispatch_function_pointer: c.addr(),
            cast_guard_os_determined_failure_mode: c.addr(),
            guard_memcpy_function_pointer: c.addr(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadConfig {
    pub header: LoadConfigHeader,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seh: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gfids: Vec<GfidsEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cfg_iat: Vec<CfgIatEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cfg_long_jump: Vec<LongJumpEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chpe: Option<ChpeMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dvrt: Option<Dvrt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclave_config: Option<EnclaveConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enclave_imports: Vec<EnclaveImport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatile_metadata: Option<VolatileMetadata>,
}

fn va_to_rva(va: u64, image_base: u64) -> u32 {
    va.wrapping_sub(image_base) as u32
}

/// Parse the Load Configuration directory in full: the version-dependent
/// header plus every sub-table it references (spec §4.6).
#[allow(clippy::too_many_arguments)]
pub fn parse_load_config(
    view: &ImageView,
    sections: &[Section],
    directory_rva: u32,
    image_base: u64,
    is_64: bool,
    is_x86: bool,
    imports: &[ImportModule],
    exports: Option<&ExportTable>,
    anomalies: &mut Anomalies,
) -> Option<LoadConfig> {
    if directory_rva == 0 {
        return None;
    }
    let offset = view.offset_from_rva(directory_rva);
    if offset == crate::image::INVALID_OFFSET {
        return None;
    }
    let reported_size = view.read_u32(offset as u64).ok()?;
    log::debug!("load config directory at rva {directory_rva:#x}, reported size {reported_size:#x}");

    let mut buf = vec![0u8; BUFFER_LEN];
    let available = view.len().saturating_sub(offset as usize).min(BUFFER_LEN);
    let copy_len = (reported_size as usize).min(available).min(BUFFER_LEN);
    if copy_len > 0 {
        if let Ok(bytes) = view.read_bytes(offset as u64, copy_len) {
            buf[..copy_len].copy_from_slice(bytes);
        }
    }

    let header = LoadConfigHeader::decode(&buf, is_64);

    let seh = if is_x86 && header.se_handler_table != 0 && header.se_handler_count != 0 {
        seh::parse_seh_table(
            view,
            va_to_rva(header.se_handler_table, image_base),
            header.se_handler_count as u32,
        )
    } else {
        Vec::new()
    };

    let gfids = if header.guard_cf_function_table != 0 && header.guard_cf_function_count != 0 {
        cfg::parse_gfids_table(
            view,
            va_to_rva(header.guard_cf_function_table, image_base),
            header.guard_cf_function_count,
            header.guard_flags,
            exports,
        )
    } else {
        Vec::new()
    };

    let cfg_iat = if header.guard_address_taken_iat_entry_table != 0
        && header.guard_address_taken_iat_entry_count != 0
    {
        cfg::parse_cfg_iat_table(
            view,
            va_to_rva(header.guard_address_taken_iat_entry_table, image_base),
            header.guard_address_taken_iat_entry_count,
            header.guard_flags,
            imports,
        )
    } else {
        Vec::new()
    };

    let cfg_long_jump = if header.guard_long_jump_target_table != 0
        && header.guard_long_jump_target_count != 0
    {
        cfg::parse_long_jump_table(
            view,
            va_to_rva(header.guard_long_jump_target_table, image_base),
            header.guard_long_jump_target_count,
            header.guard_flags,
        )
    } else {
        Vec::new()
    };

    let chpe = if header.chpe_metadata_pointer != 0 {
        chpe::parse_chpe_metadata(view, header.chpe_metadata_pointer, image_base, imports)
    } else {
        None
    };

    let dvrt = if header.dynamic_value_reloc_table_offset != 0 {
        dvrt::parse_dvrt(view, sections, header.dynamic_value_reloc_table_offset, is_64)
    } else {
        None
    };

    let enclave_config = if header.enclave_configuration_pointer != 0 {
        enclave::parse_enclave_config(
            view,
            va_to_rva(header.enclave_configuration_pointer, image_base),
            is_64,
        )
    } else {
        None
    };
    let enclave_imports = enclave_config
        .as_ref()
        .map(|config| enclave::parse_enclave_imports(view, config))
        .unwrap_or_default();

    let volatile_metadata = if header.volatile_metadata_pointer != 0 {
        volatile::parse_volatile_metadata(
            view,
            va_to_rva(header.volatile_metadata_pointer, image_base),
        )
    } else {
        None
    };

    if header.dependent_load_flags != 0 {
        anomalies.push_detail(
            "Load config DependentLoadFlags is non-zero",
            header.dependent_load_flags,
        );
    }

    log::debug!(
        "load config directory decoded: {} seh handler(s), {} gfids, {} cfg iat entries",
        seh.len(),
        gfids.len(),
        cfg_iat.len()
    );

    Some(LoadConfig {
        header,
        seh,
        gfids,
        cfg_iat,
        cfg_long_jump,
        chpe,
        dvrt,
        enclave_config,
        enclave_imports,
        volatile_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_header_respecting_reported_size() {
        // No sections: an RVA below the buffer length maps 1:1 onto the
        // file offset (headers-region fallback in `ImageView::offset_from_rva`),
        // so the directory is placed at a non-zero RVA here rather than 0 --
        // `parse_load_config` treats RVA 0 as "no directory present".
        let directory_rva = 0x10u32;
        let header_off = directory_rva as usize;
        let mut bytes = vec![0u8; 0x200];
        bytes[header_off..header_off + 4].copy_from_slice(&0xB8u32.to_le_bytes()); // KernelBase.dll-sized header
        bytes[header_off + 8..header_off + 10].copy_from_slice(&5u16.to_le_bytes()); // major version in the truncated region
        // field beyond reported size (e.g. CHPE pointer) stays zero
        let view = ImageView::new(&bytes, &[]);
        let mut anomalies = Anomalies::new();
        let load_config =
            parse_load_config(&view, &[], directory_rva, 0, false, true, &[], None, &mut anomalies).unwrap();
        assert_eq!(load_config.header.size, 0xB8);
        assert_eq!(load_config.header.major_version, 5);
        assert_eq!(load_config.header.chpe_metadata_pointer, 0);
    }
}
