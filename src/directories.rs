//! Orchestrator: walks all 16 data-directory entries and invokes the
//! matching dissector inside a fault-isolation boundary (spec §4.2, §4.7,
//! §9 "panic isolation" design note).

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::warn;

use crate::anomalies::{self, Anomalies};
use crate::config::Config;
use crate::exports::{self, ExportTable};
use crate::headers::data_directory::{DataDirectories, DirectoryIndex, ALL_DIRECTORIES};
use crate::headers::section::Section;
use crate::image::ImageView;
use crate::imports::bound::{self, BoundImportEntry};
use crate::imports::delay::{self, DelayImportModule};
use crate::imports::descriptor::{self, ImportModule};
use crate::imports::iat::{self, IatEntry};
use crate::loadconfig::{self, LoadConfig};

/// Everything the orchestrator assembles across all directories it knows
/// how to dissect. Directories outside this crate's core scope (resource,
/// exception, certificate, base reloc, debug, TLS, CLR, COFF symbols) are
/// left to the out-of-scope collaborators named in the module overview
/// and are not represented here. The export directory is a narrow
/// exception: it is parsed solely to resolve GFIDS/CFG-IAT descriptions
/// against it, not as a first-class dump target in its own right.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Directories {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<ExportTable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportModule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bound_imports: Vec<BoundImportEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delay_imports: Vec<DelayImportModule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iat: Vec<IatEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_config: Option<LoadConfig>,
}

/// Walk data-directory indices 0..15 and populate every slot this crate
/// dissects. Per-directory failures are caught, logged, and recorded as
/// a `faulted` count rather than aborting the whole parse (spec §4.2).
#[allow(clippy::too_many_arguments)]
pub fn parse_directories(
    view: &ImageView,
    sections: &[Section],
    data_directories: &DataDirectories,
    image_base: u64,
    is_64: bool,
    is_x86: bool,
    config: &Config,
    anomalies: &mut Anomalies,
) -> (Directories, usize) {
    let mut directories = Directories::default();
    let mut faulted = 0usize;

    if config.fast {
        return (directories, faulted);
    }

    for &index in ALL_DIRECTORIES.iter() {
        let entry = data_directories.get(index);

        if config.is_omitted(index) {
            continue;
        }

        if index == DirectoryIndex::Reserved {
            if entry.virtual_address != 0 || entry.size != 0 {
                anomalies.push(anomalies::RESERVED_DIRECTORY_NONZERO);
            }
            continue;
        }

        if !entry.is_present() {
            continue;
        }

        match index {
            DirectoryIndex::Export => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    exports::parse_export_directory(view, entry.virtual_address, entry.size)
                }));
                match result {
                    Ok(parsed) => directories.exports = parsed,
                    Err(_) => {
                        warn!("export directory dissector panicked");
                        faulted += 1;
                    }
                }
            }
            DirectoryIndex::Import => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let mut local_anomalies = Anomalies::new();
                    let parsed =
                        descriptor::parse_import_directory(view, entry.virtual_address, is_64, &mut local_anomalies);
                    (parsed, local_anomalies)
                }));
                match result {
                    Ok((Ok(modules), local_anomalies)) => {
                        directories.imports = modules;
                        anomalies.merge(local_anomalies);
                    }
                    Ok((Err(err), local_anomalies)) => {
                        warn!("import directory: {err}");
                        anomalies.merge(local_anomalies);
                        faulted += 1;
                    }
                    Err(_) => {
                        warn!("import directory dissector panicked");
                        faulted += 1;
                    }
                }
            }
            DirectoryIndex::BoundImport => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    bound::parse_bound_import_directory(view, entry.virtual_address)
                }));
                match result {
                    Ok(entries) => directories.bound_imports = entries,
                    Err(_) => {
                        warn!("bound import directory dissector panicked");
                        faulted += 1;
                    }
                }
            }
            DirectoryIndex::DelayImport => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let mut local_anomalies = Anomalies::new();
                    let parsed = delay::parse_delay_import_directory(
                        view,
                        entry.virtual_address,
                        image_base,
                        is_64,
                        &mut local_anomalies,
                    );
                    (parsed, local_anomalies)
                }));
                match result {
                    Ok((modules, local_anomalies)) => {
                        directories.delay_imports = modules;
                        anomalies.merge(local_anomalies);
                    }
                    Err(_) => {
                        warn!("delay import directory dissector panicked");
                        faulted += 1;
                    }
                }
            }
            DirectoryIndex::Iat => {
                // Resolved after imports/delay-imports so reverse-lookup
                // has something to match against; handled below the
                // match once both have been populated.
            }
            DirectoryIndex::LoadConfig => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let mut local_anomalies = Anomalies::new();
                    let parsed = loadconfig::parse_load_config(
                        view,
                        sections,
                        entry.virtual_address,
                        image_base,
                        is_64,
                        is_x86,
                        &directories.imports,
                        directories.exports.as_ref(),
                        &mut local_anomalies,
                    );
                    (parsed, local_anomalies)
                }));
                match result {
                    Ok((parsed, local_anomalies)) => {
                        directories.load_config = parsed;
                        anomalies.merge(local_anomalies);
                    }
                    Err(_) => {
                        warn!("load config directory dissector panicked");
                        faulted += 1;
                    }
                }
            }
            // Every remaining directory is an out-of-scope collaborator
            // per the module overview (resource, exception, certificate,
            // base reloc, debug, architecture, global ptr, TLS, CLR).
            _ => {}
        }
    }

    // IAT directory depends on imports/delay-imports already being
    // populated for its reverse-lookup; run it last regardless of where
    // index 12 fell in iteration order.
    let iat_entry = data_directories.get(DirectoryIndex::Iat);
    if iat_entry.is_present() && !config.is_omitted(DirectoryIndex::Iat) && !config.fast {
        let result = catch_unwind(AssertUnwindSafe(|| {
            iat::parse_iat_directory(
                view,
                iat_entry.virtual_address,
                iat_entry.size,
                is_64,
                &directories.imports,
                &directories.delay_imports,
            )
        }));
        match result {
            Ok(entries) => directories.iat = entries,
            Err(_) => {
                warn!("IAT directory dissector panicked");
                faulted += 1;
            }
        }
    }

    (directories, faulted)
}
