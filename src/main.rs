use clap::Parser;

use pedissect::config::Config;
use pedissect::headers::optional::Subsystem;
use pedissect::File;

mod args;
mod dump;
mod format;

use args::Args;
use dump::{Dump, DumpRawData};

fn push_directories(parent: &mut Dump, file: &File, args: &Args) {
    if args.imports || args.all {
        let mut node = Dump::new("Import Directory");
        for module in &file.directories.imports {
            let mut mod_node = Dump::new(&module.name);
            mod_node.push_field(
                "TimeDateStamp",
                format::format_u32_as_ctime(module.time_date_stamp),
                None,
            );
            mod_node.push_field("Functions", module.functions.len().to_string(), None);
            for function in &module.functions {
                let label = if function.by_ordinal {
                    format!("{} (ordinal)", function.name)
                } else {
                    format!("{} (hint {})", function.name, function.hint)
                };
                mod_node.push_field("", label, None);
            }
            node.push_child(mod_node);
        }
        parent.push_child(node);
    }

    if args.bound_imports || args.all {
        let mut node = Dump::new("Bound Import Directory");
        for entry in &file.directories.bound_imports {
            let mut mod_node = Dump::new(&entry.module_name);
            mod_node.push_field(
                "TimeDateStamp",
                format::format_u32_as_ctime(entry.time_date_stamp),
                None,
            );
            for forwarded in &entry.forwarded_refs {
                mod_node.push_field("ForwardedRef", forwarded.module_name.clone(), None);
            }
            node.push_child(mod_node);
        }
        parent.push_child(node);
    }

    if args.delay_imports || args.all {
        let mut node = Dump::new("Delay Import Directory");
        for module in &file.directories.delay_imports {
            let mut mod_node = Dump::new(&module.name);
            mod_node.push_field("Attributes", format!("{:#x}", module.attributes), None);
            mod_node.push_field("IAT RVA", format!("{:#x}", module.iat_rva), None);
            mod_node.push_field("INT RVA", format!("{:#x}", module.int_rva), None);
            mod_node.push_field("Functions", module.functions.len().to_string(), None);
            node.push_child(mod_node);
        }
        parent.push_child(node);
    }

    if args.iat || args.all {
        let mut node = Dump::new("IAT Directory");
        for entry in &file.directories.iat {
            let meaning = entry.meaning.clone().unwrap_or_else(|| "?".to_string());
            node.push_field(
                "",
                format!(
                    "[{}] {:#x} = {:#x} ({})",
                    entry.index, entry.rva, entry.value, meaning
                ),
                None,
            );
        }
        parent.push_child(node);
    }

    if args.load_config || args.all {
        let mut node = Dump::new("Load Configuration Directory");
        if let Some(lc) = &file.directories.load_config {
            node.push_field("Size", format!("{:#x}", lc.header.size), None);
            node.push_field(
                "SecurityCookie",
                format!("{:#x}", lc.header.security_cookie),
                None,
            );
            node.push_field("GuardFlags", format!("{:#x}", lc.header.guard_flags), None);
            node.push_field(
                "DependentLoadFlags",
                format!("{:#x}", lc.header.dependent_load_flags),
                None,
            );

            if !lc.seh.is_empty() {
                let mut seh = Dump::new("SEH Handlers");
                for rva in &lc.seh {
                    seh.push_field("", format!("{rva:#x}"), None);
                }
                node.push_child(seh);
            }
            if !lc.gfids.is_empty() {
                let mut gfids = Dump::new("CFG Functions (GFIDS)");
                gfids.push_field("Count", lc.gfids.len().to_string(), None);
                for entry in &lc.gfids {
                    if let Some(desc) = &entry.description {
                        gfids.push_field("", format!("{:#x} {:?} {desc}", entry.rva, entry.flags), None);
                    }
                }
                node.push_child(gfids);
            }
            if !lc.cfg_iat.is_empty() {
                let mut cfg_iat = Dump::new("CFG IAT");
                for entry in &lc.cfg_iat {
                    let desc = entry.description.clone().unwrap_or_default();
                    cfg_iat.push_field("", format!("{:#x} {desc}", entry.rva), None);
                }
                node.push_child(cfg_iat);
            }
            if let Some(chpe) = &lc.chpe {
                let mut chpe_node = Dump::new("CHPE Metadata");
                chpe_node.push_field("Version", chpe.version.to_string(), None);
                chpe_node.push_field("CodeRanges", chpe.code_ranges.len().to_string(), None);
                node.push_child(chpe_node);
            }
            if let Some(dvrt) = &lc.dvrt {
                let mut dvrt_node = Dump::new("DVRT");
                dvrt_node.push_field("Version", dvrt.header.version.to_string(), None);
                dvrt_node.push_field("Entries", dvrt.entries.len().to_string(), None);
                node.push_child(dvrt_node);
            }
            if let Some(enclave) = &lc.enclave_config {
                let mut enclave_node = Dump::new("Enclave Configuration");
                enclave_node.push_field(
                    "FamilyID",
                    enclave
                        .family_id
                        .iter()
                        .map(|b| format!("{b:02x}"))
                        .collect::<String>(),
                    None,
                );
                enclave_node.push_field(
                    "NumberOfImports",
                    enclave.number_of_imports.to_string(),
                    None,
                );
                node.push_child(enclave_node);
            }
        } else {
            node.push_field("", "(not present)".to_string(), None);
        }
        parent.push_child(node);
    }

    if args.anomalies || args.all {
        let mut node = Dump::new("Anomalies");
        for message in file.anomalies.iter() {
            node.push_field("", message.clone(), None);
        }
        parent.push_child(node);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::default();
    config.fast = args.fast;
    config.section_entropy = args.section_entropy;

    let file = File::parse_path(&args.file_path, &config)?;

    if file.faulted_directories > 0 {
        log::warn!(
            "{} of 16 data directories failed to decode",
            file.faulted_directories
        );
    }

    if args.json {
        #[derive(serde::Serialize)]
        struct Snapshot<'a> {
            headers: &'a pedissect::headers::Headers,
            directories: &'a pedissect::directories::Directories,
            anomalies: &'a pedissect::anomalies::Anomalies,
            imphash: String,
        }
        let snapshot = Snapshot {
            headers: &file.headers,
            directories: &file.directories,
            anomalies: &file.anomalies,
            imphash: file.imphash(),
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let mut root = Dump::new("PE File");

    if args.dos_header || args.all {
        let mut node = Dump::new("DOS Header");
        node.push_field("e_magic", format!("{:#06x}", file.headers.dos.e_magic), None);
        node.push_field("e_lfanew", format!("{:#x}", file.headers.dos.e_lfanew), None);
        root.push_child(node);
    }

    if args.nt_header || args.all {
        let mut node = Dump::new("NT Header");
        node.push_field("Machine", format!("{:?}", file.headers.nt.coff.machine), None);
        node.push_field(
            "NumberOfSections",
            file.headers.nt.coff.number_of_sections.to_string(),
            None,
        );
        node.push_field(
            "TimeDateStamp",
            format::format_u32_as_ctime(file.headers.nt.coff.time_date_stamp),
            None,
        );
        node.push_field(
            "Characteristics",
            format!("{:?}", file.headers.nt.coff.characteristics),
            None,
        );
        root.push_child(node);
    }

    if args.optional_header || args.all {
        let mut node = Dump::new("Optional Header");
        let windows = &file.headers.optional.windows;
        node.push_field("ImageBase", format!("{:#x}", windows.image_base), None);
        node.push_field("SizeOfImage", format!("{:#x}", windows.size_of_image), None);
        node.push_field("Subsystem", format!("{:?}", windows.subsystem), None);
        node.push_field(
            "DllCharacteristics",
            format!("{:?}", windows.dll_characteristics),
            None,
        );
        if matches!(windows.subsystem, Subsystem::WindowsGui | Subsystem::WindowsCui) {
            node.push_field("", "standard Win32 subsystem".to_string(), None);
        }
        root.push_child(node);
    }

    if args.sections || args.all {
        let mut node = Dump::new("Sections");
        for section in &file.headers.sections {
            let mut s = Dump::new(&section.header.name);
            s.push_field(
                "VirtualAddress",
                format!("{:#x}", section.header.virtual_address),
                None,
            );
            s.push_field("VirtualSize", format!("{:#x}", section.header.virtual_size), None);
            s.push_field(
                "PointerToRawData",
                format!("{:#x}", section.header.pointer_to_raw_data),
                None,
            );
            if args.section_entropy {
                s.push_field("Entropy", format!("{:.3}", file.section_entropy(section)), None);
            }
            node.push_child(s);
        }
        root.push_child(node);
    }

    push_directories(&mut root, &file, &args);

    if args.imphash || args.all {
        let mut node = Dump::new("ImpHash");
        node.set_raw_data(DumpRawData::Code(vec![file.imphash()]));
        root.push_child(node);
    }

    root.print(0, args.padding_size);

    Ok(())
}
