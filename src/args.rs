//! CLI switches (spec §6 "External Interfaces", §4.2 recognized config
//! switches). Thin: every flag maps directly onto a [`crate::config::Config`]
//! field or a dump-mode toggle; all dissection logic lives in the library.

use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Parser/Dumper for portable executable files on Windows")]
pub struct Args {
    /// Dumps the legacy MS-DOS compatible header
    #[arg(long, default_value_t = false)]
    pub dos_header: bool,

    /// Dumps the NT Header (most recent)
    #[arg(long, default_value_t = false)]
    pub nt_header: bool,

    /// Dumps the Optional (either 32/64) header
    #[arg(long, default_value_t = false)]
    pub optional_header: bool,

    /// Dumps the section table
    #[arg(long, default_value_t = false)]
    pub sections: bool,

    /// Dumps the classic import directory (modules and functions)
    #[arg(long, default_value_t = false)]
    pub imports: bool,

    /// Dumps the bound import directory
    #[arg(long, default_value_t = false)]
    pub bound_imports: bool,

    /// Dumps the delay import directory
    #[arg(long, default_value_t = false)]
    pub delay_imports: bool,

    /// Dumps the IAT directory, cross-resolved against imports
    #[arg(long, default_value_t = false)]
    pub iat: bool,

    /// Dumps the Load Configuration directory and every sub-table it
    /// references (SEH, CFG, CHPE, DVRT, enclave, volatile metadata)
    #[arg(long, default_value_t = false)]
    pub load_config: bool,

    /// Dumps anomalies accumulated while dissecting
    #[arg(long, default_value_t = false)]
    pub anomalies: bool,

    /// Prints the ImpHash of the classic import table
    #[arg(long, default_value_t = false)]
    pub imphash: bool,

    /// Dumps everything this crate knows how to parse
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Serializes the whole parsed File as JSON instead of the indented
    /// human-readable tree
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Parses headers and the section table only; skips every data
    /// directory (spec §4.2 Config.fast)
    #[arg(long, default_value_t = false)]
    pub fast: bool,

    /// Computes and dumps Shannon entropy per section
    #[arg(long, default_value_t = false)]
    pub section_entropy: bool,

    /// Padding size to apply when dumping information for better readability
    #[arg(long, default_value_t = 4)]
    pub padding_size: usize,

    pub file_path: PathBuf,
}
