//! Error taxonomy for the dissector.
//!
//! Only the header/section-table parse that every dissector depends on is
//! fatal. Per-directory failures are local: dissectors return `Result`,
//! the orchestrator in [`crate::directories`] logs them and keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("image too small to contain a DOS header")]
    InvalidPeSize,

    #[error("DOS signature missing at offset 0")]
    MissingDosSignature,

    #[error("NT signature missing at e_lfanew")]
    MissingNtSignature,

    #[error("unrecognized optional header magic {0:#06x}")]
    UnknownOptionalMagic(u16),

    #[error("read of {width} bytes at offset {offset:#x} exceeds image size {size:#x}")]
    OutOfBounds { offset: u64, width: u32, size: u64 },

    #[error("import descriptor for {module} has no valid ILT or IAT entries")]
    DamagedImportTable { module: String },

    #[error("{0} consecutive invalid thunk entries, aborting")]
    TooManyInvalidNames(usize),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
