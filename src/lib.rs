//! PE/PE32+ container dissector (spec §1-§3).
//!
//! [`File`] is the top-level aggregate: image bytes, parsed headers,
//! section table, and one slot per data directory this crate dissects
//! (spec §3 "File (aggregate)"). It owns everything it produces — every
//! nested record derives freshly-allocated `String`/`Vec` fields rather
//! than borrowing from the image, so only [`File`] itself needs to track
//! the bytes' lifetime (spec §9 "arena-lifetime").

pub mod anomalies;
pub mod config;
pub mod directories;
pub mod error;
pub mod exports;
pub mod headers;
pub mod image;
pub mod imports;
pub mod loadconfig;

use std::fs::File as FsFile;
use std::path::Path;

use memmap2::Mmap;

use anomalies::Anomalies;
use config::Config;
use directories::Directories;
use error::Result;
use headers::Headers;
use image::ImageView;
use imports::imphash;

/// The image bytes backing a [`File`]: either a read-only memory map
/// acquired from a path, an owned buffer, or a slice borrowed from the
/// caller (spec §5 "NewBytes variant skips the file acquisition and
/// borrows the caller's byte slice").
enum Bytes<'a> {
    Mapped(Mmap),
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

impl<'a> AsRef<[u8]> for Bytes<'a> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Bytes::Mapped(mmap) => mmap.as_ref(),
            Bytes::Owned(buf) => buf.as_slice(),
            Bytes::Borrowed(slice) => slice,
        }
    }
}

/// The fully-materialized model of one PE image (spec §3). Read-only
/// after [`File::parse_path`]/[`File::parse_bytes`] return; closing it
/// (dropping the value) releases the mapped bytes and, transitively,
/// every view borrowing from them (spec §5 "Resource lifecycle").
pub struct File<'a> {
    bytes: Bytes<'a>,
    pub headers: Headers,
    pub directories: Directories,
    pub anomalies: Anomalies,
    /// Count of data directories whose dissector faulted (spec §4.2, §7).
    /// Parsing still succeeds; this is advisory, surfaced to callers who
    /// want to know how much of the directory set is trustworthy.
    pub faulted_directories: usize,
}

impl<'a> File<'a> {
    /// Open `path`, memory-map it read-only, and parse (spec §5 "Opening
    /// a File acquires a read-only memory map").
    pub fn parse_path(path: impl AsRef<Path>, config: &Config) -> Result<File<'static>> {
        let fs_file = FsFile::open(path.as_ref())?;
        // SAFETY: the map is read-only for the lifetime of `File`, and no
        // other process is expected to truncate the backing file out from
        // under us during a single parse; this is the standard caveat of
        // every mmap-based parser (same tradeoff `glaurung` accepts).
        let mmap = unsafe { Mmap::map(&fs_file)? };
        File::parse_from(Bytes::Mapped(mmap), config)
    }

    /// Parse an owned buffer, taking ownership of it (spec §5 "NewBytes
    /// variant", owned-buffer form).
    pub fn parse_owned(bytes: Vec<u8>, config: &Config) -> Result<File<'static>> {
        File::parse_from(Bytes::Owned(bytes), config)
    }

    /// Parse a byte slice borrowed from the caller, who must outlive the
    /// returned `File` (spec §5 "caller must outlive the File").
    pub fn parse_bytes(bytes: &'a [u8], config: &Config) -> Result<File<'a>> {
        File::parse_from(Bytes::Borrowed(bytes), config)
    }

    fn parse_from(bytes: Bytes<'a>, config: &Config) -> Result<File<'a>> {
        let headers = Headers::parse(bytes.as_ref())?;
        let is_64 = headers.is_64();
        let is_x86 = matches!(
            headers.nt.coff.machine,
            headers::coff::Machine::I386
        );
        let image_base = headers.optional.image_base();

        let view = ImageView::new(bytes.as_ref(), &headers.sections);
        let mut anomalies = Anomalies::new();
        let (directories, faulted_directories) = directories::parse_directories(
            &view,
            &headers.sections,
            &headers.optional.data_directories,
            image_base,
            is_64,
            is_x86,
            config,
            &mut anomalies,
        );

        Ok(File {
            bytes,
            headers,
            directories,
            anomalies,
            faulted_directories,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// A fresh, transient view over this file's bytes and sections, for
    /// callers that need RVA translation or raw section bytes outside of
    /// the dissectors that ran during `parse` (e.g. section entropy).
    pub fn view(&self) -> ImageView<'_> {
        ImageView::new(self.bytes.as_ref(), &self.headers.sections)
    }

    pub fn is_64(&self) -> bool {
        self.headers.is_64()
    }

    pub fn image_base(&self) -> u64 {
        self.headers.optional.image_base()
    }

    /// Deterministic MD5 fingerprint over the classic import table (spec
    /// §4.3 "ImpHash", §8 scenario 1). Delay imports are intentionally
    /// excluded, matching the reference tool this scenario's fixture was
    /// taken from.
    pub fn imphash(&self) -> String {
        imphash::compute(&self.directories.imports)
    }

    /// Shannon entropy of each section's raw bytes, only computed when
    /// `Config::section_entropy` requested it during parse-time
    /// configuration review by the caller (the orchestrator itself does
    /// not gate on this — entropy is cheap enough to compute on demand).
    pub fn section_entropy(&self, section: &headers::section::Section) -> f64 {
        let start = section.header.pointer_to_raw_data as usize;
        let len = section.header.size_of_raw_data as usize;
        let bytes = self.bytes.as_ref();
        if start >= bytes.len() || len == 0 {
            return 0.0;
        }
        let end = (start + len).min(bytes.len());
        let slice = &bytes[start..end];

        let mut counts = [0u64; 256];
        for &b in slice {
            counts[b as usize] += 1;
        }
        let total = slice.len() as f64;
        counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.log2()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pe32_plus(extra_zero_bytes: usize) -> Vec<u8> {
        let opt_size: u16 = 240;
        let lfanew = 0x40u32;
        let mut bytes = vec![0u8; 0x1000 + extra_zero_bytes];
        bytes[0..2].copy_from_slice(&headers::dos::DOS_SIGNATURE.to_le_bytes());
        bytes[0x3c..0x40].copy_from_slice(&lfanew.to_le_bytes());

        let nt_off = lfanew as usize;
        bytes[nt_off..nt_off + 4].copy_from_slice(&headers::coff::NT_SIGNATURE.to_le_bytes());
        let coff_off = nt_off + 4;
        bytes[coff_off..coff_off + 2].copy_from_slice(&0x8664u16.to_le_bytes());
        bytes[coff_off + 16..coff_off + 18].copy_from_slice(&opt_size.to_le_bytes());

        let opt_off = coff_off + headers::coff::COFF_HEADER_SIZE;
        bytes[opt_off..opt_off + 2]
            .copy_from_slice(&headers::optional::MAGIC_PE32_PLUS.to_le_bytes());
        bytes
    }

    #[test]
    fn parses_minimal_image_with_no_directories() {
        let bytes = minimal_pe32_plus(0);
        let config = Config::default();
        let file = File::parse_bytes(&bytes, &config).unwrap();
        assert!(file.is_64());
        assert!(file.directories.imports.is_empty());
        assert!(file.anomalies.is_empty());
    }

    #[test]
    fn fast_mode_skips_every_directory() {
        let bytes = minimal_pe32_plus(0);
        let mut config = Config::default();
        config.fast = true;
        let file = File::parse_bytes(&bytes, &config).unwrap();
        assert!(file.directories.load_config.is_none());
        assert_eq!(file.faulted_directories, 0);
    }

    /// Spec §8 invariant 1: a grab-bag of truncated/garbage buffers must
    /// never panic, regardless of whether they parse successfully.
    #[test]
    fn adversarial_buffers_never_panic() {
        let config = Config::default();
        let cases: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0u8; 1],
            vec![0u8; 0x3F],
            vec![0xFFu8; 0x200],
            {
                let mut v = vec![0u8; 0x200];
                v[0..2].copy_from_slice(&headers::dos::DOS_SIGNATURE.to_le_bytes());
                v[0x3c..0x40].copy_from_slice(&0xFFFF_FF00u32.to_le_bytes());
                v
            },
            {
                let mut v = minimal_pe32_plus(0);
                // data directory 1 (imports) points far past the image.
                let dd_off = 0x40 + 4 + headers::coff::COFF_HEADER_SIZE + 112 + 8;
                v[dd_off..dd_off + 4].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
                v[dd_off + 4..dd_off + 8].copy_from_slice(&0x1000u32.to_le_bytes());
                v
            },
        ];
        for bytes in cases {
            let _ = File::parse_bytes(&bytes, &config);
        }
    }

    #[test]
    fn section_entropy_of_uniform_bytes_is_near_max() {
        let mut bytes = minimal_pe32_plus(0x100);
        for (i, b) in bytes[0x1000..0x1100].iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        let config = Config::default();
        let file = File::parse_bytes(&bytes, &config).unwrap();
        let section = headers::section::Section::new(headers::section::SectionHeader {
            name: ".text".into(),
            virtual_size: 0x100,
            virtual_address: 0x1000,
            size_of_raw_data: 0x100,
            pointer_to_raw_data: 0x1000,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: headers::section::SectionFlags::empty(),
        });
        assert!(file.section_entropy(&section) > 7.9);
    }
}
