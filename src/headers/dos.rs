//! MS-DOS header (out-of-scope collaborator per spec §1; decoded only
//! far enough to reach `e_lfanew`).

use crate::error::{Error, Result};
use crate::image::ImageView;

pub const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const E_LFANEW_OFFSET: u64 = 0x3C;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_lfanew: u32,
}

impl DosHeader {
    pub fn parse(view: &ImageView) -> Result<DosHeader> {
        if view.len() < 0x40 {
            return Err(Error::InvalidPeSize);
        }
        let e_magic = view.read_u16(0)?;
        if e_magic != DOS_SIGNATURE {
            return Err(Error::MissingDosSignature);
        }
        let e_lfanew = view.read_u32(E_LFANEW_OFFSET)?;
        Ok(DosHeader { e_magic, e_lfanew })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_and_unsigned_images() {
        let bytes = vec![0u8; 10];
        let view = ImageView::new(&bytes, &[]);
        assert!(matches!(DosHeader::parse(&view), Err(Error::InvalidPeSize)));
    }

    #[test]
    fn reads_lfanew() {
        let mut bytes = vec![0u8; 0x80];
        bytes[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        bytes[0x3c..0x40].copy_from_slice(&0x78u32.to_le_bytes());
        let view = ImageView::new(&bytes, &[]);
        let header = DosHeader::parse(&view).unwrap();
        assert_eq!(header.e_lfanew, 0x78);
    }
}
