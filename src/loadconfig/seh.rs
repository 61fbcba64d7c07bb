//! Structured-exception-handler table, x86 images only (spec §4.6 step 2
//! "SEH handlers").

use crate::image::ImageView;

const MAX_HANDLERS: usize = 0x10000;

/// Read `count` little-endian u32 RVAs starting at `table_rva`. Never
/// fails: an untranslatable table RVA yields an empty list.
pub fn parse_seh_table(view: &ImageView, table_rva: u32, count: u32) -> Vec<u32> {
    let count = (count as usize).min(MAX_HANDLERS) as u32;
    let mut handlers = Vec::with_capacity(count as usize);
    for i in 0..count {
        let rva = table_rva + i * 4;
        match view.read_u32_at_rva(rva) {
            Ok(value) => handlers.push(value),
            Err(_) => break,
        }
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_handler_rvas_until_failure() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&0x14ad30u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&0x14af40u32.to_le_bytes());
        let view = ImageView::new(&bytes, &[]);
        let handlers = parse_seh_table(&view, 0, 2);
        assert_eq!(handlers, vec![0x14ad30, 0x14af40]);
    }
}
