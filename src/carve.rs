//! Firmware carver: split a buffer on product signatures.
//!
//! There is no length field in front of an image, so an image runs from its
//! signature to the next occurrence of the same signature (or the end of the
//! buffer).  Signatures are tried in the caller's preference order and the
//! first one that yields a qualifying image wins; later signatures are not
//! tried against the same buffer.

use crate::magic::{find_markers, Family, MagicSignature};

/// Images are never smaller than 64 KiB (signature excluded).
pub const MIN_FIRMWARE_SIZE: usize = 0x10000;

/// One carved image.  `data` starts with the signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub family: Family,
    /// Position of the fragment among all occurrences of the signature,
    /// counting fragments that were dropped for size.
    pub index:  usize,
    pub data:   Vec<u8>,
}

impl ExtractedImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Carve images out of `buffer`.
///
/// Returns an empty list when no candidate matches or every fragment is
/// shorter than `min_payload_size`.
pub fn carve(buffer: &[u8], candidates: &[MagicSignature], min_payload_size: usize) -> Vec<ExtractedImage> {
    for sig in candidates {
        let hits = find_markers(buffer, sig.bytes);
        if hits.is_empty() {
            continue;
        }
        tracing::debug!(family = %sig.family, count = hits.len(), "signature found");

        let mut images = Vec::new();
        for (index, &at) in hits.iter().enumerate() {
            let start = at + sig.bytes.len();
            let end   = hits.get(index + 1).copied().unwrap_or(buffer.len());
            let fragment = &buffer[start..end];
            if fragment.len() < min_payload_size {
                tracing::trace!(family = %sig.family, index, len = fragment.len(), "fragment below size floor");
                continue;
            }
            let mut data = Vec::with_capacity(sig.bytes.len() + fragment.len());
            data.extend_from_slice(sig.bytes);
            data.extend_from_slice(fragment);
            tracing::debug!(family = %sig.family, index, len = data.len(), "carved firmware image");
            images.push(ExtractedImage { family: sig.family, index, data });
        }

        if !images.is_empty() {
            return images;
        }
    }
    Vec::new()
}
