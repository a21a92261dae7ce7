//! Legacy stream carver.
//!
//! Old installers ship `srcs.mfa` without a section table: it is a run of
//! independent XZ streams laid back to back.  The first stream may hold the
//! package metadata (tagged `MT_00000`); the rest hold firmware.
//!
//! Every XZ marker opens one stream that runs to the next marker.  A marker
//! can also occur by chance inside compressed bytes, so a stream that fails
//! to decode is logged and skipped rather than failing the whole member.

use crate::carve::{carve, ExtractedImage};
use crate::codec::decompress_xz_stream;
use crate::magic::{find_markers, MagicSignature, XZ_STREAM_MARKER};

/// Streams shorter than this cannot hold a firmware image.
pub const MIN_STREAM_SIZE: usize = 1000;
/// Unclassified streams are kept only above this decoded size.
pub const MIN_UNCLASSIFIED_SIZE: usize = 1000;
/// Tag that marks the metadata stream.
pub const METADATA_TAG: &[u8] = b"MT_00000";
/// How far into the first stream the metadata tag is searched for.
pub const METADATA_PROBE_LEN: usize = 1000;

/// Byte range `[start, end)` of one compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedStream {
    pub index: usize,
    pub start: usize,
    pub end:   usize,
}

impl CompressedStream {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `buffer` into streams at every XZ marker.
pub fn locate_streams(buffer: &[u8]) -> Vec<CompressedStream> {
    let starts = find_markers(buffer, XZ_STREAM_MARKER);
    starts
        .iter()
        .enumerate()
        .map(|(index, &start)| CompressedStream {
            index,
            start,
            end: starts.get(index + 1).copied().unwrap_or(buffer.len()),
        })
        .collect()
}

/// Thresholds for [`carve_legacy`].
#[derive(Debug, Clone)]
pub struct LegacyOptions<'a> {
    pub min_stream_size:       usize,
    pub min_payload_size:      usize,
    pub min_unclassified_size: usize,
    pub metadata_tag:          &'a [u8],
    pub metadata_probe_len:    usize,
}

/// What one stream turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyArtifact {
    /// Firmware image; `seq` counts images within the stream.
    Firmware { stream: usize, seq: usize, image: ExtractedImage },
    /// Decoded first stream carrying the metadata tag.
    Metadata(Vec<u8>),
    /// Decoded stream with no firmware in it.
    Unclassified { stream: usize, data: Vec<u8> },
}

impl LegacyArtifact {
    pub fn file_name(&self) -> String {
        match self {
            LegacyArtifact::Firmware { stream, seq, .. } => format!("firmware_{stream}_{seq}.bin"),
            LegacyArtifact::Metadata(_)                 => "metadata.bin".to_string(),
            LegacyArtifact::Unclassified { stream, .. } => format!("xz_stream_{stream}_decompressed.bin"),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            LegacyArtifact::Firmware { image, .. }    => &image.data,
            LegacyArtifact::Metadata(data)            => data,
            LegacyArtifact::Unclassified { data, .. } => data,
        }
    }

    pub fn is_firmware(&self) -> bool {
        matches!(self, LegacyArtifact::Firmware { .. })
    }
}

/// Result of a legacy carve, in stream order.
#[derive(Debug, Default)]
pub struct LegacyOutcome {
    pub artifacts:      Vec<LegacyArtifact>,
    /// Streams skipped because they were too short.
    pub skipped:        Vec<usize>,
    /// Streams that failed to decode.
    pub failed:         Vec<usize>,
}

impl LegacyOutcome {
    pub fn firmware_count(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_firmware()).count()
    }

    pub fn metadata(&self) -> Option<&[u8]> {
        self.artifacts.iter().find_map(|a| match a {
            LegacyArtifact::Metadata(data) => Some(data.as_slice()),
            _ => None,
        })
    }
}

/// Decode every stream in `buffer` and carve firmware out of each.
pub fn carve_legacy(buffer: &[u8], candidates: &[MagicSignature], opts: &LegacyOptions<'_>) -> LegacyOutcome {
    let mut outcome = LegacyOutcome::default();

    for stream in locate_streams(buffer) {
        tracing::debug!(stream = stream.index, offset = stream.start, len = stream.len(), "xz stream found");
        if stream.len() < opts.min_stream_size {
            tracing::debug!(stream = stream.index, "stream too small, skipping");
            outcome.skipped.push(stream.index);
            continue;
        }

        // A marker inside compressed data does not end the stream, so decode
        // from the marker and let the footer decide where it stops.
        let decoded = match decompress_xz_stream(&buffer[stream.start..]) {
            Ok((decoded, _)) => decoded,
            Err(e) => {
                tracing::debug!(stream = stream.index, "failed to decompress stream: {e}");
                outcome.failed.push(stream.index);
                continue;
            }
        };

        let probe = &decoded[..decoded.len().min(opts.metadata_probe_len)];
        if stream.index == 0 && !find_markers(probe, opts.metadata_tag).is_empty() {
            tracing::debug!(len = decoded.len(), "first stream holds metadata");
            outcome.artifacts.push(LegacyArtifact::Metadata(decoded));
            continue;
        }

        let images = carve(&decoded, candidates, opts.min_payload_size);
        if images.is_empty() {
            if decoded.len() > opts.min_unclassified_size {
                tracing::debug!(stream = stream.index, len = decoded.len(), "no firmware in stream, keeping raw data");
                outcome.artifacts.push(LegacyArtifact::Unclassified { stream: stream.index, data: decoded });
            }
            continue;
        }
        for (seq, image) in images.into_iter().enumerate() {
            outcome.artifacts.push(LegacyArtifact::Firmware { stream: stream.index, seq, image });
        }
    }

    outcome
}
