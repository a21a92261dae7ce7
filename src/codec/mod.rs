//! LZMA/XZ codecs backed by `lzma-rs`.
//!
//! Two decoding shapes are needed:
//!   - whole-buffer decoding for flagged container sections
//!     ([`decompress_auto`]), which accepts concatenated XZ streams or a
//!     single `.lzma` (lzma-alone) stream;
//!   - single-stream decoding for the legacy carver
//!     ([`decompress_xz_stream`]), which stops at the end of the first XZ
//!     stream and reports how much input it consumed, so a stream followed
//!     by other streams decodes to exactly its own payload.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Cursor};
use thiserror::Error;

/// Six-byte XZ stream header magic.
pub const XZ_HEADER_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    /// `.xz` container, possibly several streams back to back.
    Xz,
    /// Raw `.lzma` (lzma-alone) stream.
    Lzma,
}

impl CodecId {
    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Xz   => "xz",
            CodecId::Lzma => "lzma",
        }
    }

    /// Sniff the codec from the leading bytes of a compressed buffer.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&XZ_HEADER_MAGIC) { CodecId::Xz } else { CodecId::Lzma }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct XzCodec;
impl Codec for XzCodec {
    fn codec_id(&self) -> CodecId { CodecId::Xz }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_compress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    /// Decodes every stream in `data`.  Zero stream padding between streams
    /// is skipped; bytes after the last stream that do not open another one
    /// are ignored once at least one stream has decoded.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let mut pos = 0;
        loop {
            let (chunk, used) = decompress_xz_stream(&data[pos..])?;
            out.extend_from_slice(&chunk);
            pos += used;
            while pos < data.len() && data[pos] == 0 {
                pos += 1;
            }
            if pos >= data.len() {
                break;
            }
            if !data[pos..].starts_with(&XZ_HEADER_MAGIC) {
                tracing::trace!(offset = pos, trailing = data.len() - pos, "ignoring data after last xz stream");
                break;
            }
        }
        Ok(out)
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzma }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::Xz   => Box::new(XzCodec),
        CodecId::Lzma => Box::new(LzmaCodec),
    }
}

/// Decompress a complete buffer, picking the codec from its leading bytes.
pub fn decompress_auto(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    get_codec(CodecId::detect(data)).decompress(data)
}

/// Decode exactly one XZ stream from the front of `data`.
///
/// Returns the decoded bytes and the number of input bytes the stream
/// occupied (header through footer).  The decoder only ever sees the
/// stream's own bytes, so whatever follows the footer is left untouched.
pub fn decompress_xz_stream(data: &[u8]) -> Result<(Vec<u8>, usize), CodecError> {
    if !data.starts_with(&XZ_HEADER_MAGIC) || data.len() < XZ_HEADER_LEN {
        return Err(CodecError::Decompression("missing xz stream header".into()));
    }
    let mut last_err = None;
    for end in xz_footer_candidates(data) {
        let mut out = Vec::new();
        match lzma_rs::xz_decompress(&mut Cursor::new(&data[..end]), &mut out) {
            Ok(()) => return Ok((out, end)),
            Err(e) => {
                tracing::trace!(end, "xz footer candidate rejected: {e}");
                last_err = Some(e.to_string());
            }
        }
    }
    Err(CodecError::Decompression(
        last_err.unwrap_or_else(|| "no xz stream footer found".into()),
    ))
}

const XZ_HEADER_LEN: usize = 12;
const XZ_FOOTER_LEN: usize = 12;
const XZ_FOOTER_MAGIC: &[u8; 2] = b"YZ";

/// End offsets (exclusive) of every plausible stream footer in `data`, in
/// ascending order.
///
/// A footer qualifies when its magic, CRC32 and stream flags check out and
/// the backward size lands on an index whose own CRC32 matches.  Streams are
/// a multiple of four bytes long, so only aligned ends are examined.
fn xz_footer_candidates(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    let flags = &data[6..8];
    (XZ_HEADER_LEN + XZ_FOOTER_LEN..=data.len())
        .step_by(4)
        .filter(move |&end| {
            let footer = &data[end - XZ_FOOTER_LEN..end];
            if &footer[10..12] != XZ_FOOTER_MAGIC || &footer[8..10] != flags {
                return false;
            }
            if LittleEndian::read_u32(&footer[0..4]) != crc32fast::hash(&footer[4..10]) {
                return false;
            }
            let index_len = (LittleEndian::read_u32(&footer[4..8]) as usize + 1) * 4;
            let index_end = end - XZ_FOOTER_LEN;
            let Some(index_start) = index_end.checked_sub(index_len) else { return false };
            if index_start < XZ_HEADER_LEN || data[index_start] != 0 {
                return false;
            }
            let index = &data[index_start..index_end];
            let (body, crc) = index.split_at(index.len() - 4);
            LittleEndian::read_u32(crc) == crc32fast::hash(body)
        })
}
