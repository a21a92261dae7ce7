//! Magic registry: frozen product-family signatures and marker search.
//!
//! # Identity rules
//! Every firmware image starts with a fixed `MTFW` signature whose tail
//! identifies the product family.  The signatures are the only structure we
//! can rely on inside a DATA section or a legacy stream; there is no length
//! field in front of an image.
//!
//! The registry is built once ([`MagicRegistry::builtin`]) and borrowed by
//! every component.  It carries two preference orders: the container order
//! tries newer families first, the legacy order is the reduced set the old
//! stream-only installers shipped with.

// ── Frozen signatures ───────────────────────────────────────────────────────

/// FS3 (ConnectX-3 era) image signature.
pub const MAGIC_FS3: &[u8] = &[
    0x4D,0x54,0x46,0x57, 0x8C,0xDF,0xD0,0x00,
    0xDE,0xAD,0x92,0x70, 0x41,0x54,0xBE,0xEF,
    0x14,0x18,0x54,0x11, 0xD6,
];
/// FS4 image signature.
pub const MAGIC_FS4: &[u8] = &[
    0x4D,0x54,0x46,0x57, 0xAB,0xCD,0xEF,0x00,
    0xFA,0xDE,0x12,0x34, 0x56,0x78,0xDE,0xAD,
    0x01,0x00,0x01,0x00, 0xFF,0xFF,0xFF,0xFF,
];
/// FS5 image signature.
pub const MAGIC_FS5: &[u8] = &[
    0x4D,0x54,0x46,0x57, 0xAB,0xCD,0xEF,0x00,
    0xFA,0xDE,0x12,0x34, 0x56,0x78,0xDE,0xAD,
    0x01,0x01,0x01,0x00, 0xFF,0xFF,0xFF,0xFF,
];
/// ConnectX-8 image signature.
pub const MAGIC_CX8: &[u8] = &[
    0x4D,0x54,0x46,0x57, 0xAB,0xCD,0xEF,0x00,
    0xFA,0xDE,0x12,0x34, 0x56,0x78,0xDE,0xAD,
    0x02,0x00,0x01,0x00, 0xFF,0xFF,0xFF,0xFF,
];

/// Start of an XZ stream.  Only the first five bytes of the six-byte XZ
/// header magic are matched, so a stream is found even when the trailing
/// NUL was split off by a bad carve.
pub const XZ_STREAM_MARKER: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A];

/// ZIP local file header signature (`PK\x03\x04`).
pub const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";

// ── Family ───────────────────────────────────────────────────────────────────

/// Product family of a firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Fs3,
    Fs4,
    Fs5,
    Cx8,
}

impl Family {
    /// Short tag used in file names and logs.
    pub fn tag(self) -> &'static str {
        match self {
            Family::Fs3 => "fs3",
            Family::Fs4 => "fs4",
            Family::Fs5 => "fs5",
            Family::Cx8 => "cx8",
        }
    }

    pub fn from_tag(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fs3" => Some(Family::Fs3),
            "fs4" => Some(Family::Fs4),
            "fs5" => Some(Family::Fs5),
            "cx8" => Some(Family::Cx8),
            _     => None,
        }
    }

    pub fn signature(self) -> &'static [u8] {
        match self {
            Family::Fs3 => MAGIC_FS3,
            Family::Fs4 => MAGIC_FS4,
            Family::Fs5 => MAGIC_FS5,
            Family::Cx8 => MAGIC_CX8,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A family tag paired with the bytes that open one of its images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicSignature {
    pub family: Family,
    pub bytes:  &'static [u8],
}

impl MagicSignature {
    pub fn of(family: Family) -> Self {
        Self { family, bytes: family.signature() }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Immutable signature table with the two preference orders.
#[derive(Debug, Clone)]
pub struct MagicRegistry {
    container: Vec<MagicSignature>,
    legacy:    Vec<MagicSignature>,
}

impl MagicRegistry {
    /// The built-in table: container order `cx8, fs5, fs4, fs3`, legacy
    /// order `fs4, fs5, fs3`.
    pub fn builtin() -> Self {
        Self::with_orders(
            &[Family::Cx8, Family::Fs5, Family::Fs4, Family::Fs3],
            &[Family::Fs4, Family::Fs5, Family::Fs3],
        )
    }

    pub fn with_orders(container: &[Family], legacy: &[Family]) -> Self {
        Self {
            container: container.iter().copied().map(MagicSignature::of).collect(),
            legacy:    legacy.iter().copied().map(MagicSignature::of).collect(),
        }
    }

    /// Candidate signatures for a DATA section, most specific first.
    pub fn container_order(&self) -> &[MagicSignature] {
        &self.container
    }

    /// Candidate signatures for streams of the stream-only legacy format.
    pub fn legacy_order(&self) -> &[MagicSignature] {
        &self.legacy
    }

    pub fn lookup(&self, tag: &str) -> Option<MagicSignature> {
        Family::from_tag(tag).map(MagicSignature::of)
    }
}

impl Default for MagicRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── Marker search ────────────────────────────────────────────────────────────

/// Every non-overlapping occurrence of `needle` in `haystack`, left to right.
pub fn find_markers(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut hits = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return hits;
    }
    let first      = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut pos    = 0;
    while pos <= last_start {
        let Some(rel) = haystack[pos..=last_start].iter().position(|&b| b == first) else {
            break;
        };
        let at = pos + rel;
        if &haystack[at..at + needle.len()] == needle {
            hits.push(at);
            pos = at + needle.len();
        } else {
            pos = at + 1;
        }
    }
    hits
}

pub fn contains_marker(haystack: &[u8], needle: &[u8]) -> bool {
    !find_markers(haystack, needle).is_empty()
}
