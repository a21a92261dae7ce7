//! MFA container parser.
//!
//! # Layout
//!
//! ```text
//! 0x00  magic        "MFAR"
//! 0x04  version      u32 BE (= 1)
//! 0x08  reserved     8 bytes
//! 0x10  section records, back to back:
//!         +0  type   u8   (MAP = 1, TOC = 2, DATA = 3)
//!         +1  reserved 2 bytes
//!         +3  flags  u8   (bit 0: payload is LZMA/XZ compressed)
//!         +4  size   u32 BE
//!         +8  payload, `size` bytes
//! end-4 crc32        u32 LE over every preceding byte
//! ```
//!
//! A record whose payload would run into the CRC trailer stops the walk;
//! records already collected stay valid.  A CRC mismatch is advisory only.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

use crate::carve::{carve, ExtractedImage};
use crate::codec::{decompress_auto, CodecError, CodecId};
use crate::magic::MagicRegistry;

pub const MFA_MAGIC: &[u8; 4] = b"MFAR";
pub const MFA_VERSION: u32 = 1;
pub const MFA_HEADER_SIZE: usize = 16;
pub const SECTION_HEADER_SIZE: usize = 8;
pub const CRC_TRAILER_SIZE: usize = 4;
pub const FLAG_XZ_COMPRESSED: u8 = 0x01;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Container truncated: only {len} bytes")]
    Truncated { len: usize },
    #[error("Invalid container magic {}", hex::encode(.0))]
    BadMagic([u8; 4]),
    #[error("Unsupported container version: 0x{0:08x}")]
    UnsupportedVersion(u32),
    #[error("Section at 0x{offset:x} declares {declared} bytes but only {available} remain")]
    SectionOverrun { offset: usize, declared: u32, available: usize },
    #[error("Failed to decompress {section:?} section: {source}")]
    DecompressionFailed { section: SectionType, source: CodecError },
    #[error("CRC32 mismatch: stored=0x{stored:08x}, calculated=0x{computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic:    [u8; 4],
    pub version:  u32,
    pub reserved: [u8; 8],
}

impl ContainerHeader {
    pub fn new() -> Self {
        Self { magic: *MFA_MAGIC, version: MFA_VERSION, reserved: [0u8; 8] }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<BigEndian>(self.version)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ParseError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MFA_MAGIC {
            return Err(ParseError::BadMagic(magic));
        }
        let version = reader.read_u32::<BigEndian>()?;
        if version != MFA_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;
        Ok(Self { magic, version, reserved })
    }
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionType {
    Map,
    Toc,
    Data,
    Unknown(u8),
}

impl SectionType {
    pub fn code(self) -> u8 {
        match self {
            SectionType::Map        => 1,
            SectionType::Toc        => 2,
            SectionType::Data       => 3,
            SectionType::Unknown(c) => c,
        }
    }
}

impl From<u8> for SectionType {
    fn from(code: u8) -> Self {
        match code {
            1 => SectionType::Map,
            2 => SectionType::Toc,
            3 => SectionType::Data,
            c => SectionType::Unknown(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub section_type: SectionType,
    pub reserved:     u16,
    pub flags:        u8,
    pub size:         u32,
}

impl SectionHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_XZ_COMPRESSED != 0
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.section_type.code())?;
        writer.write_u16::<BigEndian>(self.reserved)?;
        writer.write_u8(self.flags)?;
        writer.write_u32::<BigEndian>(self.size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            section_type: SectionType::from(reader.read_u8()?),
            reserved:     reader.read_u16::<BigEndian>()?,
            flags:        reader.read_u8()?,
            size:         reader.read_u32::<BigEndian>()?,
        })
    }
}

// ── ParsedContainer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParsedContainer {
    pub header:       ContainerHeader,
    /// Section payloads after decompression.  A later record of the same
    /// type replaces an earlier one.
    pub sections:     BTreeMap<SectionType, Vec<u8>>,
    pub checksum_ok:  bool,
    pub stored_crc:   u32,
    pub computed_crc: u32,
    /// Set when the walk stopped on a record that ran past the body.
    pub overrun:      Option<(usize, u32)>,
}

impl ParsedContainer {
    pub fn data_section(&self) -> Option<&[u8]> {
        self.sections.get(&SectionType::Data).map(Vec::as_slice)
    }

    /// Carve firmware images out of the DATA section.
    pub fn extract_firmwares(&self, registry: &MagicRegistry, min_payload_size: usize) -> Vec<ExtractedImage> {
        match self.data_section() {
            Some(data) => carve(data, registry.container_order(), min_payload_size),
            None => {
                tracing::debug!("no DATA section found");
                Vec::new()
            }
        }
    }
}

/// Parse an MFA container held entirely in memory.
pub fn parse(buffer: &[u8]) -> Result<ParsedContainer, ParseError> {
    if buffer.len() < MFA_HEADER_SIZE {
        return Err(ParseError::Truncated { len: buffer.len() });
    }
    let header = ContainerHeader::read(&buffer[..MFA_HEADER_SIZE])?;
    tracing::debug!("valid MFA header found");

    let body_end = buffer.len().saturating_sub(CRC_TRAILER_SIZE);
    let mut sections = BTreeMap::new();
    let mut overrun  = None;
    let mut offset   = MFA_HEADER_SIZE;

    while offset + SECTION_HEADER_SIZE <= body_end {
        let sh = SectionHeader::read(&buffer[offset..offset + SECTION_HEADER_SIZE])?;
        tracing::debug!(
            offset, section = ?sh.section_type, flags = sh.flags, size = sh.size,
            "section record"
        );

        let start     = offset + SECTION_HEADER_SIZE;
        let available = body_end - start;
        if sh.size as usize > available {
            let err = ParseError::SectionOverrun { offset, declared: sh.size, available };
            tracing::debug!("{err}; keeping {} earlier section(s)", sections.len());
            overrun = Some((offset, sh.size));
            break;
        }
        let end = start + sh.size as usize;

        let payload = if sh.is_compressed() {
            let raw = &buffer[start..end];
            let out = decompress_auto(raw).map_err(|source| {
                ParseError::DecompressionFailed { section: sh.section_type, source }
            })?;
            tracing::debug!(codec = CodecId::detect(raw).name(), from = raw.len(), to = out.len(), "decompressed section");
            out
        } else {
            buffer[start..end].to_vec()
        };

        if sections.insert(sh.section_type, payload).is_some() {
            tracing::debug!(section = ?sh.section_type, "duplicate section replaces earlier one");
        }
        offset = end;
    }

    let stored_crc   = Cursor::new(&buffer[body_end..]).read_u32::<LittleEndian>()?;
    let computed_crc = crc32fast::hash(&buffer[..body_end]);
    let checksum_ok  = stored_crc == computed_crc;
    if !checksum_ok {
        tracing::warn!("{}", ParseError::ChecksumMismatch { stored: stored_crc, computed: computed_crc });
    }

    Ok(ParsedContainer { header, sections, checksum_ok, stored_crc, computed_crc, overrun })
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a well-formed container (header, records, CRC trailer).
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    header:  ContainerHeader,
    records: Vec<(SectionHeader, Vec<u8>)>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.  `payload` is stored as given; set
    /// `FLAG_XZ_COMPRESSED` in `flags` only for already-compressed bytes.
    /// The size field is filled in by [`build`](Self::build).
    pub fn section(mut self, section_type: SectionType, flags: u8, payload: Vec<u8>) -> Self {
        let header = SectionHeader {
            section_type,
            reserved: 0,
            flags,
            size: 0,
        };
        self.records.push((header, payload));
        self
    }

    /// Serialize header, records and CRC trailer.  Fails when a payload is
    /// too large for the 32-bit size field.
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.header.write(&mut out)?;
        for (sh, payload) in &self.records {
            let header = SectionHeader { size: section_size(payload.len())?, ..*sh };
            header.write(&mut out)?;
            out.extend_from_slice(payload);
        }
        let crc = crc32fast::hash(&out);
        out.write_u32::<LittleEndian>(crc)?;
        Ok(out)
    }
}

fn section_size(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("section payload of {len} bytes exceeds the size field"))
    })
}
