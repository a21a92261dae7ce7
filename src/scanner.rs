//! Blob scanner: find nested ZIP archives in an opaque installer blob.
//!
//! The installer has no outer index.  Every `PK\x03\x04` local-header
//! signature is a candidate archive start; most are noise (headers of
//! unrelated members, bytes inside compressed data) and simply fail to open.

use std::io::{self, Cursor, Read};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::magic::{contains_marker, find_markers, XZ_STREAM_MARKER, ZIP_LOCAL_HEADER};

/// Member that carries the firmware container.
pub const MEMBER_NAME: &str = "srcs.mfa";
/// A legacy member shows an XZ marker within this many leading bytes.
pub const LEGACY_PROBE_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Not a readable ZIP archive: {0}")]
    Archive(#[from] ZipError),
    #[error("Archive has no member named '{0}'")]
    ArchiveMemberNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Offsets of every candidate nested archive in `blob`, in blob order.
pub fn candidate_offsets(blob: &[u8]) -> Vec<usize> {
    find_markers(blob, ZIP_LOCAL_HEADER)
}

/// Open the archive that starts at the front of `archive` and read `name`
/// fully.
///
/// `archive` may run past the archive's own end.  The reader locates the
/// central directory from the back, so when a later archive follows this
/// one its directory is found first; the view is then cut at that archive's
/// start and the search repeats until the directory found belongs to the
/// archive at offset zero.
pub fn read_member(archive: &[u8], name: &str) -> Result<Vec<u8>, ScanError> {
    let mut end = archive.len();
    let mut zip = loop {
        let zip = ZipArchive::new(Cursor::new(&archive[..end]))?;
        let start = usize::try_from(zip.offset()).unwrap_or(usize::MAX);
        if start == 0 {
            break zip;
        }
        if start >= end {
            return Err(ScanError::Archive(ZipError::InvalidArchive("archive starts past its own end".into())));
        }
        tracing::trace!(start, "central directory belongs to a later archive");
        end = start;
    };
    let mut member = match zip.by_name(name) {
        Ok(member)                 => member,
        Err(ZipError::FileNotFound) => return Err(ScanError::ArchiveMemberNotFound(name.to_owned())),
        Err(e)                     => return Err(e.into()),
    };
    let mut out = Vec::with_capacity(member.size().min(MAX_PREALLOC) as usize);
    member.read_to_end(&mut out)?;
    Ok(out)
}

/// Upper bound on the buffer reserved up front from a directory's
/// declared size; the rest grows as the member is actually read.
const MAX_PREALLOC: u64 = 16 << 20;

/// How a member should be parsed, judged from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFormat {
    /// Back-to-back XZ streams with no section table.
    Legacy,
    /// Try the MFA section table first.
    Container,
}

pub fn sniff_member(member: &[u8], probe_len: usize) -> MemberFormat {
    let head = &member[..member.len().min(probe_len)];
    if contains_marker(head, XZ_STREAM_MARKER) {
        MemberFormat::Legacy
    } else {
        MemberFormat::Container
    }
}
