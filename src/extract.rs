//! Extraction pipeline: blob → nested archive → `srcs.mfa` → firmware.
//!
//! Candidates are tried in blob order.  A candidate that is not a readable
//! archive, lacks the member, or yields no firmware is skipped (debug log
//! only); the first candidate that yields at least one image ends the run.
//! Only a failing sink aborts the loop, since that is not a property of any
//! one candidate.

use std::io;
use thiserror::Error;

use crate::carve::{ExtractedImage, MIN_FIRMWARE_SIZE};
use crate::legacy::{
    carve_legacy, LegacyArtifact, LegacyOptions, METADATA_PROBE_LEN, METADATA_TAG,
    MIN_STREAM_SIZE, MIN_UNCLASSIFIED_SIZE,
};
use crate::magic::MagicRegistry;
use crate::manifest::{ExtractionPath, ExtractionReport, ImageRecord, MANIFEST_NAME};
use crate::mfa::{self, ParsedContainer};
use crate::scanner::{candidate_offsets, read_member, sniff_member, MemberFormat, LEGACY_PROBE_LEN, MEMBER_NAME};
use crate::sink::ArtifactSink;

// ── ExtractOptions ────────────────────────────────────────────────────────────

/// Thresholds and switches for [`Extractor`].  Built once, borrowed by every
/// stage.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub member_name:           String,
    pub min_firmware_size:     usize,
    pub min_stream_size:       usize,
    /// Unclassified legacy streams are kept only when strictly larger.
    pub min_unclassified_size: usize,
    pub legacy_probe_len:      usize,
    pub metadata_probe_len:    usize,
    pub metadata_tag:          Vec<u8>,
    /// Dump the raw member and its sections when a parsed container yields
    /// no firmware.
    pub dump_unrecognized:     bool,
    pub write_manifest:        bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            member_name:           MEMBER_NAME.to_owned(),
            min_firmware_size:     MIN_FIRMWARE_SIZE,
            min_stream_size:       MIN_STREAM_SIZE,
            min_unclassified_size: MIN_UNCLASSIFIED_SIZE,
            legacy_probe_len:      LEGACY_PROBE_LEN,
            metadata_probe_len:    METADATA_PROBE_LEN,
            metadata_tag:          METADATA_TAG.to_vec(),
            dump_unrecognized:     false,
            write_manifest:        true,
        }
    }
}

impl ExtractOptions {
    pub fn legacy_options(&self) -> LegacyOptions<'_> {
        LegacyOptions {
            min_stream_size:       self.min_stream_size,
            min_payload_size:      self.min_firmware_size,
            min_unclassified_size: self.min_unclassified_size,
            metadata_tag:          &self.metadata_tag,
            metadata_probe_len:    self.metadata_probe_len,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No firmware extracted ({candidates} candidate archive(s) tried)")]
    NoCandidateSucceeded { candidates: usize },
    #[error("Failed to write {name}: {source}")]
    Sink { name: String, source: io::Error },
    #[error("Failed to encode manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

// ── Extractor ────────────────────────────────────────────────────────────────

pub struct Extractor<'a> {
    registry: &'a MagicRegistry,
    options:  &'a ExtractOptions,
}

impl<'a> Extractor<'a> {
    pub fn new(registry: &'a MagicRegistry, options: &'a ExtractOptions) -> Self {
        Self { registry, options }
    }

    /// Scan `blob` for nested archives and extract firmware from the first
    /// one that has any.  Every image and side artifact goes to `sink` as
    /// soon as it is produced.
    pub fn extract<S: ArtifactSink>(&self, blob: &[u8], sink: &mut S) -> Result<ExtractionReport, ExtractError> {
        let offsets = candidate_offsets(blob);
        tracing::info!(count = offsets.len(), "potential ZIP archive(s) found");

        for &offset in &offsets {
            let _span = tracing::debug_span!("archive", offset).entered();

            let member = match read_member(&blob[offset..], &self.options.member_name) {
                Ok(member) => member,
                Err(e) => {
                    tracing::debug!("skipping candidate: {e}");
                    continue;
                }
            };
            tracing::debug!(member = %self.options.member_name, len = member.len(), "member found");

            if let Some(report) = self.extract_member(offset, member, sink)? {
                if self.options.write_manifest {
                    put(sink, MANIFEST_NAME, &report.to_bytes()?)?;
                }
                tracing::info!("{}", report.summary());
                return Ok(report);
            }
            tracing::debug!("no firmware in candidate");
        }

        Err(ExtractError::NoCandidateSucceeded { candidates: offsets.len() })
    }

    /// Run the container parser, or the legacy carver, on one member.
    ///
    /// Returns `Ok(None)` when the member yielded no firmware.
    pub fn extract_member<S: ArtifactSink>(
        &self,
        offset: usize,
        member: Vec<u8>,
        sink:   &mut S,
    ) -> Result<Option<ExtractionReport>, ExtractError> {
        if sniff_member(&member, self.options.legacy_probe_len) == MemberFormat::Legacy {
            tracing::debug!("old MFA format detected, using direct XZ extraction");
            return self.run_legacy(offset, &member, sink);
        }

        match mfa::parse(&member) {
            Ok(container) if !container.sections.is_empty() => {
                let images = container.extract_firmwares(self.registry, self.options.min_firmware_size);
                if !images.is_empty() {
                    return self.persist_container(offset, &container, images, sink).map(Some);
                }
                if self.options.dump_unrecognized {
                    self.dump_container(offset, &member, &container, sink)?;
                }
            }
            Ok(_)  => tracing::debug!("container has no sections"),
            Err(e) => tracing::debug!("container parse failed: {e}"),
        }

        tracing::debug!("falling back to direct XZ extraction");
        self.run_legacy(offset, &member, sink)
    }

    fn persist_container<S: ArtifactSink>(
        &self,
        offset:    usize,
        container: &ParsedContainer,
        images:    Vec<ExtractedImage>,
        sink:      &mut S,
    ) -> Result<ExtractionReport, ExtractError> {
        let mut records = Vec::with_capacity(images.len());
        for image in images {
            let name = format!("firmware_{}_{}.bin", image.family.tag(), image.index);
            put(sink, &name, &image.data)?;
            tracing::debug!(family = %image.family, index = image.index, len = image.len(), "extracted firmware");
            records.push(ImageRecord::describe(name, image.family.tag(), &image.data));
        }
        Ok(ExtractionReport {
            archive_offset: offset as u64,
            path:           ExtractionPath::Container,
            checksum_ok:    Some(container.checksum_ok),
            images:         records,
            artifacts:      Vec::new(),
        })
    }

    fn run_legacy<S: ArtifactSink>(
        &self,
        offset: usize,
        member: &[u8],
        sink:   &mut S,
    ) -> Result<Option<ExtractionReport>, ExtractError> {
        let outcome = carve_legacy(member, self.registry.legacy_order(), &self.options.legacy_options());
        if !outcome.failed.is_empty() {
            tracing::debug!(streams = ?outcome.failed, "some xz streams failed to decode");
        }

        let mut images    = Vec::new();
        let mut artifacts = Vec::new();
        for artifact in &outcome.artifacts {
            let name = artifact.file_name();
            put(sink, &name, artifact.bytes())?;
            match artifact {
                LegacyArtifact::Firmware { image, .. } => {
                    images.push(ImageRecord::describe(name, image.family.tag(), &image.data));
                }
                _ => artifacts.push(name),
            }
        }

        if images.is_empty() {
            return Ok(None);
        }
        Ok(Some(ExtractionReport {
            archive_offset: offset as u64,
            path:           ExtractionPath::Legacy,
            checksum_ok:    None,
            images,
            artifacts,
        }))
    }

    fn dump_container<S: ArtifactSink>(
        &self,
        offset:    usize,
        member:    &[u8],
        container: &ParsedContainer,
        sink:      &mut S,
    ) -> Result<(), ExtractError> {
        put(sink, &format!("mfa_{offset:08x}_raw.bin"), member)?;
        for (section, payload) in &container.sections {
            put(sink, &format!("mfa_{offset:08x}_section_{}.bin", section.code()), payload)?;
        }
        tracing::debug!(sections = container.sections.len(), "dumped unrecognized container");
        Ok(())
    }
}

fn put<S: ArtifactSink>(sink: &mut S, name: &str, data: &[u8]) -> Result<(), ExtractError> {
    sink.put(name, data).map_err(|source| ExtractError::Sink { name: name.to_owned(), source })
}
