use mfa_extract::codec::{Codec, XzCodec};
use mfa_extract::extract::{ExtractError, ExtractOptions, Extractor};
use mfa_extract::magic::{Family, MagicRegistry};
use mfa_extract::manifest::{ExtractionPath, ExtractionReport, MANIFEST_NAME};
use mfa_extract::mfa::{self, ContainerBuilder, SectionType, FLAG_XZ_COMPRESSED};
use mfa_extract::sink::{DirSink, MemorySink};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::Command;
use tempfile::{tempdir, NamedTempFile};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const MIN_FW: usize = 0x10000;

// ── fixtures ─────────────────────────────────────────────────────────────────

/// Incompressible filler (xorshift32) so compressed streams keep their size.
fn noise(len: usize, mut seed: u32) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed >> 24) as u8
        })
        .collect()
}

fn firmware(family: Family, len: usize, seed: u32) -> Vec<u8> {
    let mut v = family.signature().to_vec();
    v.extend(noise(len, seed));
    v
}

fn zip_with(name: &str, data: &[u8]) -> Vec<u8> {
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zw.start_file(name, opts).unwrap();
    zw.write_all(data).unwrap();
    zw.finish().unwrap().into_inner()
}

/// An installer-like blob: stub bytes followed by one nested archive.
fn installer(member: &[u8]) -> Vec<u8> {
    let mut blob = b"MZ\x90\x00 self-extracting stub ".repeat(8);
    blob.extend(zip_with("srcs.mfa", member));
    blob
}

fn run(blob: &[u8]) -> (Result<ExtractionReport, ExtractError>, MemorySink) {
    let (reg, opts) = (MagicRegistry::builtin(), ExtractOptions::default());
    let mut sink = MemorySink::new();
    let result = Extractor::new(&reg, &opts).extract(blob, &mut sink);
    (result, sink)
}

fn read_dir(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap())
        })
        .collect()
}

// ── container path ───────────────────────────────────────────────────────────

#[test]
fn test_single_data_section_roundtrip() {
    let fw = firmware(Family::Fs4, MIN_FW + 100, 1);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, fw.clone()).build().unwrap();

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.path, ExtractionPath::Container);
    assert_eq!(report.images.len(), 1);
    assert_eq!(report.images[0].file_name, "firmware_fs4_0.bin");
    assert_eq!(sink.get("firmware_fs4_0.bin"), Some(fw.as_slice()));
}

#[test]
fn test_size_floor_boundary() {
    let exact = firmware(Family::Fs5, MIN_FW, 2);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, exact.clone()).build().unwrap();
    let (result, sink) = run(&installer(&member));
    assert_eq!(result.unwrap().images.len(), 1);
    assert_eq!(sink.get("firmware_fs5_0.bin"), Some(exact.as_slice()));

    let short = firmware(Family::Fs5, MIN_FW - 1, 2);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, short).build().unwrap();
    let (result, sink) = run(&installer(&member));
    assert!(matches!(result, Err(ExtractError::NoCandidateSucceeded { .. })));
    assert!(sink.files.is_empty());
}

#[test]
fn test_corrupt_checksum_keeps_images() {
    let fw = firmware(Family::Cx8, MIN_FW, 3);
    let good = ContainerBuilder::new()
        .section(SectionType::Map, 0, b"map".to_vec())
        .section(SectionType::Data, 0, fw.clone())
        .build().unwrap();
    let mut bad = good.clone();
    let n = bad.len();
    for b in &mut bad[n - 4..] {
        *b ^= 0xFF;
    }

    let (good_report, good_sink) = run(&installer(&good));
    let (bad_report, bad_sink) = run(&installer(&bad));
    let (good_report, bad_report) = (good_report.unwrap(), bad_report.unwrap());

    assert_eq!(good_report.checksum_ok, Some(true));
    assert_eq!(bad_report.checksum_ok, Some(false));
    assert_eq!(good_report.images, bad_report.images);
    assert_eq!(good_sink.get("firmware_cx8_0.bin"), bad_sink.get("firmware_cx8_0.bin"));
    assert!(!mfa::parse(&bad).unwrap().checksum_ok);
}

#[test]
fn test_compressed_data_section_after_map() {
    let fw = firmware(Family::Fs4, MIN_FW + 7, 4);
    // The MAP section pushes the XZ stream past the legacy probe window.
    let member = ContainerBuilder::new()
        .section(SectionType::Map, 0, vec![0u8; 128])
        .section(SectionType::Data, FLAG_XZ_COMPRESSED, XzCodec.compress(&fw).unwrap())
        .build().unwrap();

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.path, ExtractionPath::Container);
    assert_eq!(sink.get("firmware_fs4_0.bin"), Some(fw.as_slice()));
}

#[test]
fn test_early_xz_marker_routes_to_legacy_carver() {
    let fw = firmware(Family::Fs4, MIN_FW, 5);
    let member = ContainerBuilder::new()
        .section(SectionType::Data, FLAG_XZ_COMPRESSED, XzCodec.compress(&fw).unwrap())
        .build().unwrap();

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.path, ExtractionPath::Legacy);
    assert_eq!(sink.get("firmware_0_0.bin"), Some(fw.as_slice()));
}

#[test]
fn test_overrun_record_keeps_prior_sections() {
    let mut member = ContainerBuilder::new()
        .section(SectionType::Map, 0, vec![7u8; 40])
        .section(SectionType::Toc, 0, vec![8u8; 40])
        .build().unwrap();
    let n = member.len();
    let mut trailer = member.split_off(n - 4);
    member.extend_from_slice(&[3, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    member.append(&mut trailer);

    let parsed = mfa::parse(&member).unwrap();
    assert_eq!(parsed.sections.keys().copied().collect::<Vec<_>>(), vec![SectionType::Map, SectionType::Toc]);
    assert_eq!(parsed.overrun.map(|(_, size)| size), Some(u32::MAX));
}

#[test]
fn test_container_without_firmware_falls_back_to_legacy() {
    let mut meta = b"MT_00000".to_vec();
    meta.extend(noise(1500, 6));
    let fw = firmware(Family::Fs3, MIN_FW, 7);

    // Valid container with no DATA section; the XZ streams sit past the
    // probe window so the section table is tried first.
    let mut toc = vec![0u8; 200];
    toc.extend(XzCodec.compress(&meta).unwrap());
    toc.extend(XzCodec.compress(&fw).unwrap());
    let member = ContainerBuilder::new().section(SectionType::Toc, 0, toc).build().unwrap();

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.path, ExtractionPath::Legacy);
    assert_eq!(sink.get("metadata.bin"), Some(meta.as_slice()));
    assert_eq!(sink.get("firmware_1_0.bin"), Some(fw.as_slice()));
    assert_eq!(report.artifacts, vec!["metadata.bin".to_string()]);
}

// ── legacy path ──────────────────────────────────────────────────────────────

#[test]
fn test_legacy_metadata_and_firmware() {
    let mut meta = b"MT_00000 package metadata".to_vec();
    meta.extend(noise(2000, 8));
    let fw = firmware(Family::Fs5, MIN_FW + 512, 9);

    let mut member = XzCodec.compress(&meta).unwrap();
    member.extend(XzCodec.compress(&fw).unwrap());

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.path, ExtractionPath::Legacy);
    assert_eq!(report.checksum_ok, None);
    assert_eq!(sink.get("metadata.bin"), Some(meta.as_slice()));
    assert_eq!(sink.get("firmware_1_0.bin"), Some(fw.as_slice()));
    let names: Vec<_> = sink.files.keys().cloned().collect();
    assert_eq!(names, ["firmware_1_0.bin", MANIFEST_NAME, "metadata.bin"]);
}

#[test]
fn test_legacy_unclassified_stream_is_kept() {
    let blob_stream = noise(5000, 10);
    let fw = firmware(Family::Fs4, MIN_FW, 11);
    let mut member = XzCodec.compress(&fw).unwrap();
    member.extend(XzCodec.compress(&blob_stream).unwrap());

    let (result, sink) = run(&installer(&member));
    let report = result.unwrap();
    assert_eq!(report.images.len(), 1);
    assert_eq!(sink.get("firmware_0_0.bin"), Some(fw.as_slice()));
    assert_eq!(sink.get("xz_stream_1_decompressed.bin"), Some(blob_stream.as_slice()));
}

// ── scanning ─────────────────────────────────────────────────────────────────

#[test]
fn test_blob_without_archives_fails() {
    let (result, sink) = run(&noise(4096, 12));
    assert!(matches!(result, Err(ExtractError::NoCandidateSucceeded { candidates: 0 })));
    assert!(sink.files.is_empty());
}

#[test]
fn test_skips_archive_without_member() {
    let fw = firmware(Family::Fs4, MIN_FW, 13);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, fw.clone()).build().unwrap();

    let mut blob = b"stub".to_vec();
    blob.extend(zip_with("readme.txt", b"nothing to see"));
    let second = blob.len();
    blob.extend(zip_with("srcs.mfa", &member));

    let (result, sink) = run(&blob);
    let report = result.unwrap();
    assert_eq!(report.archive_offset as usize, second);
    assert_eq!(report.images.len(), 1);
    assert_eq!(sink.get("firmware_fs4_0.bin"), Some(fw.as_slice()));
}

#[test]
fn test_skips_earlier_member_without_firmware() {
    let empty = ContainerBuilder::new().section(SectionType::Map, 0, vec![0u8; 64]).build().unwrap();
    let fw = firmware(Family::Fs5, MIN_FW, 15);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, fw.clone()).build().unwrap();

    let mut blob = b"stub".to_vec();
    blob.extend(zip_with("srcs.mfa", &empty));
    let second = blob.len();
    blob.extend(zip_with("srcs.mfa", &member));

    let (result, sink) = run(&blob);
    let report = result.unwrap();
    assert_eq!(report.archive_offset as usize, second);
    assert_eq!(sink.get("firmware_fs5_0.bin"), Some(fw.as_slice()));
}

#[test]
fn test_false_zip_marker_is_skipped() {
    let fw = firmware(Family::Cx8, MIN_FW, 14);
    let member = ContainerBuilder::new().section(SectionType::Data, 0, fw.clone()).build().unwrap();

    let mut blob = b"junk PK\x03\x04 not an archive ".to_vec();
    let start = blob.len();
    blob.extend(zip_with("srcs.mfa", &member));

    let (result, sink) = run(&blob);
    let report = result.unwrap();
    assert_eq!(report.archive_offset as usize, start);
    assert_eq!(report.images.len(), 1);
    assert_eq!(sink.get("firmware_cx8_0.bin"), Some(fw.as_slice()));
}

// ── persistence ──────────────────────────────────────────────────────────────

#[test]
fn test_repeated_runs_are_byte_identical() {
    let member = ContainerBuilder::new()
        .section(SectionType::Data, 0, firmware(Family::Fs4, MIN_FW + 1, 15))
        .build().unwrap();
    let blob = installer(&member);
    let (reg, opts) = (MagicRegistry::builtin(), ExtractOptions::default());

    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for dir in [a.path(), b.path()] {
        let mut sink = DirSink::create(dir).unwrap();
        Extractor::new(&reg, &opts).extract(&blob, &mut sink).unwrap();
    }
    let (first, second) = (read_dir(a.path()), read_dir(b.path()));
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);

    let manifest = ExtractionReport::from_bytes(&first[MANIFEST_NAME]).unwrap();
    assert_eq!(manifest.images[0].blake3, blake3_hex(&first["firmware_fs4_0.bin"]));
}

fn blake3_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[test]
fn test_cli_exit_codes() {
    let bin = env!("CARGO_BIN_EXE_mfa-extract");
    let out = tempdir().unwrap();

    let empty = NamedTempFile::new().unwrap();
    fs::write(empty.path(), noise(1024, 16)).unwrap();
    let status = Command::new(bin)
        .arg("-f").arg(empty.path())
        .arg("-o").arg(out.path().join("none"))
        .output()
        .unwrap();
    assert_eq!(status.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&status.stdout).contains("No firmware extracted"));
    assert!(read_dir(&out.path().join("none")).is_empty());

    let member = ContainerBuilder::new()
        .section(SectionType::Data, 0, firmware(Family::Fs3, MIN_FW, 17))
        .build().unwrap();
    let input = NamedTempFile::new().unwrap();
    fs::write(input.path(), installer(&member)).unwrap();
    let status = Command::new(bin)
        .arg("-f").arg(input.path())
        .arg("-o").arg(out.path().join("fw"))
        .arg("-v")
        .arg("--no-manifest")
        .output()
        .unwrap();
    assert_eq!(status.status.code(), Some(0));
    let files = read_dir(&out.path().join("fw"));
    assert_eq!(files.keys().collect::<Vec<_>>(), ["firmware_fs3_0.bin"]);
}
