use serde::{Deserialize, Serialize};

/// File name of the JSON manifest written next to the images.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Which parser produced the images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPath {
    Container,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_name: String,
    pub family:    String,
    pub size:      u64,
    /// BLAKE3 of the image bytes, hex encoded.
    pub blake3:    String,
}

impl ImageRecord {
    pub fn describe(file_name: String, family: &str, data: &[u8]) -> Self {
        Self {
            file_name,
            family: family.to_owned(),
            size:   data.len() as u64,
            blake3: blake3::hash(data).to_hex().to_string(),
        }
    }
}

/// Summary of a successful extraction.  Carries no timestamps, so the same
/// input always produces the same manifest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Offset of the nested archive the images came from.
    pub archive_offset: u64,
    pub path:           ExtractionPath,
    /// Container CRC verdict; `None` on the legacy path.
    pub checksum_ok:    Option<bool>,
    pub images:         Vec<ImageRecord>,
    /// Side artifacts (metadata, unclassified streams, dumps).
    #[serde(default)]
    pub artifacts:      Vec<String>,
}

impl ExtractionReport {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} firmware image(s) via {:?} path from archive at offset 0x{:x}",
            self.images.len(),
            self.path,
            self.archive_offset,
        )
    }
}
