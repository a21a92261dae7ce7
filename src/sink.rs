use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Destination for extracted images and side artifacts.
pub trait ArtifactSink {
    fn put(&mut self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Writes each artifact as a file in one output directory.
#[derive(Debug, Clone)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    /// Create the output directory (and parents) if it does not exist.
    pub fn create<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }
}

impl ArtifactSink for DirSink {
    fn put(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        File::create(self.root.join(name))?.write_all(data)
    }
}

/// Keeps artifacts in memory, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }
}

impl ArtifactSink for MemorySink {
    fn put(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.files.insert(name.to_owned(), data.to_vec());
        Ok(())
    }
}
