use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// JSON document on disk, replaced atomically on every write.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes to a sibling temp file, syncs it and renames it over the target,
    /// so readers see either the old document or the new one.
    pub fn write_to_file<T: Serialize>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(json.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        Ok(())
    }

    pub fn read_from_file<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let data: T = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        Ok(data)
    }
}
