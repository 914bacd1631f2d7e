//! Files picked by the user, before and after validation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;

/// Where the bytes of a candidate file come from when it is transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    Path(PathBuf),
    Memory(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    name: String,
    byte_size: u64,
    extension: String,
    contents: FileContents,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, byte_size: u64, contents: FileContents) -> Self {
        let name = name.into();
        let extension = extension_of(&name);
        Self {
            name,
            byte_size,
            extension,
            contents,
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::new(name, bytes.len() as u64, FileContents::Memory(bytes))
    }

    /// Builds a candidate from file metadata; contents are read only at upload time.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to read metadata for '{}'", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("'{}' is not a regular file", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(
            name,
            metadata.len(),
            FileContents::Path(path.to_path_buf()),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Lower-cased final `.`-delimited segment including the dot, or empty.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn contents(&self) -> &FileContents {
        &self.contents
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    pub async fn read_contents(&self) -> std::io::Result<Bytes> {
        match &self.contents {
            FileContents::Memory(bytes) => Ok(bytes.clone()),
            FileContents::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) => name[idx..].to_ascii_lowercase(),
        None => String::new(),
    }
}
