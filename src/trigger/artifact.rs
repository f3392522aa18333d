// src/trigger/artifact.rs

//! Artifact presence probing.
//!
//! An artifact is a file or a directory. Its fingerprint is a blake3 hash of
//! its content (file) or of its sorted entry names plus file contents
//! (directory), so "new input" means "fingerprint changed since the stage
//! last consumed it". An empty directory counts as absent.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blake3::Hasher;
use thiserror::Error;
use tracing::debug;

use crate::fs::FileSystem;

/// A probe could not be evaluated (permissions, IO errors, ...).
///
/// Callers treat this as "condition not met this tick".
#[derive(Debug, Error)]
#[error("resource unavailable: {path:?}: {source}")]
pub struct ResourceUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: anyhow::Error,
}

/// Read-only view of pipeline artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactProbe {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl ArtifactProbe {
    /// Relative artifact paths are resolved against `root`.
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || self.root.as_os_str().is_empty() || self.root == Path::new(".") {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Current fingerprint of the artifact, or `None` if it is absent.
    pub fn fingerprint(&self, path: &Path) -> Result<Option<String>, ResourceUnavailable> {
        let full = self.resolve(path);
        let unavailable = |source: anyhow::Error| ResourceUnavailable {
            path: full.clone(),
            source,
        };

        if !self.fs.exists(&full) {
            return Ok(None);
        }

        if self.fs.is_dir(&full) {
            let mut entries = self.fs.read_dir(&full).map_err(unavailable)?;
            if entries.is_empty() {
                return Ok(None);
            }
            entries.sort();

            let mut hasher = Hasher::new();
            for entry in entries {
                let name = entry
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                hasher.update(name.as_bytes());
                hasher.update(&[0]);
                if !self.fs.is_dir(&entry) {
                    let file_hash = self.hash_file(&entry).map_err(unavailable)?;
                    hasher.update(file_hash.as_bytes());
                }
            }
            let hash = hasher.finalize().to_hex().to_string();
            debug!(path = ?full, hash = %hash, "fingerprinted artifact directory");
            return Ok(Some(hash));
        }

        let hash = self.hash_file(&full).map_err(unavailable)?;
        debug!(path = ?full, hash = %hash, "fingerprinted artifact file");
        Ok(Some(hash))
    }

    fn hash_file(&self, path: &Path) -> anyhow::Result<String> {
        let mut reader = self.fs.open_read(path)?;
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}
