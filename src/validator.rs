//! File eligibility checks for ingestion.
//!
//! Checks run in order and short-circuit on the first failure: path
//! confinement, extension allowlist, size limit, UTF-8 decoding. Accepted
//! files get a SHA-256 content hash for identity and dedup.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::IngestConfig;
use crate::error::{Error, RejectReason, Result};
use crate::models::SourceFile;

pub struct FileValidator {
    /// Canonicalized ingestion root; any path resolving outside it is
    /// rejected, not clamped.
    root: PathBuf,
    max_bytes: u64,
    extensions: HashSet<String>,
}

impl FileValidator {
    pub fn new(root: &Path, config: &IngestConfig) -> Result<Self> {
        let root = root.canonicalize().map_err(|source| Error::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root,
            max_bytes: config.max_file_bytes,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the file name carries an allowlisted extension. Cheap check
    /// usable as a walk filter before any read happens.
    pub fn has_supported_extension(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_lowercase(),
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext))
    }

    /// Resolve a path and confine it to the ingestion root.
    ///
    /// Returns the root-relative path. Must be called before reading the
    /// file; symlinks and `..` components are resolved first, so an
    /// escaping path is rejected rather than silently re-rooted.
    pub fn confine(&self, path: &Path) -> std::result::Result<PathBuf, RejectReason> {
        let resolved = path.canonicalize().map_err(|_| RejectReason::OutsideRoot)?;
        resolved
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| RejectReason::OutsideRoot)
    }

    /// Validate a file's path and content, producing a [`SourceFile`].
    pub fn validate(
        &self,
        path: &Path,
        bytes: &[u8],
    ) -> std::result::Result<SourceFile, RejectReason> {
        let relative = self.confine(path)?;

        if !self.has_supported_extension(&relative) {
            return Err(RejectReason::UnsupportedExtension);
        }

        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(RejectReason::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        let text = std::str::from_utf8(bytes).map_err(|_| RejectReason::EncodingError)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = format!("{:x}", hasher.finalize());

        Ok(SourceFile {
            path: relative.to_string_lossy().replace('\\', "/"),
            text: text.to_string(),
            size,
            hash,
        })
    }
}
