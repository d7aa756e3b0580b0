//! Flat output directory for rendered reports.
//!
//! Files are keyed by case identifier only. A second write with the same
//! stem replaces the first; nothing is ever read back or removed.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::report::identifier;

/// Stem used when the payload carries no usable case identifier.
pub const FALLBACK_STEM: &str = "exam";

/// Longest stem kept, in bytes. Leaves room for the extension under the
/// usual 255-byte file name limit.
pub const MAX_STEM_BYTES: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination for `<stem>.<ext>` after sanitising the stem.
    pub fn path_for(&self, stem: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", sanitize_stem(stem), ext))
    }

    pub fn write_text(&self, stem: &str, ext: &str, contents: &str) -> Result<PathBuf, StoreError> {
        self.write_bytes(stem, ext, contents.as_bytes())
    }

    pub fn write_bytes(&self, stem: &str, ext: &str, contents: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_for(stem, ext);
        fs::write(&path, contents).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = contents.len(), "report written");
        Ok(path)
    }
}

/// File stem for a payload: its `case_id`, or the fallback literal.
pub fn file_stem(payload: &Value) -> String {
    identifier(payload, "case_id").unwrap_or_else(|| FALLBACK_STEM.to_string())
}

/// Restrict a caller-supplied stem to `[A-Za-z0-9._-]`. Anything else becomes
/// `_`, leading dots are removed so the name is never hidden or relative, the
/// result is cut to [`MAX_STEM_BYTES`], and an empty result falls back to
/// [`FALLBACK_STEM`].
pub fn sanitize_stem(raw: &str) -> String {
    let mut replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // ASCII only from here, so any byte index is a char boundary
    replaced.truncate(MAX_STEM_BYTES);
    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}
