//! Content-addressing for deduplication and conflict comparison
//!
//! Clipboard records carry a SHA-256 content hash that is compared across
//! devices to detect duplicates and to dedup downloaded files on disk. The
//! hashing scheme depends on the content kind: text-like kinds hash the
//! `"{type}:{value}"` string, images hash the referenced file's raw bytes,
//! and file lists hash the colon-joined per-file digests in list order
//! (reordering the same file set changes the hash by contract).

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::store::ContentKind;

/// Outcome of a content hash computation.
///
/// File-backed kinds degrade to hashing the path string when the file cannot
/// be read. The degraded digest is still deterministic, but callers that care
/// (tests, dedup) can tell the two apart instead of receiving an
/// indistinguishable string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hashed {
    /// Digest over the actual content bytes
    Content(String),

    /// Digest over the `"{type}:{value}"` string because the underlying
    /// file(s) could not be read
    Fallback(String),
}

impl Hashed {
    /// The hex digest, regardless of how it was obtained
    pub fn digest(&self) -> &str {
        match self {
            Hashed::Content(d) | Hashed::Fallback(d) => d,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Hashed::Fallback(_))
    }

    pub fn into_digest(self) -> String {
        match self {
            Hashed::Content(d) | Hashed::Fallback(d) => d,
        }
    }
}

/// Hex-encoded SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

fn text_like_digest(kind: ContentKind, value: &str) -> String {
    sha256_hex(format!("{}:{}", kind.as_str(), value).as_bytes())
}

/// Compute the content hash for a clipboard value.
///
/// `value` carries inline text for text-like kinds, a path for `image`, and a
/// JSON-encoded path list for `files`. Paths are resolved relative to
/// `base_dir` when not absolute. Never errors: unreadable files degrade to
/// the text-like scheme over the original value with a warning.
pub fn hash_content(kind: ContentKind, value: &str, base_dir: &Path) -> Hashed {
    match kind {
        ContentKind::Text | ContentKind::Html | ContentKind::Rtf => {
            Hashed::Content(text_like_digest(kind, value))
        }
        ContentKind::Image => {
            let path = resolve(value, base_dir);
            match hash_file(&path) {
                Ok(digest) => Hashed::Content(digest),
                Err(e) => {
                    warn!("Failed to read {} for hashing: {}", path.display(), e);
                    Hashed::Fallback(text_like_digest(kind, value))
                }
            }
        }
        ContentKind::Files => {
            let paths: Vec<String> = match serde_json::from_str(value) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("Invalid file list value: {}", e);
                    return Hashed::Fallback(text_like_digest(kind, value));
                }
            };

            let mut digests = Vec::with_capacity(paths.len());
            for p in &paths {
                match hash_file(&resolve(p, base_dir)) {
                    Ok(digest) => digests.push(digest),
                    Err(e) => {
                        warn!("Failed to read {} for hashing: {}", p, e);
                        return Hashed::Fallback(text_like_digest(kind, value));
                    }
                }
            }

            // Order-sensitive: the combined digest is over the per-file
            // digests in list order.
            Hashed::Content(sha256_hex(digests.join(":").as_bytes()))
        }
    }
}

/// Recompute and compare against an expected digest
pub fn verify(kind: ContentKind, value: &str, base_dir: &Path, expected: &str) -> bool {
    hash_content(kind, value, base_dir).digest() == expected
}

fn resolve(value: &str, base_dir: &Path) -> std::path::PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
