//! Download placement with content-aware dedup
//!
//! Remote files are downloaded to a hidden temp path, hashed, and then
//! placed under their desired name. A name collision with identical content
//! reuses the existing file; differing content gets a `_N` suffix. The
//! suffix search is bounded so a pathological directory cannot loop forever.

use std::io;
use std::path::{Path, PathBuf};

use crate::hash::hash_file;

const MAX_SUFFIX: u32 = 9999;

/// Where a downloaded file should end up
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// A file with identical content already exists; reuse it
    Existing(PathBuf),

    /// Free path to move the download to
    New(PathBuf),
}

/// Resolve the destination for a download with content hash `content_hash`
/// that wants to be called `desired_name` inside `dir`.
pub(crate) fn place(dir: &Path, desired_name: &str, content_hash: &str) -> io::Result<Placement> {
    let candidate = dir.join(desired_name);
    if !candidate.exists() {
        return Ok(Placement::New(candidate));
    }
    if hash_file(&candidate)? == content_hash {
        return Ok(Placement::Existing(candidate));
    }

    let (stem, ext) = split_name(desired_name);
    for n in 1..=MAX_SUFFIX {
        let name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(Placement::New(candidate));
        }
        if hash_file(&candidate)? == content_hash {
            return Ok(Placement::Existing(candidate));
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {desired_name} after {MAX_SUFFIX} attempts"),
    ))
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_hex;
    use tempfile::TempDir;

    #[test]
    fn free_name_is_used_directly() {
        let dir = TempDir::new().unwrap();
        let placement = place(dir.path(), "shot.png", &sha256_hex(b"img")).unwrap();
        assert_eq!(placement, Placement::New(dir.path().join("shot.png")));
    }

    #[test]
    fn identical_content_is_reused() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shot.png"), b"img").unwrap();

        let placement = place(dir.path(), "shot.png", &sha256_hex(b"img")).unwrap();
        assert_eq!(placement, Placement::Existing(dir.path().join("shot.png")));
    }

    #[test]
    fn differing_content_gets_suffixed_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shot.png"), b"old").unwrap();

        let placement = place(dir.path(), "shot.png", &sha256_hex(b"new")).unwrap();
        assert_eq!(placement, Placement::New(dir.path().join("shot_1.png")));
    }

    #[test]
    fn suffix_search_skips_taken_names_and_reuses_matches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shot.png"), b"a").unwrap();
        std::fs::write(dir.path().join("shot_1.png"), b"b").unwrap();
        std::fs::write(dir.path().join("shot_2.png"), b"match").unwrap();

        let placement = place(dir.path(), "shot.png", &sha256_hex(b"match")).unwrap();
        assert_eq!(placement, Placement::Existing(dir.path().join("shot_2.png")));

        let placement = place(dir.path(), "shot.png", &sha256_hex(b"other")).unwrap();
        assert_eq!(placement, Placement::New(dir.path().join("shot_3.png")));
    }

    #[test]
    fn extensionless_names_suffix_cleanly() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"a").unwrap();

        let placement = place(dir.path(), "README", &sha256_hex(b"b")).unwrap();
        assert_eq!(placement, Placement::New(dir.path().join("README_1")));
    }
}
