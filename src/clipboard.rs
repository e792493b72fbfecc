//! OS clipboard seam
//!
//! Wraps arboard behind a trait so the sync engine can be exercised with a
//! fake clipboard in tests. arboard's handles are not `Send`, so every call
//! creates one inside `spawn_blocking`.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::store::{ClipboardRecord, ContentKind};

/// Clipboard operation errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The OS clipboard could not be accessed
    #[error("Clipboard access failed: {0}")]
    Access(String),

    /// The blocking task was cancelled
    #[error("Clipboard task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for clipboard operations
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// Read/write access to the OS clipboard
#[async_trait]
pub trait SystemClipboard: Send + Sync {
    /// Current text contents, if any
    async fn read_text(&self) -> Result<Option<String>>;

    /// Write an applied record to the OS clipboard. `resolved_path` is the
    /// local absolute path for file-backed kinds.
    async fn write(&self, record: &ClipboardRecord, resolved_path: Option<&Path>) -> Result<()>;
}

/// arboard-backed implementation
pub struct ArboardClipboard;

impl ArboardClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArboardClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemClipboard for ArboardClipboard {
    async fn read_text(&self) -> Result<Option<String>> {
        tokio::task::spawn_blocking(|| {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Access(e.to_string()))?;
            match clipboard.get_text() {
                Ok(text) if !text.is_empty() => Ok(Some(text)),
                // Empty or non-text contents read as nothing
                _ => Ok(None),
            }
        })
        .await?
    }

    async fn write(&self, record: &ClipboardRecord, resolved_path: Option<&Path>) -> Result<()> {
        match record.kind {
            ContentKind::Text | ContentKind::Rtf => {
                let value = record.value.clone();
                tokio::task::spawn_blocking(move || {
                    let mut clipboard = arboard::Clipboard::new()
                        .map_err(|e| ClipboardError::Access(e.to_string()))?;
                    clipboard
                        .set_text(value)
                        .map_err(|e| ClipboardError::Access(e.to_string()))
                })
                .await?
            }
            ContentKind::Html => {
                let value = record.value.clone();
                tokio::task::spawn_blocking(move || {
                    let mut clipboard = arboard::Clipboard::new()
                        .map_err(|e| ClipboardError::Access(e.to_string()))?;
                    clipboard
                        .set_html(value, None::<String>)
                        .map_err(|e| ClipboardError::Access(e.to_string()))
                })
                .await?
            }
            ContentKind::Image | ContentKind::Files => {
                // Binary payloads are materialized on disk by the sync
                // engine; arboard cannot place them on the clipboard.
                debug!(
                    "Skipping OS clipboard write for {} content (saved to {:?})",
                    record.kind, resolved_path
                );
                Ok(())
            }
        }
    }
}

/// Classify a text value into an optional subtype
pub fn detect_subtype(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() > 2048 {
        return None;
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some("url".to_string());
    }

    if is_hex_color(trimmed) {
        return Some("color".to_string());
    }

    if is_email(trimmed) {
        return Some("email".to_string());
    }

    if is_path_like(trimmed) {
        return Some("path".to_string());
    }

    None
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_email(s: &str) -> bool {
    if s.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn is_path_like(s: &str) -> bool {
    if s.contains('\n') {
        return false;
    }
    // Unix absolute, home-relative, or Windows drive paths
    s.starts_with('/') && s.len() > 1
        || s.starts_with("~/")
        || (s.len() > 2
            && s.as_bytes()[0].is_ascii_alphabetic()
            && &s[1..3] == ":\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_urls_and_colors() {
        assert_eq!(detect_subtype("https://example.com/x"), Some("url".into()));
        assert_eq!(detect_subtype("#ff8800"), Some("color".into()));
        assert_eq!(detect_subtype("#f80"), Some("color".into()));
        assert_eq!(detect_subtype("#zzz"), None);
    }

    #[test]
    fn detects_emails_and_paths() {
        assert_eq!(detect_subtype("user@example.com"), Some("email".into()));
        assert_eq!(detect_subtype("not an@email here"), None);
        assert_eq!(detect_subtype("/usr/local/bin"), Some("path".into()));
        assert_eq!(detect_subtype("C:\\Users\\me"), Some("path".into()));
    }

    #[test]
    fn plain_text_has_no_subtype() {
        assert_eq!(detect_subtype("hello world"), None);
        assert_eq!(detect_subtype(""), None);
    }
}
