//! Local clipboard record store
//!
//! Persists clipboard history in SQLite and defines the record types shared
//! by the store, the sync engine, and the wire protocol. The wire type
//! ([`ClipboardItem`]) and the persisted type ([`ClipboardRecord`]) are kept
//! separate so that remote-only transport fields can never leak into the
//! local database.

mod database;

pub use database::HistoryStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error creating the database directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("No record with id {0}")]
    NotFound(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Clipboard content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Html,
    Rtf,
    Image,
    Files,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Html => "html",
            ContentKind::Rtf => "rtf",
            ContentKind::Image => "image",
            ContentKind::Files => "files",
        }
    }

    /// Kinds whose value references files on disk rather than inline text
    pub fn is_file_backed(&self) -> bool {
        matches!(self, ContentKind::Image | ContentKind::Files)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentKind::Text),
            "html" => Some(ContentKind::Html),
            "rtf" => Some(ContentKind::Rtf),
            "image" => Some(ContentKind::Image),
            "files" => Some(ContentKind::Files),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clipboard record as persisted locally.
///
/// `id` is client-generated, immutable and unique across devices.
/// `create_time` is an ISO-8601 timestamp that doubles as the logical clock
/// for conflict resolution: for two versions of the same id, the strictly
/// newer `create_time` wins and local wins ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ContentKind,

    /// Optional refinement of the kind (url/email/color/path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Inline text for text-like kinds, an image file name for `image`,
    /// a JSON-encoded path list for `files`
    pub value: String,

    /// Character count for text, byte size for binary content
    pub count: u64,

    #[serde(default)]
    pub favorite: bool,

    #[serde(rename = "createTime")]
    pub create_time: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// false = pending upload, true = synced
    #[serde(default, with = "synced_flag")]
    pub synced: bool,
}

/// The tri-state `synced` flag travels as 0/1 on the wire.
mod synced_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(d)? != 0)
    }
}

/// Reference to one uploaded member of a `files` record, carried inside the
/// JSON-encoded `remote_files` transport field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileRef {
    pub file_id: String,
    pub file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
}

/// A clipboard record as it travels over the channel.
///
/// Carries the persisted record plus write-once transport fields that drive
/// binary payload transfer. The transport fields are consumed during
/// remote-apply and never stored; converting to [`ClipboardRecord`] drops
/// them by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardItem {
    #[serde(flatten)]
    pub record: ClipboardRecord,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_name: Option<String>,

    /// JSON-encoded list of [`RemoteFileRef`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_files: Option<String>,

    /// Server-side duplicate marker, ignored on apply
    #[serde(
        rename = "_is_duplicate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_duplicate: Option<bool>,
}

impl ClipboardItem {
    pub fn from_record(record: ClipboardRecord) -> Self {
        Self {
            record,
            remote_file_id: None,
            remote_file_url: None,
            remote_file_name: None,
            remote_files: None,
            is_duplicate: None,
        }
    }

    /// Strip the transport-only fields
    pub fn into_record(self) -> ClipboardRecord {
        self.record
    }

    /// Decode the `remote_files` transport field, if present
    pub fn remote_file_refs(&self) -> Option<Vec<RemoteFileRef>> {
        self.remote_files
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Partial update applied to an existing record.
///
/// A patch that changes `value` invalidates the stored `content_hash`; the
/// engine recomputes it before the patch reaches the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(
        rename = "createTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub create_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> ClipboardRecord {
        ClipboardRecord {
            id: "x1".into(),
            kind: ContentKind::Text,
            subtype: None,
            value: "hello".into(),
            count: 5,
            favorite: false,
            create_time: "2026-08-23T10:00:00Z".into(),
            note: None,
            device_id: Some("dev-a".into()),
            device_name: Some("laptop".into()),
            content_hash: Some("abc".into()),
            synced: true,
        }
    }

    #[test]
    fn wire_field_names_match_protocol() {
        let json = serde_json::to_value(ClipboardItem::from_record(record())).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["createTime"], "2026-08-23T10:00:00Z");
        assert_eq!(json["synced"], 1);
        // Absent transport fields are omitted entirely
        assert!(json.get("remote_file_id").is_none());
    }

    #[test]
    fn into_record_strips_transport_fields() {
        let mut item = ClipboardItem::from_record(record());
        item.remote_file_id = Some("f-1".into());
        item.remote_files = Some("[]".into());
        item.is_duplicate = Some(true);

        let stripped = item.into_record();
        assert_eq!(stripped, record());
    }

    #[test]
    fn remote_files_field_decodes() {
        let refs = vec![RemoteFileRef {
            file_id: "f-1".into(),
            file_url: "/files/f-1".into(),
            original_name: Some("a.txt".into()),
            original_path: Some("/tmp/a.txt".into()),
        }];
        let mut item = ClipboardItem::from_record(record());
        item.remote_files = Some(serde_json::to_string(&refs).unwrap());

        assert_eq!(item.remote_file_refs().unwrap(), refs);
    }

    #[test]
    fn duplicate_marker_accepts_underscore_name() {
        let mut json = serde_json::to_value(ClipboardItem::from_record(record())).unwrap();
        json["_is_duplicate"] = serde_json::Value::Bool(true);

        let item: ClipboardItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.is_duplicate, Some(true));
    }
}
