//! SQLite-backed clipboard history store

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use crate::store::{ClipboardRecord, ContentKind, RecordPatch, Result, StoreError};

const SCHEMA_VERSION: u32 = 1;

/// SQLite wrapper for the clipboard history table.
///
/// All writes that can race across application windows go through single
/// statements (notably the per-id upsert), so last-write-wins by
/// `create_time` holds without explicit locking.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the history database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for cross-window concurrency
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        let version = get_schema_version(&conn)?;
        if version == 0 {
            create_schema(&conn)?;
        } else if version < SCHEMA_VERSION {
            migrate_schema(&conn, version)?;
        }

        Ok(())
    }

    /// Insert a new record. New local records default to pending upload.
    pub async fn insert(&self, record: &ClipboardRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO history
             (id, kind, subtype, value, count, favorite, create_time, note,
              device_id, device_name, content_hash, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.kind.as_str(),
                record.subtype,
                record.value,
                record.count as i64,
                i64::from(record.favorite),
                record.create_time,
                record.note,
                record.device_id,
                record.device_name,
                record.content_hash,
                i64::from(record.synced),
            ],
        )?;
        Ok(())
    }

    /// Insert or replace by id in a single statement.
    pub async fn upsert(&self, record: &ClipboardRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO history
             (id, kind, subtype, value, count, favorite, create_time, note,
              device_id, device_name, content_hash, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
               kind = excluded.kind,
               subtype = excluded.subtype,
               value = excluded.value,
               count = excluded.count,
               favorite = excluded.favorite,
               create_time = excluded.create_time,
               note = excluded.note,
               device_id = excluded.device_id,
               device_name = excluded.device_name,
               content_hash = excluded.content_hash,
               synced = excluded.synced",
            params![
                record.id,
                record.kind.as_str(),
                record.subtype,
                record.value,
                record.count as i64,
                i64::from(record.favorite),
                record.create_time,
                record.note,
                record.device_id,
                record.device_name,
                record.content_hash,
                i64::from(record.synced),
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ClipboardRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                "SELECT id, kind, subtype, value, count, favorite, create_time, note,
                        device_id, device_name, content_hash, synced
                 FROM history WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM history WHERE id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM history", [])?;
        Ok(())
    }

    /// Apply a partial update to an existing record
    pub async fn apply_patch(&self, id: &str, patch: &RecordPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE history SET
               value = COALESCE(?2, value),
               favorite = COALESCE(?3, favorite),
               note = COALESCE(?4, note),
               subtype = COALESCE(?5, subtype),
               create_time = COALESCE(?6, create_time),
               content_hash = COALESCE(?7, content_hash)
             WHERE id = ?1",
            params![
                id,
                patch.value,
                patch.favorite.map(i64::from),
                patch.note,
                patch.subtype,
                patch.create_time,
                patch.content_hash,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_synced(&self, id: &str, synced: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE history SET synced = ?2 WHERE id = ?1",
            params![id, i64::from(synced)],
        )?;
        Ok(())
    }

    pub async fn set_create_time(&self, id: &str, create_time: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE history SET create_time = ?2 WHERE id = ?1",
            params![id, create_time],
        )?;
        Ok(())
    }

    /// Pending (unsynced) records, oldest first, up to `limit`
    pub async fn pending(&self, limit: u32) -> Result<Vec<ClipboardRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, kind, subtype, value, count, favorite, create_time, note,
                    device_id, device_name, content_hash, synced
             FROM history WHERE synced = 0
             ORDER BY create_time ASC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recent records, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<ClipboardRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, kind, subtype, value, count, favorite, create_time, note,
                    device_id, device_name, content_hash, synced
             FROM history
             ORDER BY create_time DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ClipboardRecord> {
    let kind: String = row.get(1)?;
    let kind = ContentKind::parse(&kind).unwrap_or(ContentKind::Text);
    let count: i64 = row.get(4)?;
    let favorite: i64 = row.get(5)?;
    let synced: i64 = row.get(11)?;

    Ok(ClipboardRecord {
        id: row.get(0)?,
        kind,
        subtype: row.get(2)?,
        value: row.get(3)?,
        count: count as u64,
        favorite: favorite != 0,
        create_time: row.get(6)?,
        note: row.get(7)?,
        device_id: row.get(8)?,
        device_name: row.get(9)?,
        content_hash: row.get(10)?,
        synced: synced != 0,
    })
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS history (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            subtype TEXT,
            value TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            favorite INTEGER NOT NULL DEFAULT 0,
            create_time TEXT NOT NULL,
            note TEXT,
            device_id TEXT,
            device_name TEXT,
            content_hash TEXT,
            synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_history_create_time ON history(create_time DESC);
        CREATE INDEX IF NOT EXISTS idx_history_synced ON history(synced);
        ",
    )?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![SCHEMA_VERSION],
    )?;

    Ok(())
}

fn migrate_schema(_conn: &Connection, _from_version: u32) -> Result<()> {
    // Future migrations would go here
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, create_time: &str) -> ClipboardRecord {
        ClipboardRecord {
            id: id.to_string(),
            kind: ContentKind::Text,
            subtype: None,
            value: format!("value-{id}"),
            count: 8,
            favorite: false,
            create_time: create_time.to_string(),
            note: None,
            device_id: Some("dev-a".into()),
            device_name: Some("laptop".into()),
            content_hash: Some("hash".into()),
            synced: false,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let r = record("x1", "2026-08-23T10:00:00Z");

        store.insert(&r).await.unwrap();
        let got = store.get("x1").await.unwrap().unwrap();
        assert_eq!(got, r);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let mut r = record("x1", "2026-08-23T10:00:00Z");
        store.insert(&r).await.unwrap();

        r.value = "changed".into();
        r.synced = true;
        store.upsert(&r).await.unwrap();

        let got = store.get("x1").await.unwrap().unwrap();
        assert_eq!(got.value, "changed");
        assert!(got.synced);

        // Still exactly one row
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_is_oldest_first_and_bounded() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store
            .insert(&record("b", "2026-08-23T11:00:00Z"))
            .await
            .unwrap();
        store
            .insert(&record("a", "2026-08-23T10:00:00Z"))
            .await
            .unwrap();
        store
            .insert(&record("c", "2026-08-23T12:00:00Z"))
            .await
            .unwrap();

        let pending = store.pending(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "a");
        assert_eq!(pending[1].id, "b");
        assert_eq!(store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn synced_records_are_not_pending() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store
            .insert(&record("a", "2026-08-23T10:00:00Z"))
            .await
            .unwrap();
        store.set_synced("a", true).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn patch_updates_only_present_fields() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        store
            .insert(&record("a", "2026-08-23T10:00:00Z"))
            .await
            .unwrap();

        let patch = RecordPatch {
            favorite: Some(true),
            note: Some("keep".into()),
            ..Default::default()
        };
        store.apply_patch("a", &patch).await.unwrap();

        let got = store.get("a").await.unwrap().unwrap();
        assert!(got.favorite);
        assert_eq!(got.note.as_deref(), Some("keep"));
        assert_eq!(got.value, "value-a");
    }

    #[tokio::test]
    async fn patch_on_missing_record_errors() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let patch = RecordPatch {
            favorite: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            store.apply_patch("nope", &patch).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_many_removes_only_given_ids() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        for id in ["a", "b", "c"] {
            store
                .insert(&record(id, "2026-08-23T10:00:00Z"))
                .await
                .unwrap();
        }

        store
            .delete_many(&["a".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
        assert!(store.get("c").await.unwrap().is_none());
    }
}
