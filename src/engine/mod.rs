//! Sync engine
//!
//! Orchestrates local persistence, the sync transport, file transfer and the
//! OS clipboard. Local captures are hashed, policy-checked, uploaded and
//! marked synced; remote pushes are conflict-resolved by `createTime`,
//! materialized on disk (for binary kinds) and applied to the store and the
//! OS clipboard. Anything that cannot be uploaded stays queued (`synced = 0`)
//! for the next reconciliation pass.

mod files;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::SyncFeed;
use crate::clipboard::{detect_subtype, SystemClipboard};
use crate::config::{ConfigStore, SyncConfig};
use crate::hash::{hash_content, hash_file};
use crate::manager::{RemoteEvent, SyncTransport};
use crate::state::{BusEvent, SyncShared};
use crate::store::{
    ClipboardItem, ClipboardRecord, ContentKind, HistoryStore, RecordPatch, StoreError,
};
use crate::transfer::FileTransfer;
use crate::{Error, Result, SYNC_PAGE_SIZE};

use files::Placement;

/// Batch size for pending uploads
const UPLOAD_BATCH: u32 = 50;

/// Catch-up pages pulled in the foreground of a full sync
const INITIAL_PULL_BATCHES: u32 = 5;

/// Pause between background batches so reconciliation does not saturate
/// the connection
const BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Debounce for persisting the sync watermark
const WATERMARK_FLUSH_DELAY: Duration = Duration::from_secs(2);

/// How often the watcher polls the OS clipboard
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Where a clipboard change originated.
///
/// Applying a remote record writes to the OS clipboard, which the watcher
/// then observes; tagging that apply lets the engine drop the echo instead
/// of re-uploading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Captured from the local OS clipboard
    Local,

    /// Just applied from a remote push
    RemoteApplied,
}

pub struct SyncEngine {
    store: Arc<HistoryStore>,
    transport: Arc<dyn SyncTransport>,
    files: Arc<dyn FileTransfer>,
    clipboard: Arc<dyn SystemClipboard>,
    shared: Arc<SyncShared>,
    config: Arc<ConfigStore>,
    api: Arc<dyn SyncFeed>,
    enabled: AtomicBool,
    /// Single-flight guard for full_sync
    full_sync_running: AtomicBool,
    /// Content hash of the last record applied from remote; the watcher
    /// compares against it to attribute provenance
    last_remote_hash: Mutex<Option<String>>,
    /// Highest remote `createTime` applied but not yet persisted server-side
    watermark: Mutex<Option<String>>,
    flush_scheduled: AtomicBool,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<HistoryStore>,
        transport: Arc<dyn SyncTransport>,
        files: Arc<dyn FileTransfer>,
        clipboard: Arc<dyn SystemClipboard>,
        shared: Arc<SyncShared>,
        config: Arc<ConfigStore>,
        api: Arc<dyn SyncFeed>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            files,
            clipboard,
            shared,
            config,
            api,
            enabled: AtomicBool::new(false),
            full_sync_running: AtomicBool::new(false),
            last_remote_hash: Mutex::new(None),
            watermark: Mutex::new(None),
            flush_scheduled: AtomicBool::new(false),
        })
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Disable sync. Flushes the watermark so the server does not replay
    /// already-applied records on the next enable.
    pub async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Err(e) = self.flush_watermark().await {
            warn!("Watermark flush on disable failed: {}", e);
        }
    }

    /// Whether the engine both wants to sync and can reach the server
    pub fn is_active(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Compute a record's content hash off the async path; file-backed
    /// kinds read from disk
    async fn compute_hash(&self, kind: ContentKind, value: &str, base_dir: &Path) -> Result<String> {
        let value = value.to_string();
        let base = base_dir.to_path_buf();
        tokio::task::spawn_blocking(move || hash_content(kind, &value, &base).into_digest())
            .await
            .map_err(|e| Error::Other(format!("hash task failed: {e}")))
    }

    // --- Local-origin operations -----------------------------------------

    /// Upload a locally captured record that is already persisted with
    /// `synced = 0`. Remote-applied echoes are dropped here; an inactive
    /// engine leaves the record queued.
    pub async fn sync_insert(&self, record: &ClipboardRecord, provenance: Provenance) -> Result<()> {
        if provenance == Provenance::RemoteApplied {
            return Ok(());
        }
        if !self.is_active() {
            self.refresh_pending_gauge().await;
            return Ok(());
        }

        let outcome = self.upload_record(record).await;
        self.refresh_pending_gauge().await;
        outcome
    }

    /// Apply a local edit and push it. Offline edits re-queue the record.
    pub async fn sync_update(&self, id: &str, mut patch: RecordPatch) -> Result<()> {
        // A changed value invalidates the stored content hash
        if let Some(value) = &patch.value {
            if let Some(existing) = self.store.get(id).await? {
                let cfg = self.config.get();
                patch.content_hash =
                    Some(self.compute_hash(existing.kind, value, &cfg.image_dir).await?);
            }
        }

        self.store.apply_patch(id, &patch).await?;

        if !self.is_active() {
            self.store.set_synced(id, false).await?;
            self.refresh_pending_gauge().await;
            return Ok(());
        }

        match self.transport.update_clipboard(id, &patch).await {
            Ok(()) => {
                self.store.set_synced(id, true).await?;
                Ok(())
            }
            Err(e) => {
                self.store.set_synced(id, false).await?;
                self.refresh_pending_gauge().await;
                Err(e.into())
            }
        }
    }

    /// Delete locally and propagate. The local delete always wins even when
    /// the server is unreachable.
    pub async fn sync_delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        if self.is_active() {
            self.transport.delete_clipboard(id).await?;
        }
        Ok(())
    }

    pub async fn sync_batch_delete(&self, ids: &[String]) -> Result<()> {
        self.store.delete_many(ids).await?;
        if self.is_active() {
            self.transport.delete_clipboard_batch(ids).await?;
        }
        Ok(())
    }

    /// Wipe local history and the account's server-side history
    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear().await?;
        if self.is_active() {
            self.transport.clear_history().await?;
        }
        Ok(())
    }

    /// Upload up to `batch_size` queued records, oldest first. Failures are
    /// isolated per record; returns how many uploaded.
    pub async fn sync_pending(&self, batch_size: u32) -> Result<usize> {
        if !self.is_active() {
            return Ok(0);
        }

        let pending = self.store.pending(batch_size).await?;
        let mut uploaded = 0;

        for record in &pending {
            match self.upload_record(record).await {
                Ok(()) => uploaded += 1,
                Err(e) => warn!("Failed to upload pending record {}: {}", record.id, e),
            }
        }

        self.refresh_pending_gauge().await;
        if uploaded > 0 {
            debug!("Uploaded {}/{} pending records", uploaded, pending.len());
        }
        Ok(uploaded)
    }

    async fn upload_record(&self, record: &ClipboardRecord) -> Result<()> {
        let cfg = self.config.get();
        let mut record = record.clone();

        if record.content_hash.is_none() {
            let digest = self
                .compute_hash(record.kind, &record.value, &cfg.image_dir)
                .await?;
            let patch = RecordPatch {
                content_hash: Some(digest.clone()),
                ..Default::default()
            };
            self.store.apply_patch(&record.id, &patch).await?;
            record.content_hash = Some(digest);
        }

        if let Some(reason) = policy_violation(&record, &cfg) {
            // Keeping a policy-violating record in the queue would block
            // every reconciliation pass behind it
            debug!("Skipping upload of {}: {}", record.id, reason);
            self.store.set_synced(&record.id, true).await?;
            return Ok(());
        }

        if record.device_id.is_none() {
            record.device_id = Some(cfg.device_id.clone());
        }
        if record.device_name.is_none() {
            record.device_name = Some(cfg.device_name.clone());
        }

        let mut item = ClipboardItem::from_record(record);

        match item.record.kind {
            ContentKind::Image => {
                let path = resolve_path(&item.record.value, &cfg.image_dir);
                let uploaded = self.files.upload(&path, &cfg.device_id).await?;
                item.remote_file_id = Some(uploaded.file_id);
                item.remote_file_url = Some(uploaded.file_url);
                item.remote_file_name = Some(uploaded.file_name);
            }
            ContentKind::Files => {
                let paths: Vec<String> =
                    serde_json::from_str(&item.record.value).unwrap_or_default();
                let mut refs = Vec::with_capacity(paths.len());
                for p in &paths {
                    let path = resolve_path(p, &cfg.files_dir);
                    let uploaded = self.files.upload(&path, &cfg.device_id).await?;
                    refs.push(crate::store::RemoteFileRef {
                        file_id: uploaded.file_id,
                        file_url: uploaded.file_url,
                        original_name: Some(uploaded.file_name),
                        original_path: Some(p.clone()),
                    });
                }
                item.remote_files = Some(serde_json::to_string(&refs).map_err(
                    |e| Error::Other(format!("failed to encode file refs: {e}")),
                )?);
            }
            _ => {}
        }

        match self.transport.sync_clipboard(&item).await {
            Ok(()) => {
                self.store.set_synced(&item.record.id, true).await?;
                Ok(())
            }
            Err(e) => {
                self.store.set_synced(&item.record.id, false).await?;
                Err(e.into())
            }
        }
    }

    // --- Server catch-up ---------------------------------------------------

    /// Pull records other devices uploaded while this one was offline.
    ///
    /// Pulls up to `max_batches` pages in the foreground; a longer backlog
    /// continues on a background task so enabling sync stays responsive.
    pub async fn sync_from_server(self: &Arc<Self>, max_batches: u32) -> Result<u64> {
        if !self.is_active() {
            return Ok(0);
        }

        let cfg = self.config.get();
        let mut offset: u64 = 0;
        let mut applied: u64 = 0;
        let mut remaining = true;

        for _ in 0..max_batches {
            let (batch_applied, page_len, total) = self.pull_page(&cfg, offset).await?;
            applied += batch_applied;
            offset += page_len;

            if page_len == 0 || offset >= total {
                remaining = false;
                break;
            }
        }

        if applied > 0 {
            self.shared.bus().publish(BusEvent::RefreshClipboardList);
        }
        self.schedule_watermark_flush();

        if remaining {
            info!("Catch-up backlog continues in the background (offset {})", offset);
            let engine = self.clone();
            tokio::spawn(async move {
                let cfg = engine.config.get();
                let mut offset = offset;
                loop {
                    tokio::time::sleep(BATCH_PAUSE).await;
                    if !engine.is_active() {
                        break;
                    }
                    match engine.pull_page(&cfg, offset).await {
                        Ok((applied, page_len, total)) => {
                            offset += page_len;
                            if applied > 0 {
                                engine
                                    .shared
                                    .bus()
                                    .publish(BusEvent::RefreshClipboardList);
                            }
                            if page_len == 0 || offset >= total {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Background catch-up failed: {}", e);
                            break;
                        }
                    }
                }
                engine.schedule_watermark_flush();
            });
        }

        Ok(applied)
    }

    /// Fetch and apply one page; returns (applied, page length, total)
    async fn pull_page(self: &Arc<Self>, cfg: &SyncConfig, offset: u64) -> Result<(u64, u64, u64)> {
        let page = self
            .api
            .fetch_sync_updates(&cfg.device_id, SYNC_PAGE_SIZE, offset)
            .await?;

        let page_len = page.items.len() as u64;
        let mut applied = 0;

        for item in page.items {
            let id = item.record.id.clone();
            // The watermark tracks every record the server handed us, skipped
            // or not; otherwise stale pages replay on each catch-up
            self.note_watermark(&item.record.create_time);
            match self.handle_remote_sync(item).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to apply remote record {}: {}", id, e),
            }
        }

        Ok((applied, page_len, page.total))
    }

    /// Reconcile both directions: push the local queue, pull the remote
    /// backlog, then drain any remaining queue in the background.
    /// Concurrent calls coalesce into the running pass.
    pub async fn full_sync(self: &Arc<Self>) -> Result<()> {
        if !self.is_active() {
            debug!("Sync inactive, skipping full sync");
            return Ok(());
        }
        if self
            .full_sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Full sync already running, skipping");
            return Ok(());
        }

        let result = self.full_sync_inner().await;

        if result.is_err() {
            self.full_sync_running.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn full_sync_inner(self: &Arc<Self>) -> Result<()> {
        info!("Starting full sync");

        self.sync_pending(UPLOAD_BATCH).await?;

        // Ask the server to re-push anything still queued for this device
        if let Err(e) = self.transport.sync_pending().await {
            warn!("Server-side pending push request failed: {}", e);
        }

        let applied = self.sync_from_server(INITIAL_PULL_BATCHES).await?;
        self.shared.set_last_sync_now();
        info!("Full sync applied {} remote records", applied);

        // Drain the rest of the upload queue off the critical path
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                if !engine.is_active() {
                    break;
                }
                match engine.sync_pending(UPLOAD_BATCH).await {
                    Ok(0) => break,
                    Ok(_) => tokio::time::sleep(BATCH_PAUSE).await,
                    Err(e) => {
                        warn!("Background upload drain failed: {}", e);
                        break;
                    }
                }
            }
            engine.full_sync_running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    // --- Remote-origin operations -------------------------------------------

    /// Apply one record pushed (or pulled) from another device.
    ///
    /// Returns whether the record was applied; a stale or own-device record
    /// is skipped. For the same id, a strictly newer `createTime` wins and
    /// the local version wins ties.
    pub async fn handle_remote_sync(self: &Arc<Self>, item: ClipboardItem) -> Result<bool> {
        let cfg = self.config.get();

        if item.record.device_id.as_deref() == Some(cfg.device_id.as_str()) {
            debug!("Ignoring echo of own record {}", item.record.id);
            return Ok(false);
        }

        if let Some(existing) = self.store.get(&item.record.id).await? {
            // ISO-8601 strings compare chronologically
            if existing.create_time >= item.record.create_time {
                debug!("Local record {} is not older, keeping it", item.record.id);
                return Ok(false);
            }
        }

        let mut resolved_path: Option<PathBuf> = None;
        let mut value = item.record.value.clone();

        match item.record.kind {
            ContentKind::Image => {
                let file_id = item
                    .remote_file_id
                    .clone()
                    .ok_or_else(|| Error::Other("image record without remote file id".into()))?;
                let name = item
                    .remote_file_name
                    .clone()
                    .unwrap_or_else(|| item.record.value.clone());

                let path = self
                    .materialize(&file_id, &name, &cfg.image_dir)
                    .await?;
                value = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or(name);
                resolved_path = Some(path);
            }
            ContentKind::Files => {
                let refs = item.remote_file_refs().ok_or_else(|| {
                    Error::Other("files record without remote file refs".into())
                })?;

                let mut local_paths = Vec::with_capacity(refs.len());
                for r in &refs {
                    let name = r
                        .original_name
                        .clone()
                        .unwrap_or_else(|| r.file_id.clone());
                    let path = self.materialize(&r.file_id, &name, &cfg.files_dir).await?;
                    local_paths.push(path.to_string_lossy().to_string());
                }
                value = serde_json::to_string(&local_paths)
                    .map_err(|e| Error::Other(format!("failed to encode path list: {e}")))?;
            }
            _ => {}
        }

        let mut record = item.into_record();
        record.value = value;
        record.synced = true;

        self.store.upsert(&record).await?;

        if let Err(e) = self.clipboard.write(&record, resolved_path.as_deref()).await {
            warn!("Failed to write applied record to the OS clipboard: {}", e);
        }

        // The watcher reads whatever landed on the OS clipboard back as plain
        // text, so the echo must be recognized by the text-scheme digest of
        // the written value, not by the record's own-kind content hash.
        if !record.kind.is_file_backed() {
            let echo =
                hash_content(ContentKind::Text, &record.value, &cfg.image_dir).into_digest();
            *self
                .last_remote_hash
                .lock()
                .expect("hash lock poisoned") = Some(echo);
        }

        self.note_watermark(&record.create_time);
        self.schedule_watermark_flush();

        Ok(true)
    }

    /// Download a remote file into `dir` under `name`, deduplicating by
    /// content hash. The download lands on a temp path first so a failure
    /// never leaves a partial file under the final name.
    async fn materialize(&self, file_id: &str, name: &str, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".incoming-{}", uuid::Uuid::new_v4().simple()));
        self.files.download(file_id, &tmp).await?;

        // Hashing and the dedup scan both read files; keep them off the
        // async path
        let placement = {
            let tmp = tmp.clone();
            let dir = dir.to_path_buf();
            let name = name.to_string();
            tokio::task::spawn_blocking(move || -> Result<Placement> {
                let digest = hash_file(&tmp)?;
                Ok(files::place(&dir, &name, &digest)?)
            })
            .await
            .map_err(|e| Error::Other(format!("placement task failed: {e}")))??
        };

        match placement {
            Placement::Existing(path) => {
                tokio::fs::remove_file(&tmp).await?;
                debug!("Reusing identical file {}", path.display());
                Ok(path)
            }
            Placement::New(path) => {
                tokio::fs::rename(&tmp, &path).await?;
                Ok(path)
            }
        }
    }

    pub async fn handle_remote_delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        Ok(())
    }

    pub async fn handle_remote_batch_delete(&self, ids: &[String]) -> Result<()> {
        self.store.delete_many(ids).await?;
        Ok(())
    }

    pub async fn handle_remote_update(&self, id: &str, mut patch: RecordPatch) -> Result<()> {
        if let Some(value) = &patch.value {
            if let Some(existing) = self.store.get(id).await? {
                let cfg = self.config.get();
                patch.content_hash =
                    Some(self.compute_hash(existing.kind, value, &cfg.image_dir).await?);
            }
        }

        match self.store.apply_patch(id, &patch).await {
            Ok(()) => Ok(()),
            // An update for a record we never had (or already deleted)
            Err(StoreError::NotFound(_)) => {
                debug!("Remote update for unknown record {}, ignoring", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn handle_remote_clear(&self) -> Result<()> {
        self.store.clear().await?;
        Ok(())
    }

    pub async fn handle_timestamp_update(&self, id: &str, create_time: &str) -> Result<()> {
        self.store.set_create_time(id, create_time).await?;
        Ok(())
    }

    /// Drain the remote event queue until it closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RemoteEvent>) {
        while let Some(event) = events.recv().await {
            let outcome = match event {
                RemoteEvent::Sync(item) => self.handle_remote_sync(item).await.map(|_| ()),
                RemoteEvent::Deleted(id) => self.handle_remote_delete(&id).await,
                RemoteEvent::DeletedBatch(ids) => self.handle_remote_batch_delete(&ids).await,
                RemoteEvent::Updated(id, patch) => self.handle_remote_update(&id, patch).await,
                RemoteEvent::HistoryCleared => self.handle_remote_clear().await,
                RemoteEvent::TimestampUpdated { id, create_time } => {
                    self.handle_timestamp_update(&id, &create_time).await
                }
            };

            match outcome {
                Ok(()) => self.shared.bus().publish(BusEvent::RefreshClipboardList),
                Err(e) => warn!("Failed to apply remote event: {}", e),
            }
        }
        debug!("Remote event queue closed");
    }

    // --- Clipboard watcher ----------------------------------------------------

    /// Poll the OS clipboard and capture changes as new records.
    ///
    /// A change whose hash matches the last remote apply is the echo of that
    /// apply and is dropped instead of captured.
    pub fn start_clipboard_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut last_seen: Option<String> = None;

            loop {
                tokio::time::sleep(WATCH_INTERVAL).await;
                if !engine.enabled.load(Ordering::SeqCst) {
                    continue;
                }

                let text = match engine.clipboard.read_text().await {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Clipboard read failed: {}", e);
                        continue;
                    }
                };

                let cfg = engine.config.get();
                let digest =
                    hash_content(ContentKind::Text, &text, &cfg.image_dir).into_digest();
                if last_seen.as_deref() == Some(digest.as_str()) {
                    continue;
                }
                last_seen = Some(digest.clone());

                let provenance = {
                    let remote = engine
                        .last_remote_hash
                        .lock()
                        .expect("hash lock poisoned");
                    if remote.as_deref() == Some(digest.as_str()) {
                        Provenance::RemoteApplied
                    } else {
                        Provenance::Local
                    }
                };
                if provenance == Provenance::RemoteApplied {
                    debug!("Clipboard change is the echo of a remote apply");
                    continue;
                }

                let record = ClipboardRecord {
                    id: uuid::Uuid::new_v4().simple().to_string(),
                    kind: ContentKind::Text,
                    subtype: detect_subtype(&text),
                    count: text.chars().count() as u64,
                    value: text,
                    favorite: false,
                    create_time: chrono::Utc::now().to_rfc3339(),
                    note: None,
                    device_id: Some(cfg.device_id.clone()),
                    device_name: Some(cfg.device_name.clone()),
                    content_hash: Some(digest),
                    synced: false,
                };

                if let Err(e) = engine.store.insert(&record).await {
                    warn!("Failed to persist captured clipboard: {}", e);
                    continue;
                }
                engine.shared.bus().publish(BusEvent::RefreshClipboardList);

                if let Err(e) = engine.sync_insert(&record, Provenance::Local).await {
                    warn!("Failed to upload captured clipboard: {}", e);
                }
            }
        })
    }

    // --- Watermark ------------------------------------------------------------

    fn note_watermark(&self, create_time: &str) {
        let mut watermark = self.watermark.lock().expect("watermark lock poisoned");
        advance_watermark(&mut watermark, create_time);
    }

    /// Debounced watermark persist; bursts of applies collapse to one call
    fn schedule_watermark_flush(self: &Arc<Self>) {
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(WATERMARK_FLUSH_DELAY).await;
            engine.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = engine.flush_watermark().await {
                warn!("Watermark flush failed: {}", e);
            }
        });
    }

    async fn flush_watermark(&self) -> Result<()> {
        let watermark = self
            .watermark
            .lock()
            .expect("watermark lock poisoned")
            .clone();

        if let Some(sync_time) = watermark {
            let cfg = self.config.get();
            self.api.update_sync_time(&cfg.device_id, &sync_time).await?;
            debug!("Sync watermark advanced to {}", sync_time);
        }
        Ok(())
    }

    async fn refresh_pending_gauge(&self) {
        match self.store.pending_count().await {
            Ok(count) => self.shared.set_pending_count(count),
            Err(e) => warn!("Failed to count pending records: {}", e),
        }
    }
}

/// Check a record against the configured sync policy. Returns the reason a
/// record must not be uploaded, if any.
fn policy_violation(record: &ClipboardRecord, cfg: &SyncConfig) -> Option<String> {
    if cfg.max_sync_size > 0
        && record.kind.is_file_backed()
        && record.count > cfg.max_sync_size
    {
        return Some(format!(
            "{} bytes exceeds max_sync_size of {}",
            record.count, cfg.max_sync_size
        ));
    }

    if record.kind == ContentKind::Files && !cfg.allowed_file_extensions.is_empty() {
        let paths: Vec<String> = serde_json::from_str(&record.value).unwrap_or_default();
        for p in &paths {
            let ext = Path::new(p)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !cfg
                .allowed_file_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            {
                return Some(format!("extension '{ext}' is not in the allowed list"));
            }
        }
    }

    None
}

/// Advance a high-water mark; older timestamps never move it backwards
fn advance_watermark(slot: &mut Option<String>, create_time: &str) {
    match slot.as_deref() {
        Some(current) if current >= create_time => {}
        _ => *slot = Some(create_time.to_string()),
    }
}

fn resolve_path(value: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(kind: ContentKind, value: &str, count: u64) -> ClipboardRecord {
        ClipboardRecord {
            id: "r1".into(),
            kind,
            subtype: None,
            value: value.into(),
            count,
            favorite: false,
            create_time: "2026-08-23T10:00:00Z".into(),
            note: None,
            device_id: None,
            device_name: None,
            content_hash: None,
            synced: false,
        }
    }

    #[test]
    fn size_policy_only_applies_to_file_backed_kinds() {
        let mut cfg = SyncConfig::default();
        cfg.max_sync_size = 100;

        assert!(policy_violation(&record(ContentKind::Image, "a.png", 200), &cfg).is_some());
        // Large text is not size-limited
        assert!(policy_violation(&record(ContentKind::Text, "x", 200), &cfg).is_none());
        // Zero means unlimited
        cfg.max_sync_size = 0;
        assert!(policy_violation(&record(ContentKind::Image, "a.png", 200), &cfg).is_none());
    }

    #[test]
    fn extension_policy_checks_every_member() {
        let mut cfg = SyncConfig::default();
        cfg.allowed_file_extensions = vec!["pdf".into(), ".txt".into()];

        let ok = serde_json::to_string(&["/tmp/a.pdf", "/tmp/b.TXT"]).unwrap();
        assert!(policy_violation(&record(ContentKind::Files, &ok, 1), &cfg).is_none());

        let bad = serde_json::to_string(&["/tmp/a.pdf", "/tmp/evil.exe"]).unwrap();
        assert!(policy_violation(&record(ContentKind::Files, &bad, 1), &cfg).is_some());
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut slot = None;
        advance_watermark(&mut slot, "2026-08-23T10:00:00Z");
        advance_watermark(&mut slot, "2026-08-23T09:00:00Z");
        advance_watermark(&mut slot, "2026-08-23T11:00:00Z");
        advance_watermark(&mut slot, "2026-08-23T11:00:00Z");
        assert_eq!(slot.as_deref(), Some("2026-08-23T11:00:00Z"));
    }
}
