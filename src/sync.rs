//! The sync orchestrator.
//!
//! One [`SyncEngine`] drives all pushes to the remote store: a full cycle
//! ([`sync_all`](SyncEngine::sync_all)) enumerates unsynced records and
//! blobs and upserts them one by one, and an immediate path pushes a single
//! item right after capture. At most one cycle runs at a time, enforced by
//! an atomic in-flight guard that is released on every exit path; cycle
//! starts while one is in flight are skipped, not queued.
//!
//! Failure isolation is per item: a record that fails to push is left
//! untouched for the next cycle and never blocks the rest of the cycle.
//! Because remote writes are upserts keyed by sanitized local ids,
//! re-pushing after an interruption or a reset overwrites instead of
//! duplicating.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::blob::{BlobAsset, BlobStore};
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::remote::{
    blob_storage_path, sanitize_blob_id, sanitize_doc_id, RemoteError, RemoteStore,
};
use crate::schema::Collection;
use crate::store::{CollectionCounts, LocalStore};

/// Tuning for the scheduler. Defaults match the reference deployment:
/// a 20 second auto-sync interval and a 1.5 second settle window after
/// connectivity returns, to avoid thrashing on flapping connections.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote application namespace all documents and blobs live under.
    pub namespace: String,
    pub auto_sync_interval: Duration,
    pub reconnect_settle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            namespace: "fieldkit".to_string(),
            auto_sync_interval: Duration::from_secs(20),
            reconnect_settle: Duration::from_millis(1500),
        }
    }
}

/// Per-category result tally of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTally {
    pub synced: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A cycle was already in flight or connectivity was unavailable; no
    /// work was attempted and nothing is recorded as failed.
    Skipped,
    /// Nothing was pending.
    UpToDate,
    /// This many items were confirmed synced (errors may also have
    /// occurred; see the tallies).
    Success(u32),
}

/// Result of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub collections: BTreeMap<Collection, SyncTally>,
    pub blobs: SyncTally,
    /// Items rejected by remote access rules. Non-zero values indicate a
    /// configuration problem rather than a transient condition and are
    /// also logged at error level.
    pub access_denied: u32,
}

impl SyncReport {
    fn skipped() -> Self {
        SyncReport {
            outcome: SyncOutcome::Skipped,
            collections: BTreeMap::new(),
            blobs: SyncTally::default(),
            access_denied: 0,
        }
    }

    pub fn total_synced(&self) -> u32 {
        self.collections.values().map(|t| t.synced).sum::<u32>() + self.blobs.synced
    }

    pub fn total_errors(&self) -> u32 {
        self.collections.values().map(|t| t.errors).sum::<u32>() + self.blobs.errors
    }
}

/// Observational sync state for the UI layer: `{total, synced, pending}`
/// per collection plus the blob set.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub collections: BTreeMap<Collection, CollectionCounts>,
    pub blobs: CollectionCounts,
}

impl SyncStatus {
    pub fn total_pending(&self) -> usize {
        self.collections.values().map(|c| c.pending).sum::<usize>() + self.blobs.pending
    }
}

/// Releases the in-flight flag when the cycle ends, on success or error.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    blobs: Arc<BlobStore>,
    remote: Arc<dyn RemoteStore>,
    online: watch::Receiver<bool>,
    device_id: DeviceId,
    config: SyncConfig,
    syncing: AtomicBool,
    wakeup: Notify,
}

impl SyncEngine {
    /// Builds the engine, resolving (and persisting on first use) the
    /// device identity from the store's meta table. `online` is the
    /// connectivity channel the scheduler subscribes to; dropping its
    /// sender terminates [`run`](Self::run).
    pub fn new(
        store: Arc<LocalStore>,
        blobs: Arc<BlobStore>,
        remote: Arc<dyn RemoteStore>,
        online: watch::Receiver<bool>,
        config: SyncConfig,
    ) -> Result<Self> {
        let device_id = DeviceId::load_or_generate(&store)?;
        Ok(SyncEngine {
            store,
            blobs,
            remote,
            online,
            device_id,
            config,
            syncing: AtomicBool::new(false),
            wakeup: Notify::new(),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Runs one full push cycle.
    ///
    /// Skips (without recording a failure) when a cycle is already in
    /// flight or connectivity is unavailable. Local store failures abort
    /// the cycle with an error; remote failures are tallied per item and
    /// never abort it.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let Some(_guard) = self.try_begin() else {
            debug!("sync already in flight; skipping");
            return Ok(SyncReport::skipped());
        };
        if !self.is_online() {
            debug!("offline; skipping sync cycle");
            return Ok(SyncReport::skipped());
        }

        let mut report = SyncReport {
            outcome: SyncOutcome::UpToDate,
            collections: BTreeMap::new(),
            blobs: SyncTally::default(),
            access_denied: 0,
        };
        for spec in self.store.schema().specs() {
            let tally = self
                .sync_collection(spec.collection, &mut report.access_denied)
                .await?;
            report.collections.insert(spec.collection, tally);
        }
        report.blobs = self.sync_blobs(&mut report.access_denied).await?;

        let synced = report.total_synced();
        if synced > 0 {
            report.outcome = SyncOutcome::Success(synced);
        }
        info!(
            "sync cycle done: {synced} synced, {} errors",
            report.total_errors()
        );
        Ok(report)
    }

    async fn sync_collection(
        &self,
        collection: Collection,
        access_denied: &mut u32,
    ) -> Result<SyncTally> {
        let mut tally = SyncTally::default();
        let pending = self.store.unsynced(collection)?;
        if pending.is_empty() {
            return Ok(tally);
        }
        debug!("pushing {} unsynced '{collection}' records", pending.len());
        for record in &pending {
            match self.push_one(collection, record).await {
                Ok(()) => tally.synced += 1,
                Err(err) => {
                    self.note_push_failure(
                        &format!("{collection}/{}", record.id),
                        &err,
                        access_denied,
                    );
                    tally.errors += 1;
                }
            }
        }
        Ok(tally)
    }

    async fn sync_blobs(&self, access_denied: &mut u32) -> Result<SyncTally> {
        let mut tally = SyncTally::default();
        let pending = self.blobs.unsynced()?;
        if pending.is_empty() {
            return Ok(tally);
        }
        debug!("uploading {} unsynced blobs", pending.len());
        for asset in &pending {
            match self.push_blob_one(asset).await {
                Ok(()) => tally.synced += 1,
                Err(err) => {
                    self.note_push_failure(&format!("blob/{}", asset.id), &err, access_denied);
                    tally.errors += 1;
                }
            }
        }
        Ok(tally)
    }

    /// Upserts one record remotely and confirms it locally. The local
    /// record is only touched after the remote write is acknowledged.
    async fn push_one(&self, collection: Collection, record: &Record) -> Result<()> {
        let doc_id = sanitize_doc_id(&record.id);
        let mut body = serde_json::to_value(record)?;
        if let Value::Object(ref mut map) = body {
            map.insert(
                "_device_id".to_string(),
                Value::String(self.device_id.to_string()),
            );
        }
        self.remote
            .upsert_document(&self.config.namespace, collection, &doc_id, body)
            .await?;
        self.store
            .set_sync_state(collection, &record.id, true, Some(Utc::now()))?;
        Ok(())
    }

    /// Uploads a blob's bytes, then its manifest document; the asset is
    /// marked synced only after both steps succeed, so a failure in either
    /// leaves the whole unit for the next cycle.
    async fn push_blob_one(&self, asset: &BlobAsset) -> Result<()> {
        let Some((asset, bytes)) = self.blobs.get(&asset.id)? else {
            return Err(Error::NotFound(format!("no blob asset '{}'", asset.id)));
        };
        let storage_path =
            blob_storage_path(&self.config.namespace, &asset.id, &asset.content_type);
        let locator = self
            .remote
            .upload_blob(&storage_path, &bytes, &asset.content_type)
            .await?;

        let doc_id = sanitize_blob_id(&asset.id);
        let manifest = json!({
            "id": asset.id,
            "download_url": locator,
            "storage_path": storage_path,
            "content_type": asset.content_type,
            "size": asset.size,
            "size_kb": (asset.size + 512) / 1024,
            "metadata": asset.metadata,
            "created_at": asset.created_at,
            "_device_id": self.device_id.as_str(),
        });
        self.remote
            .upsert_blob_manifest(&self.config.namespace, &doc_id, manifest)
            .await?;
        self.blobs
            .set_sync_state(&asset.id, true, Some(Utc::now()))?;
        Ok(())
    }

    fn note_push_failure(&self, what: &str, err: &Error, access_denied: &mut u32) {
        if let Error::Remote(RemoteError::Denied(_)) = err {
            *access_denied += 1;
            error!("access denied pushing {what}: {err}; check remote access rules");
        } else {
            warn!("failed to push {what}: {err}");
        }
    }

    /// Pushes a single record right away, outside the scheduled cycle.
    ///
    /// Returns `Ok(false)` when offline or when the remote write fails; the
    /// record simply stays unsynced and the next cycle retries it. Uses the
    /// same upsert/confirm contract as the cycle, so state stays consistent
    /// if a scheduled cycle observes the same record.
    pub async fn push_record(&self, collection: Collection, id: &str) -> Result<bool> {
        if !self.is_online() {
            return Ok(false);
        }
        let record = self
            .store
            .get(collection, id)?
            .ok_or_else(|| Error::NotFound(format!("no record '{id}' in '{collection}'")))?;
        match self.push_one(collection, &record).await {
            Ok(()) => Ok(true),
            Err(Error::Remote(err)) => {
                warn!("immediate push of {collection}/{id} deferred to next cycle: {err}");
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Immediate counterpart of [`push_record`](Self::push_record) for a
    /// blob asset, typically right after a recording completes.
    pub async fn push_blob(&self, id: &str) -> Result<bool> {
        if !self.is_online() {
            return Ok(false);
        }
        let asset = self
            .blobs
            .get_asset(id)?
            .ok_or_else(|| Error::NotFound(format!("no blob asset '{id}'")))?;
        match self.push_blob_one(&asset).await {
            Ok(()) => Ok(true),
            Err(Error::Remote(err)) => {
                warn!("immediate blob upload of '{id}' deferred to next cycle: {err}");
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Flips `synced=false` on every record and blob so the next cycle
    /// re-uploads everything, and nudges the scheduler to run one
    /// immediately. Used after remote access configuration changes; safe
    /// because re-uploads are upserts.
    pub fn reset_sync_flags(&self) -> Result<usize> {
        let mut reset = 0;
        for spec in self.store.schema().specs() {
            for record in self.store.get_all(spec.collection)? {
                if record.synced {
                    self.store
                        .set_sync_state(spec.collection, &record.id, false, None)?;
                    reset += 1;
                }
            }
        }
        for asset in self.blobs.list()? {
            if asset.synced {
                self.blobs.set_sync_state(&asset.id, false, None)?;
                reset += 1;
            }
        }
        info!("reset {reset} sync flags; items will retry on next cycle");
        self.wakeup.notify_one();
        Ok(reset)
    }

    /// Asks the scheduler for an immediate cycle (manual sync button).
    pub fn request_sync(&self) {
        self.wakeup.notify_one();
    }

    /// Current totals per collection and for blobs. Purely observational.
    pub fn sync_status(&self) -> Result<SyncStatus> {
        let mut collections = BTreeMap::new();
        for spec in self.store.schema().specs() {
            collections.insert(spec.collection, self.store.counts(spec.collection)?);
        }
        Ok(SyncStatus {
            collections,
            blobs: self.blobs.counts()?,
        })
    }

    fn try_begin(&self) -> Option<InFlight<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(InFlight(&self.syncing))
    }

    /// The scheduler: a periodic tick (skipped while offline), a
    /// connectivity watch that syncs after the settle window on an
    /// offline-to-online transition, and the manual trigger. Runs until
    /// the connectivity sender is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut online = self.online.clone();
        let mut ticker = tokio::time::interval(self.config.auto_sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_online() {
                        if let Err(err) = self.sync_all().await {
                            warn!("scheduled sync cycle failed: {err}");
                        }
                    }
                }
                changed = online.changed() => {
                    match changed {
                        Err(_) => {
                            info!("connectivity channel closed; sync scheduler stopping");
                            break;
                        }
                        Ok(()) => {
                            if *online.borrow_and_update() {
                                info!("connectivity restored; syncing after settle window");
                                tokio::time::sleep(self.config.reconnect_settle).await;
                                if let Err(err) = self.sync_all().await {
                                    warn!("post-reconnect sync cycle failed: {err}");
                                }
                            }
                        }
                    }
                }
                _ = self.wakeup.notified() => {
                    if let Err(err) = self.sync_all().await {
                        warn!("requested sync cycle failed: {err}");
                    }
                }
            }
        }
    }
}
