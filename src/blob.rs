//! Local store for large binary payloads (audio captures).
//!
//! Blob bytes are tracked separately from their metadata records because
//! upload cost and failure modes differ: a multi-megabyte upload can fail
//! where a small document write succeeds. Bytes and the asset manifest live
//! in two tables of a dedicated database file and are written or deleted
//! together in one transaction.
//!
//! Assets are created when a capture completes, deleted only by explicit
//! user action, and never auto-expired.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::store::CollectionCounts;

const BLOB_META: TableDefinition<&str, &str> = TableDefinition::new("blob_meta");
const BLOB_BYTES: TableDefinition<&str, &[u8]> = TableDefinition::new("blob_bytes");

/// Manifest for one stored binary payload, tracked with its own dirty flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobAsset {
    pub id: String,
    pub content_type: String,
    pub size: u64,
    /// Capture context (participant id, mode, ...), forwarded to the remote
    /// manifest on upload.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

pub struct BlobStore {
    db: Database,
}

impl BlobStore {
    /// Opens (creating if necessary) the blob database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        let write = db.begin_write()?;
        {
            write.open_table(BLOB_META)?;
            write.open_table(BLOB_BYTES)?;
        }
        write.commit()?;
        info!("blob store ready at {}", path.as_ref().display());
        Ok(BlobStore { db })
    }

    /// Stores bytes and manifest under `id`, marking the asset unsynced.
    /// Re-storing an existing id overwrites the payload and resets the
    /// dirty flag; the original `created_at` is preserved.
    pub fn put(
        &self,
        id: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: Map<String, Value>,
    ) -> Result<BlobAsset> {
        if id.is_empty() {
            return Err(Error::Validation("blob id must not be empty".into()));
        }
        let write = self.db.begin_write()?;
        let asset;
        {
            let mut meta_table = write.open_table(BLOB_META)?;
            let created_at = match meta_table.get(id)? {
                Some(guard) => serde_json::from_str::<BlobAsset>(guard.value())?.created_at,
                None => Utc::now(),
            };
            asset = BlobAsset {
                id: id.to_string(),
                content_type: content_type.to_string(),
                size: bytes.len() as u64,
                metadata,
                created_at,
                synced: false,
                synced_at: None,
            };
            let json = serde_json::to_string(&asset)?;
            meta_table.insert(id, json.as_str())?;
            let mut bytes_table = write.open_table(BLOB_BYTES)?;
            bytes_table.insert(id, bytes)?;
        }
        write.commit()?;
        Ok(asset)
    }

    /// Reads the manifest and payload together.
    pub fn get(&self, id: &str) -> Result<Option<(BlobAsset, Vec<u8>)>> {
        let read = self.db.begin_read()?;
        let meta_table = match read.open_table(BLOB_META) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(guard) = meta_table.get(id)? else {
            return Ok(None);
        };
        let asset: BlobAsset = serde_json::from_str(guard.value())?;
        let bytes_table = read.open_table(BLOB_BYTES)?;
        let bytes = bytes_table
            .get(id)?
            .map(|guard| guard.value().to_vec())
            .unwrap_or_default();
        Ok(Some((asset, bytes)))
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<BlobAsset>> {
        let read = self.db.begin_read()?;
        let meta_table = match read.open_table(BLOB_META) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match meta_table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<BlobAsset>> {
        let read = self.db.begin_read()?;
        let meta_table = match read.open_table(BLOB_META) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut assets = Vec::new();
        for item in meta_table.iter()? {
            let (_, value) = item?;
            assets.push(serde_json::from_str(value.value())?);
        }
        Ok(assets)
    }

    pub fn unsynced(&self) -> Result<Vec<BlobAsset>> {
        Ok(self.list()?.into_iter().filter(|a| !a.synced).collect())
    }

    /// Removes manifest and bytes in one transaction. Returns whether the
    /// asset existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write = self.db.begin_write()?;
        let existed;
        {
            let mut meta_table = write.open_table(BLOB_META)?;
            existed = meta_table.remove(id)?.is_some();
            let mut bytes_table = write.open_table(BLOB_BYTES)?;
            bytes_table.remove(id)?;
        }
        write.commit()?;
        Ok(existed)
    }

    pub fn counts(&self) -> Result<CollectionCounts> {
        let assets = self.list()?;
        let synced = assets.iter().filter(|a| a.synced).count();
        Ok(CollectionCounts {
            total: assets.len(),
            synced,
            pending: assets.len() - synced,
        })
    }

    /// Sync-flag toggle, crate-private for the same reason as the record
    /// store's: only a confirmed remote write may mark an asset synced.
    pub(crate) fn set_sync_state(
        &self,
        id: &str,
        synced: bool,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut asset = self
            .get_asset(id)?
            .ok_or_else(|| Error::NotFound(format!("no blob asset '{id}'")))?;
        asset.synced = synced;
        asset.synced_at = synced_at;
        let write = self.db.begin_write()?;
        {
            let mut meta_table = write.open_table(BLOB_META)?;
            let json = serde_json::to_string(&asset)?;
            meta_table.insert(id, json.as_str())?;
        }
        write.commit()?;
        Ok(())
    }
}
