//! The local transactional document store.
//!
//! Records are stored as JSON values keyed by id, one redb table per
//! collection, with multimap tables for the declared secondary indices.
//! Every operation is its own transaction; index maintenance happens in the
//! same write transaction as the record, so the `unsynced` view and index
//! queries are never stale.
//!
//! The store performs no retries: storage engine failures propagate to the
//! caller, and retry policy lives in the sync engine.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    TableError, WriteTransaction,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::{Collection, Schema};

/// Durable process-wide key-value state (device identity and similar).
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

fn record_table(collection: Collection) -> TableDefinition<'static, &'static str, &'static str> {
    TableDefinition::new(collection.name())
}

fn index_table_name(collection: Collection, field: &str) -> String {
    format!("idx_{}_{}", collection.name(), field)
}

/// Per-collection sync bookkeeping, computed from current local state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionCounts {
    pub total: usize,
    pub synced: usize,
    pub pending: usize,
}

pub struct LocalStore {
    db: Database,
    schema: Schema,
}

impl LocalStore {
    /// Opens (creating if necessary) the store at `path` and ensures every
    /// declared collection table, index table and the meta table exist.
    ///
    /// Idempotent and safe to call on every process start; records in
    /// collections untouched by a schema change are preserved.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        let write = db.begin_write()?;
        {
            write.open_table(META)?;
            for spec in schema.specs() {
                write.open_table(record_table(spec.collection))?;
                for field in &spec.indices {
                    let name = index_table_name(spec.collection, field);
                    write.open_multimap_table(MultimapTableDefinition::<&str, &str>::new(&name))?;
                }
            }
        }
        write.commit()?;
        info!(
            "local store ready at {} ({} collections)",
            path.as_ref().display(),
            schema.specs().len()
        );
        Ok(LocalStore { db, schema })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Insert-or-replace keyed by id (assigned when empty).
    ///
    /// Always stamps `updated_at` and resets `synced=false` / `synced_at`,
    /// so the record reappears in [`unsynced`](Self::unsynced) until a push
    /// is confirmed. The `created_at` of an existing row is preserved.
    pub fn put(&self, collection: Collection, record: Record) -> Result<Record> {
        self.write_record(collection, record, true)
    }

    /// Primary-key read. `Ok(None)` means the id is absent;
    /// [`Error::CollectionNotFound`] means the collection is not part of the
    /// schema this store was opened with.
    pub fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>> {
        self.check_collection(collection)?;
        let read = self.db.begin_read()?;
        let table = match read.open_table(record_table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(name)) => {
                return Err(Error::CollectionNotFound(name))
            }
            Err(err) => return Err(err.into()),
        };
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Full scan. Undeclared collections and not-yet-created tables read as
    /// empty rather than failing.
    pub fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        if !self.schema.contains(collection) {
            return Ok(Vec::new());
        }
        let read = self.db.begin_read()?;
        let table = match read.open_table(record_table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            records.push(serde_json::from_str(value.value())?);
        }
        Ok(records)
    }

    /// Looks up records through a declared secondary index.
    pub fn query_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &str,
    ) -> Result<Vec<Record>> {
        if !self.schema.contains(collection) {
            return Ok(Vec::new());
        }
        if !self.schema.has_index(collection, index) {
            return Err(Error::IndexNotFound {
                collection: collection.to_string(),
                index: index.to_string(),
            });
        }
        let read = self.db.begin_read()?;
        let name = index_table_name(collection, index);
        let index_table =
            match read.open_multimap_table(MultimapTableDefinition::<&str, &str>::new(&name)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };
        let table = match read.open_table(record_table(collection)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for id in index_table.get(value)? {
            let id = id?;
            if let Some(guard) = table.get(id.value())? {
                records.push(serde_json::from_str(guard.value())?);
            }
        }
        Ok(records)
    }

    /// Exactly the records whose `synced` flag is false at query time.
    pub fn unsynced(&self, collection: Collection) -> Result<Vec<Record>> {
        if self.schema.has_index(collection, "synced") {
            self.query_by_index(collection, "synced", "false")
        } else {
            Ok(self
                .get_all(collection)?
                .into_iter()
                .filter(|r| !r.synced)
                .collect())
        }
    }

    /// Removes a record. Returns whether it existed.
    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        self.check_collection(collection)?;
        let write = self.db.begin_write()?;
        let removed;
        {
            let mut table = write.open_table(record_table(collection))?;
            removed = match table.remove(id)? {
                Some(guard) => Some(serde_json::from_str::<Record>(guard.value())?),
                None => None,
            };
            drop(table);
            if let Some(ref old) = removed {
                self.update_indices(&write, collection, id, Some(old), None)?;
            }
        }
        write.commit()?;
        Ok(removed.is_some())
    }

    /// Removes every record of the collection in a single commit, so
    /// concurrent readers observe either the full collection or none of it.
    pub fn clear(&self, collection: Collection) -> Result<()> {
        self.check_collection(collection)?;
        let write = self.db.begin_write()?;
        {
            write.delete_table(record_table(collection))?;
            write.open_table(record_table(collection))?;
            for field in self.schema.indices_for(collection) {
                let name = index_table_name(collection, field);
                let def = MultimapTableDefinition::<&str, &str>::new(&name);
                write.delete_multimap_table(def)?;
                write.open_multimap_table(def)?;
            }
        }
        write.commit()?;
        debug!("cleared collection '{collection}'");
        Ok(())
    }

    pub fn counts(&self, collection: Collection) -> Result<CollectionCounts> {
        let records = self.get_all(collection)?;
        let synced = records.iter().filter(|r| r.synced).count();
        Ok(CollectionCounts {
            total: records.len(),
            synced,
            pending: records.len() - synced,
        })
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let read = self.db.begin_read()?;
        let table = match read.open_table(META) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(table.get(key)?.map(|guard| guard.value().to_string()))
    }

    pub fn meta_put(&self, key: &str, value: &str) -> Result<()> {
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(META)?;
            table.insert(key, value)?;
        }
        write.commit()?;
        Ok(())
    }

    /// Rewrites only the sync flags of a stored record. This is the sole
    /// path that may set `synced=true`; it is crate-private so application
    /// code cannot mark records synced without a confirmed remote write.
    pub(crate) fn set_sync_state(
        &self,
        collection: Collection,
        id: &str,
        synced: bool,
        synced_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut record = self
            .get(collection, id)?
            .ok_or_else(|| Error::NotFound(format!("no record '{id}' in '{collection}'")))?;
        record.synced = synced;
        record.synced_at = synced_at;
        self.write_record(collection, record, false)?;
        Ok(())
    }

    fn check_collection(&self, collection: Collection) -> Result<()> {
        if self.schema.contains(collection) {
            Ok(())
        } else {
            Err(Error::CollectionNotFound(collection.to_string()))
        }
    }

    fn write_record(
        &self,
        collection: Collection,
        mut record: Record,
        local_edit: bool,
    ) -> Result<Record> {
        self.check_collection(collection)?;
        if record.collection() != collection {
            return Err(Error::Validation(format!(
                "record kind '{}' does not belong in collection '{collection}'",
                record.collection()
            )));
        }
        if record.id.is_empty() {
            record.id = generate_id();
        }

        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(record_table(collection))?;
            let old: Option<Record> = match table.get(record.id.as_str())? {
                Some(guard) => Some(serde_json::from_str(guard.value())?),
                None => None,
            };
            if local_edit {
                if let Some(ref old) = old {
                    record.created_at = old.created_at;
                }
                record.updated_at = Utc::now();
                record.synced = false;
                record.synced_at = None;
            }
            let json = serde_json::to_string(&record)?;
            table.insert(record.id.as_str(), json.as_str())?;
            drop(table);
            self.update_indices(&write, collection, &record.id, old.as_ref(), Some(&record))?;
        }
        write.commit()?;
        Ok(record)
    }

    fn update_indices(
        &self,
        write: &WriteTransaction,
        collection: Collection,
        id: &str,
        old: Option<&Record>,
        new: Option<&Record>,
    ) -> Result<()> {
        let indices = self.schema.indices_for(collection);
        if indices.is_empty() {
            return Ok(());
        }
        let old_doc = old.map(serde_json::to_value).transpose()?;
        let new_doc = new.map(serde_json::to_value).transpose()?;
        for field in indices {
            let name = index_table_name(collection, field);
            let def = MultimapTableDefinition::<&str, &str>::new(&name);
            let mut index_table = write.open_multimap_table(def)?;
            if let Some(key) = old_doc.as_ref().and_then(|doc| index_key(doc, field)) {
                index_table.remove(key.as_str(), id)?;
            }
            if let Some(key) = new_doc.as_ref().and_then(|doc| index_key(doc, field)) {
                index_table.insert(key.as_str(), id)?;
            }
        }
        Ok(())
    }
}

/// Scalar field values become index keys; null, missing and compound values
/// are simply not indexed.
fn index_key(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}
