//! # Fieldkit
//!
//! An offline-first synchronization engine for field data collection.
//! Every write lands in a local embedded database first and is marked
//! unsynced; a background sync engine pushes dirty records and audio blobs
//! to a remote document store whenever connectivity allows, so the
//! application works identically with or without a network.
//!
//! ## Features
//!
//! - **Local-first storage**: transactional redb tables per collection,
//!   with secondary indices maintained in the same write transaction
//! - **Dirty-flag sync**: `synced=false` on every local write; only a
//!   confirmed remote upsert flips it back
//! - **Per-item failure isolation**: one failed push never blocks the rest
//!   of a sync cycle
//! - **Idempotent pushes**: remote writes are upserts keyed by sanitized
//!   local ids, so retries and resets overwrite instead of duplicating
//! - **Blob handling**: audio payloads tracked separately, uploaded with a
//!   manifest document in a two-step unit
//! - **Device identity**: a persistent per-installation id stamped on every
//!   pushed document
//! - **Safe error handling**: no `unwrap()` calls in production code
//!
//! ## Quick Start
//!
//! ```no_run
//! use fieldkit::record::Participant;
//! use fieldkit::{Collection, LocalStore, Record, RecordData, Schema};
//!
//! fn main() -> fieldkit::Result<()> {
//!     let store = LocalStore::open("fieldkit.redb", Schema::default())?;
//!
//!     // Captured offline; stays pending until a sync cycle confirms it.
//!     let record = store.put(
//!         Collection::Participants,
//!         Record::new(RecordData::Participant(Participant {
//!             participant_code: "P-0001".into(),
//!             name: "Ama Mensah".into(),
//!             ..Participant::default()
//!         })),
//!     )?;
//!     assert!(!record.synced);
//!
//!     let counts = store.counts(Collection::Participants)?;
//!     assert_eq!(counts.pending, 1);
//!     Ok(())
//! }
//! ```
//!
//! Syncing needs a [`RemoteStore`] implementation (the network side), a
//! connectivity `watch` channel and a [`SyncEngine`]; see the `sync`
//! module. [`SyncEngine::run`] drives periodic cycles, reconnect catch-up
//! and manual triggers on a tokio runtime.

pub mod blob;
pub mod device;
pub mod error;
pub mod export;
pub mod record;
pub mod remote;
pub mod schema;
pub mod store;
pub mod sync;


pub use blob::{BlobAsset, BlobStore};
pub use device::DeviceId;
pub use error::{Error, Result};
pub use export::{export_all, import, ExportEnvelope, ImportSummary};
pub use record::{Record, RecordData};
pub use remote::{RemoteError, RemoteStore};
pub use schema::{Collection, CollectionSpec, Schema};
pub use store::{CollectionCounts, LocalStore};
pub use sync::{SyncConfig, SyncEngine, SyncOutcome, SyncReport, SyncStatus, SyncTally};
