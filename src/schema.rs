//! Collection names and the declared-index schema.
//!
//! The store is opened against a [`Schema`] describing every collection and
//! its secondary index fields. Opening is idempotent: tables for declared
//! collections are created if missing and existing data is left untouched,
//! so it is safe to run on every process start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The known collection kinds of the field-data store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Participants,
    Interviews,
    Toolkit,
    AudioMeta,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Participants,
        Collection::Interviews,
        Collection::Toolkit,
        Collection::AudioMeta,
    ];

    /// Stable name used for local tables, export envelopes and the remote
    /// sub-collection path segment.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Participants => "participants",
            Collection::Interviews => "interviews",
            Collection::Toolkit => "toolkit",
            Collection::AudioMeta => "audio_meta",
        }
    }

    pub fn from_name(name: &str) -> Option<Collection> {
        Collection::ALL.iter().copied().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One collection plus the record fields it keeps secondary indices on.
/// Indices are non-unique and maintained in the same write transaction as
/// the record, so readers never observe a stale index.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub collection: Collection,
    pub indices: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    specs: Vec<CollectionSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Schema { specs: Vec::new() }
    }

    /// Declares a collection with its index fields. Re-declaring a
    /// collection replaces its index list.
    pub fn collection(mut self, collection: Collection, indices: &[&str]) -> Self {
        self.specs.retain(|s| s.collection != collection);
        self.specs.push(CollectionSpec {
            collection,
            indices: indices.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn specs(&self) -> &[CollectionSpec] {
        &self.specs
    }

    pub fn contains(&self, collection: Collection) -> bool {
        self.specs.iter().any(|s| s.collection == collection)
    }

    pub fn indices_for(&self, collection: Collection) -> &[String] {
        self.specs
            .iter()
            .find(|s| s.collection == collection)
            .map(|s| s.indices.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_index(&self, collection: Collection, index: &str) -> bool {
        self.indices_for(collection).iter().any(|f| f == index)
    }
}

impl Default for Schema {
    /// The field-data layout: every collection indexes `synced` and `kind`;
    /// participant lookups by code and group, child records by participant.
    fn default() -> Self {
        Schema::new()
            .collection(
                Collection::Participants,
                &["synced", "kind", "participant_code", "group"],
            )
            .collection(
                Collection::Interviews,
                &["synced", "kind", "participant_id"],
            )
            .collection(
                Collection::Toolkit,
                &["synced", "kind", "participant_id", "module"],
            )
            .collection(
                Collection::AudioMeta,
                &["synced", "kind", "participant_id"],
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("surveys"), None);
    }

    #[test]
    fn default_schema_indexes_synced_everywhere() {
        let schema = Schema::default();
        for collection in Collection::ALL {
            assert!(schema.contains(collection));
            assert!(schema.has_index(collection, "synced"));
        }
        assert!(schema.has_index(Collection::Toolkit, "module"));
        assert!(!schema.has_index(Collection::Participants, "module"));
    }

    #[test]
    fn redeclaring_replaces_indices() {
        let schema = Schema::new()
            .collection(Collection::Participants, &["synced"])
            .collection(Collection::Participants, &["group"]);
        assert_eq!(schema.indices_for(Collection::Participants), ["group"]);
        assert_eq!(schema.specs().len(), 1);
    }
}
