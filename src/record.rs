//! Data model definitions for the local document store.
//!
//! The primary model is [`Record`]: a JSON document carrying the dirty-flag
//! metadata the sync engine relies on, wrapped around a [`RecordData`] value
//! that is a closed sum over the known collection kinds. Unknown attributes
//! survive round trips through the flattened `extra` map on every variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::Collection;

/// A single stored document.
///
/// `synced` is the single source of truth for "needs remote push": every
/// local write through [`LocalStore::put`](crate::store::LocalStore::put)
/// resets it to `false`, and only the sync engine's confirmation path may
/// flip it back to `true`.
///
/// # Examples
///
/// ```rust
/// use fieldkit::record::{Participant, Record, RecordData};
///
/// let record = Record::new(RecordData::Participant(Participant {
///     participant_code: "P-0042".into(),
///     name: "Ama Mensah".into(),
///     ..Participant::default()
/// }));
///
/// assert!(!record.synced);
/// assert!(record.synced_at.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the record's collection. Left empty, the
    /// store assigns one on insert.
    #[serde(default)]
    pub id: String,

    /// The typed document body, flattened into the top level alongside a
    /// `kind` tag.
    #[serde(flatten)]
    pub data: RecordData,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Dirty flag: `false` until a remote write has been confirmed.
    #[serde(default)]
    pub synced: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Creates an unsynced record with fresh timestamps and no id yet.
    pub fn new(data: RecordData) -> Self {
        let now = Utc::now();
        Record {
            id: String::new(),
            data,
            created_at: now,
            updated_at: now,
            synced: false,
            synced_at: None,
        }
    }

    pub fn with_id(id: impl Into<String>, data: RecordData) -> Self {
        let mut record = Record::new(data);
        record.id = id.into();
        record
    }

    /// The collection this record belongs to, derived from its kind.
    pub fn collection(&self) -> Collection {
        self.data.collection()
    }
}

/// The typed document body, tagged by `kind` in the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordData {
    Participant(Participant),
    Interview(Interview),
    Toolkit(ToolkitEntry),
    AudioMeta(AudioMeta),
}

impl RecordData {
    pub fn collection(&self) -> Collection {
        match self {
            RecordData::Participant(_) => Collection::Participants,
            RecordData::Interview(_) => Collection::Interviews,
            RecordData::Toolkit(_) => Collection::Toolkit,
            RecordData::AudioMeta(_) => Collection::AudioMeta,
        }
    }
}

/// An enrolled study participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Human-assigned enrollment code, distinct from the storage id.
    pub participant_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default)]
    pub eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One interview or survey session with a participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub participant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Free-form data captured by a toolkit module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolkitEntry {
    pub participant_id: String,
    pub module: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for an audio capture. The bytes themselves live in the
/// [`BlobStore`](crate::blob::BlobStore) under the same identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serializes_flat_with_kind_tag() {
        let record = Record::with_id(
            "itw_1",
            RecordData::Interview(Interview {
                participant_id: "p_1".into(),
                mode: Some("in-person".into()),
                ..Interview::default()
            }),
        );

        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["kind"], "interview");
        assert_eq!(doc["participant_id"], "p_1");
        assert_eq!(doc["synced"], false);
        assert!(doc.get("synced_at").is_none());
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let doc = json!({
            "id": "p_9",
            "kind": "participant",
            "participant_code": "P-0009",
            "name": "Kofi",
            "eligible": true,
            "enumerator": "team-b",
            "created_at": "2026-01-05T08:00:00Z",
            "updated_at": "2026-01-05T08:00:00Z",
            "synced": false
        });

        let record: Record = serde_json::from_value(doc).unwrap();
        let RecordData::Participant(ref p) = record.data else {
            panic!("wrong kind");
        };
        assert_eq!(p.extra["enumerator"], "team-b");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["enumerator"], "team-b");
    }

    #[test]
    fn kind_maps_to_collection() {
        let record = Record::new(RecordData::Toolkit(ToolkitEntry {
            participant_id: "p_1".into(),
            module: "nutrition".into(),
            payload: json!({"score": 7}),
            extra: Map::new(),
        }));
        assert_eq!(record.collection(), Collection::Toolkit);
    }
}
