//! The remote store seam and the remote path scheme.
//!
//! The sync engine talks to the network through [`RemoteStore`], a
//! document-oriented store plus a blob store, reachable only when online.
//! Records land under `<namespace>/data/<collection>/<doc-id>`, blob
//! manifests under a parallel `<namespace>/audio` sub-collection, and blob
//! bytes at `<namespace>/audio/<id>.<ext>` in blob storage. Document ids
//! are sanitized forms of the local id, which is what makes every remote
//! write an idempotent upsert.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::schema::Collection;

/// Remote failure taxonomy.
///
/// `Denied` indicates a configuration problem (access rules) and is
/// surfaced distinctly by the sync engine; `Unavailable` and `Transient`
/// are retried silently on the next cycle.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote access denied: {0}")]
    Denied(String),
    #[error("transient remote failure: {0}")]
    Transient(String),
}

/// A document-oriented network store plus blob storage.
///
/// Implementations own their transport concerns (authentication, timeouts,
/// retries below the per-cycle level). Every method must behave as an
/// upsert / overwrite keyed by the given identifier, and the document
/// store is expected to stamp a server-assigned write timestamp on upsert.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Inserts or replaces the document at
    /// `<namespace>/data/<collection>/<doc_id>`.
    async fn upsert_document(
        &self,
        namespace: &str,
        collection: Collection,
        doc_id: &str,
        body: Value,
    ) -> Result<(), RemoteError>;

    /// Uploads blob bytes to `storage_path`, returning the retrieval
    /// locator (download URL) for the stored object.
    async fn upload_blob(
        &self,
        storage_path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, RemoteError>;

    /// Inserts or replaces the blob manifest document at
    /// `<namespace>/audio/<doc_id>`.
    async fn upsert_blob_manifest(
        &self,
        namespace: &str,
        doc_id: &str,
        body: Value,
    ) -> Result<(), RemoteError>;
}

/// Substitutes characters that are illegal in remote document path
/// segments (`/ . # [ ]`).
pub fn sanitize_doc_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '.' | '#' | '[' | ']' => '_',
            c => c,
        })
        .collect()
}

/// Stricter form for blob storage object names: anything outside
/// `[A-Za-z0-9_-]` is substituted.
pub fn sanitize_blob_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File extension for a blob's content type.
pub fn blob_extension(content_type: &str) -> &'static str {
    if content_type.contains("mp4") {
        "m4a"
    } else {
        "webm"
    }
}

/// Deterministic storage path for a blob's bytes.
pub fn blob_storage_path(namespace: &str, id: &str, content_type: &str) -> String {
    format!(
        "{namespace}/audio/{}.{}",
        sanitize_blob_id(id),
        blob_extension(content_type)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_substitutes_path_characters() {
        assert_eq!(sanitize_doc_id("a/b.c#d[e]"), "a_b_c_d_e_");
        assert_eq!(sanitize_doc_id("plain-id_1"), "plain-id_1");
    }

    #[test]
    fn blob_id_is_stricter() {
        assert_eq!(sanitize_blob_id("rec 01@site"), "rec_01_site");
        assert_eq!(sanitize_blob_id("rec-01_a"), "rec-01_a");
    }

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(blob_extension("audio/mp4"), "m4a");
        assert_eq!(blob_extension("audio/webm;codecs=opus"), "webm");
        assert_eq!(blob_extension(""), "webm");
    }

    #[test]
    fn storage_path_shape() {
        assert_eq!(
            blob_storage_path("fieldkit", "rec 7", "audio/webm"),
            "fieldkit/audio/rec_7.webm"
        );
    }
}
