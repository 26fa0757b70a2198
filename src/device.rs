//! Per-installation device identity.
//!
//! Every record pushed to the remote store is tagged with a stable device
//! id so operators can trace which installation produced it. The id is
//! generated lazily on first load, persisted in the local store's meta
//! table, and only ever regenerated if local state is wiped entirely. It is
//! a provenance tag, never a lock or an access-control token.

use std::fmt;

use chrono::Utc;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::Result;
use crate::store::LocalStore;

const DEVICE_ID_KEY: &str = "device_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(String);

impl DeviceId {
    /// Returns the persisted device id, generating and persisting one on
    /// first use.
    pub fn load_or_generate(store: &LocalStore) -> Result<Self> {
        if let Some(id) = store.meta_get(DEVICE_ID_KEY)? {
            return Ok(DeviceId(id));
        }
        let id = generate();
        store.meta_put(DEVICE_ID_KEY, &id)?;
        info!("generated device id {id}");
        Ok(DeviceId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn generate() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "dev_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_suffix() {
        let id = generate();
        assert!(id.starts_with("dev_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate(), generate());
    }
}
