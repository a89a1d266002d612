//! The durable survival record: key material plus a host reference.
//!
//! At most one record exists. Its presence is the only signal that a
//! restore is pending, and it is erased before it is used.

use std::sync::Arc;

use carryover_codec::ExportedKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{HostHandle, KvStore};
use crate::config::SurvivalConfig;
use crate::error::StoreError;

/// Everything written to durable storage for one survival event. Never
/// holds plaintext or ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalRecord {
    #[serde(flatten)]
    pub key: ExportedKey,
    pub host_ref: HostHandle,
    pub saved_at: DateTime<Utc>,
}

pub struct RecordStore {
    store: Arc<dyn KvStore>,
    namespace: String,
    key: String,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KvStore>, config: &SurvivalConfig) -> Self {
        Self {
            store,
            namespace: config.record_namespace.clone(),
            key: config.record_key.clone(),
        }
    }

    pub async fn persist(&self, record: &SurvivalRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.store.set(&self.namespace, &self.key, value).await
    }

    pub async fn is_pending(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(&self.namespace, &self.key).await?.is_some())
    }

    /// Read and erase the record in one step.
    ///
    /// The erase happens before the stored value is parsed, so even a
    /// malformed record is consumed exactly once. If the erase itself
    /// fails, the record is not returned.
    pub async fn take(&self) -> Result<Option<SurvivalRecord>, StoreError> {
        let Some(raw) = self.store.get(&self.namespace, &self.key).await? else {
            return Ok(None);
        };
        self.store.remove(&self.namespace, &self.key).await?;
        Ok(Some(serde_json::from_value(raw)?))
    }
}
