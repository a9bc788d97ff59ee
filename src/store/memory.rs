//! In-process implementations of the storage collaborators.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{new_asset_name, validate_asset_name, AccountLedger, AssetStore, ProcessingEvent};
use crate::error::StoreError;

// =============================================================================
// MemoryAssetStore
// =============================================================================

/// Asset store holding everything in a map.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    assets: RwLock<HashMap<String, Bytes>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assets.
    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn persist_asset(&self, data: Bytes) -> Result<String, StoreError> {
        let name = new_asset_name();
        self.assets.write().await.insert(name.clone(), data);
        Ok(name)
    }

    async fn read_asset(&self, name: &str) -> Result<Bytes, StoreError> {
        validate_asset_name(name)?;
        self.assets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn delete_asset(&self, name: &str) -> Result<(), StoreError> {
        validate_asset_name(name)?;
        self.assets
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

// =============================================================================
// MemoryLedger
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<ProcessingEvent>,
    grants: HashSet<(String, String)>,
}

/// Account ledger with a rolling event log and explicit entitlement grants.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `caller_id` has paid for `asset_name`.
    pub async fn grant(&self, caller_id: &str, asset_name: &str) {
        self.state
            .write()
            .await
            .grants
            .insert((caller_id.to_string(), asset_name.to_string()));
    }

    /// Full history of a caller, oldest first.
    pub async fn history(&self, caller_id: &str) -> Vec<ProcessingEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.caller_id == caller_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AccountLedger for MemoryLedger {
    async fn usage_count(&self, caller_id: &str, window: Duration) -> Result<u32, StoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let count = self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.caller_id == caller_id && e.at >= cutoff)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn is_entitled(&self, caller_id: &str, asset_name: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .contains(&(caller_id.to_string(), asset_name.to_string())))
    }

    async fn is_owner(&self, caller_id: &str, asset_name: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .any(|e| e.caller_id == caller_id && e.asset_name == asset_name))
    }

    async fn log_processing_event(&self, event: ProcessingEvent) -> Result<(), StoreError> {
        self.state.write().await.events.push(event);
        Ok(())
    }
}
