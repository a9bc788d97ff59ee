//! Storage collaborators.
//!
//! The engine persists processed images and reads account state through two
//! traits so that the storage backends stay outside the core:
//!
//! ```text
//! ┌────────────────────┐        ┌──────────────────────┐
//! │  BatchDispatcher   │        │   DeliveryService    │
//! └───┬────────────┬───┘        └──────────┬───────────┘
//!     │            │                       │
//!     ▼            ▼                       ▼
//! ┌─────────┐ ┌──────────────┐      ┌────────────┐
//! │ Account │ │  AssetStore  │◄─────┤ read/delete│
//! │ Ledger  │ │  (base JPEG) │      └────────────┘
//! └─────────┘ └──────────────┘
//!     │              │
//!     ▼              ▼
//! MemoryLedger   FsAssetStore / MemoryAssetStore
//! ```

mod fs;
mod memory;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

pub use fs::FsAssetStore;
pub(crate) use fs::write_atomic;
pub use memory::{MemoryAssetStore, MemoryLedger};

/// Longest accepted asset name.
const MAX_NAME_LEN: usize = 128;

// =============================================================================
// Traits
// =============================================================================

/// Write-once storage for processed base assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store a new asset and return its generated, unique name.
    async fn persist_asset(&self, data: Bytes) -> Result<String, StoreError>;

    /// Read a stored asset.
    ///
    /// Returns `StoreError::NotFound` if the asset does not exist.
    async fn read_asset(&self, name: &str) -> Result<Bytes, StoreError>;

    /// Delete a stored asset.
    async fn delete_asset(&self, name: &str) -> Result<(), StoreError>;
}

/// One successful processing run, as recorded in the caller's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingEvent {
    pub caller_id: String,
    pub asset_name: String,
    pub style: String,
    pub elapsed: Duration,
    pub at: SystemTime,
}

impl ProcessingEvent {
    pub fn new(
        caller_id: impl Into<String>,
        asset_name: impl Into<String>,
        style: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            asset_name: asset_name.into(),
            style: style.into(),
            elapsed,
            at: SystemTime::now(),
        }
    }
}

/// Account state consumed by the core: usage, entitlement and history.
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Number of items the caller processed within the trailing `window`.
    async fn usage_count(&self, caller_id: &str, window: Duration) -> Result<u32, StoreError>;

    /// Whether the caller has paid for full-resolution access to the asset.
    async fn is_entitled(&self, caller_id: &str, asset_name: &str) -> Result<bool, StoreError>;

    /// Whether the asset was produced by the caller.
    async fn is_owner(&self, caller_id: &str, asset_name: &str) -> Result<bool, StoreError>;

    /// Append a processing event to the caller's history.
    async fn log_processing_event(&self, event: ProcessingEvent) -> Result<(), StoreError>;
}

// =============================================================================
// Names
// =============================================================================

/// Validate an asset name: `[A-Za-z0-9._-]`, no leading dot, bounded length.
pub fn validate_asset_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Fresh unique name for a processed asset.
pub fn new_asset_name() -> String {
    format!("processed_{}.jpg", uuid::Uuid::new_v4().simple())
}
