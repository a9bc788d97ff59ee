use std::time::Duration;

use thiserror::Error;

/// Errors raised by the storage collaborators (asset store, account ledger).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Asset or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Asset name contains characters that are not allowed in a stored name
    #[error("Invalid asset name: {0:?}")]
    InvalidName(String),

    /// Underlying filesystem or backend failure
    #[error("Storage I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors produced while decoding, styling or encoding a single image.
#[derive(Debug, Clone, Error)]
pub enum StyleError {
    /// Input bytes are not a decodable JPEG/PNG image
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// Output could not be encoded
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// Graph-cut segmentation could not separate foreground from background.
    ///
    /// Never surfaced to callers: background replacement recovers with a
    /// fallback mask.
    #[error("Segmentation failed: {reason}")]
    SegmentationFailed { reason: String },
}

impl StyleError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        StyleError::InvalidImage {
            reason: reason.into(),
        }
    }
}

/// Errors that abort a whole batch before any item is processed.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// The caller's rolling daily quota cannot absorb the batch
    #[error("Quota exceeded: {used} used + {requested} requested > {limit} allowed per {window:?}")]
    QuotaExceeded {
        used: u32,
        requested: u32,
        limit: u32,
        window: Duration,
    },

    /// The usage counter could not be read
    #[error("Ledger error: {0}")]
    Ledger(#[from] StoreError),
}

/// Failure of a single processed item.
///
/// Inside a batch these become per-item failure payloads; a single-item
/// request surfaces them directly.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The request was rejected before any work
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Style(#[from] StyleError),

    /// The processed asset could not be persisted
    #[error("Failed to store result: {0}")]
    Store(StoreError),

    /// The worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Errors from the delivery (derived-asset) layer.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The base asset does not exist (or was deleted)
    #[error("Asset not found: {name}")]
    AssetNotFound { name: String },

    /// Asset name was rejected by the store
    #[error("Invalid asset name: {name:?}")]
    InvalidName { name: String },

    /// Storage failure other than a missing asset
    #[error("Storage error: {0}")]
    Store(StoreError),

    /// Format conversion of a delivered asset failed
    #[error("Encode error: {message}")]
    Encode { message: String },
}

impl DeliveryError {
    /// Map a store error for the given asset name.
    pub fn from_store(name: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => DeliveryError::AssetNotFound {
                name: name.to_string(),
            },
            StoreError::InvalidName(_) => DeliveryError::InvalidName {
                name: name.to_string(),
            },
            other => DeliveryError::Store(other),
        }
    }
}

/// A style identifier outside the supported set.
///
/// Callers going through [`crate::style::Style::resolve`] never see this: the
/// identifier falls back to the cartoon pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown style identifier: {0:?}")]
pub struct UnknownStyle(pub String);
