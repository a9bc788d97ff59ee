//! Delivery service for stored assets.
//!
//! The DeliveryService decides which rendition of a base asset a caller may
//! see and serves it from the variant cache:
//!
//! ```text
//! fetch(name, variant, entitled)
//!     │
//!     ├─ entitled + full ──────────────────────────► base asset bytes
//!     │
//!     └─ otherwise ─► CacheVariant ─► memory LRU ─► disk store ─► generate
//!                                        hit │         hit │         │
//!                                            ▼             ▼         ▼
//!                                         response      promote   persist
//! ```
//!
//! A variant that cannot be generated is replaced by the unmodified base
//! asset rather than failing the request.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DeliveryError, StoreError, StyleError};
use crate::store::{validate_asset_name, AssetStore};
use crate::style::breathe;

use super::cache::{
    CacheVariant, DiskVariantStore, VariantCache, VariantKey, DEFAULT_VARIANT_CACHE_CAPACITY,
};
use super::encoder::{AssetEncoder, OutputFormat, DEFAULT_JPEG_QUALITY};
use super::render::{render_variant, DEFAULT_THUMBNAIL_WIDTH};

const BASE_CONTENT_TYPE: &str = "image/jpeg";

// =============================================================================
// Requests and Responses
// =============================================================================

/// Rendition requested by a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Full,
    #[serde(alias = "thumbnail")]
    Thumb,
}

impl Variant {
    /// Cached variant kind served for this rendition, or `None` when the
    /// base asset itself is served.
    pub fn cache_kind(self, entitled: bool) -> Option<CacheVariant> {
        match (self, entitled) {
            (Variant::Full, true) => None,
            (Variant::Full, false) => Some(CacheVariant::WatermarkedFull),
            (Variant::Thumb, true) => Some(CacheVariant::Thumb),
            (Variant::Thumb, false) => Some(CacheVariant::WatermarkedThumb),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Variant::Full),
            "thumb" | "thumbnail" => Ok(Variant::Thumb),
            other => Err(format!("unknown variant: {}", other)),
        }
    }
}

/// Bytes served for an asset request.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub data: Bytes,
    pub content_type: &'static str,

    /// Whether the bytes came from either cache tier
    pub cache_hit: bool,

    /// Cached variant served; `None` when the base asset was served
    pub variant: Option<CacheVariant>,
}

impl DeliveryResponse {
    fn base(data: Bytes) -> Self {
        Self {
            data,
            content_type: BASE_CONTENT_TYPE,
            cache_hit: false,
            variant: None,
        }
    }

    fn variant(data: Bytes, kind: CacheVariant, cache_hit: bool) -> Self {
        Self {
            data,
            content_type: BASE_CONTENT_TYPE,
            cache_hit,
            variant: Some(kind),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Root of the on-disk variant store
    pub variants_dir: PathBuf,
    pub thumb_width: u32,
    /// JPEG quality of generated variants
    pub jpeg_quality: u8,
    /// Memory-tier capacity in bytes
    pub memory_capacity: usize,
}

impl DeliveryConfig {
    pub fn new(variants_dir: impl Into<PathBuf>) -> Self {
        Self {
            variants_dir: variants_dir.into(),
            thumb_width: DEFAULT_THUMBNAIL_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            memory_capacity: DEFAULT_VARIANT_CACHE_CAPACITY,
        }
    }

    pub fn with_thumb_width(mut self, width: u32) -> Self {
        self.thumb_width = width;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = bytes;
        self
    }
}

// =============================================================================
// Delivery Service
// =============================================================================

/// Entitlement-aware access to stored assets and their cached variants.
///
/// # Type Parameters
///
/// * `S` - The base asset store
pub struct DeliveryService<S: AssetStore> {
    store: Arc<S>,
    memory: VariantCache,
    disk: DiskVariantStore,
    encoder: AssetEncoder,
    thumb_width: u32,
    jpeg_quality: u8,
}

impl<S: AssetStore + 'static> DeliveryService<S> {
    pub fn new(store: Arc<S>, config: DeliveryConfig) -> Self {
        Self {
            store,
            memory: VariantCache::with_capacity(config.memory_capacity),
            disk: DiskVariantStore::new(config.variants_dir),
            encoder: AssetEncoder::new(),
            thumb_width: config.thumb_width,
            jpeg_quality: config.jpeg_quality,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Bytes of the memory tier currently in use.
    pub async fn memory_usage(&self) -> usize {
        self.memory.size().await
    }

    /// Serve an asset in the rendition the caller is allowed to see.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotFound` if the base asset does not exist, `InvalidName`
    /// for names the store rejects. Variant generation failures are not
    /// errors: the base asset is served instead.
    pub async fn fetch(
        &self,
        name: &str,
        variant: Variant,
        entitled: bool,
    ) -> Result<DeliveryResponse, DeliveryError> {
        validate_asset_name(name).map_err(|e| DeliveryError::from_store(name, e))?;

        match variant.cache_kind(entitled) {
            None => {
                let data = self.read_base(name).await?;
                Ok(DeliveryResponse::base(data))
            }
            Some(kind) => self.fetch_variant(name, kind).await,
        }
    }

    async fn fetch_variant(
        &self,
        name: &str,
        kind: CacheVariant,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let key = VariantKey::new(name, kind);

        if let Some(data) = self.memory.get(&key).await {
            return Ok(DeliveryResponse::variant(data, kind, true));
        }

        match self.disk.read(&key).await {
            Ok(Some(data)) => {
                self.memory.put(key, data.clone()).await;
                return Ok(DeliveryResponse::variant(data, kind, true));
            }
            Ok(None) => {}
            Err(e) => warn!(asset = %name, variant = %kind, error = %e, "Variant store read failed"),
        }

        let base = self.read_base(name).await?;
        let data = match self.generate(base.clone(), kind).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    asset = %name,
                    variant = %kind,
                    error = %e,
                    "Variant generation failed, serving base asset"
                );
                return Ok(DeliveryResponse::base(base));
            }
        };

        // The base may have been deleted while rendering
        self.read_base(name).await?;

        if let Err(e) = self.disk.write(&key, &data).await {
            warn!(asset = %name, variant = %kind, error = %e, "Failed to persist variant");
        }
        self.memory.put(key, data.clone()).await;
        debug!(asset = %name, variant = %kind, size = data.len(), "Generated variant");

        Ok(DeliveryResponse::variant(data, kind, false))
    }

    /// Render and encode a variant off the async runtime.
    async fn generate(&self, base: Bytes, kind: CacheVariant) -> Result<Bytes, StyleError> {
        let encoder = self.encoder.clone();
        let thumb_width = self.thumb_width;
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || {
            let image = encoder.decode(&base)?;
            let rendered = render_variant(&image, kind, thumb_width);
            encoder.encode_jpeg(&rendered, quality)
        })
        .await
        .map_err(|e| StyleError::Encode {
            message: e.to_string(),
        })?
    }

    /// The three cache keys an asset can occupy.
    pub fn cache_keys(&self, name: &str) -> [VariantKey; 3] {
        CacheVariant::ALL.map(|kind| VariantKey::new(name, kind))
    }

    /// Delete a base asset together with every cached variant.
    ///
    /// The base goes first, so a concurrent fetch can no longer regenerate a
    /// variant once the purge starts. Leftover variants of an already missing
    /// base are purged too before `AssetNotFound` is returned.
    pub async fn delete_asset(&self, name: &str) -> Result<(), DeliveryError> {
        validate_asset_name(name).map_err(|e| DeliveryError::from_store(name, e))?;

        let deleted = match self.store.delete_asset(name).await {
            Err(e @ StoreError::NotFound(_)) => Err(e),
            Err(e) => return Err(DeliveryError::from_store(name, e)),
            Ok(()) => Ok(()),
        };

        for key in self.cache_keys(name) {
            self.memory.remove(&key).await;
            self.disk
                .remove(&key)
                .await
                .map_err(|e| DeliveryError::from_store(name, e))?;
        }
        deleted.map_err(|e| DeliveryError::from_store(name, e))?;

        debug!(asset = %name, "Deleted asset and variants");
        Ok(())
    }

    /// Full-resolution asset converted to `format`.
    ///
    /// JPEG without an explicit quality is served as stored.
    pub async fn download(
        &self,
        name: &str,
        format: OutputFormat,
        quality: Option<u8>,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let base = self.read_base(name).await?;
        if format == OutputFormat::Jpeg && quality.is_none() {
            return Ok(DeliveryResponse::base(base));
        }

        let encoder = self.encoder.clone();
        let quality = quality.unwrap_or(self.jpeg_quality);
        let data = tokio::task::spawn_blocking(move || {
            let image = encoder.decode(&base)?;
            encoder.encode(&image, format, quality)
        })
        .await
        .map_err(|e| DeliveryError::Encode {
            message: e.to_string(),
        })?
        .map_err(|e| DeliveryError::Encode {
            message: e.to_string(),
        })?;

        Ok(DeliveryResponse {
            data,
            content_type: format.content_type(),
            cache_hit: false,
            variant: None,
        })
    }

    /// Breathing animation of the full rendition the caller may see.
    pub async fn animation(&self, name: &str, entitled: bool) -> Result<Bytes, DeliveryError> {
        let source = self.fetch(name, Variant::Full, entitled).await?;
        let encoder = self.encoder.clone();

        tokio::task::spawn_blocking(move || {
            let image = encoder.decode(&source.data)?;
            encoder.encode_animation(&breathe(&image))
        })
        .await
        .map_err(|e| DeliveryError::Encode {
            message: e.to_string(),
        })?
        .map_err(|e| DeliveryError::Encode {
            message: e.to_string(),
        })
    }

    async fn read_base(&self, name: &str) -> Result<Bytes, DeliveryError> {
        self.store
            .read_asset(name)
            .await
            .map_err(|e: StoreError| DeliveryError::from_store(name, e))
    }
}

// =============================================================================
// Tests
// =============================================================================
