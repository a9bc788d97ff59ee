//! Two-tier cache for derived variants.
//!
//! Variants are looked up in a byte-bounded in-memory LRU first and in the
//! on-disk variant store second. Disk entries are written once through a
//! temporary file and an atomic rename:
//!
//! ```text
//! <variants>/
//! ├── watermarked_full/processed_<uuid>.jpg
//! ├── watermarked_thumb/processed_<uuid>.jpg
//! └── thumb/processed_<uuid>.jpg
//! ```
//!
//! Entries are never invalidated while their base asset lives; deleting the
//! base asset removes its variants from both tiers.

use std::fmt;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{validate_asset_name, write_atomic};

/// Default memory-tier capacity: 64MB
pub const DEFAULT_VARIANT_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Kinds of derived renditions that are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheVariant {
    WatermarkedFull,
    WatermarkedThumb,
    Thumb,
}

impl CacheVariant {
    pub const ALL: [CacheVariant; 3] = [
        CacheVariant::WatermarkedFull,
        CacheVariant::WatermarkedThumb,
        CacheVariant::Thumb,
    ];

    /// Directory name in the variant store.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheVariant::WatermarkedFull => "watermarked_full",
            CacheVariant::WatermarkedThumb => "watermarked_thumb",
            CacheVariant::Thumb => "thumb",
        }
    }

    pub fn is_watermarked(&self) -> bool {
        !matches!(self, CacheVariant::Thumb)
    }

    pub fn is_thumbnail(&self) -> bool {
        !matches!(self, CacheVariant::WatermarkedFull)
    }
}

impl fmt::Display for CacheVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: (base asset name, variant kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub asset_name: Arc<str>,
    pub kind: CacheVariant,
}

impl VariantKey {
    pub fn new(asset_name: impl Into<Arc<str>>, kind: CacheVariant) -> Self {
        Self {
            asset_name: asset_name.into(),
            kind,
        }
    }
}

// =============================================================================
// Memory Tier
// =============================================================================

/// LRU cache for encoded variants with size-based capacity.
pub struct VariantCache {
    cache: RwLock<LruCache<VariantKey, Bytes>>,
    max_size: usize,
    current_size: RwLock<usize>,
}

impl VariantCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_VARIANT_CACHE_CAPACITY)
    }

    /// Cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
            )),
            max_size,
            current_size: RwLock::new(0),
        }
    }

    /// Get a variant, marking it as recently used.
    pub async fn get(&self, key: &VariantKey) -> Option<Bytes> {
        let mut cache = self.cache.write().await;
        cache.get(key).cloned()
    }

    pub async fn contains(&self, key: &VariantKey) -> bool {
        self.cache.read().await.contains(key)
    }

    /// Store a variant, evicting least-recently-used entries over capacity.
    pub async fn put(&self, key: VariantKey, data: Bytes) {
        let data_size = data.len();
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        let replaced = cache.peek(&key).map(Bytes::len);
        if let Some(old_len) = replaced {
            *current_size = current_size.saturating_sub(old_len);
        }
        // On a fresh key, push hands back the entry displaced by the entry limit
        if let Some((_, evicted)) = cache.push(key, data) {
            if replaced.is_none() {
                *current_size = current_size.saturating_sub(evicted.len());
            }
        }
        *current_size += data_size;

        while *current_size > self.max_size {
            match cache.pop_lru() {
                Some((_, evicted)) => *current_size = current_size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    pub async fn remove(&self, key: &VariantKey) -> Option<Bytes> {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;
        let data = cache.pop(key)?;
        *current_size = current_size.saturating_sub(data.len());
        Some(data)
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Current total size of cached variants in bytes.
    pub async fn size(&self) -> usize {
        *self.current_size.read().await
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for VariantCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Disk Tier
// =============================================================================

/// Persistent variant files under `<root>/<kind>/<asset name>`.
#[derive(Debug, Clone)]
pub struct DiskVariantStore {
    root: PathBuf,
}

impl DiskVariantStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &VariantKey) -> Result<PathBuf, StoreError> {
        validate_asset_name(&key.asset_name)?;
        Ok(self.root.join(key.kind.as_str()).join(&*key.asset_name))
    }

    /// Read a variant; `Ok(None)` when it has not been generated yet.
    pub async fn read(&self, key: &VariantKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write(&self, key: &VariantKey, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        write_atomic(&path, data).await
    }

    /// Remove a variant; missing files are not an error.
    pub async fn remove(&self, key: &VariantKey) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
