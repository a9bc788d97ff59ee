//! Asset delivery layer.
//!
//! Serves stored base assets and their derived renditions to callers
//! according to entitlement.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            DeliveryService              │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ VariantCache │  │  AssetEncoder   │  │
//! │  │  (memory)    │  │ JPEG/PNG/PDF/GIF│  │
//! │  ├──────────────┤  ├─────────────────┤  │
//! │  │ DiskVariant  │  │ render: thumb + │  │
//! │  │ Store        │  │ watermark       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               AssetStore                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`DeliveryService`]: entitlement-aware fetch, download, animation, delete
//! - [`VariantCache`]: byte-bounded LRU of encoded variants
//! - [`DiskVariantStore`]: persistent variant files, written atomically
//! - [`AssetEncoder`]: output containers
//! - [`render`]: thumbnail and watermark rendering

mod cache;
mod encoder;
pub mod render;
mod service;

pub use cache::{
    CacheVariant, DiskVariantStore, VariantCache, VariantKey, DEFAULT_VARIANT_CACHE_CAPACITY,
};
pub use encoder::{
    clamp_quality, is_valid_quality, AssetEncoder, OutputFormat, DEFAULT_JPEG_QUALITY,
    FRAME_DELAY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use render::{thumbnail, watermark, DEFAULT_THUMBNAIL_WIDTH, WATERMARK_OPACITY, WATERMARK_TEXT};
pub use service::{DeliveryConfig, DeliveryResponse, DeliveryService, Variant};
