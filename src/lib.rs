//! # Toonify
//!
//! An image stylization engine with quota-gated batch processing and a cached,
//! entitlement-aware delivery layer.
//!
//! ## Features
//!
//! - **Ten styles**: cartoon, sketch, pencil color, oil painting, watercolor,
//!   pop art, vintage, anime, ghibli and comic book pipelines
//! - **Effects**: background replacement on named plates, Lab color transfer
//!   from a reference image, breathing animation
//! - **Batch processing**: bounded worker pool with a rolling daily quota
//! - **Delivery**: watermarked previews and thumbnails cached in memory and on disk
//! - **Downloads**: JPEG/PNG/PDF through HMAC-SHA256 signed links
//!
//! ## Architecture
//!
//! - [`style`] - Decoding, the stylization pipelines and image statistics
//! - [`batch`] - Quota admission and the concurrent batch dispatcher
//! - [`asset`] - Encoding, variant rendering and the two-tier variant cache
//! - [`store`] - Asset storage and account ledger collaborators
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toonify::{
//!     create_router, BatchDispatcher, DeliveryConfig, DeliveryService, DispatcherConfig,
//!     EngineConfig, MemoryAssetStore, MemoryLedger, RouterConfig, StyleEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryAssetStore::new());
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let engine = StyleEngine::new(EngineConfig::default());
//!
//!     let dispatcher =
//!         BatchDispatcher::new(engine, store.clone(), ledger, DispatcherConfig::default());
//!     let delivery = DeliveryService::new(store, DeliveryConfig::new("./data/variants"));
//!
//!     let router = create_router(dispatcher, delivery, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod asset;
pub mod batch;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod style;

// Re-export commonly used types
pub use asset::{
    AssetEncoder, CacheVariant, DeliveryConfig, DeliveryResponse, DeliveryService, OutputFormat,
    Variant,
};
pub use batch::{
    AccountTier, BatchDispatcher, BatchItem, BatchOutcome, BatchResult, CallerContext,
    DispatcherConfig, ItemSuccess, QuotaPolicy,
};
pub use config::{Cli, Command, ServeConfig, SignConfig, SignOutputFormat, StylizeConfig};
pub use error::{BatchError, DeliveryError, ProcessError, StoreError, StyleError};
pub use server::{create_router, AppState, DownloadSigner, RouterConfig};
pub use store::{
    AccountLedger, AssetStore, FsAssetStore, MemoryAssetStore, MemoryLedger, ProcessingEvent,
};
pub use style::{
    EngineConfig, ImageStats, PlateLibrary, ProcessingResult, ResolutionTier, Style,
    StyleEngine, StyleRequest, Treatment,
};
