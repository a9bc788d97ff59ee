//! HTTP server layer for Toonify.
//!
//! This module exposes the batch dispatcher and the delivery service over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   POST /api/process, /api/batch    GET /assets/{name}           │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────────┐ │
//! │  │  handlers   │  │     auth     │  │        routes           │ │
//! │  │ (requests)  │  │(signed links)│  │  (router config)        │ │
//! │  └─────────────┘  └──────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers are identified by the `x-caller-id` and `x-caller-tier` headers set
//! by the upstream gateway. Downloads are authorized by signed links instead.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{verify_download, AuthError, DownloadSigner, SignedLink};
pub use handlers::{
    animation_handler, asset_handler, batch_handler, delete_handler, download_handler,
    download_link_handler, health_handler, process_handler, ApiError, AppState,
    AssetQueryParams, BatchItemResponse, BatchRequest, BatchResponse, Caller,
    DownloadQueryParams, ErrorResponse, HealthResponse, ProcessRequest, ProcessResponse,
    StatsPair, CACHE_HIT_HEADER, CALLER_ID_HEADER, CALLER_TIER_HEADER,
};
pub use routes::{
    create_router, RouterConfig, DEFAULT_DOWNLOAD_TTL, DEFAULT_MAX_BATCH_ITEMS,
    DEFAULT_MAX_UPLOAD_BYTES,
};
