//! Router configuration for the Toonify API.
//!
//! # Route Structure
//!
//! ```text
//! /health                                  - Health check (public)
//! /api/process                             - Stylize one image (caller)
//! /api/batch                               - Stylize a batch (caller)
//! /assets/{name}                           - Entitled rendition (caller)
//! /assets/{name}/animation                 - Breathing GIF (caller)
//! /api/assets/{name}/download-link         - Issue signed link (caller)
//! /api/assets/{name}                       - Delete (caller)
//! /download/{name}                         - Download (signed link)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use toonify::server::{create_router, DownloadSigner, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_signer(DownloadSigner::new("my-secret-key")?)
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(dispatcher, delivery, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{verify_download, DownloadSigner};
use super::handlers::{
    animation_handler, asset_handler, batch_handler, delete_handler, download_handler,
    download_link_handler, health_handler, process_handler, AppState, CACHE_HIT_HEADER,
    CALLER_ID_HEADER, CALLER_TIER_HEADER,
};
use crate::asset::DeliveryService;
use crate::batch::BatchDispatcher;
use crate::store::{AccountLedger, AssetStore};

/// Default largest accepted decoded upload: 10MB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default largest batch.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 10;

/// Default lifetime of download links: 1 hour
pub const DEFAULT_DOWNLOAD_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Signs download links; `None` disables the download routes
    pub signer: Option<DownloadSigner>,

    pub download_ttl: Duration,

    /// Prefix of issued download links
    pub public_url: String,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    pub max_upload_bytes: usize,

    pub max_batch_items: usize,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Downloads disabled, any CORS origin, 1 hour max-age, tracing on.
    pub fn new() -> Self {
        Self {
            signer: None,
            download_ttl: DEFAULT_DOWNLOAD_TTL,
            public_url: String::new(),
            cors_origins: None,
            cache_max_age: 3600,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            enable_tracing: true,
        }
    }

    pub fn with_signer(mut self, signer: DownloadSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_download_ttl(mut self, ttl: Duration) -> Self {
        self.download_ttl = ttl;
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_max_batch_items(mut self, items: usize) -> Self {
        self.max_batch_items = items;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Largest request body: a full batch of base64 images plus one reference.
    fn body_limit(&self) -> usize {
        let per_image = self.max_upload_bytes.saturating_mul(4) / 3 + 1024;
        per_image.saturating_mul(self.max_batch_items.saturating_add(1))
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router<S, L>(
    dispatcher: BatchDispatcher<S, L>,
    delivery: DeliveryService<S>,
    config: RouterConfig,
) -> Router
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let app_state = AppState {
        dispatcher: Arc::new(dispatcher),
        delivery: Arc::new(delivery),
        signer: config.signer.clone(),
        public_url: config.public_url.clone(),
        download_ttl: config.download_ttl,
        cache_max_age: config.cache_max_age,
        max_upload_bytes: config.max_upload_bytes,
        max_batch_items: config.max_batch_items,
    };

    let caller_routes = Router::new()
        .route("/api/process", post(process_handler::<S, L>))
        .route("/api/batch", post(batch_handler::<S, L>))
        .route("/assets/{name}", get(asset_handler::<S, L>))
        .route("/assets/{name}/animation", get(animation_handler::<S, L>))
        .route(
            "/api/assets/{name}/download-link",
            post(download_link_handler::<S, L>),
        )
        .route("/api/assets/{name}", delete(delete_handler::<S, L>))
        .with_state(app_state.clone());

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .merge(caller_routes);

    if let Some(signer) = config.signer.clone() {
        let download_routes = Router::new()
            .route("/download/{name}", get(download_handler::<S, L>))
            .with_state(app_state)
            .layer(middleware::from_fn_with_state(signer, verify_download));
        router = router.merge(download_routes);
    }

    let router = router
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(CALLER_ID_HEADER),
            HeaderName::from_static(CALLER_TIER_HEADER),
        ])
        .expose_headers([HeaderName::from_static(CACHE_HIT_HEADER)])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
