//! Test utilities for integration tests.
//!
//! This module provides image fixtures, a store that counts reads, and helpers
//! for building the full service stack and driving the router.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use toonify::asset::{DeliveryConfig, DeliveryService};
use toonify::batch::{BatchDispatcher, DispatcherConfig, QuotaPolicy};
use toonify::error::StoreError;
use toonify::server::{create_router, DownloadSigner, RouterConfig};
use toonify::store::{AssetStore, MemoryAssetStore, MemoryLedger};
use toonify::style::{EngineConfig, StyleEngine};

/// Bounds used by the test engine for the standard tier.
pub const TEST_STANDARD_BOUNDS: (u32, u32) = (48, 27);

/// Bounds used by the test engine for the premium tier.
pub const TEST_PREMIUM_BOUNDS: (u32, u32) = (96, 54);

pub const TEST_SECRET: &str = "integration-secret";

// =============================================================================
// Image Fixtures
// =============================================================================

/// A textured test scene: gradient sky, a bright disc and a dark bar.
pub fn scene(width: u32, height: u32) -> RgbImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let radius = width.min(height) as f32 / 4.0;
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        if ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt() < radius {
            Rgb([230, 180, 60])
        } else if y > height * 4 / 5 {
            Rgb([40, 50, 30])
        } else {
            let t = y as f32 / height.max(1) as f32;
            Rgb([
                (80.0 + 100.0 * t) as u8,
                (120.0 + 60.0 * t) as u8,
                (220.0 - 80.0 * t) as u8,
            ])
        }
    })
}

/// Low-variance swatch around `base`.
pub fn swatch(width: u32, height: u32, base: [u8; 3], spread: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let d = ((x * 7 + y * 3) % u32::from(spread.max(1))) as u8;
        Rgb([base[0] + d, base[1] + d / 2, base[2] + d / 3])
    })
}

pub fn encode_png(img: &RgbImage) -> Bytes {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    Bytes::from(out)
}

pub fn encode_jpeg(img: &RgbImage) -> Bytes {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    Bytes::from(out)
}

pub fn scene_png(width: u32, height: u32) -> Bytes {
    encode_png(&scene(width, height))
}

pub fn scene_base64(width: u32, height: u32) -> String {
    BASE64.encode(scene_png(width, height))
}

/// Check that data starts with the JPEG SOI marker and ends with EOI.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9])
}

pub fn is_gif(data: &[u8]) -> bool {
    data.starts_with(b"GIF8")
}

pub fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "toonify-it-{}-{}",
        label,
        uuid::Uuid::new_v4().simple()
    ))
}

// =============================================================================
// Counting Store
// =============================================================================

/// An in-memory asset store that counts base reads.
///
/// This is useful for verifying that cached variants are served without
/// touching the store.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryAssetStore,
    reads: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for CountingStore {
    async fn persist_asset(&self, data: Bytes) -> Result<String, StoreError> {
        self.inner.persist_asset(data).await
    }

    async fn read_asset(&self, name: &str) -> Result<Bytes, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_asset(name).await
    }

    async fn delete_asset(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_asset(name).await
    }
}

// =============================================================================
// Service Stack
// =============================================================================

pub fn test_engine() -> StyleEngine {
    StyleEngine::new(
        EngineConfig::default()
            .with_seed(7)
            .with_bounds(TEST_STANDARD_BOUNDS, TEST_PREMIUM_BOUNDS),
    )
}

pub fn test_dispatcher(
    store: Arc<CountingStore>,
    ledger: Arc<MemoryLedger>,
    daily_limit: u32,
) -> BatchDispatcher<CountingStore, MemoryLedger> {
    BatchDispatcher::new(
        test_engine(),
        store,
        ledger,
        DispatcherConfig {
            quota: QuotaPolicy::new(daily_limit),
            max_workers: Some(2),
            ..DispatcherConfig::default()
        },
    )
}

pub fn test_delivery(store: Arc<CountingStore>) -> DeliveryService<CountingStore> {
    DeliveryService::new(store, DeliveryConfig::new(temp_dir("variants")).with_thumb_width(16))
}

/// The full stack behind a router.
pub struct TestApp {
    pub store: Arc<CountingStore>,
    pub ledger: Arc<MemoryLedger>,
    pub router: Router,
}

impl TestApp {
    pub fn new(daily_limit: u32) -> Self {
        Self::with_config(
            daily_limit,
            RouterConfig::new()
                .with_signer(DownloadSigner::new(TEST_SECRET).unwrap())
                .with_max_batch_items(4)
                .with_tracing(false),
        )
    }

    pub fn with_config(daily_limit: u32, config: RouterConfig) -> Self {
        let store = Arc::new(CountingStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let router = create_router(
            test_dispatcher(store.clone(), ledger.clone(), daily_limit),
            test_delivery(store.clone()),
            config,
        );
        Self {
            store,
            ledger,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    pub async fn post_json(
        &self,
        uri: &str,
        caller: &str,
        tier: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-caller-id", caller)
            .header("x-caller-tier", tier)
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(
        &self,
        uri: &str,
        caller: Option<(&str, &str)>,
    ) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let mut builder = Request::builder().uri(uri);
        if let Some((id, tier)) = caller {
            builder = builder.header("x-caller-id", id).header("x-caller-tier", tier);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Process one scene for `caller` and return the stored asset name.
    pub async fn process_scene(&self, caller: &str, tier: &str) -> String {
        let (status, json) = self
            .post_json(
                "/api/process",
                caller,
                tier,
                serde_json::json!({ "image": scene_base64(64, 40), "style": "cartoon" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "process failed: {}", json);
        json["asset_name"].as_str().unwrap().to_string()
    }
}
