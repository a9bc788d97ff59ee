//! Delivery and variant cache integration tests.
//!
//! Tests verify:
//! - Entitlement decides between the base asset and watermarked variants
//! - Previews of blank or tiny assets still differ from the paid bytes
//! - Repeated requests are served from the cache without store reads
//! - Deleting an asset invalidates every cached variant
//! - Downloads convert to the requested container

use std::sync::Arc;

use bytes::Bytes;
use image::{Rgb, RgbImage};
use toonify::asset::{
    AssetEncoder, CacheVariant, DeliveryConfig, DeliveryService, OutputFormat, Variant,
};
use toonify::error::DeliveryError;
use toonify::store::{AssetStore, FsAssetStore};

use super::test_utils::{
    encode_jpeg, is_gif, is_valid_jpeg, scene, temp_dir, test_delivery, CountingStore,
};

async fn stored_scene(store: &CountingStore) -> (String, Bytes) {
    let data = encode_jpeg(&scene(120, 80));
    let name = store.persist_asset(data.clone()).await.unwrap();
    (name, data)
}

// =============================================================================
// Entitlement
// =============================================================================

#[tokio::test]
async fn test_entitled_full_is_the_base_asset() {
    let store = Arc::new(CountingStore::new());
    let (name, base) = stored_scene(&store).await;
    let delivery = test_delivery(store);

    let response = delivery.fetch(&name, Variant::Full, true).await.unwrap();
    assert_eq!(response.data, base);
    assert_eq!(response.variant, None);
    assert_eq!(response.content_type, "image/jpeg");
}

#[tokio::test]
async fn test_unentitled_callers_get_watermarked_variants() {
    let store = Arc::new(CountingStore::new());
    let (name, base) = stored_scene(&store).await;
    let delivery = test_delivery(store);

    let full = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert_eq!(full.variant, Some(CacheVariant::WatermarkedFull));
    assert_ne!(full.data, base);
    assert!(is_valid_jpeg(&full.data));

    let encoder = AssetEncoder::new();
    assert_eq!(encoder.dimensions(&full.data).unwrap(), (120, 80));

    let thumb = delivery.fetch(&name, Variant::Thumb, false).await.unwrap();
    assert_eq!(thumb.variant, Some(CacheVariant::WatermarkedThumb));
    assert_eq!(encoder.dimensions(&thumb.data).unwrap().0, 16);

    let clean_thumb = delivery.fetch(&name, Variant::Thumb, true).await.unwrap();
    assert_eq!(clean_thumb.variant, Some(CacheVariant::Thumb));
    assert_ne!(clean_thumb.data, thumb.data);
}

#[tokio::test]
async fn test_blank_white_assets_are_still_watermarked() {
    let store = Arc::new(CountingStore::new());
    let white = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
    let base = encode_jpeg(&white);
    let name = store.persist_asset(base.clone()).await.unwrap();
    let delivery = test_delivery(store);

    let paid = delivery.fetch(&name, Variant::Full, true).await.unwrap();
    let preview = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert_eq!(preview.variant, Some(CacheVariant::WatermarkedFull));
    assert_ne!(preview.data, base);
    assert_ne!(preview.data, paid.data);

    let encoder = AssetEncoder::new();
    let decoded = encoder.decode(&preview.data).unwrap();
    assert!(decoded.pixels().any(|p| p.0[0] < 230));

    let clean_thumb = delivery.fetch(&name, Variant::Thumb, true).await.unwrap();
    let marked_thumb = delivery.fetch(&name, Variant::Thumb, false).await.unwrap();
    assert_ne!(marked_thumb.data, clean_thumb.data);
}

#[tokio::test]
async fn test_one_pixel_tall_assets_are_still_watermarked() {
    let store = Arc::new(CountingStore::new());
    let strip = RgbImage::from_pixel(64, 1, Rgb([255, 255, 255]));
    let base = encode_jpeg(&strip);
    let name = store.persist_asset(base.clone()).await.unwrap();
    let delivery = test_delivery(store);

    let preview = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert_eq!(preview.variant, Some(CacheVariant::WatermarkedFull));
    assert_ne!(preview.data, base);
}

// =============================================================================
// Cache Behavior
// =============================================================================

#[tokio::test]
async fn test_repeated_fetch_is_idempotent_and_cached() {
    let store = Arc::new(CountingStore::new());
    let (name, _) = stored_scene(&store).await;
    let delivery = test_delivery(store.clone());

    let first = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert!(!first.cache_hit);
    let reads_after_first = store.read_count();

    for _ in 0..3 {
        let again = delivery.fetch(&name, Variant::Full, false).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.data, first.data);
    }
    assert_eq!(store.read_count(), reads_after_first);
    assert!(delivery.memory_usage().await >= first.data.len());
}

#[tokio::test]
async fn test_disk_tier_serves_after_restart() {
    let store = Arc::new(CountingStore::new());
    let (name, _) = stored_scene(&store).await;
    let variants_dir = temp_dir("restart");

    let first = DeliveryService::new(store.clone(), DeliveryConfig::new(&variants_dir));
    let generated = first.fetch(&name, Variant::Thumb, false).await.unwrap();

    let second = DeliveryService::new(store.clone(), DeliveryConfig::new(&variants_dir));
    let reads = store.read_count();
    let served = second.fetch(&name, Variant::Thumb, false).await.unwrap();
    assert!(served.cache_hit);
    assert_eq!(served.data, generated.data);
    assert_eq!(store.read_count(), reads);

    let _ = std::fs::remove_dir_all(&variants_dir);
}

#[tokio::test]
async fn test_delete_invalidates_variants() {
    let store = Arc::new(CountingStore::new());
    let (name, _) = stored_scene(&store).await;
    let delivery = test_delivery(store.clone());

    delivery.fetch(&name, Variant::Full, false).await.unwrap();
    delivery.fetch(&name, Variant::Thumb, false).await.unwrap();
    delivery.fetch(&name, Variant::Thumb, true).await.unwrap();

    delivery.delete_asset(&name).await.unwrap();

    for (variant, entitled) in [
        (Variant::Full, false),
        (Variant::Thumb, false),
        (Variant::Thumb, true),
        (Variant::Full, true),
    ] {
        let err = delivery.fetch(&name, variant, entitled).await.unwrap_err();
        assert!(
            matches!(err, DeliveryError::AssetNotFound { .. }),
            "{:?}/{} still served",
            variant,
            entitled
        );
    }
}

#[tokio::test]
async fn test_missing_and_invalid_names() {
    let store = Arc::new(CountingStore::new());
    let delivery = test_delivery(store);

    let err = delivery
        .fetch("processed_missing.jpg", Variant::Full, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::AssetNotFound { .. }));

    let err = delivery
        .fetch("../etc/passwd", Variant::Full, true)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::InvalidName { .. }));
}

#[tokio::test]
async fn test_corrupt_base_falls_back_to_base_bytes() {
    let store = Arc::new(CountingStore::new());
    let corrupt = Bytes::from_static(b"\xFF\xD8 truncated");
    let name = store.persist_asset(corrupt.clone()).await.unwrap();
    let delivery = test_delivery(store);

    let response = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert_eq!(response.data, corrupt);
    assert_eq!(response.variant, None);
}

// =============================================================================
// Downloads and Animation
// =============================================================================

#[tokio::test]
async fn test_download_formats() {
    let store = Arc::new(CountingStore::new());
    let (name, base) = stored_scene(&store).await;
    let delivery = test_delivery(store);

    let jpeg = delivery.download(&name, OutputFormat::Jpeg, None).await.unwrap();
    assert_eq!(jpeg.data, base);

    let png = delivery.download(&name, OutputFormat::Png, None).await.unwrap();
    assert_eq!(png.content_type, "image/png");
    assert!(png.data.starts_with(&[0x89, b'P', b'N', b'G']));

    let pdf = delivery.download(&name, OutputFormat::Pdf, Some(80)).await.unwrap();
    assert_eq!(pdf.content_type, "application/pdf");
    assert!(pdf.data.starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_animation_of_watermarked_rendition() {
    let store = Arc::new(CountingStore::new());
    let (name, _) = stored_scene(&store).await;
    let delivery = test_delivery(store);

    let gif = delivery.animation(&name, false).await.unwrap();
    assert!(is_gif(&gif));
}

#[tokio::test]
async fn test_fs_store_backs_delivery() {
    let root = temp_dir("fs");
    let store = Arc::new(FsAssetStore::open(root.join("assets")).await.unwrap());
    let name = store
        .persist_asset(encode_jpeg(&scene(60, 40)))
        .await
        .unwrap();

    let delivery = DeliveryService::new(store, DeliveryConfig::new(root.join("variants")));
    let response = delivery.fetch(&name, Variant::Full, false).await.unwrap();
    assert_eq!(response.variant, Some(CacheVariant::WatermarkedFull));

    delivery.delete_asset(&name).await.unwrap();
    assert!(delivery.fetch(&name, Variant::Full, true).await.is_err());

    let _ = std::fs::remove_dir_all(&root);
}
