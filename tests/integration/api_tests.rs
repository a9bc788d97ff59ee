//! HTTP API integration tests.
//!
//! Tests verify:
//! - Processing and batch endpoints, including quota rejections
//! - Caller identification and error responses
//! - Entitlement-gated asset delivery and download links
//! - Signed download verification and asset deletion

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use toonify::server::{ErrorResponse, RouterConfig};

use super::test_utils::{is_gif, is_valid_jpeg, scene_base64, TestApp};

// =============================================================================
// Health and Caller Identification
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(5);
    let (status, _, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_missing_caller_is_unauthorized() {
    let app = TestApp::new(5);
    let (status, _, body) = app.get("/assets/processed_x.jpg", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "missing_caller");
    assert_eq!(error.status, Some(401));
}

#[tokio::test]
async fn test_unknown_tier_is_bad_request() {
    let app = TestApp::new(5);
    let (status, json) = app
        .post_json(
            "/api/process",
            "alice",
            "platinum",
            json!({ "image": scene_base64(32, 18) }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_caller_tier");
}

// =============================================================================
// Processing
// =============================================================================

#[tokio::test]
async fn test_process_returns_asset() {
    let app = TestApp::new(5);
    let (status, json) = app
        .post_json(
            "/api/process",
            "alice",
            "free",
            json!({ "image": scene_base64(120, 60), "style": "pop_art", "tier": "premium" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);

    let name = json["asset_name"].as_str().unwrap();
    assert!(name.starts_with("processed_"));
    assert_eq!(json["url"], format!("/assets/{}", name));
    assert_eq!(json["style"], "pop_art");
    // Free callers are held to the standard bounds
    assert_eq!((json["width"].as_u64(), json["height"].as_u64()), (Some(48), Some(24)));
    assert!(json["proc_time_ms"].as_f64().unwrap() >= 0.0);
    assert!(json["stats"]["original"]["brightness"].is_number());
    assert!(json["stats"]["processed"]["color_balance"]["r"].is_number());
}

#[tokio::test]
async fn test_process_accepts_data_url_and_unknown_style() {
    let app = TestApp::new(5);
    let image = format!("data:image/png;base64,{}", scene_base64(32, 18));
    let (status, json) = app
        .post_json(
            "/api/process",
            "alice",
            "free",
            json!({ "image": image, "style": "vaporwave" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["style"], "cartoon");
}

#[tokio::test]
async fn test_process_rejects_undecodable_image() {
    let app = TestApp::new(5);
    let (status, json) = app
        .post_json(
            "/api/process",
            "alice",
            "free",
            json!({ "image": BASE64.encode(b"plain text, not pixels") }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_image");
}

#[tokio::test]
async fn test_batch_quota_over_http() {
    let app = TestApp::new(5);
    let item = json!({ "image": scene_base64(32, 18), "style": "sketch" });

    let (status, json) = app
        .post_json(
            "/api/batch",
            "bob",
            "free",
            json!({ "items": [item.clone(), item.clone(), item.clone()] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["results"].as_array().unwrap().len(), 3);

    let (status, json) = app
        .post_json(
            "/api/batch",
            "bob",
            "free",
            json!({ "items": [item.clone(), item.clone(), item.clone()] }),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"], "quota_exceeded");

    let (status, _) = app
        .post_json(
            "/api/batch",
            "bob",
            "free",
            json!({ "items": [item.clone(), item] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_batch_reports_failures_in_place() {
    let app = TestApp::new(5);
    let (status, json) = app
        .post_json(
            "/api/batch",
            "carol",
            "free",
            json!({ "items": [
                { "image": scene_base64(32, 18), "style": "anime" },
                { "image": "%%% not base64 %%%" },
                { "image": BASE64.encode(b"not an image either") },
                { "image": scene_base64(32, 18), "background": "forest" },
            ] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", json);

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    for (i, entry) in results.iter().enumerate() {
        assert_eq!(entry["index"], i);
    }

    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["style"], "anime");
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("base64"));
    assert_eq!(results[2]["success"], false);
    assert!(results[2]["error"].as_str().unwrap().contains("Invalid image"));
    assert_eq!(results[3]["success"], true);
    assert_eq!(results[3]["style"], "teleport:forest");
}

#[tokio::test]
async fn test_batch_size_limits() {
    let app = TestApp::new(50);
    let item = json!({ "image": scene_base64(16, 9) });

    let (status, json) = app
        .post_json("/api/batch", "dave", "premium", json!({ "items": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_batch");

    let items: Vec<Value> = (0..5).map(|_| item.clone()).collect();
    let (status, _) = app
        .post_json("/api/batch", "dave", "premium", json!({ "items": items }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Asset Delivery
// =============================================================================

#[tokio::test]
async fn test_asset_delivery_headers_and_cache() {
    let app = TestApp::new(5);
    let name = app.process_scene("erin", "free").await;
    let uri = format!("/assets/{}", name);

    let (status, headers, first) = app.get(&uri, Some(("erin", "free"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert!(headers
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("private"));
    assert_eq!(headers.get("x-cache-hit").unwrap(), "false");
    assert!(is_valid_jpeg(&first));

    let (_, headers, second) = app.get(&uri, Some(("erin", "free"))).await;
    assert_eq!(headers.get("x-cache-hit").unwrap(), "true");
    assert_eq!(first, second);

    let (status, _, thumb) = app
        .get(&format!("{}?variant=thumb", uri), Some(("erin", "free")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(thumb, first);
}

#[tokio::test]
async fn test_entitlement_changes_rendition() {
    let app = TestApp::new(5);
    let name = app.process_scene("frank", "free").await;
    let uri = format!("/assets/{}", name);

    let (_, _, preview) = app.get(&uri, Some(("frank", "free"))).await;
    let (_, _, premium) = app.get(&uri, Some(("vip", "premium"))).await;
    assert_ne!(preview, premium);

    app.ledger.grant("frank", &name).await;
    let (_, headers, paid) = app.get(&uri, Some(("frank", "free"))).await;
    assert_eq!(paid, premium);
    assert_eq!(headers.get("x-cache-hit").unwrap(), "false");
}

#[tokio::test]
async fn test_missing_asset_is_not_found() {
    let app = TestApp::new(5);
    let (status, _, body) = app
        .get("/assets/processed_nope.jpg", Some(("gina", "free")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "not_found");
}

#[tokio::test]
async fn test_animation_endpoint() {
    let app = TestApp::new(5);
    let name = app.process_scene("hank", "free").await;

    let (status, headers, body) = app
        .get(&format!("/assets/{}/animation", name), Some(("hank", "free")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/gif");
    assert!(is_gif(&body));
}

// =============================================================================
// Download Links
// =============================================================================

async fn request_link(
    app: &TestApp,
    name: &str,
    caller: &str,
    tier: &str,
    query: &str,
) -> (StatusCode, Value) {
    app.post_json(
        &format!("/api/assets/{}/download-link{}", name, query),
        caller,
        tier,
        Value::Null,
    )
    .await
}

#[tokio::test]
async fn test_download_link_requires_entitlement() {
    let app = TestApp::new(5);
    let name = app.process_scene("ivy", "free").await;

    let (status, json) = request_link(&app, &name, "ivy", "free", "").await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["error"], "payment_required");

    app.ledger.grant("ivy", &name).await;
    let (status, json) = request_link(&app, &name, "ivy", "free", "").await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert!(json["url"].as_str().unwrap().starts_with("/download/"));
    assert!(json["expires"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_signed_download_round_trip() {
    let app = TestApp::new(5);
    let name = app.process_scene("jack", "free").await;

    let (status, json) = request_link(&app, &name, "boss", "admin", "?format=png").await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    let url = json["url"].as_str().unwrap().to_string();

    let (status, headers, body) = app.get(&url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    let disposition = headers.get("content-disposition").unwrap().to_str().unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains(".png"));
    assert!(body.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn test_download_rejects_tampering() {
    let app = TestApp::new(5);
    let name = app.process_scene("kate", "free").await;

    let (_, json) = request_link(&app, &name, "boss", "admin", "?format=jpeg").await;
    let url = json["url"].as_str().unwrap().to_string();

    // Switching the format invalidates the signature
    let tampered = url.replace("format=jpeg", "format=png");
    let (status, _, _) = app.get(&tampered, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app.get(&format!("/download/{}", name), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .get(&format!("/download/{}?exp=abc&sig=00", name), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_link_for_missing_asset() {
    let app = TestApp::new(5);
    let (status, _) = request_link(&app, "processed_gone.jpg", "boss", "admin", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) =
        request_link(&app, "processed_gone.jpg", "boss", "admin", "?format=gif").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_format");
}

#[tokio::test]
async fn test_downloads_disabled_without_signer() {
    let app = TestApp::with_config(5, RouterConfig::new().with_tracing(false));
    let name = app.process_scene("liam", "free").await;

    let (status, _) = request_link(&app, &name, "boss", "admin", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _, _) = app.get(&format!("/download/{}", name), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_delete_permissions_and_invalidation() {
    let app = TestApp::new(5);
    let name = app.process_scene("mona", "free").await;
    let uri = format!("/api/assets/{}", name);

    // Warm the variant cache
    let (status, _, _) = app
        .get(&format!("/assets/{}", name), Some(("mona", "free")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let delete = |caller: &'static str| {
        axum::http::Request::builder()
            .method("DELETE")
            .uri(uri.clone())
            .header("x-caller-id", caller)
            .header("x-caller-tier", "free")
            .body(axum::body::Body::empty())
            .unwrap()
    };

    let (status, _, _) = app.send(delete("stranger")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.send(delete("mona")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .get(&format!("/assets/{}", name), Some(("mona", "free")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_premium_callers_cannot_delete_foreign_assets() {
    let app = TestApp::new(5);
    let name = app.process_scene("mona", "free").await;
    let uri = format!("/api/assets/{}", name);

    let delete = |caller: &'static str, tier: &'static str| {
        axum::http::Request::builder()
            .method("DELETE")
            .uri(uri.clone())
            .header("x-caller-id", caller)
            .header("x-caller-tier", tier)
            .body(axum::body::Body::empty())
            .unwrap()
    };

    // Premium callers may view the asset but not remove it
    let (status, _, _) = app
        .get(&format!("/assets/{}", name), Some(("mallory", "premium")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.send(delete("mallory", "premium")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app
        .get(&format!("/assets/{}", name), Some(("mona", "free")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.send(delete("root", "admin")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .get(&format!("/assets/{}", name), Some(("mona", "free")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
