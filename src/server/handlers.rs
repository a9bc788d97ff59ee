//! HTTP request handlers for the Toonify API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /api/process` - Stylize one image
//! - `POST /api/batch` - Stylize several images
//! - `GET /assets/{name}` - Serve an asset in the caller's entitled rendition
//! - `GET /assets/{name}/animation` - Breathing GIF of an asset
//! - `POST /api/assets/{name}/download-link` - Issue a signed download link
//! - `GET /download/{name}` - Signed, format-converted download
//! - `DELETE /api/assets/{name}` - Delete an asset and its variants
//!
//! Callers are identified by the `x-caller-id` and `x-caller-tier` headers,
//! which are set by the authenticating gateway in front of this service.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::asset::{is_valid_quality, DeliveryService, OutputFormat, Variant};
use crate::batch::{
    AccountTier, BatchDispatcher, BatchItem, BatchOutcome, CallerContext, ItemSuccess,
};
use crate::error::{BatchError, DeliveryError, ProcessError, StoreError, StyleError};
use crate::store::{AccountLedger, AssetStore};
use crate::style::{ImageStats, ResolutionTier, Style, StyleRequest, Treatment};

use super::auth::{DownloadSigner, SignedLink};

/// Header carrying the caller's identifier.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Header carrying the caller's account tier (`free`, `premium`, `admin`).
pub const CALLER_TIER_HEADER: &str = "x-caller-tier";

/// Response header telling whether a variant came from the cache.
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
pub struct AppState<S: AssetStore, L: AccountLedger> {
    pub dispatcher: Arc<BatchDispatcher<S, L>>,

    pub delivery: Arc<DeliveryService<S>>,

    /// Issues download links; `None` disables downloads
    pub signer: Option<DownloadSigner>,

    /// Prefix of issued download links (empty for relative links)
    pub public_url: String,

    pub download_ttl: Duration,

    /// Cache-Control max-age for served assets, in seconds
    pub cache_max_age: u32,

    /// Largest accepted decoded image, in bytes
    pub max_upload_bytes: usize,

    pub max_batch_items: usize,
}

impl<S: AssetStore + 'static, L: AccountLedger + 'static> AppState<S, L> {
    fn ledger(&self) -> &L {
        self.dispatcher.ledger()
    }

    /// Whether the caller may see the asset unwatermarked.
    async fn is_entitled(&self, caller: &CallerContext, name: &str) -> Result<bool, StoreError> {
        if caller.tier.has_full_access() {
            return Ok(true);
        }
        self.ledger().is_entitled(&caller.caller_id, name).await
    }
}

impl<S: AssetStore, L: AccountLedger> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            delivery: Arc::clone(&self.delivery),
            signer: self.signer.clone(),
            public_url: self.public_url.clone(),
            download_ttl: self.download_ttl,
            cache_max_age: self.cache_max_age,
            max_upload_bytes: self.max_upload_bytes,
            max_batch_items: self.max_batch_items,
        }
    }
}

// =============================================================================
// Caller Extraction
// =============================================================================

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller_id = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingCaller)?;

        let tier = match parts.headers.get(CALLER_TIER_HEADER) {
            None => AccountTier::default(),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<AccountTier>().ok())
                .ok_or_else(|| ApiError::BadRequest {
                    error_type: "invalid_caller_tier",
                    message: format!("Invalid {} header", CALLER_TIER_HEADER),
                })?,
        };

        Ok(Caller(CallerContext::new(caller_id, tier)))
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Body of `POST /api/process`, and one entry of a batch.
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Base64 image bytes; a `data:` URL prefix is accepted
    pub image: String,

    #[serde(default)]
    pub style: Option<String>,

    #[serde(default)]
    pub tier: Option<ResolutionTier>,

    /// Background plate; takes precedence over `style`
    #[serde(default)]
    pub background: Option<String>,

    /// Base64 reference image for color DNA transfer; takes precedence over `style`
    #[serde(default)]
    pub reference: Option<String>,
}

impl ProcessRequest {
    fn into_item(self, max_upload_bytes: usize) -> Result<BatchItem, ApiError> {
        let image = decode_upload("image", &self.image, max_upload_bytes)?;
        let tier = self.tier.unwrap_or_default();

        let treatment = if let Some(plate) = self.background {
            Treatment::ReplaceBackground { plate }
        } else if let Some(reference) = self.reference {
            Treatment::DnaTransfer {
                reference: decode_upload("reference", &reference, max_upload_bytes)?,
            }
        } else {
            Treatment::Stylize(Style::resolve(self.style.as_deref().unwrap_or("cartoon")))
        };

        Ok(BatchItem::new(image, StyleRequest::new(treatment, tier)))
    }
}

fn decode_upload(field: &str, encoded: &str, max_bytes: usize) -> Result<Bytes, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest {
            error_type: "invalid_image",
            message: format!("Field {:?} is not valid base64: {}", field, e),
        })?;

    if bytes.len() > max_bytes {
        return Err(ApiError::BadRequest {
            error_type: "invalid_image",
            message: format!(
                "Field {:?} is {} bytes, the limit is {} bytes",
                field,
                bytes.len(),
                max_bytes
            ),
        });
    }
    Ok(Bytes::from(bytes))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<ProcessRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AssetQueryParams {
    #[serde(default)]
    pub variant: Variant,
}

/// Query parameters of download links and downloads.
#[derive(Debug, Deserialize)]
pub struct DownloadQueryParams {
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub quality: Option<u8>,
}

impl DownloadQueryParams {
    fn parse(&self) -> Result<(OutputFormat, Option<u8>), ApiError> {
        let format = match self.format.as_deref() {
            None => OutputFormat::Jpeg,
            Some(raw) => raw.parse::<OutputFormat>().map_err(|e| ApiError::BadRequest {
                error_type: "invalid_format",
                message: e.to_string(),
            })?,
        };
        if format == OutputFormat::Gif {
            return Err(ApiError::BadRequest {
                error_type: "invalid_format",
                message: "Downloads are available as jpeg, png or pdf".to_string(),
            });
        }
        if let Some(quality) = self.quality {
            if !is_valid_quality(quality) {
                return Err(ApiError::BadRequest {
                    error_type: "invalid_quality",
                    message: format!("Invalid quality: {} (must be 1-100)", quality),
                });
            }
        }
        Ok((format, self.quality))
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "quota_exceeded")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Statistics of the input and the output of one item.
#[derive(Debug, Serialize)]
pub struct StatsPair {
    pub original: Option<ImageStats>,
    pub processed: Option<ImageStats>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub asset_name: String,
    /// Where the asset is served
    pub url: String,
    pub style: String,
    pub proc_time_ms: f64,
    pub width: u32,
    pub height: u32,
    pub stats: StatsPair,
}

impl From<ItemSuccess> for ProcessResponse {
    fn from(item: ItemSuccess) -> Self {
        Self {
            url: asset_url(&item.asset_name),
            proc_time_ms: millis(item.elapsed),
            asset_name: item.asset_name,
            style: item.label,
            width: item.width,
            height: item.height,
            stats: StatsPair {
                original: item.input_stats,
                processed: item.output_stats,
            },
        }
    }
}

/// One entry of a batch response.
#[derive(Debug, Serialize)]
pub struct BatchItemResponse {
    pub index: usize,
    pub success: bool,

    #[serde(flatten)]
    pub result: Option<ProcessResponse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResponse {
    fn failure(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            result: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItemResponse>,
}

fn asset_url(name: &str) -> String {
    format!("/assets/{}", name)
}

fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors surfaced by the handlers.
#[derive(Debug)]
pub enum ApiError {
    Process(ProcessError),
    Delivery(DeliveryError),
    /// Account ledger lookup failed
    Ledger(StoreError),
    BadRequest {
        error_type: &'static str,
        message: String,
    },
    /// No `x-caller-id` header
    MissingCaller,
    /// Caller has not paid for the asset
    PaymentRequired { name: String },
    /// Caller may not modify the asset
    Forbidden { name: String },
    /// No download secret is configured
    DownloadsDisabled,
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        ApiError::Process(err)
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        ApiError::Process(ProcessError::Batch(err))
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        ApiError::Delivery(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Ledger(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Process(err) => match err {
                ProcessError::Batch(BatchError::QuotaExceeded { .. }) => {
                    (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", err.to_string())
                }
                ProcessError::Batch(BatchError::Ledger(_)) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", err.to_string())
                }
                ProcessError::Style(StyleError::InvalidImage { .. }) => {
                    (StatusCode::BAD_REQUEST, "invalid_image", err.to_string())
                }
                ProcessError::Style(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "processing_error", err.to_string())
                }
                ProcessError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", err.to_string())
                }
                ProcessError::Worker(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "worker_error", err.to_string())
                }
            },
            ApiError::Delivery(err) => match err {
                DeliveryError::AssetNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "not_found", err.to_string())
                }
                DeliveryError::InvalidName { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_name", err.to_string())
                }
                DeliveryError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", err.to_string())
                }
                DeliveryError::Encode { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "encode_error", err.to_string())
                }
            },
            ApiError::Ledger(err) => match err {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                StoreError::InvalidName(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_name", err.to_string())
                }
                StoreError::Io(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", err.to_string())
                }
            },
            ApiError::BadRequest {
                error_type,
                message,
            } => (StatusCode::BAD_REQUEST, *error_type, message.clone()),
            ApiError::MissingCaller => (
                StatusCode::UNAUTHORIZED,
                "missing_caller",
                format!("Missing {} header", CALLER_ID_HEADER),
            ),
            ApiError::PaymentRequired { name } => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_required",
                format!("Full-resolution access to {} requires payment", name),
            ),
            ApiError::Forbidden { name } => (
                StatusCode::FORBIDDEN,
                "forbidden",
                format!("Not allowed to modify {}", name),
            ),
            ApiError::DownloadsDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "downloads_disabled",
                "Download links are not configured".to_string(),
            ),
        }
    }
}

/// Convert handler errors to HTTP responses.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG, other 4xx at WARN.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/process`
///
/// Counts as a batch of one against the caller's quota.
///
/// - `200 OK`: JSON [`ProcessResponse`]
/// - `400 Bad Request`: Undecodable or oversized image
/// - `429 Too Many Requests`: Quota exhausted
pub async fn process_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let item = request.into_item(state.max_upload_bytes)?;
    let success = state.dispatcher.process(&caller, item).await?;

    info!(
        caller = %caller.caller_id,
        asset = %success.asset_name,
        style = %success.label,
        elapsed_ms = success.elapsed.as_millis() as u64,
        "Processed image"
    );
    Ok(Json(success.into()))
}

/// `POST /api/batch`
///
/// Items that fail to decode are reported in place and are not counted
/// against the quota.
///
/// - `200 OK`: JSON [`BatchResponse`], one entry per submitted item
/// - `400 Bad Request`: Empty or oversized batch
/// - `429 Too Many Requests`: Quota cannot absorb the batch
pub async fn batch_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let total = request.items.len();
    if total == 0 || total > state.max_batch_items {
        return Err(ApiError::BadRequest {
            error_type: "invalid_batch",
            message: format!("A batch holds 1 to {} items, got {}", state.max_batch_items, total),
        });
    }

    let mut slots: Vec<Option<BatchItemResponse>> = Vec::with_capacity(total);
    let mut positions = Vec::new();
    let mut items = Vec::new();
    for (index, entry) in request.items.into_iter().enumerate() {
        match entry.into_item(state.max_upload_bytes) {
            Ok(item) => {
                positions.push(index);
                items.push(item);
                slots.push(None);
            }
            Err(e) => slots.push(Some(BatchItemResponse::failure(index, e.parts().2))),
        }
    }

    let results = state.dispatcher.dispatch(&caller, items).await?;
    for (result, index) in results.into_iter().zip(positions) {
        let entry = match result.outcome {
            BatchOutcome::Success(success) => BatchItemResponse {
                index,
                success: true,
                result: Some(success.into()),
                error: None,
            },
            BatchOutcome::Failure { reason } => BatchItemResponse::failure(index, reason),
        };
        slots[index] = Some(entry);
    }

    let results = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| BatchItemResponse::failure(index, "Item was not processed"))
        })
        .collect();
    Ok(Json(BatchResponse { results }))
}

/// `GET /assets/{name}?variant=full|thumb`
///
/// Serves the base asset to entitled callers asking for the full rendition,
/// a cached variant otherwise.
///
/// # Headers
///
/// - `Content-Type: image/jpeg`
/// - `Cache-Control: private, max-age={cache_max_age}`
/// - `X-Cache-Hit: true|false`
pub async fn asset_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    Query(query): Query<AssetQueryParams>,
) -> Result<Response, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let entitled = state.is_entitled(&caller, &name).await?;
    let response = state.delivery.fetch(&name, query.variant, entitled).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, response.content_type.to_string()),
            (
                header::CACHE_CONTROL,
                format!("private, max-age={}", state.cache_max_age),
            ),
            (
                HeaderName::from_static(CACHE_HIT_HEADER),
                response.cache_hit.to_string(),
            ),
        ],
        Body::from(response.data),
    )
        .into_response())
}

/// `GET /assets/{name}/animation`
pub async fn animation_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let entitled = state.is_entitled(&caller, &name).await?;
    let gif = state.delivery.animation(&name, entitled).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, OutputFormat::Gif.content_type().to_string()),
            (
                header::CACHE_CONTROL,
                format!("private, max-age={}", state.cache_max_age),
            ),
        ],
        Body::from(gif),
    )
        .into_response())
}

/// `POST /api/assets/{name}/download-link?format=&quality=`
///
/// - `200 OK`: JSON [`SignedLink`]
/// - `402 Payment Required`: Caller is not entitled to the asset
/// - `404 Not Found`: Asset does not exist
pub async fn download_link_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    Query(query): Query<DownloadQueryParams>,
) -> Result<Json<SignedLink>, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let signer = state.signer.as_ref().ok_or(ApiError::DownloadsDisabled)?;
    let (format, quality) = query.parse()?;

    if !state.is_entitled(&caller, &name).await? {
        return Err(ApiError::PaymentRequired { name });
    }
    state
        .delivery
        .store()
        .read_asset(&name)
        .await
        .map_err(|e| DeliveryError::from_store(&name, e))?;

    let link = signer.download_link(&state.public_url, &name, format, quality, state.download_ttl);
    debug!(caller = %caller.caller_id, asset = %name, format = %format, "Issued download link");
    Ok(Json(link))
}

/// `GET /download/{name}?format=&quality=&exp=&sig=`
///
/// Only reachable through the signature middleware.
pub async fn download_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Path(name): Path<String>,
    Query(query): Query<DownloadQueryParams>,
) -> Result<Response, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let (format, quality) = query.parse()?;
    let response = state.delivery.download(&name, format, quality).await?;

    let stem = name.rsplit_once('.').map_or(name.as_str(), |(stem, _)| stem);
    let disposition = format!("attachment; filename=\"{}.{}\"", stem, format.extension());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, response.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        Body::from(response.data),
    )
        .into_response())
}

/// `DELETE /api/assets/{name}`
///
/// Allowed for the caller who produced the asset and for admins. Viewing
/// entitlement does not grant deletion.
pub async fn delete_handler<S, L>(
    State(state): State<AppState<S, L>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    let owner = state.ledger().is_owner(&caller.caller_id, &name).await?;
    if !owner && caller.tier != AccountTier::Admin {
        return Err(ApiError::Forbidden { name });
    }

    state.delivery.delete_asset(&name).await?;
    info!(caller = %caller.caller_id, asset = %name, "Deleted asset");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tests
// =============================================================================
