//! Signed download links.
//!
//! Full-resolution downloads are only reachable through temporary links that
//! the server issues after checking entitlement. A link carries an HMAC-SHA256
//! signature over the path and query parameters (excluding `sig`):
//!
//! ```text
//! signature = HMAC-SHA256(secret_key, "{path}?{canonical_query}")
//! ```
//!
//! The canonical query is the parameters sorted by key then value, and always
//! includes `exp` (Unix epoch seconds):
//!
//! ```text
//! /download/processed_3f2a.jpg?format=png&exp=1735689600&sig=abc123...
//! ```
//!
//! Signatures are compared in constant time. A link that verifies implies the
//! caller was entitled when it was issued.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{OriginalUri, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::handlers::ErrorResponse;
use crate::asset::OutputFormat;

/// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The signing secret is empty
    InvalidKey,

    MissingSignature,

    MissingExpiry,

    /// Link has expired
    Expired { expired_at: u64, current_time: u64 },

    InvalidSignature,

    /// Signature is not valid hex (or appears twice)
    InvalidSignatureFormat,

    /// Expiry is not an integer (or appears twice)
    InvalidExpiryFormat,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidKey => write!(f, "Signing secret must not be empty"),
            AuthError::MissingSignature => write!(f, "Missing signature parameter"),
            AuthError::MissingExpiry => write!(f, "Missing expiry parameter"),
            AuthError::Expired {
                expired_at,
                current_time,
            } => write!(
                f,
                "Link expired at {} (current time: {})",
                expired_at, current_time
            ),
            AuthError::InvalidSignature => write!(f, "Invalid signature"),
            AuthError::InvalidSignatureFormat => write!(f, "Invalid signature format"),
            AuthError::InvalidExpiryFormat => write!(f, "Invalid expiry format"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::InvalidKey => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_key"),
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "missing_signature"),
            AuthError::MissingExpiry => (StatusCode::UNAUTHORIZED, "missing_expiry"),
            AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "link_expired"),
            AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "invalid_signature_format")
            }
            AuthError::InvalidExpiryFormat => (StatusCode::BAD_REQUEST, "invalid_expiry_format"),
        };
        let message = self.to_string();

        // Forged signatures are worth noticing; expired links are routine
        match &self {
            AuthError::InvalidSignature | AuthError::InvalidKey => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Download authorization failed: {}",
                    message
                );
            }
            _ => {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Download authorization failed: {}",
                    message
                );
            }
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Signer
// =============================================================================

/// A temporary download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedLink {
    pub url: String,
    /// Unix epoch seconds after which the link is rejected
    pub expires: u64,
}

/// Issues and verifies signed download links.
#[derive(Clone)]
pub struct DownloadSigner {
    mac: HmacSha256,
}

impl fmt::Debug for DownloadSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadSigner").finish_non_exhaustive()
    }
}

impl DownloadSigner {
    pub fn new(secret_key: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let key = secret_key.as_ref();
        if key.is_empty() {
            return Err(AuthError::InvalidKey);
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| AuthError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Path of the download route for an asset.
    pub fn download_path(asset_name: &str) -> String {
        format!("/download/{}", asset_name)
    }

    /// Signed link to download `asset_name` in `format`, valid for `ttl`.
    pub fn download_link(
        &self,
        base_url: &str,
        asset_name: &str,
        format: OutputFormat,
        quality: Option<u8>,
        ttl: Duration,
    ) -> SignedLink {
        let quality = quality.map(|q| q.to_string());
        let mut params = vec![("format", format.as_str())];
        if let Some(q) = quality.as_deref() {
            params.push(("quality", q));
        }

        let expires = unix_now().saturating_add(ttl.as_secs());
        let url = self.signed_url(base_url, &Self::download_path(asset_name), expires, &params);
        SignedLink { url, expires }
    }

    /// Sign a path and parameters with a specific expiry.
    ///
    /// `params` should exclude `exp` and `sig`; `exp` is added automatically.
    pub fn sign_with_expiry(&self, path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
        let mut mac = self.mac.clone();
        mac.update(signature_base(path, expiry, params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Full URL with `exp` and `sig` appended.
    pub fn signed_url(
        &self,
        base_url: &str,
        path: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> String {
        let signature = self.sign_with_expiry(path, expiry, params);

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("exp", &expiry.to_string());
        serializer.append_pair("sig", &signature);

        format!(
            "{}{}?{}",
            base_url.trim_end_matches('/'),
            path,
            serializer.finish()
        )
    }

    /// Verify a signature for a path, expiry and parameters.
    pub fn verify(
        &self,
        path: &str,
        signature: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> Result<(), AuthError> {
        let current_time = unix_now();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;

        let mut mac = self.mac.clone();
        mac.update(signature_base(path, expiry, params).as_bytes());
        let expected = mac.finalize().into_bytes();

        if provided.ct_eq(expected.as_slice()).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn signature_base(path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    pairs.push(("exp".to_string(), expiry.to_string()));
    pairs.sort();

    let canonical = pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, canonical)
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Reject requests whose `sig`/`exp` do not verify against the full path and
/// the remaining query parameters.
pub async fn verify_download(
    State(signer): State<DownloadSigner>,
    OriginalUri(original_uri): OriginalUri,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let query = original_uri.query().unwrap_or("");
    let mut signature: Option<String> = None;
    let mut expiry: Option<u64> = None;
    let mut extra_params: Vec<(String, String)> = Vec::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sig" => {
                if signature.is_some() {
                    return Err(AuthError::InvalidSignatureFormat);
                }
                signature = Some(value.into_owned());
            }
            "exp" => {
                if expiry.is_some() {
                    return Err(AuthError::InvalidExpiryFormat);
                }
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| AuthError::InvalidExpiryFormat)?;
                expiry = Some(parsed);
            }
            _ => extra_params.push((key.into_owned(), value.into_owned())),
        }
    }

    let signature = signature.ok_or(AuthError::MissingSignature)?;
    let expiry = expiry.ok_or(AuthError::MissingExpiry)?;

    let params: Vec<(&str, &str)> = extra_params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    signer.verify(original_uri.path(), &signature, expiry, &params)?;

    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================
