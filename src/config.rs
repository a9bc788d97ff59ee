//! Configuration management for Toonify.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TOONIFY_` prefix:
//!
//! - `TOONIFY_HOST` - Server bind address (default: 0.0.0.0)
//! - `TOONIFY_PORT` - Server port (default: 3000)
//! - `TOONIFY_DATA_DIR` - Root of stored assets and variants (default: ./data)
//! - `TOONIFY_JPEG_QUALITY` - Quality of stored assets and variants (default: 95)
//! - `TOONIFY_THUMB_WIDTH` - Thumbnail width in pixels (default: 320)
//! - `TOONIFY_CACHE_BYTES` - Memory tier of the variant cache (default: 64MB)
//! - `TOONIFY_DAILY_LIMIT` - Items per day for free callers (default: 5)
//! - `TOONIFY_MAX_UPLOAD_BYTES` - Largest accepted image (default: 10MB)
//! - `TOONIFY_DOWNLOAD_SECRET` - HMAC secret for download links (required)
//! - `TOONIFY_DOWNLOAD_TTL` - Download link lifetime in seconds (default: 3600)
//! - `TOONIFY_PLATES_DIR` - Directory of background plate images
//! - `TOONIFY_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `TOONIFY_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::asset::{
    is_valid_quality, OutputFormat, DEFAULT_JPEG_QUALITY, DEFAULT_THUMBNAIL_WIDTH,
    DEFAULT_VARIANT_CACHE_CAPACITY,
};
use crate::batch::DEFAULT_DAILY_LIMIT;
use crate::server::{DEFAULT_MAX_BATCH_ITEMS, DEFAULT_MAX_UPLOAD_BYTES};
use crate::store::validate_asset_name;
use crate::style::ResolutionTier;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default download link lifetime in seconds (1 hour).
pub const DEFAULT_DOWNLOAD_TTL_SECS: u64 = 3600;

// =============================================================================
// CLI
// =============================================================================

/// Toonify - image stylization engine and asset server.
#[derive(Parser, Debug, Clone)]
#[command(name = "toonify")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeConfig),

    /// Stylize a single local image.
    Stylize(StylizeConfig),

    /// Generate a signed download link for a stored asset.
    Sign(SignConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TOONIFY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TOONIFY_PORT")]
    pub port: u16,

    /// Directory holding `assets/` and `variants/`.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "TOONIFY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Directory with `<plate>.png|jpg` background images.
    ///
    /// Plates missing from the directory are generated procedurally.
    #[arg(long, env = "TOONIFY_PLATES_DIR")]
    pub plates_dir: Option<PathBuf>,

    // =========================================================================
    // Processing Configuration
    // =========================================================================
    /// JPEG quality of stored assets and cached variants (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TOONIFY_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Items a free caller may process per 24 hours.
    #[arg(long, default_value_t = DEFAULT_DAILY_LIMIT, env = "TOONIFY_DAILY_LIMIT")]
    pub daily_limit: u32,

    /// Largest accepted decoded image in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "TOONIFY_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// Most items accepted in one batch.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_ITEMS, env = "TOONIFY_MAX_BATCH_ITEMS")]
    pub max_batch_items: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Thumbnail width in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_WIDTH, env = "TOONIFY_THUMB_WIDTH")]
    pub thumb_width: u32,

    /// Memory tier of the variant cache in bytes.
    #[arg(long, default_value_t = DEFAULT_VARIANT_CACHE_CAPACITY, env = "TOONIFY_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TOONIFY_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Download Configuration
    // =========================================================================
    /// Secret key for HMAC-SHA256 signed download links.
    #[arg(long, env = "TOONIFY_DOWNLOAD_SECRET")]
    pub download_secret: Option<String>,

    /// Download link lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_TTL_SECS, env = "TOONIFY_DOWNLOAD_TTL")]
    pub download_ttl: u64,

    /// Prefix of issued download links (e.g. https://toonify.example).
    #[arg(long, default_value = "", env = "TOONIFY_PUBLIC_URL")]
    pub public_url: String,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TOONIFY_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.download_secret.as_deref().map_or(true, str::is_empty) {
            return Err(
                "No download secret provided. Set --download-secret or TOONIFY_DOWNLOAD_SECRET"
                    .to_string(),
            );
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.thumb_width == 0 {
            return Err("thumb_width must be greater than 0".to_string());
        }
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }
        if self.daily_limit == 0 {
            return Err("daily_limit must be greater than 0".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("max_upload_bytes must be greater than 0".to_string());
        }
        if self.max_batch_items == 0 {
            return Err("max_batch_items must be greater than 0".to_string());
        }
        if self.download_ttl == 0 {
            return Err("download_ttl must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    pub fn variants_dir(&self) -> PathBuf {
        self.data_dir.join("variants")
    }

    pub fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.download_ttl)
    }
}

// =============================================================================
// Stylize
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct StylizeConfig {
    /// Input image (JPEG or PNG).
    pub input: PathBuf,

    /// Output file.
    pub output: PathBuf,

    /// Style identifier; unknown names fall back to cartoon.
    #[arg(short, long, default_value = "cartoon")]
    pub style: String,

    /// Resolution tier (standard or premium).
    #[arg(long, default_value = "standard")]
    pub tier: ResolutionTier,

    /// Output container (jpeg, png, pdf, gif). Defaults to the output extension.
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// JPEG quality (1-100).
    #[arg(short, long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub quality: u8,

    /// Fixed seed for color quantization.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Reference image whose colors are transferred instead of a style.
    #[arg(long, conflicts_with = "background")]
    pub reference: Option<PathBuf>,

    /// Background plate (tokyo, cyberpunk, forest) instead of a style.
    #[arg(long)]
    pub background: Option<String>,

    /// Directory with background plate images.
    #[arg(long, env = "TOONIFY_PLATES_DIR")]
    pub plates_dir: Option<PathBuf>,

    /// Print input and output statistics as JSON.
    #[arg(long, default_value_t = false)]
    pub stats: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StylizeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_quality(self.quality) {
            return Err("quality must be between 1 and 100".to_string());
        }
        Ok(())
    }

    /// Explicit `--format`, else inferred from the output extension, else JPEG.
    pub fn resolve_format(&self) -> OutputFormat {
        self.format
            .or_else(|| format_from_path(&self.output))
            .unwrap_or_default()
    }
}

fn format_from_path(path: &Path) -> Option<OutputFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse().ok())
}

// =============================================================================
// Sign
// =============================================================================

/// Output of the sign command.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// Full URL (or path and query without --base-url)
    #[default]
    Url,
    /// JSON object with url and expiry
    Json,
    /// Signature only
    Signature,
}

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Secret key used by the server.
    #[arg(long, env = "TOONIFY_DOWNLOAD_SECRET")]
    pub secret: String,

    /// Stored asset name (e.g. processed_<uuid>.jpg).
    #[arg(long)]
    pub asset: String,

    /// Link lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_TTL_SECS)]
    pub ttl: u64,

    /// Download container (jpeg, png, pdf).
    #[arg(long, default_value = "jpeg")]
    pub format: OutputFormat,

    /// JPEG quality of the converted download.
    #[arg(long)]
    pub quality: Option<u8>,

    /// Base URL of the server.
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long, value_enum, default_value_t = SignOutputFormat::Url)]
    pub output: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("Secret must not be empty".to_string());
        }
        validate_asset_name(&self.asset).map_err(|e| e.to_string())?;
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        if self.format == OutputFormat::Gif {
            return Err("Downloads are available as jpeg, png or pdf".to_string());
        }
        if let Some(quality) = self.quality {
            if !is_valid_quality(quality) {
                return Err("quality must be between 1 and 100".to_string());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
