//! The style engine: decode, bound, treat, measure.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effects::{breathe, dna_transfer, replace_background, PlateLibrary};
use super::pipelines::Style;
use super::quantize::StyleRng;
use super::raster::{decode, fit_within};
use super::stats::ImageStats;
use crate::error::StyleError;

/// Default bounds for the standard tier (720p).
pub const STANDARD_BOUNDS: (u32, u32) = (1280, 720);

/// Default bounds for the premium tier (4K UHD).
pub const PREMIUM_BOUNDS: (u32, u32) = (3840, 2160);

// =============================================================================
// Requests
// =============================================================================

/// Output resolution class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    #[default]
    Standard,
    Premium,
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionTier::Standard => f.write_str("standard"),
            ResolutionTier::Premium => f.write_str("premium"),
        }
    }
}

impl FromStr for ResolutionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ResolutionTier::Standard),
            "premium" => Ok(ResolutionTier::Premium),
            other => Err(format!("unknown resolution tier: {}", other)),
        }
    }
}

/// What to do with the decoded image.
#[derive(Debug, Clone, PartialEq)]
pub enum Treatment {
    /// One of the stylization pipelines
    Stylize(Style),
    /// Cut out the subject and place it on a named plate
    ReplaceBackground { plate: String },
    /// Adopt the Lab color profile of an encoded reference image
    DnaTransfer { reference: Bytes },
}

impl Treatment {
    /// Short label used in logs and history events.
    pub fn label(&self) -> String {
        match self {
            Treatment::Stylize(style) => style.to_string(),
            Treatment::ReplaceBackground { plate } => format!("teleport:{}", plate),
            Treatment::DnaTransfer { .. } => "style_dna".to_string(),
        }
    }
}

/// A single stylization request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRequest {
    pub treatment: Treatment,
    pub tier: ResolutionTier,
}

impl StyleRequest {
    pub fn new(treatment: Treatment, tier: ResolutionTier) -> Self {
        Self { treatment, tier }
    }

    /// Stylize with the pipeline named by `identifier`, falling back to
    /// cartoon for unknown names.
    pub fn from_identifier(identifier: &str, tier: ResolutionTier) -> Self {
        Self::new(Treatment::Stylize(Style::resolve(identifier)), tier)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Output of one engine call.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub image: RgbImage,
    pub elapsed: Duration,
    /// Statistics of the decoded input before resizing
    pub input_stats: Option<ImageStats>,
    pub output_stats: Option<ImageStats>,
}

// =============================================================================
// Engine
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub standard_bounds: (u32, u32),
    pub premium_bounds: (u32, u32),
    /// Fixed quantizer seed; `None` draws fresh entropy per call
    pub seed: Option<u64>,
    pub with_stats: bool,
    pub plates: PlateLibrary,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            standard_bounds: STANDARD_BOUNDS,
            premium_bounds: PREMIUM_BOUNDS,
            seed: None,
            with_stats: true,
            plates: PlateLibrary::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_bounds(mut self, standard: (u32, u32), premium: (u32, u32)) -> Self {
        self.standard_bounds = standard;
        self.premium_bounds = premium;
        self
    }

    pub fn with_plates(mut self, plates: PlateLibrary) -> Self {
        self.plates = plates;
        self
    }

    pub fn bounds(&self, tier: ResolutionTier) -> (u32, u32) {
        match tier {
            ResolutionTier::Standard => self.standard_bounds,
            ResolutionTier::Premium => self.premium_bounds,
        }
    }
}

/// Stateless stylization engine. Cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct StyleEngine {
    config: EngineConfig,
}

impl StyleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decode caller bytes and run the request.
    pub fn process(
        &self,
        bytes: &[u8],
        request: &StyleRequest,
    ) -> Result<ProcessingResult, StyleError> {
        let image = decode(bytes)?;
        self.process_image(image, request)
    }

    /// Run the request on an already decoded image.
    pub fn process_image(
        &self,
        image: RgbImage,
        request: &StyleRequest,
    ) -> Result<ProcessingResult, StyleError> {
        let input_stats = self.config.with_stats.then(|| ImageStats::of(&image));

        let start = Instant::now();
        let (max_w, max_h) = self.config.bounds(request.tier);
        let source = (image.width(), image.height());
        let image = fit_within(image, max_w, max_h);

        let output = match &request.treatment {
            Treatment::Stylize(style) => style.apply(&image, &mut self.rng()),
            Treatment::ReplaceBackground { plate } => {
                replace_background(&image, plate, &self.config.plates)
            }
            Treatment::DnaTransfer { reference } => {
                let reference = decode(reference)?;
                dna_transfer(&image, &reference)
            }
        };
        let elapsed = start.elapsed();

        debug!(
            treatment = %request.treatment.label(),
            tier = %request.tier,
            source_width = source.0,
            source_height = source.1,
            width = output.width(),
            height = output.height(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Processed image"
        );

        let output_stats = self.config.with_stats.then(|| ImageStats::of(&output));
        Ok(ProcessingResult {
            image: output,
            elapsed,
            input_stats,
            output_stats,
        })
    }

    /// Frames of the breathing animation for an image.
    pub fn animate(&self, image: &RgbImage) -> Vec<RgbImage> {
        breathe(image)
    }

    fn rng(&self) -> StyleRng {
        match self.config.seed {
            Some(seed) => StyleRng::seeded(seed),
            None => StyleRng::from_entropy(),
        }
    }
}
