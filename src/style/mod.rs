//! Style engine.
//!
//! This module turns caller-supplied image bytes into stylized RGB images.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StyleEngine                           │
//! │  decode ─► bound by tier ─► Treatment ─► ProcessingResult    │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!         ┌─────────────────────┼──────────────────────┐
//!         ▼                     ▼                      ▼
//! ┌───────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │   pipelines   │   │     effects      │   │      stats       │
//! │ (ten styles)  │   │ plates, DNA,     │   │ brightness,      │
//! │               │   │ breathing frames │   │ contrast, balance│
//! └───────────────┘   └──────────────────┘   └──────────────────┘
//!         │                     │
//!         ▼                     ▼
//! ┌───────────────┐   ┌──────────────────┐
//! │ filters/color │   │     segment      │
//! │   quantize    │   │ (graph cut)      │
//! └───────────────┘   └──────────────────┘
//! ```
//!
//! All pipelines are synchronous CPU work; async callers run them inside
//! `spawn_blocking`.

mod color;
mod effects;
mod engine;
mod filters;
mod pipelines;
mod quantize;
mod raster;
mod segment;
mod stats;

pub use effects::{
    breath_factors, breathe, composite, dna_transfer, lab_samples, replace_background,
    ChannelMoments, Plate, PlateLibrary, BREATH_FRAMES,
};
pub use engine::{
    EngineConfig, ProcessingResult, ResolutionTier, StyleEngine, StyleRequest, Treatment,
    PREMIUM_BOUNDS, STANDARD_BOUNDS,
};
pub use pipelines::Style;
pub use quantize::{quantize, Palette, StyleRng};
pub use raster::{decode, detect_format, fit_dimensions, fit_within, InputFormat};
pub use segment::{fallback_mask, foreground_mask};
pub use stats::{ColorBalance, ImageStats};
