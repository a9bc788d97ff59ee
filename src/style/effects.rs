//! Post-process treatments applied to an image after resizing: background
//! replacement, color-profile ("DNA") transfer and the breathing animation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use serde::Serialize;
use tracing::{debug, warn};

use super::color::{lab_to_rgb, rgb_to_lab};
use super::raster::to_u8;
use super::segment::mask_or_fallback;

// =============================================================================
// Background Plates
// =============================================================================

/// Named backdrops for background replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Plate {
    Tokyo,
    Cyberpunk,
    Forest,
}

impl Plate {
    pub const ALL: [Plate; 3] = [Plate::Tokyo, Plate::Cyberpunk, Plate::Forest];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Plate::Tokyo => "tokyo",
            Plate::Cyberpunk => "cyberpunk",
            Plate::Forest => "forest",
        }
    }

    /// Sky and ground colors of the procedural rendition.
    const fn palette(&self) -> ([u8; 3], [u8; 3], [u8; 3]) {
        match self {
            Plate::Tokyo => ([38, 30, 88], [232, 120, 96], [26, 22, 40]),
            Plate::Cyberpunk => ([20, 6, 48], [236, 40, 160], [8, 200, 220]),
            Plate::Forest => ([176, 214, 170], [64, 128, 60], [22, 58, 28]),
        }
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Plate::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown background plate: {}", s))
    }
}

/// Source of plate imagery: files in an optional directory, procedural
/// gradients otherwise.
#[derive(Debug, Clone, Default)]
pub struct PlateLibrary {
    dir: Option<PathBuf>,
}

impl PlateLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Plate rendered at exactly `width` x `height`.
    pub fn render(&self, plate: Plate, width: u32, height: u32) -> RgbImage {
        if let Some(img) = self.load(plate) {
            return imageops::resize(&img, width, height, FilterType::Triangle);
        }
        procedural_plate(plate, width, height)
    }

    fn load(&self, plate: Plate) -> Option<RgbImage> {
        let dir = self.dir.as_ref()?;
        for ext in ["png", "jpg", "jpeg"] {
            let path = dir.join(format!("{}.{}", plate.as_str(), ext));
            if !path.is_file() {
                continue;
            }
            match image::open(&path) {
                Ok(img) => return Some(img.into_rgb8()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load background plate")
                }
            }
        }
        debug!(plate = %plate, "No plate file found, using procedural plate");
        None
    }
}

/// Three-stop vertical gradient: sky, horizon, ground.
fn procedural_plate(plate: Plate, width: u32, height: u32) -> RgbImage {
    let (sky, horizon, ground) = plate.palette();
    let lerp = |a: [u8; 3], b: [u8; 3], t: f32| -> Rgb<u8> {
        Rgb([0, 1, 2].map(|c| to_u8(f32::from(a[c]) + (f32::from(b[c]) - f32::from(a[c])) * t)))
    };

    let split = 0.6;
    RgbImage::from_fn(width, height, |_, y| {
        let t = if height > 1 {
            y as f32 / (height - 1) as f32
        } else {
            0.0
        };
        if t < split {
            lerp(sky, horizon, t / split)
        } else {
            lerp(horizon, ground, (t - split) / (1.0 - split))
        }
    })
}

/// Alpha-composite `foreground` over `background` using a 0-255 mask.
pub fn composite(foreground: &RgbImage, background: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = foreground.clone();
    for ((px, bg), m) in out
        .pixels_mut()
        .zip(background.pixels())
        .zip(mask.iter())
    {
        let a = f32::from(*m) / 255.0;
        for c in 0..3 {
            px.0[c] = (f32::from(px.0[c]) * a + f32::from(bg.0[c]) * (1.0 - a)) as u8;
        }
    }
    out
}

/// Replace the background of `img` with the named plate.
///
/// Unknown plate names leave the image untouched.
pub fn replace_background(img: &RgbImage, plate: &str, library: &PlateLibrary) -> RgbImage {
    let plate = match plate.parse::<Plate>() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Background replacement skipped");
            return img.clone();
        }
    };

    let (w, h) = img.dimensions();
    let backdrop = library.render(plate, w, h);
    let mask = mask_or_fallback(img);
    composite(img, &backdrop, &mask)
}

// =============================================================================
// Color Profile Transfer
// =============================================================================

/// Per-channel mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMoments {
    pub mean: [f64; 3],
    pub std: [f64; 3],
}

impl ChannelMoments {
    pub fn of(samples: &[[f32; 3]]) -> Self {
        let n = samples.len().max(1) as f64;
        let mut mean = [0f64; 3];
        for s in samples {
            for c in 0..3 {
                mean[c] += f64::from(s[c]);
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = [0f64; 3];
        for s in samples {
            for c in 0..3 {
                var[c] += (f64::from(s[c]) - mean[c]).powi(2);
            }
        }
        let std = var.map(|v| (v / n).sqrt());
        Self { mean, std }
    }
}

/// Lab samples of an image in the 8-bit scaled representation.
pub fn lab_samples(img: &RgbImage) -> Vec<[f32; 3]> {
    img.pixels().map(|p| rgb_to_lab(p.0)).collect()
}

/// Match the Lab mean and standard deviation of `target` to `reference`.
pub fn dna_transfer(target: &RgbImage, reference: &RgbImage) -> RgbImage {
    let target_lab = lab_samples(target);
    let t = ChannelMoments::of(&target_lab);
    let r = ChannelMoments::of(&lab_samples(reference));

    let mut out = target.clone();
    for (px, lab) in out.pixels_mut().zip(target_lab.iter()) {
        let mut shifted = [0f32; 3];
        for c in 0..3 {
            let z = (f64::from(lab[c]) - t.mean[c]) / (t.std[c] + 1e-5);
            shifted[c] = (z * r.std[c] + r.mean[c]).clamp(0.0, 255.0) as f32;
        }
        px.0 = lab_to_rgb(shifted);
    }
    out
}

// =============================================================================
// Breathing Animation
// =============================================================================

/// Frames in one breathing cycle.
pub const BREATH_FRAMES: usize = 15;

/// Peak deviation of the zoom around its midpoint.
const ZOOM_AMPLITUDE: f32 = 0.03;

/// Peak deviation of the brightness pulse.
const BRIGHTNESS_AMPLITUDE: f32 = 0.05;

/// Zoom and brightness factors for frame `i`.
///
/// The zoom oscillates between 1.0 and 1.06 so every frame can be cropped
/// back to the source size without padding.
pub fn breath_factors(i: usize) -> (f32, f32) {
    let phase = (i as f32 * std::f32::consts::PI / 7.5).sin();
    (
        1.0 + ZOOM_AMPLITUDE + ZOOM_AMPLITUDE * phase,
        1.0 + BRIGHTNESS_AMPLITUDE * phase,
    )
}

/// Render the frames of a looping zoom/brightness pulse.
pub fn breathe(img: &RgbImage) -> Vec<RgbImage> {
    let (w, h) = img.dimensions();
    (0..BREATH_FRAMES)
        .map(|i| {
            let (zoom, brightness) = breath_factors(i);
            let nw = ((w as f32 * zoom) as u32).max(w);
            let nh = ((h as f32 * zoom) as u32).max(h);

            let scaled = if (nw, nh) == (w, h) {
                img.clone()
            } else {
                imageops::resize(img, nw, nh, FilterType::Lanczos3)
            };
            let (left, top) = ((nw - w) / 2, (nh - h) / 2);
            let mut frame = imageops::crop_imm(&scaled, left, top, w, h).to_image();

            for v in frame.iter_mut() {
                *v = to_u8(f32::from(*v) * brightness);
            }
            frame
        })
        .collect()
}
