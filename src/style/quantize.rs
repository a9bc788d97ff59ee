//! K-means color quantization.
//!
//! The palette is fitted on a downsampled copy of the image (at most
//! [`SAMPLE_EDGE`] pixels per side) and the full-resolution image is then
//! recolored by nearest-center assignment:
//!
//! ```text
//! image ──► downsample ≤150×150 ──► k-means (≤10 iters) ──► palette
//!   │                                                          │
//!   └──────────────────── nearest center per pixel ◄───────────┘
//! ```
//!
//! Centers are seeded from randomly chosen sample pixels. The random source
//! is an explicit [`StyleRng`] so tests can pin a seed; production callers
//! draw a fresh one per call.

use image::imageops::{self, FilterType};
use image::RgbImage;
use uuid::Uuid;

use super::raster::{fit_dimensions, to_u8};

/// Longest side of the copy the palette is fitted on.
pub const SAMPLE_EDGE: u32 = 150;

/// Maximum number of Lloyd iterations.
pub const MAX_ITERATIONS: usize = 10;

/// Iteration stops once no center moves further than this (RGB units).
pub const CONVERGENCE_EPSILON: f32 = 1.0;

// =============================================================================
// Random Source
// =============================================================================

/// Small deterministic generator (SplitMix64) used for center seeding and
/// segmentation initialisation.
#[derive(Debug, Clone)]
pub struct StyleRng {
    state: u64,
}

impl StyleRng {
    /// Generator with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generator seeded from fresh entropy.
    pub fn from_entropy() -> Self {
        // uuid's v4 generator is the only OS entropy source in the dependency tree
        let v = Uuid::new_v4().as_u128();
        Self::seeded((v >> 64) as u64 ^ v as u64)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform index in `0..n` (`n > 0`).
    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n.max(1) as u64) as usize
    }
}

// =============================================================================
// Palette
// =============================================================================

/// A fitted set of representative colors.
#[derive(Debug, Clone)]
pub struct Palette {
    centers: Vec<[f32; 3]>,
}

impl Palette {
    /// Fit at most `k` centers to the colors of `img`.
    pub fn fit(img: &RgbImage, k: usize, rng: &mut StyleRng) -> Self {
        Self::fit_samples(&sample_pixels(img), k, rng)
    }

    /// Fit at most `k` centers to an arbitrary set of colors.
    pub(crate) fn fit_samples(samples: &[[f32; 3]], k: usize, rng: &mut StyleRng) -> Self {
        if samples.is_empty() {
            return Self {
                centers: vec![[0.0; 3]],
            };
        }
        let k = k.max(1).min(samples.len());

        let mut centers: Vec<[f32; 3]> = (0..k)
            .map(|_| samples[rng.below(samples.len())])
            .collect();

        let mut labels = vec![0usize; samples.len()];
        for _ in 0..MAX_ITERATIONS {
            for (label, px) in labels.iter_mut().zip(samples.iter()) {
                *label = nearest_center(&centers, px);
            }

            let mut sums = vec![[0f64; 3]; k];
            let mut counts = vec![0usize; k];
            for (&label, px) in labels.iter().zip(samples.iter()) {
                counts[label] += 1;
                for c in 0..3 {
                    sums[label][c] += f64::from(px[c]);
                }
            }

            let mut max_shift = 0f32;
            for (i, center) in centers.iter_mut().enumerate() {
                // Empty clusters keep their previous center
                if counts[i] == 0 {
                    continue;
                }
                let n = counts[i] as f64;
                let updated = [
                    (sums[i][0] / n) as f32,
                    (sums[i][1] / n) as f32,
                    (sums[i][2] / n) as f32,
                ];
                max_shift = max_shift.max(distance_sq(center, &updated).sqrt());
                *center = updated;
            }

            if max_shift < CONVERGENCE_EPSILON {
                break;
            }
        }

        Self { centers }
    }

    /// Number of centers (duplicates included).
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub(crate) fn centers(&self) -> &[[f32; 3]] {
        &self.centers
    }

    /// Index of the center closest to `px`.
    pub(crate) fn nearest(&self, px: &[f32; 3]) -> usize {
        nearest_center(&self.centers, px)
    }

    /// Centers as 8-bit colors.
    pub fn colors(&self) -> Vec<[u8; 3]> {
        self.centers.iter().map(|c| c.map(to_u8)).collect()
    }

    /// Replace every pixel with its nearest palette color.
    pub fn recolor(&self, img: &RgbImage) -> RgbImage {
        let colors = self.colors();
        let mut out = img.clone();
        for px in out.pixels_mut() {
            let p = px.0.map(f32::from);
            px.0 = colors[nearest_center(&self.centers, &p)];
        }
        out
    }
}

/// Reduce `img` to at most `k` colors.
pub fn quantize(img: &RgbImage, k: usize, rng: &mut StyleRng) -> RgbImage {
    Palette::fit(img, k, rng).recolor(img)
}

fn sample_pixels(img: &RgbImage) -> Vec<[f32; 3]> {
    let (w, h) = fit_dimensions(img.width(), img.height(), SAMPLE_EDGE, SAMPLE_EDGE);
    let pixels = |src: &RgbImage| -> Vec<[f32; 3]> {
        src.pixels().map(|p| p.0.map(f32::from)).collect()
    };
    if (w, h) == img.dimensions() {
        pixels(img)
    } else {
        pixels(&imageops::resize(img, w, h, FilterType::Nearest))
    }
}

#[inline]
fn distance_sq(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

#[inline]
fn nearest_center(centers: &[[f32; 3]], px: &[f32; 3]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (i, c) in centers.iter().enumerate() {
        let d = distance_sq(c, px);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}
