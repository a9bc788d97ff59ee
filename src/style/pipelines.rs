//! The ten stylization pipelines.
//!
//! Every pipeline maps an RGB image to a new RGB image of identical
//! dimensions. Structural parameters of the resolution-aware styles
//! (cartoon, anime, comic book) scale with `width / 1280` so that line
//! weight and dot size look the same at 720p and at 4K.

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma, RgbImage};
use serde::Serialize;
use tracing::warn;

use super::color::{
    add_weighted, apply_lut, boost_hsv, gamma_lut, ink, mask_keep, multiply_gray, rgb_to_ycbcr,
    scale_abs, sepia, ycbcr_to_rgb,
};
use super::filters::{
    adaptive_threshold, canny, dilate, domain_filter, edge_preserving, gaussian_blur,
    gaussian_kernel, median_blur, odd_at_least, plane_to_rgb, stylization,
};
use super::quantize::{quantize, StyleRng};
use super::raster::{gray_to_rgb, invert_gray, luma, to_gray, to_u8};
use crate::error::UnknownStyle;

/// Reference width the resolution-aware parameters are tuned for.
const REFERENCE_WIDTH: f32 = 1280.0;

// =============================================================================
// Style Identifiers
// =============================================================================

/// Supported stylization pipelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    #[default]
    Cartoon,
    Sketch,
    PencilColor,
    OilPainting,
    Watercolor,
    PopArt,
    Vintage,
    Anime,
    Ghibli,
    ComicBook,
}

impl Style {
    pub const ALL: [Style; 10] = [
        Style::Cartoon,
        Style::Sketch,
        Style::PencilColor,
        Style::OilPainting,
        Style::Watercolor,
        Style::PopArt,
        Style::Vintage,
        Style::Anime,
        Style::Ghibli,
        Style::ComicBook,
    ];

    /// Wire identifier.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Style::Cartoon => "cartoon",
            Style::Sketch => "sketch",
            Style::PencilColor => "pencil_color",
            Style::OilPainting => "oil_painting",
            Style::Watercolor => "watercolor",
            Style::PopArt => "pop_art",
            Style::Vintage => "vintage",
            Style::Anime => "anime",
            Style::Ghibli => "ghibli",
            Style::ComicBook => "comic_book",
        }
    }

    /// Parse an identifier, falling back to [`Style::Cartoon`] for anything
    /// outside the supported set.
    pub fn resolve(identifier: &str) -> Style {
        match identifier.parse() {
            Ok(style) => style,
            Err(UnknownStyle(id)) => {
                warn!(style = %id, "Unknown style identifier, using cartoon");
                Style::Cartoon
            }
        }
    }

    /// Run this pipeline.
    pub fn apply(&self, img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
        match self {
            Style::Cartoon => cartoon(img, rng),
            Style::Sketch => sketch(img),
            Style::PencilColor => pencil_color(img),
            Style::OilPainting => oil_painting(img),
            Style::Watercolor => watercolor(img),
            Style::PopArt => pop_art(img, rng),
            Style::Vintage => vintage(img),
            Style::Anime => anime(img, rng),
            Style::Ghibli => ghibli(img, rng),
            Style::ComicBook => comic_book(img, rng),
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim();
        Style::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(id))
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

// =============================================================================
// Pipelines
// =============================================================================

#[inline]
fn scale_factor(img: &RgbImage) -> f32 {
    img.width() as f32 / REFERENCE_WIDTH
}

fn cartoon(img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
    let scale = scale_factor(img);
    let smooth = edge_preserving(img, 60.0, 0.4);

    let gray = median_blur(&to_gray(img), 5);
    let edges = adaptive_threshold(&gray, odd_at_least(9.0 * scale, 3), 2.0);

    let quantized = quantize(&smooth, 8, rng);
    boost_hsv(&mask_keep(&quantized, &edges), 1.2, 1.0)
}

fn sketch(img: &RgbImage) -> RgbImage {
    let gray = to_gray(img);
    let blurred = invert_gray(&gaussian_blur(&invert_gray(&gray), 21));

    // Color dodge: gray * 256 / (255 - blur(255 - gray))
    let mut out = gray.clone();
    for (dst, &den) in out.iter_mut().zip(blurred.iter()) {
        *dst = if den == 0 {
            0
        } else {
            to_u8(f32::from(*dst) * 256.0 / f32::from(den))
        };
    }
    gray_to_rgb(&out)
}

fn pencil_color(img: &RgbImage) -> RgbImage {
    const SHADE_FACTOR: f32 = 0.05;

    let smooth = plane_to_rgb(&domain_filter(img, 60.0, 0.07), img.width(), img.height());
    let ycc: Vec<[f32; 3]> = smooth.pixels().map(|p| rgb_to_ycbcr(p.0)).collect();

    let luma_plane = GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([to_u8(ycc[(y * img.width() + x) as usize][0])])
    });
    let pencil = sketch(&gray_to_rgb(&luma_plane));

    let mut out = smooth;
    for (i, px) in out.pixels_mut().enumerate() {
        let [y, cb, cr] = ycc[i];
        let stroke = f32::from(pencil.as_raw()[i * 3]);
        let shaded = stroke * (1.0 - SHADE_FACTOR) + y * SHADE_FACTOR;
        px.0 = ycbcr_to_rgb([shaded, cb, cr]);
    }
    out
}

fn oil_painting(img: &RgbImage) -> RgbImage {
    let base = stylization(img, 100.0, 0.45);
    let smooth = edge_preserving(&base, 60.0, 0.4);
    boost_hsv(&smooth, 1.3, 1.1)
}

fn watercolor(img: &RgbImage) -> RgbImage {
    let base = stylization(img, 60.0, 0.6);
    let smooth = edge_preserving(&base, 50.0, 0.3);
    boost_hsv(&smooth, 1.4, 1.05)
}

fn pop_art(img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
    let quantized = quantize(img, 6, rng);
    let edges = dilate(&canny(&to_gray(img), 100.0, 200.0), 2);
    ink(&boost_hsv(&quantized, 1.8, 1.2), &edges)
}

fn vintage(img: &RgbImage) -> RgbImage {
    let toned = gaussian_blur(&sepia(img), 3);

    let (w, h) = toned.dimensions();
    let kx = gaussian_kernel_exact(w, w as f32 / 2.0);
    let ky = gaussian_kernel_exact(h, h as f32 / 2.0);
    let peak = kx.iter().cloned().fold(0f32, f32::max) * ky.iter().cloned().fold(0f32, f32::max);

    let mut vignetted = toned;
    for (x, y, px) in vignetted.enumerate_pixels_mut() {
        let m = if peak > 0.0 {
            kx[x as usize] * ky[y as usize] / peak
        } else {
            1.0
        };
        px.0 = px.0.map(|c| (f32::from(c) * m) as u8);
    }

    scale_abs(&vignetted, 0.9, 10.0)
}

/// Gaussian weights of exactly `len` taps (even lengths included).
fn gaussian_kernel_exact(len: u32, sigma: f32) -> Vec<f32> {
    if len % 2 == 1 {
        return gaussian_kernel(len, sigma);
    }
    let center = (len as f32 - 1.0) / 2.0;
    let denom = 2.0 * sigma * sigma;
    (0..len)
        .map(|i| {
            let d = i as f32 - center;
            (-d * d / denom).exp()
        })
        .collect()
}

fn anime(img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
    let scale = scale_factor(img);
    let smooth = edge_preserving(img, 60.0, 0.45);
    let quantized = quantize(&smooth, 12, rng);

    let gray = median_blur(&to_gray(img), 5);
    let mask = adaptive_threshold(&gray, odd_at_least(7.0 * scale, 3), 4.0);
    let inked = mask_keep(&quantized, &mask);

    let glow = gaussian_blur(&inked, odd_at_least(15.0 * scale, 3));
    boost_hsv(&add_weighted(&inked, 0.8, &glow, 0.4, 0.0), 1.6, 1.0)
}

fn ghibli(img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
    let smooth = edge_preserving(img, 50.0, 0.4);
    let quantized = quantize(&smooth, 16, rng);

    let diffuse = gaussian_blur(&quantized, 31);
    let painted = apply_lut(
        &add_weighted(&quantized, 0.85, &diffuse, 0.15, 0.0),
        &gamma_lut(1.2),
    );

    let edges = gaussian_blur(&canny(&to_gray(img), 100.0, 200.0), 3);
    multiply_gray(&painted, &invert_gray(&edges))
}

fn comic_book(img: &RgbImage, rng: &mut StyleRng) -> RgbImage {
    let scale = scale_factor(img);
    let quantized = quantize(&median_blur(img, 5), 8, rng);

    let gray = gaussian_blur(&to_gray(img), 5);
    let edges = dilate(&canny(&gray, 50.0, 150.0), 2);

    let spacing = ((6.0 * scale) as u32).max(4);
    let radius = ((2.0 * scale) as u32).max(1);
    let dots = halftone(&quantized, spacing, radius);

    let graded = boost_hsv(&quantized, 1.6, 1.0);
    let comic = add_weighted(&graded, 0.9, &gray_to_rgb(&dots), 0.1, 0.0);
    ink(&comic, &edges)
}

/// Dot grid drawn only where the underlying image is in shadow.
fn halftone(img: &RgbImage, spacing: u32, radius: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut grid = GrayImage::new(w, h);
    let r = radius as i64;

    for cy in (0..h).step_by(spacing as usize) {
        for cx in (0..w).step_by(spacing as usize) {
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx * dx + dy * dy > r * r {
                        continue;
                    }
                    let (x, y) = (cx as i64 + dx, cy as i64 + dy);
                    if x >= 0 && y >= 0 && x < i64::from(w) && y < i64::from(h) {
                        grid.put_pixel(x as u32, y as u32, Luma([255]));
                    }
                }
            }
        }
    }

    for (x, y, px) in grid.enumerate_pixels_mut() {
        let [r, g, b] = img.get_pixel(x, y).0;
        if luma(r, g, b) >= 128.0 {
            px.0 = [0];
        }
    }
    grid
}
