//! Color-space conversions, per-pixel grading and compositing.

use image::{GrayImage, RgbImage};

use super::raster::to_u8;

// =============================================================================
// HSV
// =============================================================================

/// RGB (0-255) to HSV with hue in degrees and saturation/value in `[0, 1]`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| f32::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };

    [h, s, max]
}

/// Inverse of [`rgb_to_hsv`].
pub fn hsv_to_rgb(hsv: [f32; 3]) -> [u8; 3] {
    let [h, s, v] = hsv;
    let c = v * s;
    let hp = (h / 60.0).rem_euclid(6.0);
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [
        to_u8((r + m) * 255.0),
        to_u8((g + m) * 255.0),
        to_u8((b + m) * 255.0),
    ]
}

/// Multiply saturation and value, clipping both to their range.
pub fn boost_hsv(img: &RgbImage, saturation: f32, value: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let [h, s, v] = rgb_to_hsv(px.0);
        px.0 = hsv_to_rgb([h, (s * saturation).min(1.0), (v * value).min(1.0)]);
    }
    out
}

// =============================================================================
// Tone Curves
// =============================================================================

/// Apply a 256-entry lookup table to every channel.
pub fn apply_lut(img: &RgbImage, lut: &[u8; 256]) -> RgbImage {
    let mut out = img.clone();
    for v in out.iter_mut() {
        *v = lut[usize::from(*v)];
    }
    out
}

/// Gamma lift table: `out = (in / 255)^(1 / gamma) * 255`, truncated.
pub fn gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0).clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Linear contrast: `alpha * x + beta`, saturated to 0-255.
pub fn scale_abs(img: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = img.clone();
    for v in out.iter_mut() {
        *v = to_u8((alpha * f32::from(*v) + beta).abs());
    }
    out
}

/// Classic 3x3 sepia matrix.
pub fn sepia(img: &RgbImage) -> RgbImage {
    const M: [[f32; 3]; 3] = [
        [0.393, 0.769, 0.189],
        [0.349, 0.686, 0.168],
        [0.272, 0.534, 0.131],
    ];
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let [r, g, b] = px.0.map(f32::from);
        px.0 = M.map(|row| to_u8(row[0] * r + row[1] * g + row[2] * b));
    }
    out
}

// =============================================================================
// YCbCr (full range, BT.601)
// =============================================================================

pub fn rgb_to_ycbcr(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 + 0.564 * (b - y);
    let cr = 128.0 + 0.713 * (r - y);
    [y, cb, cr]
}

pub fn ycbcr_to_rgb(ycc: [f32; 3]) -> [u8; 3] {
    let [y, cb, cr] = ycc;
    let r = y + 1.403 * (cr - 128.0);
    let g = y - 0.714 * (cr - 128.0) - 0.344 * (cb - 128.0);
    let b = y + 1.773 * (cb - 128.0);
    [to_u8(r), to_u8(g), to_u8(b)]
}

// =============================================================================
// CIE Lab (8-bit scaled: L * 255 / 100, a + 128, b + 128)
// =============================================================================

const WHITE_X: f32 = 0.950_456;
const WHITE_Z: f32 = 1.088_754;

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > 0.008_856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

#[inline]
fn lab_f_inv(t: f32) -> f32 {
    let cube = t * t * t;
    if cube > 0.008_856 {
        cube
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

/// sRGB to Lab in the 8-bit scaled representation (all channels 0-255).
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(f32::from(c) / 255.0));

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > 0.008_856 {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };

    [
        l * 255.0 / 100.0,
        500.0 * (fx - fy) + 128.0,
        200.0 * (fy - fz) + 128.0,
    ]
}

/// Inverse of [`rgb_to_lab`]; out-of-gamut results are clipped.
pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let l = lab[0] * 100.0 / 255.0;
    let a = lab[1] - 128.0;
    let b = lab[2] - 128.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > 903.3 * 0.008_856 {
        fy * fy * fy
    } else {
        l / 903.3
    };
    let x = lab_f_inv(fx) * WHITE_X;
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [r, g, bl].map(|c| to_u8(linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0))
}

// =============================================================================
// Compositing
// =============================================================================

/// `alpha * a + beta * b + gamma`, saturated.
pub fn add_weighted(a: &RgbImage, alpha: f32, b: &RgbImage, beta: f32, gamma: f32) -> RgbImage {
    let mut out = a.clone();
    for (dst, &src) in out.iter_mut().zip(b.as_raw().iter()) {
        *dst = to_u8(alpha * f32::from(*dst) + beta * f32::from(src) + gamma);
    }
    out
}

/// Zero every pixel whose mask sample is zero.
pub fn mask_keep(img: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = img.clone();
    for (px, m) in out.pixels_mut().zip(mask.iter()) {
        if *m == 0 {
            px.0 = [0, 0, 0];
        }
    }
    out
}

/// Paint black ink wherever `edges` is set.
pub fn ink(img: &RgbImage, edges: &GrayImage) -> RgbImage {
    let mut out = img.clone();
    for (px, e) in out.pixels_mut().zip(edges.iter()) {
        if *e != 0 {
            px.0 = [0, 0, 0];
        }
    }
    out
}

/// Per-channel product with a grayscale layer: `img * layer / 255`.
pub fn multiply_gray(img: &RgbImage, layer: &GrayImage) -> RgbImage {
    let mut out = img.clone();
    for (px, l) in out.pixels_mut().zip(layer.iter()) {
        let f = f32::from(*l) / 255.0;
        px.0 = px.0.map(|c| to_u8(f32::from(c) * f));
    }
    out
}
